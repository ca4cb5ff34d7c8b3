//! Session debit loop
//!
//! A session reserves its call one debit period at a time. The first period
//! is debited when the session starts; a background task then debits each
//! following period as a continuation of the call, starting where the last
//! billed cost ended. When credit runs out the session is disconnected. On
//! hangup the increments billed past the hangup instant are refunded, and the
//! increment the hangup falls into is refunded for its unused share.
//!
//! ```text
//! Active --(tick, MaxDebit ok)--> Active
//! Active --(tick, MaxDebit fails)--> Disconnected
//! Active | Disconnected --(hangup)--> Refunding --> Closed
//! ```

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use voxrate_core::models::{CallCost, CallDescriptor, Increment};
use voxrate_core::traits::Storage;
use voxrate_core::utils;
use voxrate_core::{AppError, AppResult};

use crate::constants::SESSION_EVENT_BUFFER;
use crate::rater::Rater;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Active,
    Disconnected,
    Refunding,
    Closed,
}

/// What was given back when a session closed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefundSummary {
    pub increments: usize,
    pub seconds: Decimal,
    pub money: Decimal,
}

/// Notifications for the host
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The call must be torn down, credit is exhausted or debiting failed
    Disconnect { session_id: String, reason: String },
    Closed { session_id: String, refunded: RefundSummary },
}

/// Snapshot of a running session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    /// Descriptor of the last debited period
    pub descriptor: CallDescriptor,
    /// One cost per debited period, in order
    pub call_costs: Vec<CallCost>,
}

impl Session {
    /// Authoritative end of what has been billed so far
    pub fn billed_until(&self) -> Option<DateTime<Utc>> {
        self.call_costs.last().and_then(CallCost::time_end)
    }

    fn next_period(&self, period: Duration) -> Option<CallDescriptor> {
        let call_start = self.call_costs.first()?.time_start()?;
        let start = self.billed_until()?;
        let mut next = self.descriptor.clone();
        next.loop_index += 1;
        next.time_start = start;
        next.time_end = start + period;
        next.call_duration = (start - call_start) + period;
        next.amount = utils::seconds(period);
        Some(next)
    }

    /// Paid increments past `at`, latest first
    ///
    /// An increment running across `at` is cut down to its unused tail.
    fn unused_increments(&self, at: DateTime<Utc>) -> Vec<Increment> {
        let mut unused = Vec::new();
        for cc in self.call_costs.iter().rev() {
            if cc.time_end().map_or(true, |end| end <= at) {
                break;
            }
            for ts in cc.timespans.iter().rev() {
                if ts.time_end <= at {
                    break;
                }
                let mut start = ts.time_start;
                let mut tail = Vec::new();
                for inc in &ts.increments {
                    let end = start + inc.duration;
                    if inc.paid && start >= at {
                        tail.push(inc.clone());
                    } else if inc.paid && end > at {
                        tail.push(inc.tail(end - at));
                    }
                    start = end;
                }
                unused.extend(tail.into_iter().rev());
            }
        }
        unused
    }
}

struct SessionEntry {
    session: Arc<Mutex<Session>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Runs debit loops for live calls
pub struct SessionManager<S: Storage> {
    rater: Arc<Rater<S>>,
    period: Duration,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    events: mpsc::Sender<SessionEvent>,
}

impl<S: Storage> SessionManager<S> {
    /// Create a manager and the receiving end of its event channel
    ///
    /// The debit period comes from the rater's session configuration.
    pub fn new(rater: Arc<Rater<S>>) -> (Arc<Self>, mpsc::Receiver<SessionEvent>) {
        let period = Duration::seconds(rater.config().session.debit_period_secs as i64);
        let (events, receiver) = mpsc::channel(SESSION_EVENT_BUFFER);
        let manager = Arc::new(Self {
            rater,
            period,
            sessions: RwLock::new(HashMap::new()),
            events,
        });
        (manager, receiver)
    }

    pub fn debit_period(&self) -> Duration {
        self.period
    }

    /// Debit the first period and start the loop
    ///
    /// The descriptor's start is the call start; its end and amount are
    /// replaced by the debit period.
    #[instrument(skip(self, cd), fields(account = %cd.account_key()))]
    pub async fn start(self: &Arc<Self>, session_id: &str, cd: CallDescriptor) -> AppResult<CallCost> {
        let session = {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(session_id) {
                return Err(AppError::SessionExists(session_id.to_string()));
            }
            let session = Arc::new(Mutex::new(Session {
                id: session_id.to_string(),
                state: SessionState::Active,
                descriptor: cd.clone(),
                call_costs: Vec::new(),
            }));
            sessions.insert(
                session_id.to_string(),
                SessionEntry {
                    session: session.clone(),
                    stop: None,
                    task: None,
                },
            );
            session
        };

        let mut first = cd;
        first.loop_index = 0;
        first.call_duration = Duration::zero();
        first.time_end = first.time_start + self.period;
        first.amount = utils::seconds(self.period);

        let cc = match self.rater.max_debit(&first).await {
            Ok(cc) => cc,
            Err(e) => {
                self.sessions.write().remove(session_id);
                return Err(e);
            }
        };
        {
            let mut s = session.lock();
            s.descriptor = first;
            s.call_costs.push(cc.clone());
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.clone().run(session_id.to_string(), session, stop_rx));
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.stop = Some(stop_tx);
            entry.task = Some(task);
        }
        info!("Session {} started, billed until {:?}", session_id, cc.time_end());
        Ok(cc)
    }

    async fn run(self: Arc<Self>, id: String, session: Arc<Mutex<Session>>, mut stop: oneshot::Receiver<()>) {
        let period = self.period.to_std().unwrap_or(std::time::Duration::from_secs(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!("Session {} loop stopped", id);
                    return;
                }
                _ = ticker.tick() => {}
            }

            let next = session.lock().next_period(self.period);
            let Some(next) = next else {
                warn!("Session {} has nothing billed, stopping", id);
                return;
            };

            match self.rater.max_debit(&next).await {
                Ok(cc) => {
                    debug!("Session {} billed until {:?}", id, cc.time_end());
                    let mut s = session.lock();
                    s.descriptor = next;
                    s.call_costs.push(cc);
                }
                Err(e) => {
                    session.lock().state = SessionState::Disconnected;
                    info!("Session {} disconnected: {}", id, e);
                    let event = SessionEvent::Disconnect {
                        session_id: id.clone(),
                        reason: e.to_string(),
                    };
                    if self.events.send(event).await.is_err() {
                        debug!("No listener for session events");
                    }
                    return;
                }
            }
        }
    }

    /// Stop the loop and refund what was billed past `at`
    #[instrument(skip(self))]
    pub async fn hangup(&self, session_id: &str, at: DateTime<Utc>) -> AppResult<RefundSummary> {
        let entry = self
            .sessions
            .write()
            .remove(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        if let Some(stop) = entry.stop {
            let _ = stop.send(());
        }
        if let Some(task) = entry.task {
            if let Err(e) = task.await {
                warn!("Session {} loop ended abnormally: {}", session_id, e);
            }
        }

        let (descriptor, mut unused) = {
            let mut s = entry.session.lock();
            s.state = SessionState::Refunding;
            (s.descriptor.clone(), s.unused_increments(at))
        };

        let mut summary = RefundSummary {
            increments: unused.len(),
            ..RefundSummary::default()
        };
        if !unused.is_empty() {
            let refund = self.rater.refund_increments(&descriptor, &mut unused).await?;
            summary.seconds = refund.seconds;
            summary.money = refund.money;
        }

        entry.session.lock().state = SessionState::Closed;
        info!(
            "Session {} closed, refunded {}s and {}",
            session_id, summary.seconds, summary.money
        );
        let event = SessionEvent::Closed {
            session_id: session_id.to_string(),
            refunded: summary.clone(),
        };
        if self.events.send(event).await.is_err() {
            debug!("No listener for session events");
        }
        Ok(summary)
    }

    /// Snapshot of a live session
    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .get(session_id)
            .map(|entry| entry.session.lock().clone())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }
}
