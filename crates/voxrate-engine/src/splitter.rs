//! Interval splitting
//!
//! Cuts a call window into contiguous timespans, each priced by exactly one
//! rate interval:
//!
//! 1. the window is cut at every plan activation strictly inside it;
//! 2. each piece is cut wherever the winning rate interval changes (schedule
//!    edges, midnights) or the call crosses a tier's group interval start;
//! 3. spans are stretched to whole increments, swallowing or shortening the
//!    spans that follow.
//!
//! Every pass collects its cut points and builds a fresh sequence; nothing is
//! inserted into a vector while it is being walked.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use voxrate_core::config::RatingPolicy;
use voxrate_core::models::{CallDescriptor, RatingPlan, TimeSpan};
use voxrate_core::utils::round_to;
use voxrate_core::{AppError, AppResult};

/// Splits call windows into rated timespans
#[derive(Debug, Clone)]
pub struct IntervalSplitter {
    max_timespans: usize,
}

impl IntervalSplitter {
    pub fn new(policy: &RatingPolicy) -> Self {
        Self {
            max_timespans: policy.max_timespans.max(1),
        }
    }

    /// Split a descriptor's window, increment rounding included
    pub fn split(&self, cd: &CallDescriptor, plans: &[RatingPlan]) -> AppResult<Vec<TimeSpan>> {
        let window = TimeSpan::new(cd.time_start, cd.time_end, cd.effective_call_duration());
        let spans = self.split_window(window, plans)?;
        Ok(self.round_to_increments(spans))
    }

    /// Plan activation and rate interval splitting, without increment rounding
    pub fn split_window(&self, window: TimeSpan, plans: &[RatingPlan]) -> AppResult<Vec<TimeSpan>> {
        let by_plan = split_by_plans(window, plans);
        self.split_by_intervals(by_plan, plans)
    }

    fn split_by_intervals(
        &self,
        spans: Vec<(TimeSpan, Option<usize>)>,
        plans: &[RatingPlan],
    ) -> AppResult<Vec<TimeSpan>> {
        let mut result = Vec::with_capacity(spans.len());

        for (span, plan_idx) in spans {
            let Some(plan) = plan_idx.and_then(|idx| plans.get(idx)) else {
                warn!("No rating plan for span starting {}", span.time_start);
                result.push(span);
                continue;
            };

            let mut current = span;
            loop {
                if result.len() >= self.max_timespans {
                    return Err(AppError::MalformedInput(format!(
                        "call window needs more than {} timespans",
                        self.max_timespans
                    )));
                }

                let winner = plan.best_interval_at(current.time_start, current.group_start());
                if winner.is_none() {
                    warn!("No rate interval covers {}", current.time_start);
                }
                let cut = next_cut(plan, &current, winner);
                current.rate_interval = winner.map(|idx| plan.rate_intervals[idx].clone());

                match cut.and_then(|at| current.split_at(at)) {
                    Some(tail) => {
                        debug!("Split span at {}", tail.time_start);
                        result.push(current);
                        current = tail;
                    }
                    None => {
                        result.push(current);
                        break;
                    }
                }
            }
        }

        Ok(result)
    }

    /// Stretch spans to whole increments
    ///
    /// A stretched span swallows the spans that now end inside it and pushes
    /// the start of the one it partly overlaps.
    pub fn round_to_increments(&self, mut spans: Vec<TimeSpan>) -> Vec<TimeSpan> {
        let mut overlapped = vec![false; spans.len()];

        for i in 0..spans.len() {
            if overlapped[i] {
                continue;
            }
            let increment = spans[i].increment();
            if increment <= chrono::Duration::zero() {
                continue;
            }
            let duration = spans[i].duration();
            let rounded = round_to(increment, duration);
            if rounded == duration {
                continue;
            }

            let new_end = spans[i].time_start + rounded;
            spans[i].set_time_end(new_end);

            for j in (i + 1)..spans.len() {
                if overlapped[j] {
                    continue;
                }
                if spans[j].time_end <= new_end {
                    overlapped[j] = true;
                } else if spans[j].time_start < new_end {
                    spans[j].time_start = new_end;
                }
            }
        }

        spans
            .into_iter()
            .zip(overlapped)
            .filter_map(|(span, gone)| (!gone).then_some(span))
            .collect()
    }
}

/// Cut the window at plan activations
///
/// The plan active at the window start is the latest activation not after
/// it, or the earliest plan when all activations lie in the future.
fn split_by_plans(window: TimeSpan, plans: &[RatingPlan]) -> Vec<(TimeSpan, Option<usize>)> {
    let mut order: Vec<usize> = (0..plans.len()).collect();
    order.sort_by_key(|&idx| plans[idx].activation_time);

    let active = order
        .iter()
        .rev()
        .find(|&&idx| plans[idx].activation_time <= window.time_start)
        .or_else(|| order.first())
        .copied();

    let cuts: Vec<(DateTime<Utc>, usize)> = order
        .iter()
        .map(|&idx| (plans[idx].activation_time, idx))
        .filter(|(at, _)| *at > window.time_start && *at < window.time_end)
        .collect();

    let mut result = Vec::with_capacity(cuts.len() + 1);
    let mut current = window;
    let mut current_plan = active;
    for (at, idx) in cuts {
        if let Some(tail) = current.split_at(at) {
            result.push((current, current_plan));
            current = tail;
        }
        current_plan = Some(idx);
    }
    result.push((current, current_plan));
    result
}

/// Earliest instant inside `span` where it must be cut
fn next_cut(plan: &RatingPlan, span: &TimeSpan, winner: Option<usize>) -> Option<DateTime<Utc>> {
    let group_start = span.group_start();
    let group_at = |at: DateTime<Utc>| group_start + (at - span.time_start);

    let mut cut = None;
    let mut cursor = span.time_start;
    loop {
        let next = plan.next_boundary_after(cursor);
        if next >= span.time_end {
            break;
        }
        if plan.best_interval_at(next, group_at(next)) != winner {
            cut = Some(next);
            break;
        }
        cursor = next;
    }

    let group_end = span.call_duration;
    for (idx, interval) in plan.rate_intervals.iter().enumerate() {
        for tier in interval.tier_starts() {
            if tier <= group_start || tier >= group_end {
                continue;
            }
            let at = span.time_start + (tier - group_start);
            if cut.map_or(false, |c| at >= c) {
                break;
            }
            let is_winner_tier = Some(idx) == winner;
            if is_winner_tier || plan.best_interval_at(at, tier) != winner {
                cut = Some(at);
                break;
            }
        }
    }

    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use voxrate_core::models::{Rate, RateInterval, Timing};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2012, 2, 2, h, m, s).unwrap()
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn rate(value: Decimal, increment_s: i64) -> Rate {
        Rate::new(Duration::zero(), value, Duration::seconds(1), Duration::seconds(increment_s))
    }

    fn plan(intervals: Vec<RateInterval>) -> RatingPlan {
        RatingPlan::new(Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).unwrap(), intervals)
    }

    fn splitter() -> IntervalSplitter {
        IntervalSplitter::new(&RatingPolicy::default())
    }

    fn call(start: DateTime<Utc>, end: DateTime<Utc>) -> CallDescriptor {
        CallDescriptor::new("vdf", "rif", "0256", start, end)
    }

    fn bounds(spans: &[TimeSpan]) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        spans.iter().map(|s| (s.time_start, s.time_end)).collect()
    }

    #[test]
    fn test_single_interval_not_split() {
        let plans = vec![plan(vec![RateInterval::new(Timing::default(), 10.0, vec![rate(dec!(1), 1)])])];
        let spans = splitter().split(&call(at(17, 0, 0), at(17, 1, 0)), &plans).unwrap();
        assert_eq!(bounds(&spans), vec![(at(17, 0, 0), at(17, 1, 0))]);
        assert!(spans[0].rate_interval.is_some());
    }

    #[test]
    fn test_split_at_schedule_boundary() {
        let plans = vec![plan(vec![
            RateInterval::new(Timing::workdays(hms(0, 0, 0)), 10.0, vec![rate(dec!(1), 1)]),
            RateInterval::new(Timing::workdays(hms(18, 0, 0)), 10.0, vec![rate(dec!(0.5), 1)]),
        ])];
        let spans = splitter().split(&call(at(17, 59, 0), at(18, 1, 0)), &plans).unwrap();
        assert_eq!(
            bounds(&spans),
            vec![(at(17, 59, 0), at(18, 0, 0)), (at(18, 0, 0), at(18, 1, 0))]
        );
        assert_eq!(spans[0].rate_interval.as_ref().unwrap().price_at(Duration::zero()), dec!(1));
        assert_eq!(spans[1].rate_interval.as_ref().unwrap().price_at(Duration::zero()), dec!(0.5));
        assert_eq!(spans[0].call_duration, Duration::seconds(60));
        assert_eq!(spans[1].call_duration, Duration::seconds(120));
    }

    #[test]
    fn test_heavier_interval_wins_without_split() {
        let plans = vec![plan(vec![
            RateInterval::new(Timing::default(), 20.0, vec![rate(dec!(2), 1)]),
            RateInterval::new(Timing::workdays(hms(18, 0, 0)), 10.0, vec![rate(dec!(0.5), 1)]),
        ])];
        let spans = splitter().split(&call(at(17, 59, 0), at(18, 1, 0)), &plans).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].rate_interval.as_ref().unwrap().weight, 20.0);
    }

    #[test]
    fn test_split_at_plan_activation() {
        let early = RatingPlan::new(
            Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).unwrap(),
            vec![RateInterval::new(Timing::default(), 10.0, vec![rate(dec!(1), 1)])],
        );
        let late = RatingPlan::new(
            at(17, 0, 30),
            vec![RateInterval::new(Timing::default(), 10.0, vec![rate(dec!(3), 1)])],
        );
        let spans = splitter()
            .split(&call(at(17, 0, 0), at(17, 1, 0)), &[late, early])
            .unwrap();
        assert_eq!(
            bounds(&spans),
            vec![(at(17, 0, 0), at(17, 0, 30)), (at(17, 0, 30), at(17, 1, 0))]
        );
        assert_eq!(spans[0].rate_interval.as_ref().unwrap().price_at(Duration::zero()), dec!(1));
        assert_eq!(spans[1].rate_interval.as_ref().unwrap().price_at(Duration::zero()), dec!(3));
    }

    #[test]
    fn test_tier_split_on_call_duration() {
        let tiers = RateInterval::new(
            Timing::default(),
            10.0,
            vec![
                Rate::new(Duration::zero(), dec!(2), Duration::seconds(60), Duration::seconds(60)),
                Rate::new(Duration::seconds(60), dec!(1), Duration::seconds(60), Duration::seconds(1)),
            ],
        );
        let plans = vec![plan(vec![tiers])];
        let spans = splitter().split(&call(at(17, 0, 0), at(17, 1, 30)), &plans).unwrap();
        assert_eq!(
            bounds(&spans),
            vec![(at(17, 0, 0), at(17, 1, 0)), (at(17, 1, 0), at(17, 1, 30))]
        );
        assert_eq!(spans[1].group_start(), Duration::seconds(60));
    }

    #[test]
    fn test_continuation_starts_in_later_tier() {
        let tiers = RateInterval::new(
            Timing::default(),
            10.0,
            vec![
                Rate::new(Duration::zero(), dec!(2), Duration::seconds(60), Duration::seconds(1)),
                Rate::new(Duration::seconds(60), dec!(1), Duration::seconds(60), Duration::seconds(1)),
            ],
        );
        let plans = vec![plan(vec![tiers])];
        let mut cd = call(at(17, 1, 10), at(17, 1, 20));
        cd.call_duration = Duration::seconds(80);
        let spans = splitter().split(&cd, &plans).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].group_start(), Duration::seconds(70));
        assert_eq!(spans[0].rate_interval.as_ref().unwrap().price_at(spans[0].group_start()), dec!(1));
    }

    #[test]
    fn test_split_across_midnight_between_day_filters() {
        let plans = vec![plan(vec![
            RateInterval::new(Timing::workdays(hms(0, 0, 0)), 10.0, vec![rate(dec!(1), 1)]),
            RateInterval::new(Timing::weekends(), 10.0, vec![rate(dec!(0.1), 1)]),
        ])];
        // Friday 23:59:30 to Saturday 00:00:30
        let start = Utc.with_ymd_and_hms(2012, 2, 3, 23, 59, 30).unwrap();
        let end = Utc.with_ymd_and_hms(2012, 2, 4, 0, 0, 30).unwrap();
        let spans = splitter().split(&call(start, end), &plans).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].time_start, Utc.with_ymd_and_hms(2012, 2, 4, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_increment_rounding_pushes_next_span() {
        let plans = vec![plan(vec![
            RateInterval::new(Timing::default(), 10.0, vec![rate(dec!(1), 60)]),
            RateInterval::new(
                Timing {
                    start_time: Some(hms(17, 0, 30)),
                    ..Timing::default()
                },
                20.0,
                vec![rate(dec!(2), 1)],
            ),
        ])];
        let spans = splitter().split(&call(at(17, 0, 0), at(17, 1, 10)), &plans).unwrap();
        assert_eq!(
            bounds(&spans),
            vec![(at(17, 0, 0), at(17, 1, 0)), (at(17, 1, 0), at(17, 1, 10))]
        );
        assert_eq!(spans[0].call_duration, Duration::seconds(60));
        assert_eq!(spans[1].call_duration, Duration::seconds(70));
    }

    #[test]
    fn test_increment_rounding_drops_swallowed_span() {
        let plans = vec![plan(vec![
            RateInterval::new(Timing::default(), 10.0, vec![rate(dec!(1), 60)]),
            RateInterval::new(
                Timing {
                    start_time: Some(hms(17, 0, 30)),
                    ..Timing::default()
                },
                20.0,
                vec![rate(dec!(2), 1)],
            ),
        ])];
        let spans = splitter().split(&call(at(17, 0, 0), at(17, 0, 50)), &plans).unwrap();
        assert_eq!(bounds(&spans), vec![(at(17, 0, 0), at(17, 1, 0))]);
        assert_eq!(spans[0].call_duration, Duration::seconds(60));
    }

    #[test]
    fn test_no_plans_keeps_window_unpriced() {
        let spans = splitter().split(&call(at(17, 0, 0), at(17, 1, 0)), &[]).unwrap();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].rate_interval.is_none());
    }

    #[test]
    fn test_timespan_limit() {
        let splitter = IntervalSplitter::new(&RatingPolicy {
            max_timespans: 2,
            ..RatingPolicy::default()
        });
        let plans = vec![plan(vec![RateInterval::new(Timing::workdays(hms(0, 0, 0)), 10.0, vec![rate(dec!(1), 1)])])];
        let start = Utc.with_ymd_and_hms(2012, 2, 1, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2012, 2, 6, 12, 0, 0).unwrap();
        let err = splitter.split(&call(start, end), &plans).unwrap_err();
        assert_eq!(err.error_code(), "malformed_input");
    }
}
