//! Property tests for interval splitting and increment pricing

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{call, flat_plan, peak_offpeak_plan};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use voxrate_core::config::RatingPolicy;
use voxrate_core::models::{RatingPlan, TimeSpan};
use voxrate_engine::calculator::price_span;
use voxrate_engine::IntervalSplitter;

fn week_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2012, 1, 30, 0, 0, 0).unwrap()
}

fn plans() -> Vec<RatingPlan> {
    vec![peak_offpeak_plan()]
}

proptest! {
    #[test]
    fn spans_cover_the_window_without_gaps(
        offset_s in 0i64..7 * 86_400,
        length_ms in 1i64..6 * 3_600_000,
    ) {
        let start = week_start() + Duration::seconds(offset_s);
        let end = start + Duration::milliseconds(length_ms);
        let splitter = IntervalSplitter::new(&RatingPolicy::default());

        let spans = splitter.split(&call(start, end), &plans()).unwrap();

        prop_assert!(!spans.is_empty());
        prop_assert_eq!(spans[0].time_start, start);
        prop_assert!(spans.last().unwrap().time_end >= end);
        prop_assert!(spans.last().unwrap().time_end - end < Duration::seconds(1));
        for pair in spans.windows(2) {
            prop_assert_eq!(pair[0].time_end, pair[1].time_start);
        }
        for span in &spans {
            prop_assert!(span.duration() > Duration::zero());
            prop_assert!(span.rate_interval.is_some());
        }
    }

    #[test]
    fn resplitting_a_span_changes_nothing(
        offset_s in 0i64..7 * 86_400,
        length_s in 1i64..12 * 3_600,
    ) {
        let start = week_start() + Duration::seconds(offset_s);
        let window = TimeSpan::new(start, start + Duration::seconds(length_s), Duration::seconds(length_s));
        let splitter = IntervalSplitter::new(&RatingPolicy::default());

        for span in splitter.split_window(window, &plans()).unwrap() {
            let again = TimeSpan::new(span.time_start, span.time_end, span.call_duration);
            let parts = splitter.split_window(again, &plans()).unwrap();
            prop_assert_eq!(parts.len(), 1);
            prop_assert_eq!(&parts[0], &span);
        }
    }

    #[test]
    fn increments_add_up_to_the_span(
        length_ms in 1i64..600_000,
        increment_s in 1i64..90,
        price_units in 1i64..100_000,
    ) {
        let start = week_start();
        let mut span = TimeSpan::new(start, start + Duration::milliseconds(length_ms), Duration::milliseconds(length_ms));
        let mut plan = flat_plan(Decimal::new(price_units, 4));
        plan.rate_intervals[0].rates[0].rate_increment = Duration::seconds(increment_s);
        span.rate_interval = Some(plan.rate_intervals[0].clone());

        price_span(&mut span);

        let cost: Decimal = span.increments.iter().map(|inc| inc.cost).sum();
        let duration = span
            .increments
            .iter()
            .fold(Duration::zero(), |acc, inc| acc + inc.duration);
        prop_assert_eq!(cost, span.cost);
        prop_assert_eq!(duration, span.duration());
        prop_assert!(span.increments.iter().all(|inc| inc.cost >= dec!(0)));
    }
}
