//! Decides which candidate items are new for a feed.

use chrono::{DateTime, Utc};

use crate::feed::CandidateItem;

/// Output of [`detect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Items strictly newer than the previous watermark, in input order.
    pub new_items: Vec<CandidateItem>,
    /// `max(previous watermark, newest candidate timestamp)`.
    pub watermark: Option<DateTime<Utc>>,
}

impl Detection {
    /// True when the watermark moved past `previous`.
    pub fn advanced(&self, previous: Option<DateTime<Utc>>) -> bool {
        self.watermark != previous
    }
}

/// Splits out the candidates published strictly after `watermark`.
///
/// With no watermark every timestamped candidate is new. Candidates without
/// a timestamp are ignored entirely: they are never new and never move the
/// watermark. A candidate dated exactly at the watermark is not new.
pub fn detect(candidates: &[CandidateItem], watermark: Option<DateTime<Utc>>) -> Detection {
    let mut new_items = Vec::new();
    let mut next = watermark;

    for item in candidates {
        let Some(published) = item.published else {
            continue;
        };
        if watermark.map_or(true, |w| published > w) {
            new_items.push(item.clone());
        }
        if next.map_or(true, |w| published > w) {
            next = Some(published);
        }
    }

    Detection {
        new_items,
        watermark: next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn item(title: &str, published: Option<DateTime<Utc>>) -> CandidateItem {
        CandidateItem {
            title: title.to_string(),
            excerpt: String::new(),
            link: None,
            published,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_one_newer_one_older() {
        let watermark = Some(day(2024, 1, 1));
        let candidates = vec![
            item("new", Some(day(2024, 1, 2))),
            item("old", Some(day(2023, 12, 31))),
        ];

        let detection = detect(&candidates, watermark);
        assert_eq!(detection.new_items, vec![candidates[0].clone()]);
        assert_eq!(detection.watermark, Some(day(2024, 1, 2)));
        assert!(detection.advanced(watermark));
    }

    #[test]
    fn test_equal_to_watermark_is_not_new() {
        let watermark = Some(day(2024, 1, 1));
        let detection = detect(&[item("same", Some(day(2024, 1, 1)))], watermark);
        assert!(detection.new_items.is_empty());
        assert_eq!(detection.watermark, watermark);
        assert!(!detection.advanced(watermark));
    }

    #[test]
    fn test_no_timestamps_changes_nothing() {
        let watermark = Some(day(2024, 1, 1));
        let detection = detect(&[item("a", None), item("b", None)], watermark);
        assert!(detection.new_items.is_empty());
        assert_eq!(detection.watermark, watermark);

        let detection = detect(&[item("a", None)], None);
        assert!(detection.new_items.is_empty());
        assert_eq!(detection.watermark, None);
    }

    #[test]
    fn test_absent_watermark_admits_all_dated() {
        let candidates = vec![
            item("a", Some(day(2024, 1, 3))),
            item("undated", None),
            item("b", Some(day(2024, 1, 1))),
        ];
        let detection = detect(&candidates, None);
        assert_eq!(detection.new_items.len(), 2);
        assert_eq!(detection.watermark, Some(day(2024, 1, 3)));
    }

    #[test]
    fn test_rerun_with_advanced_watermark_finds_nothing() {
        let candidates = vec![
            item("a", Some(day(2024, 1, 3))),
            item("b", Some(day(2024, 1, 2))),
        ];
        let first = detect(&candidates, Some(day(2024, 1, 1)));
        assert_eq!(first.new_items.len(), 2);

        let second = detect(&candidates, first.watermark);
        assert!(second.new_items.is_empty());
        assert_eq!(second.watermark, first.watermark);
    }

    fn arb_time() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..4_000_000_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn arb_items() -> impl Strategy<Value = Vec<CandidateItem>> {
        prop::collection::vec(prop::option::of(arb_time()), 0..20)
            .prop_map(|dates| dates.into_iter().map(|d| item("x", d)).collect())
    }

    proptest! {
        #[test]
        fn new_iff_strictly_after(items in arb_items(), watermark in prop::option::of(arb_time())) {
            let detection = detect(&items, watermark);
            let expected: Vec<_> = items
                .iter()
                .filter(|i| match (i.published, watermark) {
                    (Some(t), Some(w)) => t > w,
                    (Some(_), None) => true,
                    (None, _) => false,
                })
                .cloned()
                .collect();
            prop_assert_eq!(detection.new_items, expected);
        }

        #[test]
        fn watermark_is_monotonic(
            batches in prop::collection::vec(arb_items(), 1..5),
            start in prop::option::of(arb_time()),
        ) {
            let mut watermark = start;
            for batch in &batches {
                let detection = detect(batch, watermark);
                if let Some(previous) = watermark {
                    prop_assert!(detection.watermark.is_some_and(|w| w >= previous));
                }
                for item in &detection.new_items {
                    prop_assert!(detection.watermark.is_some_and(|w| item.published.is_some_and(|p| p <= w)));
                }
                watermark = detection.watermark;
            }
        }

        #[test]
        fn watermark_independent_of_order(mut items in arb_items(), watermark in prop::option::of(arb_time())) {
            let forward = detect(&items, watermark).watermark;
            items.reverse();
            prop_assert_eq!(detect(&items, watermark).watermark, forward);
        }
    }
}
