//! Reference computations that tests compare the real pipeline against.
//!
//! Each oracle works on the full input in memory, with no chunking,
//! batching or index use.

use ratedeck_core::query::{offset_for, sort_records};
use ratedeck_core::{
    Filter, LergAggregate, LergRecord, SortSpec, CANADA, CANADIAN_PROVINCES, DOMESTIC,
    UNKNOWN_REGION,
};
use serde_json::Value;

/// The LERG aggregate of `records`, computed in one pass.
pub fn lerg_aggregate(records: &[LergRecord]) -> LergAggregate {
    let mut aggregate = LergAggregate::default();
    for record in records {
        let country = if record.country.is_empty() {
            UNKNOWN_REGION.to_string()
        } else {
            record.country.clone()
        };
        let region = if record.country == DOMESTIC {
            Some(if record.state.is_empty() {
                UNKNOWN_REGION.to_string()
            } else {
                record.state.clone()
            })
        } else if record.country == CANADA {
            Some(if CANADIAN_PROVINCES.contains(&record.state.as_str()) {
                record.state.clone()
            } else {
                UNKNOWN_REGION.to_string()
            })
        } else {
            None
        };

        aggregate
            .country_npas
            .entry(country)
            .or_default()
            .insert(record.npa.clone());
        if let Some(region) = region {
            aggregate
                .region_npas
                .entry(region)
                .or_default()
                .insert(record.npa.clone());
        }
        aggregate.record_count += 1;
    }
    aggregate
}

/// The page of `rows` a query should return, with the total match count.
pub fn page(
    rows: &[Value],
    filter: &Filter,
    sort: Option<&SortSpec>,
    page: usize,
    page_size: usize,
) -> (Vec<Value>, usize) {
    let mut matching: Vec<Value> = rows.iter().filter(|r| filter.matches(r)).cloned().collect();
    if let Some(sort) = sort {
        sort_records(&mut matching, sort);
    }
    let total = matching.len();
    let items = matching
        .into_iter()
        .skip(offset_for(page, page_size))
        .take(page_size)
        .collect();
    (items, total)
}

/// Drops the store-assigned `id` so stored rows compare with their input.
pub fn strip_ids(rows: Vec<Value>) -> Vec<Value> {
    rows.into_iter()
        .map(|mut row| {
            if let Some(object) = row.as_object_mut() {
                object.remove("id");
            }
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn oracle_counts_every_record() {
        let aggregate = lerg_aggregate(&[
            LergRecord::new("201", "NJ", "US"),
            LergRecord::new("600", "ZZ", "CA"),
            LergRecord::new("876", "JM", "JM"),
        ]);
        assert_eq!(aggregate.record_count, 3);
        assert!(aggregate.region_npas[UNKNOWN_REGION].contains("600"));
        assert!(!aggregate.region_npas.contains_key("JM"));
    }

    #[test]
    fn oracle_page_counts_before_slicing() {
        let rows: Vec<Value> = (0..10).map(|i| json!({"n": i})).collect();
        let filter = Filter::new().range("n", Some(3.0), None);

        let (items, total) = page(&rows, &filter, Some(&SortSpec::desc("n")), 2, 4);
        assert_eq!(total, 7);
        assert_eq!(items, vec![json!({"n": 5}), json!({"n": 4}), json!({"n": 3})]);
    }
}
