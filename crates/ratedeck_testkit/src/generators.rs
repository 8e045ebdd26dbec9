//! Property-based test generators using proptest.
//!
//! Strategies produce LERG rows and rate-deck rows in the shapes the
//! ingest glue hands to the bulk pipeline, with enough skew to exercise
//! every classification branch.

use proptest::prelude::*;
use ratedeck_core::{LergRecord, CANADIAN_PROVINCES};
use serde_json::{json, Value};

/// Domestic state codes used by the generators.
pub const US_STATES: [&str; 12] = [
    "NJ", "NY", "CA", "TX", "FL", "IL", "WA", "GA", "PA", "OH", "MA", "CO",
];

/// Codes that are not Canadian provinces.
pub const BOGUS_PROVINCES: [&str; 4] = ["ZZ", "QX", "", "O N"];

/// Countries outside North America proper.
pub const OTHER_COUNTRIES: [&str; 5] = ["JM", "BS", "DO", "PR", "GU"];

/// Strategy for three-digit area codes.
pub fn npa_strategy() -> impl Strategy<Value = String> {
    (2u16..10, 0u16..9, 0u16..10).prop_map(|(a, b, c)| format!("{a}{b}{c}"))
}

fn pick(options: &'static [&'static str]) -> impl Strategy<Value = &'static str> {
    prop::sample::select(options)
}

/// Strategy for a single LERG row.
pub fn lerg_record_strategy() -> impl Strategy<Value = LergRecord> {
    prop_oneof![
        5 => (npa_strategy(), pick(&US_STATES))
            .prop_map(|(npa, state)| LergRecord::new(npa, state, "US")),
        3 => (npa_strategy(), pick(&CANADIAN_PROVINCES))
            .prop_map(|(npa, state)| LergRecord::new(npa, state, "CA")),
        1 => (npa_strategy(), pick(&BOGUS_PROVINCES))
            .prop_map(|(npa, state)| LergRecord::new(npa, state, "CA")),
        1 => (npa_strategy(), pick(&OTHER_COUNTRIES))
            .prop_map(|(npa, country)| LergRecord::new(npa, country, country)),
    ]
}

/// Strategy for a batch of LERG rows.
pub fn lerg_batch_strategy(min: usize, max: usize) -> impl Strategy<Value = Vec<LergRecord>> {
    prop::collection::vec(lerg_record_strategy(), min..max)
}

/// Strategy for one rate-deck row; about one in eight lacks an intra rate.
pub fn rate_row_strategy() -> impl Strategy<Value = Value> {
    (
        npa_strategy(),
        0u16..1000,
        pick(&US_STATES),
        0u32..5000,
        prop::option::weighted(0.875, 0u32..5000),
    )
        .prop_map(|(npa, nxx, state, inter, intra)| {
            json!({
                "npanxx": format!("{npa}{nxx:03}"),
                "npa": npa,
                "state": state,
                "inter_rate": f64::from(inter) / 10_000.0,
                "intra_rate": intra.map(|r| f64::from(r) / 10_000.0),
            })
        })
}

/// Strategy for a rate deck.
pub fn rate_deck_strategy(min: usize, max: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(rate_row_strategy(), min..max)
}

/// Deterministic LERG rows cycling through every classification branch.
///
/// Row `i` is domestic, Canadian, Canadian with a bogus province or
/// foreign depending on `i % 10`.
pub fn lerg_rows(count: usize) -> Vec<LergRecord> {
    (0..count)
        .map(|i| {
            let npa = format!("{}", 200 + i % 800);
            match i % 10 {
                0..=4 => LergRecord::new(npa, US_STATES[i % US_STATES.len()], "US"),
                5..=7 => LergRecord::new(npa, CANADIAN_PROVINCES[i % CANADIAN_PROVINCES.len()], "CA"),
                8 => LergRecord::new(npa, BOGUS_PROVINCES[i % BOGUS_PROVINCES.len()], "CA"),
                _ => {
                    let country = OTHER_COUNTRIES[i % OTHER_COUNTRIES.len()];
                    LergRecord::new(npa, country, country)
                }
            }
        })
        .collect()
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Few cases, for tests that run a full pipeline per case.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 50,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::default().to_proptest_config())]

        #[test]
        fn npa_is_three_digits(npa in npa_strategy()) {
            prop_assert_eq!(npa.len(), 3);
            prop_assert!(npa.chars().all(|c| c.is_ascii_digit()));
            prop_assert!(!npa.starts_with('0') && !npa.starts_with('1'));
        }

        #[test]
        fn lerg_records_are_normalized(record in lerg_record_strategy()) {
            prop_assert_eq!(record.state.trim(), record.state.as_str());
            prop_assert_eq!(record.country.to_ascii_uppercase(), record.country.clone());
        }
    }

    #[test]
    fn deterministic_rows_cover_every_branch() {
        let rows = lerg_rows(20);
        assert!(rows.iter().any(|r| r.country == "US"));
        assert!(rows.iter().any(|r| r.country == "CA" && r.region() != Some("XX")));
        assert!(rows.iter().any(|r| r.region() == Some("XX")));
        assert!(rows.iter().any(|r| r.region().is_none()));
    }
}
