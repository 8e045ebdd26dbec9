//! LERG reduction: area codes grouped by region and by country.
//!
//! Every record is classified by its country code:
//!
//! | Country            | Region map                 | Country map |
//! |--------------------|----------------------------|-------------|
//! | `US`               | keyed by state             | yes         |
//! | `CA`               | keyed by province, or `XX` | yes         |
//! | anything else      | no                         | yes         |
//!
//! Canadian records with an unrecognized province land under
//! [`UNKNOWN_REGION`] so that no record is dropped.

use crate::cache::DerivedView;
use crate::error::{CoreError, CoreResult};
use crate::pipeline::Reducer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Country code of domestic records.
pub const DOMESTIC: &str = "US";

/// Country code of Canadian records.
pub const CANADA: &str = "CA";

/// Region key for records whose region could not be recognized.
pub const UNKNOWN_REGION: &str = "XX";

/// Recognized Canadian province and territory codes.
pub const CANADIAN_PROVINCES: [&str; 13] = [
    "AB", "BC", "MB", "NB", "NL", "NS", "NT", "NU", "ON", "PE", "QC", "SK", "YT",
];

/// Default store holding LERG records.
pub const LERG_STORE: &str = "lerg";

/// One normalized LERG row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LergRecord {
    /// Surrogate key assigned by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Three-digit area code.
    pub npa: String,
    /// State or province code.
    #[serde(default)]
    pub state: String,
    /// Country code.
    #[serde(default)]
    pub country: String,
}

impl LergRecord {
    /// Creates a record, normalizing every field.
    pub fn new(npa: impl AsRef<str>, state: impl AsRef<str>, country: impl AsRef<str>) -> Self {
        Self {
            id: None,
            npa: npa.as_ref().trim().to_string(),
            state: normalize_code(state.as_ref()),
            country: normalize_code(country.as_ref()),
        }
    }

    /// Reads a record from a stored JSON object.
    ///
    /// Codes are trimmed and uppercased; a numeric `npa` is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Transform`] if `npa` is missing or blank.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let npa = match value.get("npa") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(CoreError::Transform(format!(
                    "LERG record without an area code: {value}"
                )))
            }
        };
        Ok(Self {
            id: value.get("id").and_then(Value::as_i64),
            npa,
            state: normalize_code(text_field(value, "state")),
            country: normalize_code(text_field(value, "country")),
        })
    }

    /// Region key this record is filed under, if it has one.
    pub fn region(&self) -> Option<&str> {
        match self.country.as_str() {
            DOMESTIC if self.state.is_empty() => Some(UNKNOWN_REGION),
            DOMESTIC => Some(self.state.as_str()),
            CANADA if CANADIAN_PROVINCES.contains(&self.state.as_str()) => Some(self.state.as_str()),
            CANADA => Some(UNKNOWN_REGION),
            _ => None,
        }
    }
}

fn text_field<'a>(value: &'a Value, field: &str) -> &'a str {
    value.get(field).and_then(Value::as_str).unwrap_or_default()
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Area codes grouped by region and by country.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LergAggregate {
    /// Region code to area codes.
    pub region_npas: BTreeMap<String, BTreeSet<String>>,
    /// Country code to area codes.
    pub country_npas: BTreeMap<String, BTreeSet<String>>,
    /// Records folded in.
    pub record_count: usize,
}

impl LergAggregate {
    /// Area codes of `region`.
    pub fn npas_for_region(&self, region: &str) -> Option<&BTreeSet<String>> {
        self.region_npas.get(region)
    }

    /// Area codes of `country`.
    pub fn npas_for_country(&self, country: &str) -> Option<&BTreeSet<String>> {
        self.country_npas.get(country)
    }

    /// First region (in key order) that lists `npa`.
    pub fn region_of(&self, npa: &str) -> Option<&str> {
        self.region_npas
            .iter()
            .find(|(_, npas)| npas.contains(npa))
            .map(|(region, _)| region.as_str())
    }

    /// Number of distinct area codes across all countries.
    pub fn distinct_npas(&self) -> usize {
        self.country_npas
            .values()
            .flatten()
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Returns true if nothing was folded in.
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    fn add(&mut self, record: &LergRecord) {
        let country = if record.country.is_empty() {
            UNKNOWN_REGION
        } else {
            record.country.as_str()
        };
        self.country_npas
            .entry(country.to_string())
            .or_default()
            .insert(record.npa.clone());

        if let Some(region) = record.region() {
            self.region_npas
                .entry(region.to_string())
                .or_default()
                .insert(record.npa.clone());
        }
        self.record_count += 1;
    }
}

/// Folds stored LERG rows into a [`LergAggregate`].
#[derive(Debug, Default)]
pub struct LergReducer {
    aggregate: LergAggregate,
}

impl Reducer for LergReducer {
    type Output = LergAggregate;

    fn reduce_chunk(&mut self, chunk: &[Value]) -> CoreResult<()> {
        for value in chunk {
            let record = LergRecord::from_value(value)?;
            self.aggregate.add(&record);
        }
        Ok(())
    }

    fn finish(self) -> LergAggregate {
        self.aggregate
    }
}

impl DerivedView for LergAggregate {
    type Reducer = LergReducer;

    fn reducer() -> LergReducer {
        LergReducer::default()
    }

    fn record_count(&self) -> usize {
        self.record_count
    }
}
