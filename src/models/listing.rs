//! Structured used-car listing records.

use serde::{Deserialize, Serialize};

/// A structured used-car listing extracted from a detail page.
///
/// Extraction is best-effort: fields that could not be determined are
/// `None` and named in `missing_fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarListing {
    /// Display model name, e.g. "Toyota Yaris Cross 1.5A".
    pub model: String,
    /// Exact source URL the listing was scraped from.
    pub url: String,
    #[serde(default)]
    pub photos: Vec<String>,

    pub price: Option<f64>,
    pub depreciation: Option<f64>,
    pub road_tax: Option<f64>,

    pub car_type: Option<String>,
    pub reg_date: Option<String>,
    pub coe_left: Option<String>,
    pub loan_term_months: Option<u32>,

    pub zero_dp_monthly: Option<f64>,
    pub tenk_dp_monthly: Option<f64>,
    pub twentyk_dp_monthly: Option<f64>,
    pub thirtyk_dp_monthly: Option<f64>,
    pub fortyk_dp_monthly: Option<f64>,
    pub fiftyk_dp_monthly: Option<f64>,

    pub mileage_km: Option<u64>,
    pub owner_count: Option<String>,

    pub curb_weight_kg: Option<f64>,
    pub engine_cc: Option<u32>,

    pub power_bhp: Option<u32>,
    pub power_kw: Option<f64>,
    pub power_to_weight: Option<f64>,

    pub transmission: Option<String>,
    pub vehicle_type: Option<String>,

    pub coe: Option<f64>,
    pub arf: Option<f64>,
    pub omv: Option<f64>,
    pub end_coe_rebate: Option<f64>,

    /// Names of fields that could not be extracted from the page.
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

impl CarListing {
    /// Whether extraction produced enough to treat this as a real
    /// record. A listing without even a model name is considered a
    /// failed extraction and is not cached or returned.
    pub fn has_identity(&self) -> bool {
        !self.model.is_empty() && !self.url.is_empty()
    }
}

/// Outcome of one scrape batch: records (cache hits plus freshly
/// extracted) and the URLs that produced nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<CarListing>,
    #[serde(default)]
    pub failed_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
