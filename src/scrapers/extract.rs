//! Best-effort extraction of structured listings from SGCarMart HTML.
//!
//! The site renders detail blocks with hashed CSS-module class names
//! (`styles_item__xxxx`), so selectors match on class-name substrings.
//! Extraction never fails: malformed pages yield a record with the
//! undetermined fields named in `missing_fields`.

use chrono::{Datelike, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::CarListing;

/// Turns fetched page content into a structured record. Pure, no
/// shared state; annotates the fields it could not determine.
pub trait Extractor: Send + Sync {
    fn extract(&self, html: &str, url: &str) -> CarListing;
}

const NA_VALUES: &[&str] = &["N.A.", "N.A", "Missing", "-"];

/// Loan-term buffer subtracted from the remaining COE months.
const LOAN_BUFFER_MONTHS: u32 = 4;

/// SGCarMart used-car listing page extractor.
pub struct SgcarmartExtractor {
    item: Selector,
    detail_title: Selector,
    desc: Selector,
    title_container: Selector,
    title_link: Selector,
    carousel_image: Selector,
    coe_till: Regex,
    year: Regex,
    url_model: Regex,
    coe_years: Regex,
    coe_months: Regex,
    mileage_km: Regex,
}

impl Default for SgcarmartExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SgcarmartExtractor {
    pub fn new() -> Self {
        // Static patterns; a parse failure here is a programming error
        let sel = |s: &str| Selector::parse(s).expect("valid selector");
        let re = |s: &str| Regex::new(s).expect("valid regex");
        Self {
            item: sel("div[class*='styles_item__']"),
            detail_title: sel("div[class*='styles_detailTitle__']"),
            desc: sel("div[class*='styles_descContainer__']"),
            title_container: sel("div[class*='styles_titleContainer__']"),
            title_link: sel("a[class*='styles_link_color__']"),
            carousel_image: sel("img.carousel_image"),
            coe_till: re(r"(?i)\s*\(COE\s+till\s+\d{2}/\d{4}\)"),
            year: re(r"(\d{4})"),
            url_model: re(r"/info/([^/]+)-\d+$"),
            coe_years: re(r"(?i)(\d+)\s*(?:y|yr|yrs|year|years)"),
            coe_months: re(r"(?i)(\d+)\s*(?:m|mth|mths|month|months)"),
            mileage_km: re(r"([\d,]+)\s*km"),
        }
    }

    /// Collect the labelled detail blocks into (label, value) pairs.
    fn detail_fields(&self, doc: &Html) -> Vec<(String, String)> {
        let mut raw = Vec::new();
        for item in doc.select(&self.item) {
            let title = item.select(&self.detail_title).next().map(element_text);
            let value = item.select(&self.desc).next().map(element_text);
            if let (Some(title), Some(value)) = (title, value) {
                raw.push((title, value));
            }
        }
        // Category uses a different label container than the others
        for item in doc.select(&self.item) {
            let is_category = item
                .select(&self.title_container)
                .next()
                .map(|t| element_text(t) == "Category")
                .unwrap_or(false);
            if is_category {
                if let Some(desc) = item.select(&self.desc).next() {
                    raw.push(("Category".to_string(), element_text(desc)));
                }
                break;
            }
        }
        raw
    }

    fn extract_title(&self, doc: &Html) -> Option<String> {
        let link = doc.select(&self.title_link).next()?;
        let text = element_text(link);
        if text.is_empty() {
            return None;
        }
        Some(self.coe_till.replace_all(&text, "").trim().to_string())
    }

    /// Model name from the URL slug, e.g.
    /// `/used-cars/info/toyota-yaris-cross-15a-1411501`.
    fn model_from_url(&self, url: &str) -> Option<String> {
        let path = url::Url::parse(url).ok()?.path().to_string();
        let slug = self.url_model.captures(&path)?.get(1)?.as_str().to_string();
        let name = slug
            .split('-')
            .map(|word| {
                if word.len() <= 3 {
                    word.to_uppercase()
                } else {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                        None => String::new(),
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        Some(name)
    }

    fn manufactured_year(&self, raw: &RawFields) -> Option<i32> {
        let current_year = Utc::now().year();
        for field in ["Manufactured", "Reg Date"] {
            if let Some(value) = raw.get(field) {
                if let Some(m) = self.year.captures(value) {
                    if let Ok(year) = m[1].parse::<i32>() {
                        if (1980..=current_year + 1).contains(&year) {
                            return Some(year);
                        }
                    }
                }
            }
        }
        None
    }

    /// Model name with cascading fallbacks: title (+year), then the URL
    /// slug. Empty when nothing usable was found, which callers treat
    /// as a failed extraction.
    fn build_model_name(
        &self,
        title: Option<&str>,
        year: Option<i32>,
        url: &str,
        missing: &mut Vec<String>,
    ) -> String {
        match (title, year) {
            (Some(title), Some(year)) => format!("{year} {title}"),
            (Some(title), None) => title.to_string(),
            (None, Some(year)) => match self.model_from_url(url) {
                Some(model) => format!("{year} {model}"),
                None => {
                    missing.push("Model".to_string());
                    String::new()
                }
            },
            (None, None) => match self.model_from_url(url) {
                Some(model) => model,
                None => {
                    missing.push("Model".to_string());
                    String::new()
                }
            },
        }
    }

    fn coe_left(&self, reg_date_full: &str, missing: &mut Vec<String>) -> (Option<String>, Option<u32>) {
        let Some(inside) = reg_date_full
            .split_once('(')
            .map(|(_, rest)| rest.split(" COE left").next().unwrap_or(rest).trim())
        else {
            return (None, None);
        };

        let years = self
            .coe_years
            .captures(inside)
            .and_then(|m| m[1].parse::<u32>().ok());
        let months = self
            .coe_months
            .captures(inside)
            .and_then(|m| m[1].parse::<u32>().ok());

        if years.is_none() && months.is_none() {
            missing.push(format!("COE Left (no valid pattern found in: {inside})"));
            return (None, None);
        }

        let years = years.unwrap_or(0);
        let months = months.unwrap_or(0);
        (
            Some(format!("{years} year(s) {months} month(s)")),
            Some(years * 12 + months),
        )
    }
}

impl Extractor for SgcarmartExtractor {
    fn extract(&self, html: &str, url: &str) -> CarListing {
        let doc = Html::parse_document(html);
        let mut missing = Vec::new();

        let raw = RawFields(self.detail_fields(&doc));
        let title = self.extract_title(&doc);
        let manufactured_year = self.manufactured_year(&raw);
        let current_year = Utc::now().year();

        let car_type = raw
            .get("Category")
            .and_then(|c| c.split(',').next())
            .map(|s| s.trim().to_string());

        let arf = parse_price(raw.get("ARF"), &mut missing, "ARF");
        let end_coe_rebate = match (manufactured_year, arf) {
            (Some(year), Some(arf)) if year >= current_year - 10 => Some((arf / 2.0).min(60_000.0)),
            _ => Some(0.0),
        };

        let price = parse_price(raw.get("Price"), &mut missing, "Price");
        let curb_weight_kg = parse_float(raw.get("Curb Weight"), &mut missing, "Curb Weight");

        // Power arrives as "81.0 kW (109 bhp)"
        let power_str = raw.get("Power").unwrap_or("");
        let (power_kw, power_bhp) = if power_str.contains('(') && !NA_VALUES.contains(&power_str) {
            let kw = power_str
                .split(" kW")
                .next()
                .and_then(|s| s.trim().parse::<f64>().ok());
            let bhp = power_str
                .split('(')
                .nth(1)
                .map(|s| s.replace(')', ""))
                .and_then(|s| {
                    s.trim()
                        .split(' ')
                        .next()
                        .and_then(|n| n.parse::<f64>().ok())
                })
                .map(|b| b.round() as u32);
            if kw.is_none() || bhp.is_none() {
                missing.push("Power".to_string());
            }
            (kw, bhp)
        } else {
            missing.push("Power".to_string());
            (None, None)
        };

        let power_to_weight = match (curb_weight_kg, power_bhp) {
            (Some(weight), Some(bhp)) if weight > 0.0 => {
                Some((f64::from(bhp) / weight * 1000.0 * 100.0).round() / 100.0)
            }
            _ => None,
        };

        let engine_cc = raw.get("Engine Cap").and_then(|cap| {
            cap.split(" cc")
                .next()
                .map(|s| s.replace(',', ""))
                .and_then(|s| s.trim().parse::<u32>().ok())
        });

        let reg_date_full = raw.get("Reg Date").unwrap_or("");
        let reg_date = reg_date_full
            .split(' ')
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.replace('-', " "));

        let (coe_left, coe_left_months) = self.coe_left(reg_date_full, &mut missing);

        let loan_term_months = coe_left_months
            .filter(|&m| m > 0)
            .map(|m| m.saturating_sub(LOAN_BUFFER_MONTHS));

        let monthly = |dp: f64, rate: f64| -> Option<f64> {
            match (price, loan_term_months) {
                (Some(price), Some(term)) if term > 0 => Some(monthly_instalment(price, term, dp, rate)),
                _ => None,
            }
        };

        let depreciation = parse_price(
            raw.get("Depreciation").and_then(|v| v.split(' ').next()),
            &mut missing,
            "Depreciation",
        );
        let road_tax = parse_price(
            raw.get("Road Tax").and_then(|v| v.split(' ').next()),
            &mut missing,
            "Road Tax",
        );

        let mut photos = Vec::new();
        for img in doc.select(&self.carousel_image) {
            if let Some(src) = img.value().attr("src") {
                if !src.is_empty() && !photos.iter().any(|p| p == src) {
                    photos.push(src.to_string());
                }
            }
        }

        CarListing {
            model: self.build_model_name(title.as_deref(), manufactured_year, url, &mut missing),
            url: url.to_string(),
            photos,
            price,
            depreciation,
            road_tax,
            car_type,
            reg_date,
            coe_left,
            loan_term_months,
            zero_dp_monthly: monthly(0.0, 4.98),
            tenk_dp_monthly: monthly(10_000.0, 4.0),
            twentyk_dp_monthly: monthly(20_000.0, 3.5),
            thirtyk_dp_monthly: monthly(30_000.0, 3.5),
            fortyk_dp_monthly: monthly(40_000.0, 3.0),
            fiftyk_dp_monthly: monthly(50_000.0, 3.0),
            mileage_km: parse_mileage(&self.mileage_km, raw.get("Mileage"), &mut missing),
            owner_count: raw.get("No. of Owners").map(str::to_string),
            curb_weight_kg,
            engine_cc,
            power_bhp,
            power_kw,
            power_to_weight,
            transmission: raw.get("Transmission").map(str::to_string),
            vehicle_type: raw.get("Type of Vehicle").map(str::to_string),
            coe: parse_price(raw.get("COE"), &mut missing, "COE"),
            arf,
            omv: parse_price(raw.get("OMV"), &mut missing, "OMV"),
            end_coe_rebate,
            missing_fields: missing,
        }
    }
}

struct RawFields(Vec<(String, String)>);

impl RawFields {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_missing(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => v.is_empty() || NA_VALUES.contains(&v),
    }
}

fn parse_price(value: Option<&str>, missing: &mut Vec<String>, field: &str) -> Option<f64> {
    if is_missing(value) {
        missing.push(field.to_string());
        return None;
    }
    let cleaned = value?.replace(['$', ','], "");
    match cleaned.trim().parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            missing.push(format!("{field} (invalid)"));
            None
        }
    }
}

fn parse_float(value: Option<&str>, missing: &mut Vec<String>, field: &str) -> Option<f64> {
    if is_missing(value) {
        missing.push(field.to_string());
        return None;
    }
    let first = value?.split(' ').next()?.replace(',', "");
    match first.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            missing.push(format!("{field} (invalid)"));
            None
        }
    }
}

fn parse_mileage(pattern: &Regex, value: Option<&str>, missing: &mut Vec<String>) -> Option<u64> {
    if is_missing(value) {
        missing.push("Mileage".to_string());
        return None;
    }
    if let Some(m) = pattern.captures(value?) {
        if let Ok(km) = m[1].replace(',', "").parse::<u64>() {
            return Some(km);
        }
    }
    missing.push("Mileage (invalid)".to_string());
    None
}

/// Estimated monthly instalment under simple interest.
fn monthly_instalment(price: f64, term_months: u32, downpayment: f64, rate_pct: f64) -> f64 {
    let loan_amount = price - downpayment;
    if loan_amount <= 0.0 || term_months == 0 {
        return 0.0;
    }
    let years = (f64::from(term_months) / 12.0).ceil();
    let multiplier = 1.0 + (rate_pct / 100.0) * years;
    let monthly = loan_amount * multiplier / f64::from(term_months);
    (monthly * 100.0).round() / 100.0
}
