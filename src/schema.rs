//! Schema normalization: raw key-value rows into typed records
//!
//! Every row is parsed independently, so normalization runs as a parallel map
//! over the input. Rows that fail validation are dropped and counted per
//! [`RejectReason`]; they never abort the run.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Untyped cell value as yielded by a record source
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Int(v)
    }
}

impl From<i32> for RawValue {
    fn from(v: i32) -> Self {
        RawValue::Int(v as i64)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(RawValue::Null)
    }
}

/// One untyped row keyed by column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    fields: HashMap<String, RawValue>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<RawValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<RawValue>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Absent columns read as null
    pub fn get(&self, key: &str) -> &RawValue {
        self.fields.get(key).unwrap_or(&RawValue::Null)
    }
}

/// Device family reported by the clickstream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Unknown,
    Other(String),
}

impl DeviceType {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" => DeviceType::Unknown,
            "desktop" | "pc" => DeviceType::Desktop,
            "mobile" | "phone" | "smartphone" => DeviceType::Mobile,
            "tablet" => DeviceType::Tablet,
            other => DeviceType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub order_id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: u16,
    pub price: f32,
    pub timestamp: DateTime<Utc>,
    pub category: String,
}

impl TransactionRecord {
    /// price × quantity, widened before multiplying
    pub fn line_total(&self) -> f64 {
        self.price as f64 * self.quantity as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionRecord {
    pub user_id: i64,
    pub page_id: String,
    pub session_duration: f64,
    pub device_type: DeviceType,
    pub timestamp: DateTime<Utc>,
}

/// Why a row was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RejectReason {
    MissingField(&'static str),
    InvalidField(&'static str),
    NegativeValue(&'static str),
    InvalidTimestamp,
    DuplicateOrderId,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingField(field) => write!(f, "missing {}", field),
            RejectReason::InvalidField(field) => write!(f, "invalid {}", field),
            RejectReason::NegativeValue(field) => write!(f, "negative {}", field),
            RejectReason::InvalidTimestamp => write!(f, "invalid timestamp"),
            RejectReason::DuplicateOrderId => write!(f, "duplicate order_id"),
        }
    }
}

/// Accepted/rejected row counts for one normalization pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub total_rows: usize,
    pub accepted: usize,
    pub rejected: BTreeMap<RejectReason, usize>,
}

impl NormalizeReport {
    pub fn rejected_count(&self) -> usize {
        self.rejected.values().sum()
    }

    fn reject(&mut self, reason: RejectReason) {
        *self.rejected.entry(reason).or_insert(0) += 1;
    }
}

/// Typed records plus the report describing what was dropped
#[derive(Debug, Clone)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub report: NormalizeReport,
}

/// Validate and coerce raw transaction rows.
///
/// The first occurrence of an order_id wins; later rows carrying the same id
/// are rejected as duplicates.
#[instrument(skip_all, fields(rows = rows.len()))]
pub fn normalize_transactions(rows: &[RawRow]) -> Normalized<TransactionRecord> {
    let parsed: Vec<Result<TransactionRecord, RejectReason>> =
        rows.par_iter().map(parse_transaction).collect();

    let mut report = NormalizeReport {
        total_rows: rows.len(),
        ..Default::default()
    };
    let mut seen = HashSet::with_capacity(parsed.len());
    let mut records = Vec::with_capacity(parsed.len());

    for outcome in parsed {
        match outcome {
            Ok(record) if seen.insert(record.order_id) => records.push(record),
            Ok(record) => {
                debug!(order_id = record.order_id, "duplicate order_id dropped");
                report.reject(RejectReason::DuplicateOrderId);
            }
            Err(reason) => report.reject(reason),
        }
    }
    report.accepted = records.len();
    log_report("transactions", &report);

    Normalized { records, report }
}

/// Validate and coerce raw interaction rows.
#[instrument(skip_all, fields(rows = rows.len()))]
pub fn normalize_interactions(rows: &[RawRow]) -> Normalized<InteractionRecord> {
    let parsed: Vec<Result<InteractionRecord, RejectReason>> =
        rows.par_iter().map(parse_interaction).collect();

    let mut report = NormalizeReport {
        total_rows: rows.len(),
        ..Default::default()
    };
    let mut records = Vec::with_capacity(parsed.len());
    for outcome in parsed {
        match outcome {
            Ok(record) => records.push(record),
            Err(reason) => report.reject(reason),
        }
    }
    report.accepted = records.len();
    log_report("interactions", &report);

    Normalized { records, report }
}

fn log_report(kind: &str, report: &NormalizeReport) {
    let rejected = report.rejected_count();
    if rejected > 0 {
        warn!(
            kind,
            accepted = report.accepted,
            rejected,
            "dropped invalid rows: {:?}",
            report.rejected
        );
    } else {
        info!(kind, accepted = report.accepted, "all rows accepted");
    }
}

fn parse_transaction(row: &RawRow) -> Result<TransactionRecord, RejectReason> {
    let order_id = required_id(row, "order_id")?;
    let user_id = required_id(row, "user_id")?;
    let product_id = required_id(row, "product_id")?;

    let quantity = required_id(row, "quantity")?;
    if quantity < 0 {
        return Err(RejectReason::NegativeValue("quantity"));
    }
    let quantity = u16::try_from(quantity).map_err(|_| RejectReason::InvalidField("quantity"))?;

    let price = required_number(row, "price")?;
    if price < 0.0 {
        return Err(RejectReason::NegativeValue("price"));
    }
    if price > f32::MAX as f64 {
        return Err(RejectReason::InvalidField("price"));
    }

    Ok(TransactionRecord {
        order_id,
        user_id,
        product_id,
        quantity,
        price: price as f32,
        timestamp: required_timestamp(row)?,
        category: required_text(row, "category")?,
    })
}

fn parse_interaction(row: &RawRow) -> Result<InteractionRecord, RejectReason> {
    let user_id = required_id(row, "user_id")?;
    let page_id = required_text(row, "page_id")?;

    let session_duration = required_number(row, "session_duration")?;
    if session_duration < 0.0 {
        return Err(RejectReason::NegativeValue("session_duration"));
    }

    let device_type = match row.get("device_type") {
        RawValue::Null => DeviceType::Unknown,
        RawValue::Text(s) => DeviceType::parse(s),
        _ => return Err(RejectReason::InvalidField("device_type")),
    };

    Ok(InteractionRecord {
        user_id,
        page_id,
        session_duration,
        device_type,
        timestamp: required_timestamp(row)?,
    })
}

fn required_id(row: &RawRow, field: &'static str) -> Result<i64, RejectReason> {
    match row.get(field) {
        RawValue::Null => Err(RejectReason::MissingField(field)),
        RawValue::Int(v) => Ok(*v),
        RawValue::Float(v) => whole_id(*v).ok_or(RejectReason::InvalidField(field)),
        RawValue::Text(s) if s.trim().is_empty() => Err(RejectReason::MissingField(field)),
        RawValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_id))
                .ok_or(RejectReason::InvalidField(field))
        }
    }
}

/// Whole-valued floats inside the i64 range; anything else would saturate
/// or truncate into a different id.
fn whole_id(v: f64) -> Option<i64> {
    let in_range = v >= i64::MIN as f64 && v < i64::MAX as f64;
    (v.is_finite() && v.fract() == 0.0 && in_range).then_some(v as i64)
}

fn required_number(row: &RawRow, field: &'static str) -> Result<f64, RejectReason> {
    let value = match row.get(field) {
        RawValue::Null => return Err(RejectReason::MissingField(field)),
        RawValue::Int(v) => *v as f64,
        RawValue::Float(v) => *v,
        RawValue::Text(s) if s.trim().is_empty() => {
            return Err(RejectReason::MissingField(field))
        }
        RawValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| RejectReason::InvalidField(field))?,
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RejectReason::InvalidField(field))
    }
}

fn required_text(row: &RawRow, field: &'static str) -> Result<String, RejectReason> {
    match row.get(field) {
        RawValue::Null => Err(RejectReason::MissingField(field)),
        RawValue::Int(v) => Ok(v.to_string()),
        RawValue::Float(_) => Err(RejectReason::InvalidField(field)),
        RawValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                Err(RejectReason::MissingField(field))
            } else {
                Ok(s.to_string())
            }
        }
    }
}

fn required_timestamp(row: &RawRow) -> Result<DateTime<Utc>, RejectReason> {
    match row.get("timestamp") {
        RawValue::Null => Err(RejectReason::MissingField("timestamp")),
        RawValue::Int(secs) => Utc
            .timestamp_opt(*secs, 0)
            .single()
            .ok_or(RejectReason::InvalidTimestamp),
        RawValue::Float(_) => Err(RejectReason::InvalidTimestamp),
        RawValue::Text(s) => parse_timestamp(s.trim()).ok_or(RejectReason::InvalidTimestamp),
    }
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Accepts RFC 3339, common naive layouts (read as UTC) and bare dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
