//! Booking field parsers.
//!
//! Each dialect turns plain text into a `ParsedBooking`. Parsing never fails:
//! whatever cannot be found is left empty and the reconciler decides whether
//! the result is usable.

pub mod generic;
pub mod normalize;
pub mod vendor;

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Raw text kept on a parse result, in characters.
pub const RAW_TEXT_LIMIT: usize = 2000;

/// Which field layout a piece of text follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Loosely labelled free text, English or Greek labels.
    #[default]
    Generic,
    /// Fixed line-oriented layout sent by a partner broker.
    Vendor,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Vendor => "vendor",
        }
    }

    /// Parse `text` with this dialect's parser.
    pub fn parse(&self, text: &str) -> ParsedBooking {
        match self {
            Self::Generic => generic::GenericParser.parse(text),
            Self::Vendor => vendor::VendorParser.parse(text),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generic" | "text" => Ok(Self::Generic),
            "vendor" | "broker" => Ok(Self::Vendor),
            other => Err(ConfigError::InvalidValue {
                key: "dialect".to_string(),
                message: format!("unknown dialect '{other}', expected generic or vendor"),
            }),
        }
    }
}

/// A text-to-fields parser for one dialect.
pub trait DialectParser {
    fn dialect(&self) -> Dialect;
    fn parse(&self, text: &str) -> ParsedBooking;
}

/// Structured fields recovered from a message or document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedBooking {
    pub dialect: Dialect,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub requested_category: Option<String>,
    /// Free-form car description, e.g. `Fiat 500 or similar`.
    pub vehicle_description: Option<String>,
    /// ACRISS-style class code, e.g. `EDMR`.
    pub vehicle_class: Option<String>,
    pub license_plate: Option<String>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub total_price: Option<Decimal>,
    pub extra_insurance: bool,
    /// The sender's own reservation reference, if it quoted one.
    pub external_reference: Option<String>,
    /// Extra details only the vendor layout carries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<VendorDetails>,
    /// Normalized source text, truncated to `RAW_TEXT_LIMIT` characters.
    pub raw_text: String,
}

impl ParsedBooking {
    /// Names of the required fields that are missing.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.customer_name.is_none() {
            missing.push("customer_name");
        }
        if self.start_date.is_none() {
            missing.push("start_date");
        }
        if self.end_date.is_none() {
            missing.push("end_date");
        }
        missing
    }

    /// Diagnostic JSON view, used by the `parse` command and debug logs.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Vendor layout extras. Kept for operators; the reconciler ignores them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VendorDetails {
    pub your_reference: Option<String>,
    pub flight_number: Option<String>,
    pub reservation_date: Option<NaiveDateTime>,
    pub rate: Option<String>,
    pub pickup: Option<RentalStop>,
    pub dropoff: Option<RentalStop>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub time_and_mileage: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub cdw_inclusive: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub tax: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub prepaid_amount: Option<Decimal>,
    pub request_source_code: Option<String>,
    pub broker: Option<String>,
    pub rental_duration_days: Option<u32>,
}

/// A pickup or return point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RentalStop {
    pub name: Option<String>,
    pub code: Option<String>,
    pub at: Option<NaiveDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_names_round_trip() {
        assert_eq!("Generic".parse::<Dialect>().unwrap(), Dialect::Generic);
        assert_eq!(" vendor ".parse::<Dialect>().unwrap(), Dialect::Vendor);
        assert!("pdf".parse::<Dialect>().is_err());
        assert_eq!(Dialect::Vendor.to_string(), "vendor");
    }

    #[test]
    fn missing_required_lists_absent_fields() {
        let parsed = ParsedBooking {
            customer_name: Some("Jane".into()),
            ..Default::default()
        };
        assert_eq!(parsed.missing_required(), vec!["start_date", "end_date"]);
    }

    #[test]
    fn json_view_uses_strings_for_money() {
        let parsed = ParsedBooking {
            total_price: Some(rust_decimal_macros::dec!(240.00)),
            start_date: NaiveDate::from_ymd_opt(2025, 8, 18),
            ..Default::default()
        };
        let json = parsed.to_json();
        assert_eq!(json["total_price"], "240.00");
        assert_eq!(json["start_date"], "2025-08-18");
        assert_eq!(json["dialect"], "generic");
        assert!(json.get("vendor").is_none());
    }
}
