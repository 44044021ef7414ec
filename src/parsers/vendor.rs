//! Vendor dialect: the fixed line-oriented reservation layout sent by the
//! partner broker.
//!
//! Pickup and return details span several lines under their own headers, so
//! they are searched inside the header's block rather than across the whole
//! text.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use rust_decimal::Decimal;

use super::normalize::{normalize_lines, parse_datetime, parse_insurance_flag, parse_money, truncate_chars};
use super::{Dialect, DialectParser, ParsedBooking, RAW_TEXT_LIMIT, RentalStop, VendorDetails};

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {pattern}: {e}"))
}

static RESERVATION_CODE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)New Reservation\s*\[Confirmed\]\s*:\s*([A-Z0-9]+)"));
static YOUR_REF: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)Your Ref\.\s*([A-Za-z0-9\-]+)"));
// The layout misspells "Flight"; accept both.
static FLIGHT: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)(?:Fligth|Flight)\s*Number\s*:?[ \t]*\n?[ \t]*([A-Za-z0-9][A-Za-z0-9\- ]*)")
});
static RESERVATION_DATE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)Reservation Date\s*:?\s*([0-9/:.\- ]{8,})"));
static RATE: LazyLock<Regex> = LazyLock::new(|| re(r"(?im)^Rate\b\s*:?[ \t]*(.+)$"));
static FIRST_NAME: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)First Name\s*:[ \t]*([\p{L}' \-]+)"));
static LAST_NAME: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)Last Name\s*:[ \t]*([\p{L}' \-]+)"));
static PHONE: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)Phone Number\s*:[ \t]*([0-9 +]+)"));
static TIME_MILEAGE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)Time&Mileage\s*:\s*([0-9.,]+)"));
static CDW_INCLUSIVE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)CDW inclusive\s*:\s*([0-9.,]+)"));
static TAX: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bTax\s*:\s*([0-9.,]+)"));
static TOTAL: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bTotal\s*:\s*([0-9.,]+)"));
static PREPAID: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)PrepaidAmount\s*:\s*([0-9.,]+)"));
static REQUEST_SOURCE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)Request Source Code\s*:\s*([A-Z0-9]+)"));
static VEHICLE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)Vehicle Class\s*:\s*([A-Za-z0-9]+)"));
static BROKER: LazyLock<Regex> = LazyLock::new(|| re(r"(?im)^Broker\s*:[ \t]*(.+)$"));
static DURATION: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)Rental Duration\s*:\s*([0-9]+)\s*days?"));
static CAR: LazyLock<Regex> = LazyLock::new(|| re(r"(?im)^Car\s*:[ \t]*(.+)$"));
static EXTRA_INSURANCE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?im)^Extra Insurance\s*:[ \t]*(\S+)"));

static PICKUP_HEADER: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)Pick\s*up Location\s*:"));
static RETURN_HEADER: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)Return Location\s*:"));
static ANY_HEADER: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)(?:Pick\s*up|Return) Location\s*:"));
static STOP_NAME: LazyLock<Regex> = LazyLock::new(|| re(r"(?im)^\s*Name\s*:[ \t]*(.+)$"));
static STOP_CODE: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^\s*Code\s*:\s*([A-Z]{3})\b"));
static STOP_DATE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?im)^\s*Date\s*:[ \t]*([0-9/:.\- ]{8,})"));

/// Parser for the broker's reservation layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct VendorParser;

impl DialectParser for VendorParser {
    fn dialect(&self) -> Dialect {
        Dialect::Vendor
    }

    fn parse(&self, text: &str) -> ParsedBooking {
        let text = normalize_lines(text);

        let reservation_code = capture(&RESERVATION_CODE, &text);
        let your_reference = capture(&YOUR_REF, &text);

        let first = capture(&FIRST_NAME, &text);
        let last = capture(&LAST_NAME, &text);
        let full_name = [first, last].into_iter().flatten().collect::<Vec<_>>().join(" ");
        let customer_name = (!full_name.is_empty()).then_some(full_name);

        let pickup = stop(&text, &PICKUP_HEADER);
        let dropoff = stop(&text, &RETURN_HEADER);
        let start_date = pickup.as_ref().and_then(|s| s.at).map(|at| at.date());
        let end_date = dropoff.as_ref().and_then(|s| s.at).map(|at| at.date());

        let total_price = money(&TOTAL, &text);
        let vehicle_class = capture(&VEHICLE_CLASS, &text).map(|c| c.to_uppercase());

        let details = VendorDetails {
            your_reference: your_reference.clone(),
            flight_number: capture(&FLIGHT, &text),
            reservation_date: capture(&RESERVATION_DATE, &text).and_then(|s| parse_datetime(&s)),
            rate: capture(&RATE, &text),
            pickup,
            dropoff,
            time_and_mileage: money(&TIME_MILEAGE, &text),
            cdw_inclusive: money(&CDW_INCLUSIVE, &text),
            tax: money(&TAX, &text),
            prepaid_amount: money(&PREPAID, &text),
            request_source_code: capture(&REQUEST_SOURCE, &text),
            broker: capture(&BROKER, &text),
            rental_duration_days: capture(&DURATION, &text).and_then(|d| d.parse().ok()),
        };

        ParsedBooking {
            dialect: Dialect::Vendor,
            customer_name,
            customer_phone: capture(&PHONE, &text),
            customer_email: None,
            start_date,
            end_date,
            requested_category: None,
            vehicle_description: capture(&CAR, &text),
            vehicle_class,
            license_plate: None,
            total_price,
            extra_insurance: capture(&EXTRA_INSURANCE, &text).is_some_and(|v| parse_insurance_flag(&v)),
            external_reference: reservation_code.or(your_reference),
            vendor: Some(details),
            raw_text: truncate_chars(&text, RAW_TEXT_LIMIT),
        }
    }
}

/// First capture group, trimmed. Empty captures count as absent.
fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn money(re: &Regex, text: &str) -> Option<Decimal> {
    capture(re, text).and_then(|s| parse_money(&s))
}

/// The text under `header`, up to the next location header.
fn block<'a>(text: &'a str, header: &Regex) -> Option<&'a str> {
    let found = header.find(text)?;
    let rest = &text[found.end()..];
    let end = ANY_HEADER.find(rest).map_or(rest.len(), |m| m.start());
    Some(&rest[..end])
}

fn stop(text: &str, header: &Regex) -> Option<RentalStop> {
    let body = block(text, header)?;
    let at: Option<NaiveDateTime> = capture(&STOP_DATE, body).and_then(|s| parse_datetime(&s));
    Some(RentalStop {
        name: capture(&STOP_NAME, body),
        code: capture(&STOP_CODE, body),
        at,
    })
}
