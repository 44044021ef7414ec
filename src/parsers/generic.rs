//! Generic dialect: loosely labelled free text in English or Greek.
//!
//! Text is whitespace-collapsed first, so a label's value runs until the next
//! known label (or the end of the text). Labels must be followed by a colon.

use std::sync::LazyLock;

use regex::Regex;

use super::normalize::{
    category_from_class_code, collapse_whitespace, parse_date, parse_insurance_flag, parse_money,
    truncate_chars,
};
use super::{Dialect, DialectParser, ParsedBooking, RAW_TEXT_LIMIT};

const NAME_LABELS: &[&str] = &[
    r"customer\s+name",
    r"full\s+name",
    "customer",
    "passenger",
    "name",
    "πελάτης",
    "ονοματεπώνυμο",
    "όνομα",
];
const PHONE_LABELS: &[&str] = &[
    r"phone\s+number",
    "phone",
    "mobile",
    "telephone",
    "tel",
    "τηλέφωνο",
    "κινητό",
    "τηλ",
];
const EMAIL_LABELS: &[&str] = &["e-?mail"];
const START_LABELS: &[&str] = &[
    r"start\s+date",
    r"pick\s*-?\s*up\s+date",
    r"pick\s*-?\s*up",
    r"check\s*-?\s*in",
    "start",
    "έναρξη",
    "παραλαβή",
];
const END_LABELS: &[&str] = &[
    r"end\s+date",
    r"drop\s*-?\s*off\s+date",
    r"drop\s*-?\s*off",
    r"return\s+date",
    r"check\s*-?\s*out",
    "return",
    "end",
    "λήξη",
    "επιστροφή",
];
const CATEGORY_LABELS: &[&str] = &[r"car\s+category", "category", "group", "κατηγορία"];
const CLASS_LABELS: &[&str] = &[r"vehicle\s+class", r"class\s+code", "acriss"];
const VEHICLE_LABELS: &[&str] = &["vehicle", "car", "όχημα", "αυτοκίνητο"];
const PLATE_LABELS: &[&str] = &[
    r"licen[cs]e\s+plate",
    r"plate\s+number",
    "plate",
    "πινακίδα",
];
const INSURANCE_LABELS: &[&str] = &[
    r"extra\s+insurance",
    "insurance",
    r"έξτρα\s+ασφάλεια",
    "ασφάλεια",
];
const TOTAL_LABELS: &[&str] = &[
    r"total\s+price",
    "total",
    "amount",
    "price",
    "σύνολο",
    "τιμή",
];
const REFERENCE_LABELS: &[&str] = &[
    r"booking\s+reference",
    r"reservation\s+(?:code|number|no\.?)",
    "reference",
    r"ref\.?",
    "κωδικός",
];

/// Only used as value boundaries; ranges are found by `DATE_RANGE_RE`.
const RANGE_LABELS: &[&str] = &["dates", "period", "ημερομηνίες", "διάστημα"];

const ALL_LABELS: &[&[&str]] = &[
    NAME_LABELS,
    PHONE_LABELS,
    EMAIL_LABELS,
    START_LABELS,
    END_LABELS,
    CATEGORY_LABELS,
    CLASS_LABELS,
    VEHICLE_LABELS,
    PLATE_LABELS,
    INSURANCE_LABELS,
    TOTAL_LABELS,
    REFERENCE_LABELS,
    RANGE_LABELS,
];

fn label_regex(labels: &[&str]) -> Regex {
    let pattern = format!(r"(?i)\b(?:{})\s*:", labels.join("|"));
    Regex::new(&pattern).unwrap_or_else(|e| panic!("invalid label pattern {pattern}: {e}"))
}

fn static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {pattern}: {e}"))
}

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(NAME_LABELS));
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(PHONE_LABELS));
static START_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(START_LABELS));
static END_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(END_LABELS));
static CATEGORY_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(CATEGORY_LABELS));
static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(CLASS_LABELS));
static VEHICLE_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(VEHICLE_LABELS));
static PLATE_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(PLATE_LABELS));
static INSURANCE_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(INSURANCE_LABELS));
static TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(TOTAL_LABELS));
static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| label_regex(REFERENCE_LABELS));

/// Any known label. A value ends where the next one starts.
static ANY_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| label_regex(&ALL_LABELS.concat()));

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}"));
static DATE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"\b\d{1,4}[-/.]\d{1,2}[-/.]\d{2,4}\b"));
static DATE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(
        r"(?i)\b(\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4})\s*(?:to|until|till|έως|μέχρι|-|–)\s*(\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4})\b",
    )
});
static NAME_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^\p{L}[\p{L}\s.'\-]*"));
static PHONE_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"^\+?\(?\d[\d\s\-().]{4,}\d"));
static MONEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| static_regex(r"\d(?:[\d.,]*\d)?"));
static PLATE_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[\p{L}\d][\p{L}\d\-]*"));
static CLASS_CODE_RE: LazyLock<Regex> = LazyLock::new(|| static_regex(r"^[A-Z]{4}$"));
static BOOKING_HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"(?i)\bbooking\s*#\s*([A-Za-z0-9\-]+)"));

/// A four-letter class code written in a single case. Title-case words such
/// as `Mini` stay categories.
fn class_code(value: &str) -> Option<String> {
    let single_case = value == value.to_uppercase() || value == value.to_lowercase();
    let code = value.to_uppercase();
    (single_case && CLASS_CODE_RE.is_match(&code)).then_some(code)
}

/// Parser for loosely labelled text.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericParser;

impl DialectParser for GenericParser {
    fn dialect(&self) -> Dialect {
        Dialect::Generic
    }

    fn parse(&self, text: &str) -> ParsedBooking {
        let text = collapse_whitespace(text);

        let customer_name = labelled_value(&text, &NAME_RE)
            .and_then(|v| NAME_VALUE_RE.find(v))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());

        let customer_phone = labelled_value(&text, &PHONE_RE)
            .and_then(|v| PHONE_VALUE_RE.find(v))
            .map(|m| m.as_str().trim().to_string());

        let customer_email = EMAIL_RE.find(&text).map(|m| m.as_str().to_string());

        let mut start_date = labelled_value(&text, &START_RE).and_then(first_date);
        let mut end_date = labelled_value(&text, &END_RE).and_then(first_date);
        if (start_date.is_none() || end_date.is_none())
            && let Some(caps) = DATE_RANGE_RE.captures(&text)
        {
            start_date = start_date.or_else(|| parse_date(&caps[1]));
            end_date = end_date.or_else(|| parse_date(&caps[2]));
        }

        let mut vehicle_class = labelled_value(&text, &CLASS_RE)
            .and_then(|v| v.split_whitespace().next())
            .map(|s| s.trim_matches(|c: char| !c.is_alphanumeric()).to_uppercase())
            .filter(|s| !s.is_empty());
        let mut requested_category = labelled_value(&text, &CATEGORY_RE).map(str::to_string);
        if let Some(code) = requested_category.as_deref().and_then(class_code) {
            requested_category = category_from_class_code(&code).map(str::to_string);
            vehicle_class.get_or_insert(code);
        }

        let vehicle_description = labelled_value(&text, &VEHICLE_RE).map(str::to_string);

        let license_plate = labelled_value(&text, &PLATE_RE)
            .and_then(|v| PLATE_VALUE_RE.find(v))
            .map(|m| m.as_str().to_uppercase());

        let total_price = labelled_value(&text, &TOTAL_RE)
            .and_then(|v| MONEY_VALUE_RE.find(v))
            .and_then(|m| parse_money(m.as_str()));

        let extra_insurance = labelled_value(&text, &INSURANCE_RE).is_some_and(parse_insurance_flag);

        let external_reference = labelled_value(&text, &REFERENCE_RE)
            .and_then(|v| v.split_whitespace().next())
            .map(|s| s.trim_end_matches(['.', ',', ';']).to_string())
            .or_else(|| {
                BOOKING_HASH_RE
                    .captures(&text)
                    .map(|caps| caps[1].to_string())
            });

        ParsedBooking {
            dialect: Dialect::Generic,
            customer_name,
            customer_phone,
            customer_email,
            start_date,
            end_date,
            requested_category,
            vehicle_description,
            vehicle_class,
            license_plate,
            total_price,
            extra_insurance,
            external_reference,
            vendor: None,
            raw_text: truncate_chars(&text, RAW_TEXT_LIMIT),
        }
    }
}

/// The trimmed text after the first `label:` match, cut at the next label.
fn labelled_value<'a>(text: &'a str, label: &Regex) -> Option<&'a str> {
    let found = label.find(text)?;
    let rest = &text[found.end()..];
    let cut = ANY_LABEL_RE.find(rest).map_or(rest.len(), |m| m.start());
    let value = rest[..cut].trim();
    (!value.is_empty()).then_some(value)
}

fn first_date(value: &str) -> Option<chrono::NaiveDate> {
    DATE_TOKEN_RE.find(value).and_then(|m| parse_date(m.as_str()))
}
