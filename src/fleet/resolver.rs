//! Vehicle resolution: picks at most one fleet vehicle for a parsed booking.
//!
//! Rules run in order and the first one yielding exactly one candidate wins:
//! 1. exact license plate (any vehicle)
//! 2. brand + model substring, narrowed to exact brand + model on ties
//! 3. category among unrented vehicles
//! 4. the only unrented vehicle, when `allow_single_available_fallback` is on
//!
//! No rule guesses between several candidates. If nothing resolves, the
//! error carries the hints that were tried plus a short list of available
//! vehicles for the operator.

use std::fmt;

use tracing::debug;

use crate::error::IngestError;
use crate::fleet::model::Vehicle;
use crate::parsers::ParsedBooking;
use crate::parsers::normalize::category_from_class_code;

/// How many available vehicles are listed in a resolution error.
pub const MAX_SUGGESTIONS: usize = 8;

/// Resolution behaviour switches.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Rule 4: pick the sole unrented vehicle when every other rule failed.
    pub allow_single_available_fallback: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            allow_single_available_fallback: true,
        }
    }
}

/// Vehicle hints pulled out of a parsed booking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleHints {
    pub license_plate: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub vehicle_class: Option<String>,
    pub requested_category: Option<String>,
}

impl VehicleHints {
    pub fn from_parsed(parsed: &ParsedBooking) -> Self {
        let (brand, model) = parsed
            .vehicle_description
            .as_deref()
            .map(split_description)
            .unwrap_or((None, None));
        Self {
            license_plate: parsed.license_plate.clone(),
            brand,
            model,
            vehicle_class: parsed.vehicle_class.clone(),
            requested_category: parsed.requested_category.clone(),
        }
    }

    /// Category from the class code, else the explicitly requested one.
    pub fn category(&self) -> Option<String> {
        self.vehicle_class
            .as_deref()
            .and_then(category_from_class_code)
            .map(str::to_string)
            .or_else(|| self.requested_category.clone())
    }
}

impl fmt::Display for VehicleHints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(p) = &self.license_plate {
            parts.push(format!("plate='{p}'"));
        }
        if let Some(b) = &self.brand {
            parts.push(format!("brand='{b}'"));
        }
        if let Some(m) = &self.model {
            parts.push(format!("model='{m}'"));
        }
        if let Some(c) = &self.vehicle_class {
            parts.push(format!("vehicle_class='{c}'"));
        }
        if let Some(c) = self.category() {
            parts.push(format!("category='{c}'"));
        }
        if parts.is_empty() {
            write!(f, "no vehicle hints")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Why no single vehicle could be chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// At least one rule matched several vehicles and none narrowed to one.
    Ambiguous {
        hints: VehicleHints,
        suggestions: Vec<String>,
    },
    /// No rule matched anything.
    NotFound {
        hints: VehicleHints,
        suggestions: Vec<String>,
    },
}

impl ResolveError {
    pub fn suggestions(&self) -> &[String] {
        match self {
            Self::Ambiguous { suggestions, .. } | Self::NotFound { suggestions, .. } => suggestions,
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, hints, suggestions) = match self {
            Self::Ambiguous { hints, suggestions } => ("ambiguous vehicle", hints, suggestions),
            Self::NotFound { hints, suggestions } => ("no vehicle", hints, suggestions),
        };
        write!(f, "{kind} for {hints}; available: ")?;
        if suggestions.is_empty() {
            write!(f, "(none)")
        } else {
            write!(f, "{}", suggestions.join("; "))
        }
    }
}

impl From<ResolveError> for IngestError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Ambiguous { hints, suggestions } => IngestError::VehicleAmbiguous {
                hints: hints.to_string(),
                suggestions,
            },
            ResolveError::NotFound { hints, suggestions } => IngestError::VehicleNotFound {
                hints: hints.to_string(),
                suggestions,
            },
        }
    }
}

/// Pick exactly one vehicle from `fleet` for `hints`.
pub fn resolve(
    fleet: &[Vehicle],
    hints: &VehicleHints,
    options: &ResolveOptions,
) -> Result<Vehicle, ResolveError> {
    let available: Vec<&Vehicle> = fleet.iter().filter(|v| !v.is_rented).collect();
    let mut ambiguous = false;

    if let Some(plate) = hints.license_plate.as_deref() {
        let matches: Vec<&Vehicle> = fleet
            .iter()
            .filter(|v| {
                v.license_plate
                    .as_deref()
                    .is_some_and(|p| p.trim().eq_ignore_ascii_case(plate.trim()))
            })
            .collect();
        if let [only] = matches.as_slice() {
            debug!(vehicle = %only.id, "Resolved vehicle by license plate");
            return Ok((*only).clone());
        }
        ambiguous |= matches.len() > 1;
    }

    if let Some(brand) = hints.brand.as_deref() {
        let brand_lc = brand.to_lowercase();
        let model_lc = hints.model.as_deref().map(str::to_lowercase);
        let matches: Vec<&Vehicle> = fleet
            .iter()
            .filter(|v| {
                v.brand.to_lowercase().contains(&brand_lc)
                    && model_lc
                        .as_deref()
                        .is_none_or(|m| v.model.to_lowercase().contains(m))
            })
            .collect();
        if let [only] = matches.as_slice() {
            debug!(vehicle = %only.id, "Resolved vehicle by brand/model");
            return Ok((*only).clone());
        }
        if matches.len() > 1 {
            if let Some(model_lc) = model_lc.as_deref() {
                let strict: Vec<&&Vehicle> = matches
                    .iter()
                    .filter(|v| v.brand.to_lowercase() == brand_lc && v.model.to_lowercase() == model_lc)
                    .collect();
                if let [only] = strict.as_slice() {
                    debug!(vehicle = %only.id, "Resolved vehicle by exact brand/model");
                    return Ok((**only).clone());
                }
            }
            ambiguous = true;
        }
    }

    if let Some(category) = hints.category() {
        let category_lc = category.to_lowercase();
        let matches: Vec<&&Vehicle> = available
            .iter()
            .filter(|v| v.category.to_lowercase() == category_lc)
            .collect();
        if let [only] = matches.as_slice() {
            debug!(vehicle = %only.id, category = %category, "Resolved vehicle by category");
            return Ok((**only).clone());
        }
        ambiguous |= matches.len() > 1;
    }

    if options.allow_single_available_fallback
        && let [only] = available.as_slice()
    {
        debug!(vehicle = %only.id, "Resolved vehicle as the only available one");
        return Ok((*only).clone());
    }

    let suggestions: Vec<String> = available
        .iter()
        .take(MAX_SUGGESTIONS)
        .map(|v| v.label())
        .collect();
    let hints = hints.clone();
    if ambiguous {
        Err(ResolveError::Ambiguous { hints, suggestions })
    } else {
        Err(ResolveError::NotFound { hints, suggestions })
    }
}

/// Split a vehicle description into brand and model hints.
///
/// `"Fiat 500 or similar"` → (`Fiat`, `500`). Words from a standalone `or`
/// onwards are dropped.
pub fn split_description(desc: &str) -> (Option<String>, Option<String>) {
    let mut words = desc.split_whitespace();
    let Some(brand) = words.next() else {
        return (None, None);
    };
    let model: Vec<&str> = words.take_while(|w| !w.eq_ignore_ascii_case("or")).collect();
    let model = if model.is_empty() {
        None
    } else {
        Some(model.join(" "))
    };
    (Some(brand.to_string()), model)
}
