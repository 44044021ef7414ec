//! Company and vehicle records as seen by the intake core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A rental company that owns a fleet and receives bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// One fleet vehicle.
///
/// `is_rented` is only ever flipped by booking transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub company_id: Uuid,
    pub brand: String,
    pub model: String,
    pub category: String,
    pub license_plate: Option<String>,
    pub is_rented: bool,
}

impl Vehicle {
    pub fn new(company_id: Uuid, brand: &str, model: &str, category: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            brand: brand.to_string(),
            model: model.to_string(),
            category: category.to_string(),
            license_plate: None,
            is_rented: false,
        }
    }

    pub fn with_plate(mut self, plate: &str) -> Self {
        self.license_plate = Some(plate.to_string());
        self
    }

    /// Operator-facing one-liner, e.g. `Fiat 500 [compact] (ABC-1234)`.
    pub fn label(&self) -> String {
        format!(
            "{} {} [{}] ({})",
            self.brand,
            self.model,
            self.category,
            self.license_plate.as_deref().unwrap_or("no plate")
        )
    }
}

impl fmt::Display for Vehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.brand, self.model)
    }
}

/// How a company is looked up from configuration or operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanySelector {
    Id(Uuid),
    Email(String),
    Name(String),
}

impl FromStr for CompanySelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = Uuid::parse_str(s) {
            return Ok(Self::Id(id));
        }
        if s.contains('@') {
            return Ok(Self::Email(s.to_string()));
        }
        Ok(Self::Name(s.to_string()))
    }
}

impl fmt::Display for CompanySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Email(email) => write!(f, "{email}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

impl CompanySelector {
    /// Whether this selector refers to the given company.
    pub fn matches(&self, company: &Company) -> bool {
        match self {
            Self::Id(id) => company.id == *id,
            Self::Email(email) => company.email.eq_ignore_ascii_case(email),
            Self::Name(name) => company.name.to_lowercase() == name.to_lowercase(),
        }
    }
}

/// Narrowing options for `FleetDirectory::list_vehicles`.
#[derive(Debug, Clone, Default)]
pub struct VehicleFilter {
    /// Only vehicles with `is_rented = false`.
    pub available_only: bool,
    /// Case-insensitive category match.
    pub category: Option<String>,
}

impl VehicleFilter {
    pub fn available() -> Self {
        Self {
            available_only: true,
            category: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parses_uuid_email_and_name() {
        let id = Uuid::new_v4();
        assert_eq!(
            id.to_string().parse::<CompanySelector>().unwrap(),
            CompanySelector::Id(id)
        );
        assert_eq!(
            "ops@acme.gr".parse::<CompanySelector>().unwrap(),
            CompanySelector::Email("ops@acme.gr".into())
        );
        assert_eq!(
            " Acme Rentals ".parse::<CompanySelector>().unwrap(),
            CompanySelector::Name("Acme Rentals".into())
        );
    }

    #[test]
    fn selector_matching_is_case_insensitive() {
        let company = Company {
            id: Uuid::new_v4(),
            name: "Acme Rentals".into(),
            email: "ops@acme.gr".into(),
        };
        assert!(CompanySelector::Email("OPS@acme.gr".into()).matches(&company));
        assert!(CompanySelector::Name("acme rentals".into()).matches(&company));
        assert!(!CompanySelector::Id(Uuid::new_v4()).matches(&company));
    }

    #[test]
    fn vehicle_label_mentions_plate() {
        let v = Vehicle::new(Uuid::new_v4(), "Fiat", "500", "compact").with_plate("IKA-1234");
        assert_eq!(v.label(), "Fiat 500 [compact] (IKA-1234)");
        assert_eq!(v.to_string(), "Fiat 500");
    }
}
