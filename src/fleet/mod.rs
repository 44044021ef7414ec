//! Fleet collaborators: the company/vehicle directory plus vehicle resolution
//! and ranking.
//!
//! Company and vehicle CRUD lives outside this crate. The intake core only
//! needs the narrow `FleetDirectory` interface below.

pub mod model;
pub mod ranking;
pub mod resolver;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;

pub use model::{Company, CompanySelector, Vehicle, VehicleFilter};
pub use ranking::{DefaultRanking, RankingRequest, VehicleRanker};
pub use resolver::{ResolveError, ResolveOptions, VehicleHints, resolve};

/// Read/write access to companies and their fleets.
#[async_trait]
pub trait FleetDirectory: Send + Sync {
    /// Look up a company. `Ok(None)` when nothing matches.
    async fn get_company(
        &self,
        selector: &CompanySelector,
    ) -> Result<Option<Company>, DatabaseError>;

    /// List a company's vehicles, ordered by brand then model.
    async fn list_vehicles(
        &self,
        company_id: Uuid,
        filter: &VehicleFilter,
    ) -> Result<Vec<Vehicle>, DatabaseError>;

    /// Set a vehicle's rented flag outside of a booking transition.
    async fn set_vehicle_rented(&self, vehicle_id: Uuid, rented: bool)
    -> Result<(), DatabaseError>;
}
