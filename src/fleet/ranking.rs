//! Ranking interface for the interactive reservation-request flow.
//!
//! Ingestion never ranks; it resolves. The learned ranker lives elsewhere and
//! plugs in through `VehicleRanker`. `DefaultRanking` is the fallback used
//! when no trained model exists for a company.

use rust_decimal::Decimal;

use crate::fleet::model::Vehicle;

/// Attributes of a reservation request relevant to ranking.
#[derive(Debug, Clone, Default)]
pub struct RankingRequest {
    pub category: Option<String>,
    pub days: u32,
    pub total_price: Option<Decimal>,
    pub extra_insurance: bool,
}

/// Orders available vehicles for a request, best first.
pub trait VehicleRanker: Send + Sync {
    fn rank(&self, vehicles: Vec<Vehicle>, request: &RankingRequest) -> Vec<Vehicle>;
}

/// Requested category first, then everything else; brand/model alphabetical
/// inside each group.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRanking;

impl VehicleRanker for DefaultRanking {
    fn rank(&self, vehicles: Vec<Vehicle>, request: &RankingRequest) -> Vec<Vehicle> {
        let wanted = request
            .category
            .as_deref()
            .map(str::to_lowercase)
            .filter(|c| !c.is_empty());

        let (mut primary, mut secondary): (Vec<Vehicle>, Vec<Vehicle>) = match wanted {
            Some(ref wanted) => vehicles
                .into_iter()
                .partition(|v| v.category.to_lowercase() == *wanted),
            None => (vehicles, Vec::new()),
        };

        let alpha = |v: &Vehicle| (v.brand.to_lowercase(), v.model.to_lowercase());
        primary.sort_by_key(alpha);
        secondary.sort_by_key(alpha);
        primary.extend(secondary);
        primary
    }
}
