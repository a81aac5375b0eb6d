//! Data API port: chain-side inventory reconciliation only,
//! never a source of truth for orders.
//!
//! `GET https://data-api.polymarket.com/positions?user=<funder>&sizeThreshold=0&limit=500`.
//!
//! Open question carried forward from not resolved here (see
//! DESIGN.md Open Question #3): when the API reports size 0 but the local
//! position has size > 0, the source preserves local state and logs a
//! warning; the inverse (API>0, local 0) unconditionally creates/grows the
//! position. This asymmetry is out of this crate's scope to adjudicate
//! since the Data API adapter itself is an external collaborator; it is
//! documented here so a future reconciliation implementation preserves the
//! asymmetry rather than "fixing" it without product sign-off.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::AssetId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataApiPosition {
    pub asset: AssetId,
    pub size: f64,
}

#[async_trait]
pub trait DataApiClient: Send + Sync {
    async fn get_positions(&self, funder_address: &str) -> anyhow::Result<Vec<DataApiPosition>>;
}
