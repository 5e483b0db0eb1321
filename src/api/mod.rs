pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::courier::GeoPoint;
use crate::models::order::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Granted,
    AlreadyClaimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    Accepted,
    PinMismatch,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompleteOutcome {
    Accepted,
    PinMismatch,
}

/// Backend services the core depends on. The backend is the sole arbiter of
/// order claims; local state always defers to what these calls return.
#[async_trait]
pub trait DeliveryApi: Send + Sync {
    async fn fetch_ready_orders(&self) -> Result<Vec<Order>, DispatchError>;

    async fn push_location(
        &self,
        courier_id: Uuid,
        position: &GeoPoint,
    ) -> Result<(), DispatchError>;

    async fn claim_order(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
    ) -> Result<ClaimOutcome, DispatchError>;

    async fn reject_order(&self, order_id: Uuid, courier_id: Uuid) -> Result<(), DispatchError>;

    async fn submit_verification(
        &self,
        order_id: Uuid,
        pin: &str,
        received_lines: &[(Uuid, bool)],
    ) -> Result<VerifyOutcome, DispatchError>;

    async fn complete_delivery(
        &self,
        order_id: Uuid,
        pin: &str,
    ) -> Result<CompleteOutcome, DispatchError>;

    async fn fetch_active_order(&self, courier_id: Uuid) -> Result<Option<Order>, DispatchError>;
}
