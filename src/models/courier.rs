use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub courier_id: Uuid,
    pub position: GeoPoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub courier_id: Uuid,
    pub online: bool,
    pub available: bool,
    pub last_position: Option<GeoPoint>,
    pub rejection_count: u32,
    pub visible_orders: usize,
    pub active_order: Option<Uuid>,
}
