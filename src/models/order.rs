use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Ready,
    Offered,
    Claimed,
    Verified,
    EnRoute,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Claimed | OrderStatus::Verified | OrderStatus::EnRoute
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub meal_id: Uuid,
    pub meal_name: String,
    pub unit_price: f64,
    pub quantity: u32,
    pub subtotal: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub restaurant_location: GeoPoint,
    pub customer_location: GeoPoint,
    pub line_items: Vec<OrderLine>,
    pub status: OrderStatus,
    pub secret_pin: String,
    pub claimed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}
