use serde::Serialize;

use crate::error::ErrorKind;
use crate::models::order::Order;

#[derive(Debug, Clone, Serialize)]
pub enum SessionEvent {
    FeedChanged(Vec<Order>),
    OrderStateChanged(Box<Order>),
    RejectionAdvisory { count: u32 },
    Error { kind: ErrorKind, message: String },
}
