use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::order::{Order, OrderStatus};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("order {0} already claimed by another courier")]
    ClaimConflict(Uuid),

    #[error("a delivery is already in progress")]
    ActiveOrderExists(Box<Order>),

    #[error("checklist incomplete: {unchecked} line item(s) unchecked")]
    IncompleteItems { unchecked: usize },

    #[error("pin does not match the order secret")]
    IncompletePin,

    #[error("pin rejected at hand-off")]
    PinMismatch,

    #[error("no {event} transition from {from:?}")]
    InvalidTransition {
        from: OrderStatus,
        event: &'static str,
    },

    #[error("no active order")]
    NoActiveOrder,

    #[error("unknown line item {0}")]
    UnknownLine(Uuid),

    #[error("network error: {0}")]
    Network(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::PermissionDenied => ErrorKind::PermissionDenied,
            DispatchError::ClaimConflict(_) => ErrorKind::ClaimConflict,
            DispatchError::ActiveOrderExists(_) => ErrorKind::ActiveOrderExists,
            DispatchError::IncompleteItems { .. } => ErrorKind::IncompleteItems,
            DispatchError::IncompletePin => ErrorKind::IncompletePin,
            DispatchError::PinMismatch => ErrorKind::PinMismatch,
            DispatchError::InvalidTransition { .. }
            | DispatchError::NoActiveOrder
            | DispatchError::UnknownLine(_) => ErrorKind::InvalidTransition,
            DispatchError::Network(_) => ErrorKind::Network,
            DispatchError::Internal(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    PermissionDenied,
    ClaimConflict,
    ActiveOrderExists,
    IncompleteItems,
    IncompletePin,
    PinMismatch,
    InvalidTransition,
    Network,
    Internal,
}
