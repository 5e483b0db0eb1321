use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{ClaimOutcome, CompleteOutcome, DeliveryApi, VerifyOutcome};
use crate::engine::verify::VerificationChecklist;
use crate::error::DispatchError;
use crate::events::SessionEvent;
use crate::geo::{eta_minutes, haversine_km};
use crate::models::order::{Order, OrderStatus};
use crate::notify::NotificationSignal;
use crate::state::{ActiveDelivery, SessionState};

pub const REJECTION_ADVISORY_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub eta_minutes: f64,
}

/// Owns the per-order lifecycle transitions. A courier holds at most one
/// order in Claimed/Verified/EnRoute; the active slot is locked across the
/// claim call so concurrent accepts serialize on this device, while the
/// backend arbitrates between couriers.
#[derive(Clone)]
pub struct Dispatch {
    state: Arc<SessionState>,
    api: Arc<dyn DeliveryApi>,
    notifier: Arc<dyn NotificationSignal>,
}

impl Dispatch {
    pub fn new(
        state: Arc<SessionState>,
        api: Arc<dyn DeliveryApi>,
        notifier: Arc<dyn NotificationSignal>,
    ) -> Self {
        Self {
            state,
            api,
            notifier,
        }
    }

    pub async fn active_order(&self) -> Option<Order> {
        self.state
            .active
            .lock()
            .await
            .as_ref()
            .map(|delivery| delivery.order.clone())
    }

    pub async fn accept(&self, order: &Order) -> Result<Order, DispatchError> {
        let mut active = self.state.active.lock().await;
        if let Some(current) = active.as_ref() {
            // Short-circuit before any network call and surface what is
            // already in progress instead of overwriting it.
            return Err(DispatchError::ActiveOrderExists(Box::new(
                current.order.clone(),
            )));
        }

        let outcome = match self.api.claim_order(order.id, self.state.courier_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.state
                    .metrics
                    .claims_total
                    .with_label_values(&["error"])
                    .inc();
                return Err(err);
            }
        };

        match outcome {
            ClaimOutcome::Granted => {
                let mut claimed = order.clone();
                claimed.status = OrderStatus::Claimed;
                claimed.claimed_by = Some(self.state.courier_id);
                claimed.picked_at = Some(Utc::now());

                *active = Some(ActiveDelivery {
                    checklist: Some(VerificationChecklist::for_lines(&claimed.line_items)),
                    order: claimed.clone(),
                });
                drop(active);

                self.state
                    .metrics
                    .claims_total
                    .with_label_values(&["granted"])
                    .inc();
                if let Some(feed) = self.state.remove_from_feed(claimed.id).await {
                    self.state.emit(SessionEvent::FeedChanged(feed));
                }
                self.announce(&claimed);
                info!(order_id = %claimed.id, "order claimed");
                Ok(claimed)
            }
            ClaimOutcome::AlreadyClaimed => {
                drop(active);

                self.state
                    .metrics
                    .claims_total
                    .with_label_values(&["conflict"])
                    .inc();
                if let Some(feed) = self.state.remove_from_feed(order.id).await {
                    self.state.emit(SessionEvent::FeedChanged(feed));
                }
                let err = DispatchError::ClaimConflict(order.id);
                self.state.emit_error(&err);
                warn!(order_id = %order.id, "claim lost to another courier");
                Err(err)
            }
        }
    }

    pub async fn reject(&self, order_id: Uuid) -> Result<u32, DispatchError> {
        self.api
            .reject_order(order_id, self.state.courier_id)
            .await?;

        let count = self.state.record_rejection(order_id);
        self.state.metrics.rejections_total.inc();

        if let Some(feed) = self.state.remove_from_feed(order_id).await {
            self.state.emit(SessionEvent::FeedChanged(feed));
        }
        if count >= REJECTION_ADVISORY_THRESHOLD {
            self.state.emit(SessionEvent::RejectionAdvisory { count });
        }

        info!(order_id = %order_id, count, "order rejected");
        Ok(count)
    }

    pub async fn toggle_line(&self, line_id: Uuid) -> Result<bool, DispatchError> {
        let mut active = self.state.active.lock().await;
        let delivery = active.as_mut().ok_or(DispatchError::NoActiveOrder)?;
        let status = delivery.order.status;
        let checklist =
            delivery
                .checklist
                .as_mut()
                .ok_or(DispatchError::InvalidTransition {
                    from: status,
                    event: "toggle-line",
                })?;
        checklist.toggle_line(line_id)
    }

    pub async fn submit_verification(&self, pin: &str) -> Result<Order, DispatchError> {
        let mut active = self.state.active.lock().await;
        let delivery = active.as_mut().ok_or(DispatchError::NoActiveOrder)?;
        if delivery.order.status != OrderStatus::Claimed {
            return Err(DispatchError::InvalidTransition {
                from: delivery.order.status,
                event: "verify",
            });
        }
        let status = delivery.order.status;
        let checklist =
            delivery
                .checklist
                .as_mut()
                .ok_or(DispatchError::InvalidTransition {
                    from: status,
                    event: "verify",
                })?;

        // Items gate first: a correct pin cannot bypass an unchecked line.
        let unchecked = checklist.unchecked_count();
        if unchecked > 0 {
            return Err(DispatchError::IncompleteItems { unchecked });
        }

        checklist.pin_attempted = true;
        if pin != delivery.order.secret_pin {
            return Err(DispatchError::IncompletePin);
        }

        let entries = checklist.entries();
        match self
            .api
            .submit_verification(delivery.order.id, pin, &entries)
            .await?
        {
            VerifyOutcome::Accepted => {
                delivery.order.status = OrderStatus::Verified;
                delivery.order.verified_at = Some(Utc::now());
                delivery.checklist = None;
                let order = delivery.order.clone();
                drop(active);

                self.announce(&order);
                info!(order_id = %order.id, "pickup verified");
                Ok(order)
            }
            VerifyOutcome::PinMismatch => Err(DispatchError::PinMismatch),
            VerifyOutcome::Incomplete => Err(DispatchError::IncompleteItems { unchecked: 0 }),
        }
    }

    /// Local leg marker; the backend has no endpoint for departure.
    pub async fn start_delivery(&self) -> Result<Order, DispatchError> {
        let mut active = self.state.active.lock().await;
        let delivery = active.as_mut().ok_or(DispatchError::NoActiveOrder)?;
        if delivery.order.status != OrderStatus::Verified {
            return Err(DispatchError::InvalidTransition {
                from: delivery.order.status,
                event: "start-delivery",
            });
        }

        delivery.order.status = OrderStatus::EnRoute;
        let order = delivery.order.clone();
        drop(active);

        self.announce(&order);
        Ok(order)
    }

    /// Second, independent pin check at drop-off.
    pub async fn complete_delivery(&self, pin: &str) -> Result<Order, DispatchError> {
        let mut active = self.state.active.lock().await;
        let delivery = active.as_mut().ok_or(DispatchError::NoActiveOrder)?;
        if !matches!(
            delivery.order.status,
            OrderStatus::Verified | OrderStatus::EnRoute
        ) {
            return Err(DispatchError::InvalidTransition {
                from: delivery.order.status,
                event: "complete",
            });
        }
        let order_id = delivery.order.id;

        match self.api.complete_delivery(order_id, pin).await? {
            CompleteOutcome::Accepted => {
                let mut order = match active.take() {
                    Some(finished) => finished.order,
                    None => return Err(DispatchError::NoActiveOrder),
                };
                order.status = OrderStatus::Delivered;
                order.delivered_at = Some(Utc::now());
                drop(active);

                self.announce(&order);
                info!(order_id = %order.id, "delivery completed");
                Ok(order)
            }
            CompleteOutcome::PinMismatch => Err(DispatchError::PinMismatch),
        }
    }

    /// Backend-initiated only; the core never cancels on its own.
    pub async fn apply_cancellation(&self, order_id: Uuid) -> Result<(), DispatchError> {
        let mut active = self.state.active.lock().await;
        if !active
            .as_ref()
            .is_some_and(|delivery| delivery.order.id == order_id)
        {
            return Err(DispatchError::NoActiveOrder);
        }

        let Some(delivery) = active.take() else {
            return Err(DispatchError::NoActiveOrder);
        };
        let mut order = delivery.order;
        order.status = OrderStatus::Cancelled;
        drop(active);

        self.announce(&order);
        warn!(order_id = %order_id, "delivery cancelled by backend");
        Ok(())
    }

    /// Distance and ETA to the current leg's destination: the restaurant
    /// while Claimed, the customer once Verified/EnRoute.
    pub async fn route_estimate(&self) -> Option<RouteEstimate> {
        let position = self.state.last_position().await?;
        let active = self.state.active.lock().await;
        let delivery = active.as_ref()?;

        let destination = match delivery.order.status {
            OrderStatus::Claimed => &delivery.order.restaurant_location,
            OrderStatus::Verified | OrderStatus::EnRoute => &delivery.order.customer_location,
            _ => return None,
        };

        let distance_km = haversine_km(&position, destination);
        Some(RouteEstimate {
            distance_km,
            eta_minutes: eta_minutes(distance_km),
        })
    }

    pub(crate) async fn restore_active(&self, order: Order) {
        let checklist = (order.status == OrderStatus::Claimed)
            .then(|| VerificationChecklist::for_lines(&order.line_items));

        let mut active = self.state.active.lock().await;
        *active = Some(ActiveDelivery {
            checklist,
            order: order.clone(),
        });
        drop(active);

        self.announce(&order);
    }

    fn announce(&self, order: &Order) {
        self.notifier.order_state_changed(order);
        self.state
            .emit(SessionEvent::OrderStateChanged(Box::new(order.clone())));
    }
}
