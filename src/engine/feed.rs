use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval_at};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::DeliveryApi;
use crate::events::SessionEvent;
use crate::geo::haversine_km;
use crate::models::courier::GeoPoint;
use crate::models::order::Order;
use crate::notify::NotificationSignal;
use crate::state::SessionState;

pub const GEOFENCE_RADIUS_KM: f64 = 38.0;

/// Narrows backend candidates to what this courier should see: within the
/// geofence radius of the restaurant and not previously rejected.
pub fn visible_orders(
    candidates: Vec<Order>,
    position: &GeoPoint,
    rejected: &HashSet<Uuid>,
) -> Vec<Order> {
    candidates
        .into_iter()
        .filter(|order| {
            haversine_km(position, &order.restaurant_location) <= GEOFENCE_RADIUS_KM
                && !rejected.contains(&order.id)
        })
        .collect()
}

pub struct OrderFeedPoller {
    state: Arc<SessionState>,
    api: Arc<dyn DeliveryApi>,
    notifier: Arc<dyn NotificationSignal>,
    handle: Option<JoinHandle<()>>,
}

impl OrderFeedPoller {
    pub fn new(
        state: Arc<SessionState>,
        api: Arc<dyn DeliveryApi>,
        notifier: Arc<dyn NotificationSignal>,
    ) -> Self {
        Self {
            state,
            api,
            notifier,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn start(&mut self, every: Duration) {
        if self.is_running() {
            return;
        }

        let state = self.state.clone();
        let api = self.api.clone();
        let notifier = self.notifier.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                poll_feed(&state, api.as_ref(), notifier.as_ref()).await;
            }
        }));
    }

    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

pub(crate) async fn poll_feed(
    state: &SessionState,
    api: &dyn DeliveryApi,
    notifier: &dyn NotificationSignal,
) {
    if !state.is_available() {
        state
            .metrics
            .feed_polls_total
            .with_label_values(&["skipped"])
            .inc();
        return;
    }

    let Some(position) = state.last_position().await else {
        debug!("no position fix yet, feed tick skipped");
        state
            .metrics
            .feed_polls_total
            .with_label_values(&["skipped"])
            .inc();
        return;
    };

    let candidates = match api.fetch_ready_orders().await {
        Ok(orders) => orders,
        Err(err) => {
            // The previous result set stays as-is.
            warn!(error = %err, "feed fetch failed");
            state
                .metrics
                .feed_polls_total
                .with_label_values(&["error"])
                .inc();
            return;
        }
    };

    let visible = visible_orders(candidates, &position, &state.rejected_snapshot());

    if let Some(stored) = state.replace_feed(visible).await {
        state.metrics.visible_orders.set(stored.len() as i64);
        state
            .metrics
            .feed_polls_total
            .with_label_values(&["changed"])
            .inc();
        notifier.new_orders(stored.len());
        state.emit(SessionEvent::FeedChanged(stored));
    } else {
        state
            .metrics
            .feed_polls_total
            .with_label_values(&["unchanged"])
            .inc();
    }
}
