use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::api::DeliveryApi;
use crate::config::Config;
use crate::engine::dispatch::Dispatch;
use crate::engine::feed::{self, OrderFeedPoller};
use crate::engine::location::{LocationSource, LocationTracker};
use crate::error::DispatchError;
use crate::events::SessionEvent;
use crate::notify::NotificationSignal;
use crate::state::SessionState;

/// Single on/off switch for the courier session. Owns both timer lifecycles;
/// nothing polls while the courier is offline.
pub struct SessionGate {
    state: Arc<SessionState>,
    api: Arc<dyn DeliveryApi>,
    source: Arc<dyn LocationSource>,
    notifier: Arc<dyn NotificationSignal>,
    dispatch: Dispatch,
    tracker: LocationTracker,
    poller: OrderFeedPoller,
    location_interval: Duration,
    feed_interval: Duration,
}

impl SessionGate {
    /// Builds the session and restores a mid-delivery order left over from a
    /// previous run before any polling can start.
    pub async fn connect(
        config: &Config,
        state: Arc<SessionState>,
        api: Arc<dyn DeliveryApi>,
        source: Arc<dyn LocationSource>,
        notifier: Arc<dyn NotificationSignal>,
    ) -> Self {
        let dispatch = Dispatch::new(state.clone(), api.clone(), notifier.clone());

        match api.fetch_active_order(state.courier_id).await {
            Ok(Some(order)) if order.status.is_active() => {
                info!(order_id = %order.id, status = ?order.status, "restored active delivery");
                dispatch.restore_active(order).await;
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "active order recovery failed"),
        }

        let tracker = LocationTracker::new(state.clone(), api.clone(), source.clone());
        let poller = OrderFeedPoller::new(state.clone(), api.clone(), notifier.clone());

        Self {
            state,
            api,
            source,
            notifier,
            dispatch,
            tracker,
            poller,
            location_interval: Duration::from_millis(config.location_interval_ms),
            feed_interval: Duration::from_millis(config.feed_interval_ms),
        }
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.events_tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.state.is_online()
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    pub async fn go_online(&mut self) -> Result<(), DispatchError> {
        if self.state.online.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(err) = self.source.request_permission().await {
            // Permission failure forces the switch back off.
            self.state.online.store(false, Ordering::SeqCst);
            self.state.emit_error(&err);
            warn!(error = %err, "going online refused");
            return Err(err);
        }

        // Seed the position so the immediate fetch below can filter.
        match self.source.current_position().await {
            Ok(position) => self.state.set_last_position(position).await,
            Err(err) => warn!(error = %err, "initial position sample failed"),
        }

        self.tracker.start(self.location_interval);
        self.poller.start(self.feed_interval);

        // First fetch happens now, not at the first timer tick.
        feed::poll_feed(&self.state, self.api.as_ref(), self.notifier.as_ref()).await;

        info!(courier_id = %self.state.courier_id, "courier online");
        Ok(())
    }

    /// Always safe to call, including when already offline.
    pub async fn go_offline(&mut self) {
        self.tracker.stop().await;
        self.poller.stop().await;

        if self.state.online.swap(false, Ordering::SeqCst) {
            info!(courier_id = %self.state.courier_id, "courier offline");
        }
    }
}
