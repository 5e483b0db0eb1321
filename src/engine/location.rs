use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, warn};

use crate::api::DeliveryApi;
use crate::error::DispatchError;
use crate::models::courier::GeoPoint;
use crate::state::SessionState;

pub const PUSH_RETRY_ATTEMPTS: u32 = 3;
pub const PUSH_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Device geolocation seam. Permission can be revoked and position fixes can
/// time out at any point; both surface as recoverable errors.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn request_permission(&self) -> Result<(), DispatchError>;
    async fn current_position(&self) -> Result<GeoPoint, DispatchError>;
}

/// Fixed-position source for headless runs and tests.
pub struct StaticLocationSource {
    position: GeoPoint,
}

impl StaticLocationSource {
    pub fn new(position: GeoPoint) -> Self {
        Self { position }
    }
}

#[async_trait]
impl LocationSource for StaticLocationSource {
    async fn request_permission(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn current_position(&self) -> Result<GeoPoint, DispatchError> {
        Ok(self.position.clone())
    }
}

pub struct LocationTracker {
    state: Arc<SessionState>,
    api: Arc<dyn DeliveryApi>,
    source: Arc<dyn LocationSource>,
    handle: Option<JoinHandle<()>>,
}

impl LocationTracker {
    pub fn new(
        state: Arc<SessionState>,
        api: Arc<dyn DeliveryApi>,
        source: Arc<dyn LocationSource>,
    ) -> Self {
        Self {
            state,
            api,
            source,
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
        let source = self.source.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sample_and_push(&state, api.as_ref(), source.as_ref()).await;
            }
        }));
    }

    /// Cancels the loop and waits for it to wind down; once this resolves no
    /// further tick fires and any in-flight retry is discarded.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

pub(crate) async fn sample_and_push(
    state: &SessionState,
    api: &dyn DeliveryApi,
    source: &dyn LocationSource,
) {
    let position = match source.current_position().await {
        Ok(position) => position,
        Err(err) => {
            warn!(error = %err, "position sample failed, tick skipped");
            state
                .metrics
                .location_pushes_total
                .with_label_values(&["skipped"])
                .inc();
            return;
        }
    };

    // Local matching never waits on the remote store.
    state.set_last_position(position.clone()).await;

    let start = Instant::now();
    for attempt in 1..=PUSH_RETRY_ATTEMPTS {
        match api.push_location(state.courier_id, &position).await {
            Ok(()) => {
                state
                    .metrics
                    .push_duration_seconds
                    .with_label_values(&["delivered"])
                    .observe(start.elapsed().as_secs_f64());
                state
                    .metrics
                    .location_pushes_total
                    .with_label_values(&["delivered"])
                    .inc();
                return;
            }
            Err(err) => {
                debug!(attempt, error = %err, "location push failed");
                if attempt < PUSH_RETRY_ATTEMPTS {
                    sleep(PUSH_RETRY_BACKOFF).await;
                }
            }
        }
    }

    state
        .metrics
        .push_duration_seconds
        .with_label_values(&["gave_up"])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .location_pushes_total
        .with_label_values(&["gave_up"])
        .inc();
    warn!(attempts = PUSH_RETRY_ATTEMPTS, "location push abandoned, next tick retries");
}
