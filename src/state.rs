use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dashmap::DashSet;
use tokio::sync::{Mutex, RwLock, broadcast};
use uuid::Uuid;

use crate::engine::verify::VerificationChecklist;
use crate::error::DispatchError;
use crate::events::SessionEvent;
use crate::models::courier::{GeoPoint, SessionSnapshot};
use crate::models::order::Order;
use crate::observability::metrics::Metrics;

pub struct ActiveDelivery {
    pub order: Order,
    pub checklist: Option<VerificationChecklist>,
}

pub struct SessionState {
    pub courier_id: Uuid,
    pub online: AtomicBool,
    pub available: AtomicBool,
    last_position: RwLock<Option<GeoPoint>>,
    pub rejected_orders: DashSet<Uuid>,
    rejection_count: AtomicU32,
    pub active: Mutex<Option<ActiveDelivery>>,
    feed: Mutex<Vec<Order>>,
    pub events_tx: broadcast::Sender<SessionEvent>,
    pub metrics: Metrics,
}

impl SessionState {
    pub fn new(
        courier_id: Uuid,
        event_buffer_size: usize,
    ) -> (Self, broadcast::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = broadcast::channel(event_buffer_size);

        (
            Self {
                courier_id,
                online: AtomicBool::new(false),
                available: AtomicBool::new(true),
                last_position: RwLock::new(None),
                rejected_orders: DashSet::new(),
                rejection_count: AtomicU32::new(0),
                active: Mutex::new(None),
                feed: Mutex::new(Vec::new()),
                events_tx,
                metrics: Metrics::new(),
            },
            events_rx,
        )
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn emit_error(&self, err: &DispatchError) {
        self.emit(SessionEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub async fn last_position(&self) -> Option<GeoPoint> {
        self.last_position.read().await.clone()
    }

    pub async fn set_last_position(&self, position: GeoPoint) {
        *self.last_position.write().await = Some(position);
    }

    pub fn rejection_count(&self) -> u32 {
        self.rejection_count.load(Ordering::SeqCst)
    }

    /// Records a rejection and returns the new session total. The count never
    /// resets for the lifetime of the session.
    pub fn record_rejection(&self, order_id: Uuid) -> u32 {
        self.rejected_orders.insert(order_id);
        self.rejection_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn rejected_snapshot(&self) -> HashSet<Uuid> {
        self.rejected_orders.iter().map(|id| *id.key()).collect()
    }

    pub async fn visible_feed(&self) -> Vec<Order> {
        self.feed.lock().await.clone()
    }

    /// Replaces the cached feed, dropping anything rejected since the fetch
    /// started; returns the stored feed when the visible id set changed.
    /// Filtering again under the feed lock is the serialization point that
    /// keeps an in-flight poll from resurrecting a just-rejected order.
    pub async fn replace_feed(&self, orders: Vec<Order>) -> Option<Vec<Order>> {
        let mut feed = self.feed.lock().await;
        let orders: Vec<Order> = orders
            .into_iter()
            .filter(|o| !self.rejected_orders.contains(&o.id))
            .collect();

        let previous: HashSet<Uuid> = feed.iter().map(|o| o.id).collect();
        let unchanged =
            feed.len() == orders.len() && orders.iter().all(|o| previous.contains(&o.id));

        if unchanged {
            return None;
        }
        *feed = orders;
        Some(feed.clone())
    }

    /// Drops one order from the cached feed, returning the remaining feed
    /// when something was actually removed.
    pub async fn remove_from_feed(&self, order_id: Uuid) -> Option<Vec<Order>> {
        let mut feed = self.feed.lock().await;
        let before = feed.len();
        feed.retain(|o| o.id != order_id);
        (feed.len() != before).then(|| feed.clone())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let active_order = self.active.lock().await.as_ref().map(|a| a.order.id);
        SessionSnapshot {
            courier_id: self.courier_id,
            online: self.is_online(),
            available: self.is_available(),
            last_position: self.last_position().await,
            rejection_count: self.rejection_count(),
            visible_orders: self.feed.lock().await.len(),
            active_order,
        }
    }
}
