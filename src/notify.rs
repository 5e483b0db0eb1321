use tracing::info;

use crate::models::order::Order;

/// Device alert capability (haptic/audio/push behind one seam). Injected so
/// the pollers stay free of global notification state.
pub trait NotificationSignal: Send + Sync {
    fn new_orders(&self, count: usize);
    fn order_state_changed(&self, order: &Order);
}

pub struct NoopSignal;

impl NotificationSignal for NoopSignal {
    fn new_orders(&self, _count: usize) {}
    fn order_state_changed(&self, _order: &Order) {}
}

/// Logs where a device would vibrate, chime and push.
pub struct LogSignal;

impl NotificationSignal for LogSignal {
    fn new_orders(&self, count: usize) {
        info!(count, "orders ready for pickup");
    }

    fn order_state_changed(&self, order: &Order) {
        info!(order_id = %order.id, status = ?order.status, "order state changed");
    }
}
