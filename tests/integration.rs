use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tower::ServiceExt;
use uuid::Uuid;

use courier_dispatch::api::{ClaimOutcome, CompleteOutcome, DeliveryApi, VerifyOutcome};
use courier_dispatch::config::Config;
use courier_dispatch::engine::dispatch::Dispatch;
use courier_dispatch::engine::location::{LocationSource, StaticLocationSource};
use courier_dispatch::engine::session::SessionGate;
use courier_dispatch::error::DispatchError;
use courier_dispatch::events::SessionEvent;
use courier_dispatch::models::courier::GeoPoint;
use courier_dispatch::models::order::{Order, OrderLine, OrderStatus};
use courier_dispatch::notify::{NoopSignal, NotificationSignal};
use courier_dispatch::observability::http::router;
use courier_dispatch::state::SessionState;

const COURIER_LAT: f64 = 53.5511;
const COURIER_LNG: f64 = 9.9937;

struct MockBackend {
    orders: Mutex<Vec<Order>>,
    pins: Mutex<HashMap<Uuid, String>>,
    claims: Mutex<HashMap<Uuid, Uuid>>,
    active: Mutex<Option<Order>>,
    fail_fetch: AtomicBool,
    fail_push: AtomicBool,
    push_attempts: AtomicUsize,
    claim_calls: AtomicUsize,
}

impl MockBackend {
    fn with_orders(orders: Vec<Order>) -> Arc<Self> {
        let pins = orders
            .iter()
            .map(|order| (order.id, order.secret_pin.clone()))
            .collect();

        Arc::new(Self {
            orders: Mutex::new(orders),
            pins: Mutex::new(pins),
            claims: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            fail_fetch: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
            push_attempts: AtomicUsize::new(0),
            claim_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DeliveryApi for MockBackend {
    async fn fetch_ready_orders(&self) -> Result<Vec<Order>, DispatchError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(DispatchError::Network("backend unavailable".to_string()));
        }
        Ok(self.orders.lock().await.clone())
    }

    async fn push_location(
        &self,
        _courier_id: Uuid,
        _position: &GeoPoint,
    ) -> Result<(), DispatchError> {
        self.push_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(DispatchError::Network("push refused".to_string()));
        }
        Ok(())
    }

    async fn claim_order(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
    ) -> Result<ClaimOutcome, DispatchError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        let mut claims = self.claims.lock().await;
        let holder = *claims.entry(order_id).or_insert(courier_id);
        if holder == courier_id {
            Ok(ClaimOutcome::Granted)
        } else {
            Ok(ClaimOutcome::AlreadyClaimed)
        }
    }

    async fn reject_order(&self, _order_id: Uuid, _courier_id: Uuid) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn submit_verification(
        &self,
        order_id: Uuid,
        pin: &str,
        received_lines: &[(Uuid, bool)],
    ) -> Result<VerifyOutcome, DispatchError> {
        if received_lines.iter().any(|(_, received)| !received) {
            return Ok(VerifyOutcome::Incomplete);
        }
        match self.pins.lock().await.get(&order_id) {
            Some(expected) if expected == pin => Ok(VerifyOutcome::Accepted),
            _ => Ok(VerifyOutcome::PinMismatch),
        }
    }

    async fn complete_delivery(
        &self,
        order_id: Uuid,
        pin: &str,
    ) -> Result<CompleteOutcome, DispatchError> {
        match self.pins.lock().await.get(&order_id) {
            Some(expected) if expected == pin => Ok(CompleteOutcome::Accepted),
            _ => Ok(CompleteOutcome::PinMismatch),
        }
    }

    async fn fetch_active_order(&self, _courier_id: Uuid) -> Result<Option<Order>, DispatchError> {
        Ok(self.active.lock().await.clone())
    }
}

#[derive(Default)]
struct CountingSignal {
    new_orders: AtomicUsize,
    state_changes: AtomicUsize,
}

impl NotificationSignal for CountingSignal {
    fn new_orders(&self, _count: usize) {
        self.new_orders.fetch_add(1, Ordering::SeqCst);
    }

    fn order_state_changed(&self, _order: &Order) {
        self.state_changes.fetch_add(1, Ordering::SeqCst);
    }
}

struct DeniedSource;

#[async_trait]
impl LocationSource for DeniedSource {
    async fn request_permission(&self) -> Result<(), DispatchError> {
        Err(DispatchError::PermissionDenied)
    }

    async fn current_position(&self) -> Result<GeoPoint, DispatchError> {
        Err(DispatchError::PermissionDenied)
    }
}

fn order_at(lat: f64, lng: f64, pin: &str, line_count: usize) -> Order {
    let line_items = (0..line_count)
        .map(|i| OrderLine {
            id: Uuid::new_v4(),
            meal_id: Uuid::new_v4(),
            meal_name: format!("meal {i}"),
            unit_price: 12.5,
            quantity: 2,
            subtotal: 25.0,
        })
        .collect();

    Order {
        id: Uuid::new_v4(),
        restaurant_location: GeoPoint { lat, lng },
        customer_location: GeoPoint {
            lat: lat + 0.03,
            lng: lng + 0.03,
        },
        line_items,
        status: OrderStatus::Offered,
        secret_pin: pin.to_string(),
        claimed_by: None,
        created_at: Utc::now(),
        picked_at: None,
        verified_at: None,
        delivered_at: None,
    }
}

fn test_config(location_ms: u64, feed_ms: u64) -> Config {
    Config {
        http_port: 0,
        log_level: "info".to_string(),
        event_buffer_size: 256,
        api_base_url: "http://localhost".to_string(),
        courier_id: Uuid::new_v4(),
        location_interval_ms: location_ms,
        feed_interval_ms: feed_ms,
        courier_lat: COURIER_LAT,
        courier_lng: COURIER_LNG,
    }
}

async fn connect_gate(
    backend: Arc<MockBackend>,
    config: &Config,
    source: Arc<dyn LocationSource>,
    notifier: Arc<dyn NotificationSignal>,
) -> (
    SessionGate,
    Arc<SessionState>,
    broadcast::Receiver<SessionEvent>,
) {
    let (state, events_rx) = SessionState::new(config.courier_id, config.event_buffer_size);
    let state = Arc::new(state);
    let gate = SessionGate::connect(config, state.clone(), backend, source, notifier).await;
    (gate, state, events_rx)
}

fn static_source() -> Arc<StaticLocationSource> {
    Arc::new(StaticLocationSource::new(GeoPoint {
        lat: COURIER_LAT,
        lng: COURIER_LNG,
    }))
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
}

#[tokio::test]
async fn feed_shows_only_orders_within_radius() {
    // ~10 km and ~50 km north of the courier.
    let near = order_at(53.64, COURIER_LNG, "1111", 1);
    let far = order_at(54.0, COURIER_LNG, "2222", 1);
    let near_id = near.id;
    let backend = MockBackend::with_orders(vec![near, far]);

    let config = test_config(60_000, 60_000);
    let (mut gate, state, mut events_rx) =
        connect_gate(backend, &config, static_source(), Arc::new(NoopSignal)).await;

    gate.go_online().await.unwrap();

    let feeds: Vec<Vec<Order>> = drain(&mut events_rx)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::FeedChanged(orders) => Some(orders),
            _ => None,
        })
        .collect();

    assert_eq!(feeds.len(), 1);
    assert_eq!(feeds[0].len(), 1);
    assert_eq!(feeds[0][0].id, near_id);
    assert_eq!(state.visible_feed().await.len(), 1);

    gate.go_offline().await;
}

#[tokio::test]
async fn rejected_order_does_not_reappear() {
    let order = order_at(53.60, COURIER_LNG, "1111", 1);
    let order_id = order.id;
    let backend = MockBackend::with_orders(vec![order]);

    let config = test_config(60_000, 30);
    let (mut gate, state, mut events_rx) =
        connect_gate(backend, &config, static_source(), Arc::new(NoopSignal)).await;

    gate.go_online().await.unwrap();
    assert_eq!(state.visible_feed().await.len(), 1);
    drain(&mut events_rx);

    let dispatch = gate.dispatch();
    assert_eq!(dispatch.reject(order_id).await.unwrap(), 1);

    // The backend keeps offering the order; several poll ticks go by.
    sleep_ms(200).await;

    assert!(state.visible_feed().await.is_empty());
    for event in drain(&mut events_rx) {
        if let SessionEvent::FeedChanged(orders) = event {
            assert!(orders.iter().all(|o| o.id != order_id));
        }
    }

    gate.go_offline().await;
}

#[tokio::test]
async fn advisory_fires_once_on_tenth_rejection() {
    let backend = MockBackend::with_orders(Vec::new());
    let config = test_config(60_000, 60_000);
    let (gate, _state, mut events_rx) =
        connect_gate(backend, &config, static_source(), Arc::new(NoopSignal)).await;

    let dispatch = gate.dispatch();
    for expected in 1..=10u32 {
        let count = dispatch.reject(Uuid::new_v4()).await.unwrap();
        assert_eq!(count, expected);
    }

    let advisories: Vec<u32> = drain(&mut events_rx)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::RejectionAdvisory { count } => Some(count),
            _ => None,
        })
        .collect();

    assert_eq!(advisories, vec![10]);
}

#[tokio::test]
async fn claim_race_has_single_winner() {
    let order = order_at(53.60, COURIER_LNG, "1111", 1);
    let backend = MockBackend::with_orders(vec![order.clone()]);

    let (state_a, _rx_a) = SessionState::new(Uuid::new_v4(), 64);
    let (state_b, _rx_b) = SessionState::new(Uuid::new_v4(), 64);
    let dispatch_a = Dispatch::new(Arc::new(state_a), backend.clone(), Arc::new(NoopSignal));
    let dispatch_b = Dispatch::new(Arc::new(state_b), backend.clone(), Arc::new(NoopSignal));

    let (result_a, result_b) = tokio::join!(dispatch_a.accept(&order), dispatch_b.accept(&order));

    let winners = [&result_a, &result_b]
        .iter()
        .filter(|result| result.is_ok())
        .count();
    assert_eq!(winners, 1);

    let loser = if result_a.is_ok() { result_b } else { result_a };
    assert!(matches!(
        loser,
        Err(DispatchError::ClaimConflict(id)) if id == order.id
    ));
}

#[tokio::test]
async fn duplicate_accept_short_circuits_locally() {
    let first = order_at(53.60, COURIER_LNG, "1111", 1);
    let second = order_at(53.61, COURIER_LNG, "2222", 1);
    let backend = MockBackend::with_orders(vec![first.clone(), second.clone()]);

    let config = test_config(60_000, 60_000);
    let (gate, _state, _events_rx) =
        connect_gate(backend.clone(), &config, static_source(), Arc::new(NoopSignal)).await;

    let dispatch = gate.dispatch();
    let claimed = dispatch.accept(&first).await.unwrap();
    assert_eq!(claimed.status, OrderStatus::Claimed);

    let result = dispatch.accept(&second).await;
    match result {
        Err(DispatchError::ActiveOrderExists(existing)) => assert_eq!(existing.id, first.id),
        other => panic!("expected ActiveOrderExists, got {other:?}"),
    }

    // The second accept never reached the backend.
    assert_eq!(backend.claim_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn checklist_gates_verification() {
    let order = order_at(53.60, COURIER_LNG, "4321", 4);
    let backend = MockBackend::with_orders(vec![order.clone()]);

    let config = test_config(60_000, 60_000);
    let (gate, _state, _events_rx) =
        connect_gate(backend, &config, static_source(), Arc::new(NoopSignal)).await;

    let dispatch = gate.dispatch();
    dispatch.accept(&order).await.unwrap();

    for line in order.line_items.iter().take(3) {
        dispatch.toggle_line(line.id).await.unwrap();
    }

    // Correct pin cannot bypass the unchecked line.
    assert!(matches!(
        dispatch.submit_verification("4321").await,
        Err(DispatchError::IncompleteItems { unchecked: 1 })
    ));

    dispatch.toggle_line(order.line_items[3].id).await.unwrap();

    assert!(matches!(
        dispatch.submit_verification("0000").await,
        Err(DispatchError::IncompletePin)
    ));

    let verified = dispatch.submit_verification("4321").await.unwrap();
    assert_eq!(verified.status, OrderStatus::Verified);
    assert!(verified.verified_at.is_some());

    // The checklist is single-use; the order has left Claimed.
    assert!(matches!(
        dispatch.submit_verification("4321").await,
        Err(DispatchError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn complete_requires_matching_pin() {
    let order = order_at(53.60, COURIER_LNG, "7788", 2);
    let backend = MockBackend::with_orders(vec![order.clone()]);

    let config = test_config(60_000, 60_000);
    let (gate, _state, _events_rx) =
        connect_gate(backend, &config, static_source(), Arc::new(NoopSignal)).await;

    let dispatch = gate.dispatch();
    dispatch.accept(&order).await.unwrap();
    for line in &order.line_items {
        dispatch.toggle_line(line.id).await.unwrap();
    }
    dispatch.submit_verification("7788").await.unwrap();

    let en_route = dispatch.start_delivery().await.unwrap();
    assert_eq!(en_route.status, OrderStatus::EnRoute);

    assert!(matches!(
        dispatch.complete_delivery("0000").await,
        Err(DispatchError::PinMismatch)
    ));
    assert!(dispatch.active_order().await.is_some());

    let delivered = dispatch.complete_delivery("7788").await.unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(delivered.delivered_at.is_some());
    assert!(dispatch.active_order().await.is_none());
}

#[tokio::test]
async fn offline_halts_location_pushes_mid_backoff() {
    let backend = MockBackend::with_orders(Vec::new());
    backend.fail_push.store(true, Ordering::SeqCst);

    let config = test_config(25, 60_000);
    let (mut gate, _state, _events_rx) =
        connect_gate(backend.clone(), &config, static_source(), Arc::new(NoopSignal)).await;

    gate.go_online().await.unwrap();

    // First tick fires at ~25 ms and enters its 1 s retry backoff.
    sleep_ms(120).await;
    assert!(backend.push_attempts.load(Ordering::SeqCst) >= 1);

    gate.go_offline().await;
    let at_stop = backend.push_attempts.load(Ordering::SeqCst);

    sleep_ms(1300).await;
    assert_eq!(backend.push_attempts.load(Ordering::SeqCst), at_stop);
}

#[tokio::test]
async fn restart_recovers_active_delivery() {
    let mut order = order_at(53.60, COURIER_LNG, "1111", 2);
    order.status = OrderStatus::Claimed;
    let order_id = order.id;

    let backend = MockBackend::with_orders(Vec::new());
    *backend.active.lock().await = Some(order);

    let config = test_config(60_000, 60_000);
    let (gate, _state, mut events_rx) =
        connect_gate(backend, &config, static_source(), Arc::new(NoopSignal)).await;

    let restored = gate.dispatch().active_order().await.unwrap();
    assert_eq!(restored.id, order_id);
    assert_eq!(restored.status, OrderStatus::Claimed);

    let announced = drain(&mut events_rx).into_iter().any(|event| {
        matches!(event, SessionEvent::OrderStateChanged(order) if order.id == order_id)
    });
    assert!(announced);

    // A freshly offered order cannot displace the recovered one.
    let offered = order_at(53.61, COURIER_LNG, "2222", 1);
    assert!(matches!(
        gate.dispatch().accept(&offered).await,
        Err(DispatchError::ActiveOrderExists(_))
    ));
}

#[tokio::test]
async fn feed_failure_retains_previous_result() {
    let order = order_at(53.60, COURIER_LNG, "1111", 1);
    let backend = MockBackend::with_orders(vec![order]);

    let config = test_config(60_000, 30);
    let (mut gate, state, mut events_rx) =
        connect_gate(backend.clone(), &config, static_source(), Arc::new(NoopSignal)).await;

    gate.go_online().await.unwrap();
    assert_eq!(state.visible_feed().await.len(), 1);
    drain(&mut events_rx);

    backend.fail_fetch.store(true, Ordering::SeqCst);
    sleep_ms(150).await;

    // No flicker to empty while the backend is unreachable.
    assert_eq!(state.visible_feed().await.len(), 1);
    let feed_changes = drain(&mut events_rx)
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::FeedChanged(_)))
        .count();
    assert_eq!(feed_changes, 0);

    gate.go_offline().await;
}

#[tokio::test]
async fn notification_fires_once_per_change() {
    let order = order_at(53.60, COURIER_LNG, "1111", 1);
    let backend = MockBackend::with_orders(vec![order]);
    let signal = Arc::new(CountingSignal::default());

    let config = test_config(60_000, 30);
    let (mut gate, _state, _events_rx) =
        connect_gate(backend.clone(), &config, static_source(), signal.clone()).await;

    gate.go_online().await.unwrap();
    sleep_ms(150).await;

    // Several unchanged polls, one alert.
    assert_eq!(signal.new_orders.load(Ordering::SeqCst), 1);

    backend
        .orders
        .lock()
        .await
        .push(order_at(53.62, COURIER_LNG, "2222", 1));
    sleep_ms(150).await;

    assert_eq!(signal.new_orders.load(Ordering::SeqCst), 2);

    gate.go_offline().await;
}

#[tokio::test]
async fn permission_denied_forces_offline() {
    let backend = MockBackend::with_orders(Vec::new());
    let config = test_config(60_000, 60_000);
    let (mut gate, _state, mut events_rx) =
        connect_gate(backend, &config, Arc::new(DeniedSource), Arc::new(NoopSignal)).await;

    assert!(matches!(
        gate.go_online().await,
        Err(DispatchError::PermissionDenied)
    ));
    assert!(!gate.is_online());

    let surfaced = drain(&mut events_rx).into_iter().any(|event| {
        matches!(
            event,
            SessionEvent::Error { kind, .. }
                if kind == courier_dispatch::error::ErrorKind::PermissionDenied
        )
    });
    assert!(surfaced);
}

#[tokio::test]
async fn online_offline_toggle_is_idempotent() {
    let backend = MockBackend::with_orders(Vec::new());
    let config = test_config(60_000, 60_000);
    let (mut gate, _state, _events_rx) =
        connect_gate(backend, &config, static_source(), Arc::new(NoopSignal)).await;

    gate.go_online().await.unwrap();
    gate.go_online().await.unwrap();
    assert!(gate.is_online());

    gate.go_offline().await;
    gate.go_offline().await;
    assert!(!gate.is_online());
}

#[tokio::test]
async fn route_estimate_follows_the_active_leg() {
    let order = order_at(53.64, COURIER_LNG, "1111", 1);
    let backend = MockBackend::with_orders(vec![order.clone()]);

    let config = test_config(60_000, 60_000);
    let (gate, state, _events_rx) =
        connect_gate(backend, &config, static_source(), Arc::new(NoopSignal)).await;

    state
        .set_last_position(GeoPoint {
            lat: COURIER_LAT,
            lng: COURIER_LNG,
        })
        .await;

    let dispatch = gate.dispatch();
    assert!(dispatch.route_estimate().await.is_none());

    dispatch.accept(&order).await.unwrap();
    let to_restaurant = dispatch.route_estimate().await.unwrap();
    assert!(to_restaurant.distance_km > 0.0);
    assert!(to_restaurant.eta_minutes > 0.0);

    dispatch.toggle_line(order.line_items[0].id).await.unwrap();
    dispatch.submit_verification("1111").await.unwrap();

    let to_customer = dispatch.route_estimate().await.unwrap();
    assert!((to_customer.distance_km - to_restaurant.distance_km).abs() > 0.1);
}

#[tokio::test]
async fn health_reports_session_snapshot() {
    let (state, _events_rx) = SessionState::new(Uuid::new_v4(), 64);
    let app = router(Arc::new(state));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["online"], false);
    assert_eq!(body["visible_orders"], 0);
    assert!(body["active_order"].is_null());
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (state, _events_rx) = SessionState::new(Uuid::new_v4(), 64);
    let app = router(Arc::new(state));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains("visible_orders"));
}
