//! Simulated broker for paper runs and tests.
//!
//! Keeps orders and positions in memory and never fills on its own unless
//! configured to. Failures, lost acknowledgments, fills and connectivity
//! loss are all scripted through the control methods.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::application::ports::{
    BrokerError, BrokerOrder, BrokerOrderStatus, BrokerPort, BrokerPosition, BrokerStreamEvent,
    CancelAck, OrderAck, OrderUpdate, SubmitOrderRequest,
};
use crate::domain::order_intent::OrderSide;
use crate::domain::shared::{BrokerOrderId, Instrument};

const STREAM_BUFFER: usize = 1024;

#[derive(Debug, Default)]
struct SimState {
    reachable: bool,
    connected: bool,
    orders: Vec<BrokerOrder>,
    positions: HashMap<Instrument, BrokerPosition>,
    submit_failures: VecDeque<BrokerError>,
    cancel_failures: VecDeque<BrokerError>,
    lose_next_ack: bool,
    fill_on_submit: Option<Decimal>,
    stream: Option<mpsc::Sender<BrokerStreamEvent>>,
}

/// In-memory broker with scripted behavior.
#[derive(Debug)]
pub struct SimulatedBroker {
    state: Mutex<SimState>,
    order_counter: AtomicU64,
    submit_calls: AtomicU64,
    cancel_calls: AtomicU64,
}

impl Default for SimulatedBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBroker {
    /// Create a reachable broker with no orders.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                reachable: true,
                ..SimState::default()
            }),
            order_counter: AtomicU64::new(1),
            submit_calls: AtomicU64::new(0),
            cancel_calls: AtomicU64::new(0),
        }
    }

    /// Fill every accepted order immediately at `price`.
    #[must_use]
    pub fn with_fill_on_submit(self, price: Decimal) -> Self {
        self.state.lock().fill_on_submit = Some(price);
        self
    }

    // ========================================================================
    // Controls
    // ========================================================================

    /// Toggle network reachability. Going unreachable closes the live stream.
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.state.lock();
        state.reachable = reachable;
        if !reachable {
            state.connected = false;
            if let Some(stream) = state.stream.take() {
                let _ = stream.try_send(BrokerStreamEvent::Disconnected {
                    reason: "network unreachable".to_string(),
                });
            }
        }
    }

    /// Fail the next submissions with these errors, in order.
    pub fn fail_next_submits(&self, errors: impl IntoIterator<Item = BrokerError>) {
        self.state.lock().submit_failures.extend(errors);
    }

    /// Fail the next cancels with these errors, in order.
    pub fn fail_next_cancels(&self, errors: impl IntoIterator<Item = BrokerError>) {
        self.state.lock().cancel_failures.extend(errors);
    }

    /// Accept the next submission but report a timeout to the caller.
    pub fn lose_next_ack(&self) {
        self.state.lock().lose_next_ack = true;
    }

    /// Report a cumulative fill on an order and stream the update.
    ///
    /// # Errors
    ///
    /// Returns an error if the order does not exist or is not open.
    pub fn fill(
        &self,
        broker_order_id: &BrokerOrderId,
        cumulative: Decimal,
        price: Decimal,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let update = Self::apply_fill(&mut state, broker_order_id, cumulative, price)?;
        Self::emit(&mut state, update);
        Ok(())
    }

    /// Change an order at the broker without streaming anything, as if the
    /// update had been lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the order does not exist.
    pub fn set_order_silently(
        &self,
        broker_order_id: &BrokerOrderId,
        status: BrokerOrderStatus,
        filled_quantity: Decimal,
        avg_fill_price: Option<Decimal>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let order = Self::find_mut(&mut state, broker_order_id)?;
        let delta = filled_quantity - order.filled_quantity;
        order.status = status;
        order.filled_quantity = filled_quantity;
        order.avg_fill_price = avg_fill_price;
        let (instrument, side) = (order.instrument.clone(), order.side);
        if delta > Decimal::ZERO {
            Self::adjust_position(&mut state, &instrument, side, delta, avg_fill_price);
        }
        Ok(())
    }

    /// Place an order that did not come through this bridge.
    pub fn insert_order(&self, order: BrokerOrder) {
        self.state.lock().orders.push(order);
    }

    /// Overwrite a position.
    pub fn set_position(&self, position: BrokerPosition) {
        self.state
            .lock()
            .positions
            .insert(position.instrument.clone(), position);
    }

    /// Close the live update stream without going unreachable.
    pub fn drop_stream(&self) {
        if let Some(stream) = self.state.lock().stream.take() {
            let _ = stream.try_send(BrokerStreamEvent::Disconnected {
                reason: "stream closed by broker".to_string(),
            });
        }
    }

    /// All orders the broker knows about.
    #[must_use]
    pub fn orders(&self) -> Vec<BrokerOrder> {
        self.state.lock().orders.clone()
    }

    /// Order submitted with `client_order_id`, if any.
    #[must_use]
    pub fn order_for_client_id(&self, client_order_id: &str) -> Option<BrokerOrder> {
        self.state
            .lock()
            .orders
            .iter()
            .find(|o| o.client_order_id.as_deref() == Some(client_order_id))
            .cloned()
    }

    /// Number of submit calls received, including failed ones.
    #[must_use]
    pub fn submit_calls(&self) -> u64 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// Number of cancel calls received, including failed ones.
    #[must_use]
    pub fn cancel_calls(&self) -> u64 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_reachable(state: &SimState) -> Result<(), BrokerError> {
        if state.reachable {
            Ok(())
        } else {
            Err(BrokerError::Connection {
                message: "simulated network unreachable".to_string(),
            })
        }
    }

    fn find_mut<'a>(
        state: &'a mut SimState,
        broker_order_id: &BrokerOrderId,
    ) -> Result<&'a mut BrokerOrder, BrokerError> {
        state
            .orders
            .iter_mut()
            .find(|o| &o.broker_order_id == broker_order_id)
            .ok_or_else(|| BrokerError::OrderNotFound {
                order_id: broker_order_id.to_string(),
            })
    }

    fn apply_fill(
        state: &mut SimState,
        broker_order_id: &BrokerOrderId,
        cumulative: Decimal,
        price: Decimal,
    ) -> Result<OrderUpdate, BrokerError> {
        let order = Self::find_mut(state, broker_order_id)?;
        if !order.status.is_open() {
            return Err(BrokerError::Rejected {
                code: None,
                reason: format!("order {broker_order_id} is {:?}", order.status),
            });
        }
        if cumulative > order.quantity || cumulative < order.filled_quantity {
            return Err(BrokerError::Rejected {
                code: None,
                reason: format!("invalid cumulative fill {cumulative}"),
            });
        }

        let delta = cumulative - order.filled_quantity;
        let avg = match order.avg_fill_price {
            Some(prev) if cumulative > Decimal::ZERO => {
                (prev * order.filled_quantity + price * delta) / cumulative
            }
            _ => price,
        };
        order.filled_quantity = cumulative;
        order.avg_fill_price = Some(avg);
        order.status = if cumulative == order.quantity {
            BrokerOrderStatus::Filled
        } else {
            BrokerOrderStatus::PartiallyFilled
        };
        let update = OrderUpdate::from_order(order, Utc::now());
        let (instrument, side) = (order.instrument.clone(), order.side);
        Self::adjust_position(state, &instrument, side, delta, Some(price));
        Ok(update)
    }

    fn adjust_position(
        state: &mut SimState,
        instrument: &Instrument,
        side: OrderSide,
        delta: Decimal,
        price: Option<Decimal>,
    ) {
        let signed = match side {
            OrderSide::Buy => delta,
            OrderSide::Sell => -delta,
        };
        let position = state
            .positions
            .entry(instrument.clone())
            .or_insert_with(|| BrokerPosition {
                instrument: instrument.clone(),
                quantity: Decimal::ZERO,
                avg_entry_price: None,
            });
        position.quantity += signed;
        if position.avg_entry_price.is_none() {
            position.avg_entry_price = price;
        }
        if position.quantity.is_zero() {
            state.positions.remove(instrument);
        }
    }

    fn emit(state: &mut SimState, update: OrderUpdate) {
        let Some(stream) = &state.stream else {
            return;
        };
        if stream.try_send(BrokerStreamEvent::Update(update)).is_err() {
            tracing::debug!("simulated stream full or closed; update not delivered");
        }
    }
}

#[async_trait]
impl BrokerPort for SimulatedBroker {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        Self::ensure_reachable(&state)?;
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.connected = false;
        state.stream = None;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), BrokerError> {
        let state = self.state.lock();
        Self::ensure_reachable(&state)?;
        if state.connected {
            Ok(())
        } else {
            Err(BrokerError::Connection {
                message: "not connected".to_string(),
            })
        }
    }

    async fn subscribe_updates(&self) -> Result<mpsc::Receiver<BrokerStreamEvent>, BrokerError> {
        let mut state = self.state.lock();
        Self::ensure_reachable(&state)?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        state.stream = Some(tx);
        Ok(rx)
    }

    async fn submit(&self, request: SubmitOrderRequest) -> Result<OrderAck, BrokerError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        Self::ensure_reachable(&state)?;
        if let Some(error) = state.submit_failures.pop_front() {
            return Err(error);
        }

        let client_order_id = request.client_order_id.to_string();
        if state
            .orders
            .iter()
            .any(|o| o.client_order_id.as_deref() == Some(client_order_id.as_str()))
        {
            return Err(BrokerError::Rejected {
                code: Some("40010001".to_string()),
                reason: format!("client_order_id {client_order_id} must be unique"),
            });
        }

        let id = self.order_counter.fetch_add(1, Ordering::SeqCst);
        let broker_order_id = BrokerOrderId::new(format!("sim-{id}"));
        let order = BrokerOrder {
            broker_order_id: broker_order_id.clone(),
            client_order_id: Some(client_order_id.clone()),
            instrument: request.instrument,
            side: request.side,
            quantity: request.quantity,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            status: BrokerOrderStatus::Accepted,
            submitted_at: Some(Utc::now()),
        };
        let quantity = order.quantity;
        state.orders.push(order);

        if let Some(price) = state.fill_on_submit {
            let update = Self::apply_fill(&mut state, &broker_order_id, quantity, price)?;
            Self::emit(&mut state, update);
        }

        if std::mem::take(&mut state.lose_next_ack) {
            return Err(BrokerError::Timeout {
                message: "acknowledgment lost".to_string(),
            });
        }

        Ok(OrderAck {
            broker_order_id,
            client_order_id,
            status: BrokerOrderStatus::Accepted,
        })
    }

    async fn cancel(&self, broker_order_id: &BrokerOrderId) -> Result<CancelAck, BrokerError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        Self::ensure_reachable(&state)?;
        if let Some(error) = state.cancel_failures.pop_front() {
            return Err(error);
        }

        let order = Self::find_mut(&mut state, broker_order_id)?;
        if !order.status.is_open() {
            return Err(BrokerError::Rejected {
                code: Some("42210000".to_string()),
                reason: format!("order is {:?} and cannot be cancelled", order.status),
            });
        }
        order.status = BrokerOrderStatus::Cancelled;
        let update = OrderUpdate::from_order(order, Utc::now());
        Self::emit(&mut state, update);
        Ok(CancelAck { confirmed: true })
    }

    async fn query_order(&self, broker_order_id: &BrokerOrderId) -> Result<BrokerOrder, BrokerError> {
        let mut state = self.state.lock();
        Self::ensure_reachable(&state)?;
        Self::find_mut(&mut state, broker_order_id).map(|o| o.clone())
    }

    async fn query_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrder>, BrokerError> {
        let state = self.state.lock();
        Self::ensure_reachable(&state)?;
        Ok(state
            .orders
            .iter()
            .find(|o| o.client_order_id.as_deref() == Some(client_order_id))
            .cloned())
    }

    async fn query_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
        let state = self.state.lock();
        Self::ensure_reachable(&state)?;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.status.is_open())
            .cloned()
            .collect())
    }

    async fn query_orders_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BrokerOrder>, BrokerError> {
        let state = self.state.lock();
        Self::ensure_reachable(&state)?;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.submitted_at.is_some_and(|at| at >= from && at <= to))
            .cloned()
            .collect())
    }

    async fn query_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let state = self.state.lock();
        Self::ensure_reachable(&state)?;
        Ok(state.positions.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_intent::OrderType;
    use crate::domain::shared::IntentId;
    use rust_decimal_macros::dec;

    fn request(client_id: &str) -> SubmitOrderRequest {
        SubmitOrderRequest {
            client_order_id: IntentId::new(client_id),
            instrument: Instrument::new("AAPL"),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: dec!(100),
            limit_price: None,
            stop_price: None,
        }
    }

    #[tokio::test]
    async fn test_submit_then_fill_streams_updates() {
        let broker = SimulatedBroker::new();
        broker.connect().await.unwrap();
        let mut stream = broker.subscribe_updates().await.unwrap();

        let ack = broker.submit(request("c-1")).await.unwrap();
        assert_eq!(ack.broker_order_id.as_str(), "sim-1");

        broker.fill(&ack.broker_order_id, dec!(40), dec!(10)).unwrap();
        broker.fill(&ack.broker_order_id, dec!(100), dec!(11)).unwrap();

        let Some(BrokerStreamEvent::Update(first)) = stream.recv().await else {
            panic!("expected update");
        };
        assert_eq!(first.status, BrokerOrderStatus::PartiallyFilled);
        let Some(BrokerStreamEvent::Update(second)) = stream.recv().await else {
            panic!("expected update");
        };
        assert_eq!(second.status, BrokerOrderStatus::Filled);
        assert_eq!(second.avg_fill_price, Some(dec!(10.6)));

        let positions = broker.query_positions().await.unwrap();
        assert_eq!(positions[0].quantity, dec!(100));
    }

    #[tokio::test]
    async fn test_duplicate_client_order_id_rejected() {
        let broker = SimulatedBroker::new();
        broker.submit(request("c-1")).await.unwrap();
        let err = broker.submit(request("c-1")).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_lost_ack_still_creates_order() {
        let broker = SimulatedBroker::new();
        broker.lose_next_ack();
        let err = broker.submit(request("c-9")).await.unwrap_err();
        assert!(err.is_retryable());
        let found = broker.query_order_by_client_id("c-9").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_closes_stream_and_fails_calls() {
        let broker = SimulatedBroker::new();
        broker.connect().await.unwrap();
        let mut stream = broker.subscribe_updates().await.unwrap();

        broker.set_reachable(false);
        assert!(matches!(
            stream.recv().await,
            Some(BrokerStreamEvent::Disconnected { .. })
        ));
        assert!(broker.heartbeat().await.unwrap_err().is_transport());
        assert!(broker.submit(request("c-2")).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_filled_order_is_rejected() {
        let broker = SimulatedBroker::new().with_fill_on_submit(dec!(5));
        let ack = broker.submit(request("c-3")).await.unwrap();
        let err = broker.cancel(&ack.broker_order_id).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { .. }));
    }
}
