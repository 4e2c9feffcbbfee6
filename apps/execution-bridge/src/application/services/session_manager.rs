//! Broker Session Manager
//!
//! Owns the single brokerage connection. Every outbound call goes through
//! here so that calls are serialized, bounded by a timeout, and refused
//! outright while the session is not CONNECTED.
//!
//! The supervisor loop ([`SessionManager::run`]) connects, subscribes to the
//! order update stream, sends heartbeats, and reconnects with jittered
//! exponential backoff after any unexpected loss.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, ReconnectPolicy};
use crate::application::ports::{
    BrokerError, BrokerOrder, BrokerPort, BrokerPosition, BrokerStreamEvent, CancelAck, OrderAck,
    OrderUpdate, SubmitOrderRequest,
};
use crate::domain::broker_session::{BrokerSession, SessionStatus};
use crate::domain::shared::BrokerOrderId;
use crate::observability;

const EVENT_CAPACITY: usize = 64;

/// Session manager settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Upper bound on any single broker call, including the wait for the
    /// call slot.
    pub call_timeout: Duration,
    /// Reconnect delays.
    pub reconnect: Backoff,
    /// Interval between liveness checks while connected.
    pub heartbeat_interval: Duration,
    /// Capacity of the order update channel.
    pub update_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            reconnect: Backoff::default(),
            heartbeat_interval: Duration::from_secs(15),
            update_buffer: 1024,
        }
    }
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// First connection established.
    Connected,
    /// Session lost; calls are refused until reconnected.
    Degraded {
        /// Why.
        reason: String,
    },
    /// Reconnected after a loss. Updates may have been missed.
    Resynced,
    /// Updates were discarded because the consumer fell behind.
    UpdatesDropped {
        /// Total dropped since start.
        total: u64,
    },
    /// Session closed on request.
    Disconnected,
}

/// Session manager errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session is not connected; the call was not attempted.
    #[error("broker session unavailable ({status})")]
    SessionUnavailable {
        /// Status at call time.
        status: SessionStatus,
    },

    /// The call did not finish in time; its outcome is unknown.
    #[error("broker call timed out after {0:?}")]
    Timeout(Duration),

    /// The broker answered with an error.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The update stream has already been handed out.
    #[error("order update stream already taken")]
    StreamTaken,
}

impl SessionError {
    /// Whether a later attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::SessionUnavailable { .. } | Self::Timeout(_) => true,
            Self::Broker(e) => e.is_retryable(),
            Self::StreamTaken => false,
        }
    }

    /// Whether the broker may have acted on the call despite the error.
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Broker(BrokerError::Timeout { .. } | BrokerError::Connection { .. })
        )
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SessionUnavailable { .. } => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Broker(e) => e.code(),
            Self::StreamTaken => "stream_taken",
        }
    }
}

/// Owner of the brokerage session.
pub struct SessionManager<B: BrokerPort> {
    broker: Arc<B>,
    config: SessionConfig,
    session: RwLock<BrokerSession>,
    call_slot: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
    updates_tx: mpsc::Sender<OrderUpdate>,
    updates_rx: Mutex<Option<mpsc::Receiver<OrderUpdate>>>,
    degraded: Notify,
    generation: AtomicU64,
    ever_connected: AtomicBool,
    dropped_updates: AtomicU64,
}

impl<B: BrokerPort + 'static> SessionManager<B> {
    /// Create a disconnected session manager.
    #[must_use]
    pub fn new(broker: Arc<B>, config: SessionConfig) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(config.update_buffer.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            broker,
            config,
            session: RwLock::new(BrokerSession::default()),
            call_slot: tokio::sync::Mutex::new(()),
            events,
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
            degraded: Notify::new(),
            generation: AtomicU64::new(0),
            ever_connected: AtomicBool::new(false),
            dropped_updates: AtomicU64::new(0),
        }
    }

    /// Broker name.
    pub fn broker_name(&self) -> &'static str {
        self.broker.name()
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.session.read().status
    }

    /// Snapshot of the session.
    pub fn session(&self) -> BrokerSession {
        self.session.read().clone()
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Take the order update stream. There is exactly one consumer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StreamTaken`] on the second call.
    pub fn take_update_stream(&self) -> Result<mpsc::Receiver<OrderUpdate>, SessionError> {
        self.updates_rx.lock().take().ok_or(SessionError::StreamTaken)
    }

    /// Updates dropped since start.
    pub fn dropped_updates(&self) -> u64 {
        self.dropped_updates.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect, subscribe to updates and start forwarding them.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker refuses the connection or the
    /// subscription, or either call times out.
    pub async fn connect(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut session = self.session.write();
            if session.status == SessionStatus::Disconnected {
                session.status = SessionStatus::Connecting;
                observability::record_session_status(session.status);
            }
        }

        let result = tokio::time::timeout(self.config.call_timeout, async {
            let _slot = self.call_slot.lock().await;
            self.broker.connect().await?;
            self.broker.subscribe_updates().await
        })
        .await;

        let stream = match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.record_connect_failure(&e.to_string());
                return Err(e.into());
            }
            Err(_) => {
                self.record_connect_failure("connect timed out");
                return Err(SessionError::Timeout(self.config.call_timeout));
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        {
            let mut session = self.session.write();
            session.status = SessionStatus::Connected;
            session.connected_since = Some(now);
            session.last_heartbeat_at = Some(now);
            session.reconnect_attempts = 0;
        }
        observability::record_session_status(SessionStatus::Connected);
        tokio::spawn(Arc::clone(self).forward_updates(stream, generation));

        let event = if self.ever_connected.swap(true, Ordering::SeqCst) {
            tracing::info!(broker = self.broker.name(), "Broker session resynced");
            SessionEvent::Resynced
        } else {
            tracing::info!(broker = self.broker.name(), "Broker session connected");
            SessionEvent::Connected
        };
        let _ = self.events.send(event);
        Ok(())
    }

    /// Close the session on request.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker reports a failure while closing; the
    /// session is marked DISCONNECTED regardless.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.session.write().status = SessionStatus::Disconnected;
        observability::record_session_status(SessionStatus::Disconnected);
        let _ = self.events.send(SessionEvent::Disconnected);

        let _slot = self.call_slot.lock().await;
        tokio::time::timeout(self.config.call_timeout, self.broker.disconnect())
            .await
            .map_err(|_| SessionError::Timeout(self.config.call_timeout))??;
        tracing::info!(broker = self.broker.name(), "Broker session disconnected");
        Ok(())
    }

    /// Move CONNECTED to DEGRADED and wake the supervisor. No-op otherwise.
    pub fn mark_degraded(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut session = self.session.write();
            if session.status != SessionStatus::Connected {
                return;
            }
            session.status = SessionStatus::Degraded;
            session.connected_since = None;
            session.last_error = Some(reason.clone());
        }
        observability::record_session_status(SessionStatus::Degraded);
        tracing::warn!(broker = self.broker.name(), reason = %reason, "Broker session degraded");
        let _ = self.events.send(SessionEvent::Degraded { reason });
        self.degraded.notify_one();
    }

    /// Supervise the session until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect);
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut first_attempt = true;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if !self.status().accepts_calls() {
                if !first_attempt {
                    let delay = policy.next_backoff();
                    self.session.write().reconnect_attempts = policy.current_attempt();
                    tracing::debug!(
                        attempt = policy.current_attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Waiting before reconnect"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                first_attempt = false;

                match self.connect().await {
                    Ok(()) => {
                        policy.reset();
                        heartbeat.reset();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Broker connect failed");
                        continue;
                    }
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        self.mark_degraded(format!("heartbeat failed: {e}"));
                    }
                }
                () = self.degraded.notified() => {}
            }
        }

        if let Err(e) = self.disconnect().await {
            tracing::warn!(error = %e, "Broker disconnect failed during shutdown");
        }
    }

    fn record_connect_failure(&self, reason: &str) {
        let mut session = self.session.write();
        session.last_error = Some(reason.to_string());
        if session.status == SessionStatus::Connecting && self.ever_connected.load(Ordering::SeqCst)
        {
            session.status = SessionStatus::Degraded;
        }
    }

    async fn forward_updates(
        self: Arc<Self>,
        mut stream: mpsc::Receiver<BrokerStreamEvent>,
        generation: u64,
    ) {
        while let Some(event) = stream.recv().await {
            match event {
                BrokerStreamEvent::Update(update) => self.offer_update(update),
                BrokerStreamEvent::Disconnected { reason } => {
                    if self.generation.load(Ordering::SeqCst) == generation {
                        self.mark_degraded(format!("update stream lost: {reason}"));
                    }
                    return;
                }
            }
        }
        if self.generation.load(Ordering::SeqCst) == generation {
            self.mark_degraded("update stream closed");
        }
    }

    fn offer_update(&self, update: OrderUpdate) {
        match self.updates_tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                let total = self.dropped_updates.fetch_add(1, Ordering::SeqCst) + 1;
                observability::record_update_dropped();
                tracing::warn!(
                    broker_order_id = %dropped.broker_order_id,
                    total,
                    "Order update dropped; consumer behind"
                );
                let _ = self.events.send(SessionEvent::UpdatesDropped { total });
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("No order update consumer; update discarded");
            }
        }
    }

    // ========================================================================
    // Broker calls
    // ========================================================================

    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(Arc<B>) -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let status = self.status();
        if !status.accepts_calls() {
            observability::record_broker_call(op, "unavailable", 0.0);
            return Err(SessionError::SessionUnavailable { status });
        }

        let started = Instant::now();
        let broker = Arc::clone(&self.broker);
        let result = tokio::time::timeout(self.config.call_timeout, async {
            let _slot = self.call_slot.lock().await;
            let status = self.status();
            if !status.accepts_calls() {
                return Err(SessionError::SessionUnavailable { status });
            }
            f(broker).await.map_err(SessionError::from)
        })
        .await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(Ok(value)) => {
                observability::record_broker_call(op, "ok", elapsed);
                Ok(value)
            }
            Ok(Err(e)) => {
                observability::record_broker_call(op, "error", elapsed);
                if let SessionError::Broker(broker_error) = &e {
                    if broker_error.is_transport() {
                        self.mark_degraded(format!("{op} failed: {broker_error}"));
                    }
                }
                Err(e)
            }
            Err(_) => {
                observability::record_broker_call(op, "timeout", elapsed);
                tracing::warn!(
                    op,
                    timeout_ms = self.config.call_timeout.as_millis() as u64,
                    "Broker call timed out"
                );
                Err(SessionError::Timeout(self.config.call_timeout))
            }
        }
    }

    /// Liveness check.
    ///
    /// # Errors
    ///
    /// Fails fast when not connected; otherwise returns the broker error.
    pub async fn heartbeat(&self) -> Result<(), SessionError> {
        self.call("heartbeat", |b| async move { b.heartbeat().await })
            .await?;
        self.session.write().last_heartbeat_at = Some(Utc::now());
        Ok(())
    }

    /// Submit an order.
    ///
    /// # Errors
    ///
    /// See [`SessionError`]. A timeout leaves the outcome unknown.
    pub async fn submit_order(&self, request: SubmitOrderRequest) -> Result<OrderAck, SessionError> {
        self.call("submit", |b| async move { b.submit(request).await })
            .await
    }

    /// Cancel an order.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub async fn cancel_order(
        &self,
        broker_order_id: &BrokerOrderId,
    ) -> Result<CancelAck, SessionError> {
        self.call("cancel", |b| async move { b.cancel(broker_order_id).await })
            .await
    }

    /// Query one order by broker id.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub async fn query_order(
        &self,
        broker_order_id: &BrokerOrderId,
    ) -> Result<BrokerOrder, SessionError> {
        self.call("query_order", |b| async move {
            b.query_order(broker_order_id).await
        })
        .await
    }

    /// Query one order by client order id.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub async fn query_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrder>, SessionError> {
        self.call("query_order_by_client_id", |b| async move {
            b.query_order_by_client_id(client_order_id).await
        })
        .await
    }

    /// All open orders.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub async fn query_open_orders(&self) -> Result<Vec<BrokerOrder>, SessionError> {
        self.call("query_open_orders", |b| async move {
            b.query_open_orders().await
        })
        .await
    }

    /// Orders submitted within `[from, to]`.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub async fn query_orders_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BrokerOrder>, SessionError> {
        self.call("query_orders_between", |b| async move {
            b.query_orders_between(from, to).await
        })
        .await
    }

    /// Open positions.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub async fn query_positions(&self) -> Result<Vec<BrokerPosition>, SessionError> {
        self.call("query_positions", |b| async move { b.query_positions().await })
            .await
    }
}
