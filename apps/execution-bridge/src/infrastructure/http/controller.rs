//! HTTP Controller (Driver Adapter)
//!
//! Axum-based REST API: the alert webhook plus read and operations endpoints.
//! Handlers only translate HTTP to use-case calls and back.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::application::ports::{BrokerPort, EventPublisherPort};
use crate::application::services::{ReconciliationEngine, ReconciliationError, SessionManager};
use crate::application::use_cases::{
    CancelIntentUseCase, IngestAlertUseCase, IngestionError, IntentFilter, QueryIntentsUseCase,
};
use crate::domain::order_intent::IntentStore;
use crate::domain::reconciliation::ReconcileTrigger;
use crate::domain::shared::{Instrument, IntentId};

use super::request::{CancelIntentRequest, ListIntentsQuery, WebhookRequest};
use super::response::{
    ErrorResponse, HealthResponse, IntentListResponse, IntentResponse, OrphansResponse,
    PositionsResponse, SessionResponse, WebhookResponse,
};

const OPERATOR_CANCEL_REASON: &str = "operator cancel";

/// Application state shared across handlers.
pub struct AppState<S, B, P>
where
    S: IntentStore,
    B: BrokerPort,
    P: EventPublisherPort,
{
    /// Use case for alert ingestion.
    pub ingest: Arc<IngestAlertUseCase<S, B, P>>,
    /// Use case for operator cancels.
    pub cancel: Arc<CancelIntentUseCase<S, B, P>>,
    /// Use case for intent queries.
    pub query: Arc<QueryIntentsUseCase<S>>,
    /// Broker session.
    pub session: Arc<SessionManager<B>>,
    /// Reconciliation engine.
    pub reconciliation: Arc<ReconciliationEngine<S, B, P>>,
    /// Application version.
    pub version: String,
}

impl<S, B, P> Clone for AppState<S, B, P>
where
    S: IntentStore,
    B: BrokerPort,
    P: EventPublisherPort,
{
    fn clone(&self) -> Self {
        Self {
            ingest: Arc::clone(&self.ingest),
            cancel: Arc::clone(&self.cancel),
            query: Arc::clone(&self.query),
            session: Arc::clone(&self.session),
            reconciliation: Arc::clone(&self.reconciliation),
            version: self.version.clone(),
        }
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router<S, B, P>(state: AppState<S, B, P>) -> Router
where
    S: IntentStore + 'static,
    B: BrokerPort + 'static,
    P: EventPublisherPort + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/webhook", post(webhook))
        .route("/api/v1/intents", get(list_intents))
        .route("/api/v1/intents/{id}", get(get_intent))
        .route("/api/v1/intents/{id}/cancel", post(cancel_intent))
        .route("/api/v1/session", get(session))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/reconciliation/orphans", get(orphans))
        .route("/api/v1/reconciliation/run", post(run_reconciliation))
        .with_state(state)
}

fn error(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Health check endpoint.
async fn health_check<S, B, P>(State(state): State<AppState<S, B, P>>) -> impl IntoResponse
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    let status = state.session.status();
    Json(HealthResponse {
        status: if status.accepts_calls() {
            "healthy"
        } else {
            "degraded"
        }
        .to_string(),
        version: state.version.clone(),
        session: status.to_string(),
    })
}

/// Alert webhook.
///
/// The body is read raw so that alerts without an id can be fingerprinted
/// byte for byte.
async fn webhook<S, B, P>(State(state): State<AppState<S, B, P>>, body: Bytes) -> Response
where
    S: IntentStore + 'static,
    B: BrokerPort + 'static,
    P: EventPublisherPort + 'static,
{
    let request: WebhookRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, bytes = body.len(), "Malformed alert body");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(WebhookResponse::refused(format!("malformed alert: {e}"), None)),
            )
                .into_response();
        }
    };
    let passphrase = request.passphrase.clone();
    let alert = match request.into_alert(&body) {
        Ok(alert) => alert,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(WebhookResponse::refused(format!("invalid alert: {e}"), None)),
            )
                .into_response();
        }
    };

    match state.ingest.execute(alert, passphrase.as_deref()).await {
        Ok(outcome) => (StatusCode::OK, Json(WebhookResponse::accepted(&outcome))).into_response(),
        Err(e) => {
            let (status, existing) = match &e {
                IngestionError::DuplicateAlert { existing } | IngestionError::Replayed { existing } => {
                    (StatusCode::CONFLICT, Some(existing.to_string()))
                }
                IngestionError::Invalid(_) | IngestionError::RuleRejected(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, None)
                }
                IngestionError::Unauthorized => (StatusCode::UNAUTHORIZED, None),
                IngestionError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
            };
            (status, Json(WebhookResponse::refused(e.to_string(), existing))).into_response()
        }
    }
}

/// List intents; without filters, every live intent.
async fn list_intents<S, B, P>(
    State(state): State<AppState<S, B, P>>,
    Query(query): Query<ListIntentsQuery>,
) -> Response
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    let state_filter = match query.state() {
        Ok(filter) => filter,
        Err(e) => return error(StatusCode::BAD_REQUEST, e),
    };
    let filter = IntentFilter {
        state: state_filter,
        instrument: query
            .symbol
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(Instrument::new),
    };

    match state.query.list(&filter).await {
        Ok(intents) => {
            let intents: Vec<IntentResponse> = intents.iter().map(IntentResponse::from).collect();
            Json(IntentListResponse {
                count: intents.len(),
                intents,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to list intents");
            error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// One intent by id.
async fn get_intent<S, B, P>(
    State(state): State<AppState<S, B, P>>,
    Path(id): Path<String>,
) -> Response
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    match state.query.get(&IntentId::new(&id)).await {
        Ok(Some(intent)) => Json(IntentResponse::from(&intent)).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, format!("intent not found: {id}")),
        Err(e) => {
            tracing::error!(intent_id = %id, error = %e, "Failed to load intent");
            error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// Operator cancel. The body is optional.
async fn cancel_intent<S, B, P>(
    State(state): State<AppState<S, B, P>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response
where
    S: IntentStore + 'static,
    B: BrokerPort + 'static,
    P: EventPublisherPort + 'static,
{
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CancelIntentRequest::default()
    } else {
        match serde_json::from_slice::<CancelIntentRequest>(&body) {
            Ok(request) => request,
            Err(e) => return error(StatusCode::BAD_REQUEST, format!("malformed body: {e}")),
        }
    };
    let intent_id = IntentId::new(&id);

    match state.query.get(&intent_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error(StatusCode::NOT_FOUND, format!("intent not found: {id}")),
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }

    let reason = request
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| OPERATOR_CANCEL_REASON.to_string());
    let result = state.cancel.execute(&intent_id, &reason).await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(result)).into_response()
}

/// Broker session state.
async fn session<S, B, P>(State(state): State<AppState<S, B, P>>) -> impl IntoResponse
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    Json(SessionResponse {
        broker: state.session.broker_name().to_string(),
        session: state.session.session(),
        dropped_updates: state.session.dropped_updates(),
    })
}

/// Positions seen by the last reconciliation pass.
async fn positions<S, B, P>(State(state): State<AppState<S, B, P>>) -> impl IntoResponse
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    let mut positions = state.reconciliation.positions();
    positions.sort_by(|a, b| a.instrument.as_str().cmp(b.instrument.as_str()));
    Json(PositionsResponse { positions })
}

/// Orphan broker orders awaiting manual review.
async fn orphans<S, B, P>(State(state): State<AppState<S, B, P>>) -> impl IntoResponse
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    Json(OrphansResponse {
        orphans: state.reconciliation.orphans(),
        last_report: state.reconciliation.last_report(),
    })
}

/// Run a reconciliation pass now and return its report.
async fn run_reconciliation<S, B, P>(State(state): State<AppState<S, B, P>>) -> Response
where
    S: IntentStore + 'static,
    B: BrokerPort + 'static,
    P: EventPublisherPort + 'static,
{
    match state.reconciliation.reconcile(ReconcileTrigger::Manual).await {
        Ok(report) => Json(report).into_response(),
        Err(e @ ReconciliationError::SessionUnavailable(_)) => {
            error(StatusCode::SERVICE_UNAVAILABLE, e)
        }
        Err(e) => {
            tracing::error!(error = %e, "Manual reconciliation failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::InMemoryEventPublisher;
    use crate::application::services::{
        DirectTranslator, ExecutionConfig, ExecutionEngine, ReconciliationConfig, SessionConfig,
    };
    use crate::application::use_cases::{CancelResult, IngestionConfig};
    use crate::domain::order_intent::IntentState;
    use crate::domain::reconciliation::ReconciliationReport;
    use crate::infrastructure::broker::SimulatedBroker;
    use crate::infrastructure::persistence::InMemoryIntentStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    type TestState = AppState<InMemoryIntentStore, SimulatedBroker, InMemoryEventPublisher>;

    struct Harness {
        state: TestState,
        broker: Arc<SimulatedBroker>,
        engine: Arc<ExecutionEngine<InMemoryIntentStore, SimulatedBroker, InMemoryEventPublisher>>,
    }

    async fn harness(secret: Option<&str>) -> Harness {
        let broker = Arc::new(SimulatedBroker::new());
        let session = Arc::new(SessionManager::new(Arc::clone(&broker), SessionConfig::default()));
        session.connect().await.unwrap();
        let store = Arc::new(InMemoryIntentStore::new());
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&store),
            Arc::clone(&session),
            Arc::new(InMemoryEventPublisher::new()),
            ExecutionConfig::default(),
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(
            Arc::clone(&store),
            Arc::clone(&session),
            Arc::clone(&engine),
            ReconciliationConfig::default(),
        ));
        let ingest = Arc::new(IngestAlertUseCase::new(
            Arc::clone(&store),
            Arc::clone(&engine),
            Arc::new(DirectTranslator),
            IngestionConfig {
                webhook_secret: secret.map(ToString::to_string),
                replay_window: Duration::from_secs(3600),
            },
        ));

        Harness {
            state: AppState {
                ingest,
                cancel: Arc::new(CancelIntentUseCase::new(Arc::clone(&engine))),
                query: Arc::new(QueryIntentsUseCase::new(store)),
                session,
                reconciliation,
                version: "1.0.0-test".to_string(),
            },
            broker,
            engine,
        }
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn read<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn alert(signal_id: &str) -> serde_json::Value {
        serde_json::json!({
            "symbol": "AAPL",
            "side": "buy",
            "quantity": 10,
            "order_type": "limit",
            "limit_price": "187.5",
            "signal_id": signal_id
        })
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let h = harness(None).await;
        let response = create_router(h.state).oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = read(response).await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.session, "CONNECTED");
    }

    #[tokio::test]
    async fn webhook_accepts_then_refuses_duplicate() {
        let h = harness(None).await;
        let app = create_router(h.state.clone());

        let response = app
            .clone()
            .oneshot(post_json("/webhook", &alert("sig-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let accepted: WebhookResponse = read(response).await;
        assert!(accepted.accepted);
        let intent_id = accepted.intent_id.unwrap();

        let response = app
            .clone()
            .oneshot(post_json("/webhook", &alert("sig-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let refused: WebhookResponse = read(response).await;
        assert!(!refused.accepted);
        assert_eq!(refused.intent_id.as_deref(), Some(intent_id.as_str()));

        let response = app
            .oneshot(get(&format!("/api/v1/intents/{intent_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let intent: IntentResponse = read(response).await;
        assert_eq!(intent.state, IntentState::New);
        assert_eq!(intent.instrument, "AAPL");
        assert_eq!(intent.source_signal, "sig-1");
    }

    #[tokio::test]
    async fn webhook_checks_passphrase() {
        let h = harness(Some("hunter2")).await;
        let app = create_router(h.state);

        let response = app
            .clone()
            .oneshot(post_json("/webhook", &alert("sig-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut body = alert("sig-1");
        body["passphrase"] = serde_json::json!("hunter2");
        let response = app.oneshot(post_json("/webhook", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_refuses_malformed_and_invalid_alerts() {
        let h = harness(None).await;
        let app = create_router(h.state);

        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let missing_price = serde_json::json!({
            "symbol": "AAPL", "side": "buy", "quantity": 1, "order_type": "limit"
        });
        let response = app
            .clone()
            .oneshot(post_json("/webhook", &missing_price))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let close = serde_json::json!({ "symbol": "AAPL", "action": "close" });
        let response = app.oneshot(post_json("/webhook", &close)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn list_filters_by_state() {
        let h = harness(None).await;
        let app = create_router(h.state.clone());
        app.clone()
            .oneshot(post_json("/webhook", &alert("sig-1")))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(get("/api/v1/intents?state=NEW&symbol=aapl"))
            .await
            .unwrap();
        let listing: IntentListResponse = read(response).await;
        assert_eq!(listing.count, 1);

        let response = app
            .clone()
            .oneshot(get("/api/v1/intents?state=FILLED"))
            .await
            .unwrap();
        let listing: IntentListResponse = read(response).await;
        assert_eq!(listing.count, 0);

        let response = app
            .oneshot(get("/api/v1/intents?state=bogus"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancel_working_intent() {
        let h = harness(None).await;
        let app = create_router(h.state.clone());
        let response = app
            .clone()
            .oneshot(post_json("/webhook", &alert("sig-1")))
            .await
            .unwrap();
        let accepted: WebhookResponse = read(response).await;
        let intent_id = IntentId::new(accepted.intent_id.unwrap());
        assert_eq!(h.engine.submit(&intent_id).await.unwrap(), IntentState::Acked);

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/intents/{intent_id}/cancel"),
                &serde_json::json!({ "reason": "flatten" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let result: serde_json::Value = read(response).await;
        assert_eq!(result["state"], "CANCELLED");
        assert_eq!(h.broker.cancel_calls(), 1);

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/intents/missing/cancel")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_intent_is_not_found() {
        let h = harness(None).await;
        let response = create_router(h.state)
            .oneshot(get("/api/v1/intents/nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn session_and_manual_reconciliation() {
        let h = harness(None).await;
        let app = create_router(h.state.clone());

        let response = app.clone().oneshot(get("/api/v1/session")).await.unwrap();
        let session: serde_json::Value = read(response).await;
        assert_eq!(session["broker"], "simulated");
        assert_eq!(session["status"], "CONNECTED");

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/reconciliation/run")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report: ReconciliationReport = read(response).await;
        assert_eq!(report.trigger, ReconcileTrigger::Manual);

        let response = app
            .clone()
            .oneshot(get("/api/v1/reconciliation/orphans"))
            .await
            .unwrap();
        let orphans: OrphansResponse = read(response).await;
        assert!(orphans.orphans.is_empty());
        assert!(orphans.last_report.is_some());

        h.state.session.mark_degraded("test");
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/reconciliation/run")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn cancel_result_serializes_state() {
        let result = CancelResult {
            intent_id: IntentId::new("i-1"),
            success: true,
            state: Some(IntentState::CancelRequested),
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["state"], "CANCEL_REQUESTED");
    }
}
