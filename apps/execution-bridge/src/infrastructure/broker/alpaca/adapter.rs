//! Alpaca broker adapter implementing `BrokerPort`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::mpsc;

use crate::application::ports::{
    BrokerError, BrokerOrder, BrokerPort, BrokerPosition, BrokerStreamEvent, CancelAck, OrderAck,
    SubmitOrderRequest,
};
use crate::domain::shared::BrokerOrderId;

use super::api_types::{
    AlpacaAccountResponse, AlpacaOrderRequest, AlpacaOrderResponse, AlpacaPositionResponse,
};
use super::config::{AlpacaConfig, AlpacaEnvironment};
use super::error::AlpacaError;
use super::http_client::AlpacaHttpClient;
use super::stream::open_trade_updates;

/// Page size for order listings; Alpaca's maximum.
const ORDER_PAGE_LIMIT: &str = "500";

/// Alpaca Markets broker adapter.
#[derive(Debug, Clone)]
pub struct AlpacaBroker {
    client: AlpacaHttpClient,
    config: AlpacaConfig,
}

impl AlpacaBroker {
    /// Create a new Alpaca broker adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or the HTTP client cannot be built.
    pub fn new(config: AlpacaConfig) -> Result<Self, AlpacaError> {
        let client = AlpacaHttpClient::new(&config)?;
        Ok(Self { client, config })
    }

    /// Trading environment.
    #[must_use]
    pub const fn environment(&self) -> AlpacaEnvironment {
        self.config.environment
    }

    async fn account(&self) -> Result<AlpacaAccountResponse, BrokerError> {
        Ok(self.client.get("/v2/account", &[]).await?)
    }

    async fn list_orders(
        &self,
        query: &[(&str, String)],
    ) -> Result<Vec<BrokerOrder>, BrokerError> {
        let responses: Vec<AlpacaOrderResponse> = self.client.get("/v2/orders", query).await?;
        responses
            .iter()
            .map(|r| r.to_broker_order().map_err(BrokerError::from))
            .collect()
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl BrokerPort for AlpacaBroker {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        let account = self.account().await?;
        tracing::info!(
            account_id = %account.id,
            status = ?account.status,
            environment = %self.config.environment,
            "Alpaca session established"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        // REST is stateless; the stream task ends when its receiver is dropped
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), BrokerError> {
        self.account().await.map(|_| ())
    }

    async fn subscribe_updates(&self) -> Result<mpsc::Receiver<BrokerStreamEvent>, BrokerError> {
        Ok(open_trade_updates(
            self.config.stream_url(),
            &self.config.api_key,
            &self.config.api_secret,
        )
        .await?)
    }

    async fn submit(&self, request: SubmitOrderRequest) -> Result<OrderAck, BrokerError> {
        if self.config.environment.is_live() {
            tracing::warn!(
                client_order_id = %request.client_order_id,
                instrument = %request.instrument,
                "Submitting LIVE order - this will execute real trades"
            );
        }

        let body = AlpacaOrderRequest::from(&request);
        tracing::info!(
            client_order_id = %body.client_order_id,
            symbol = %body.symbol,
            side = body.side,
            order_type = body.order_type,
            qty = %body.qty,
            limit_price = ?body.limit_price,
            stop_price = ?body.stop_price,
            "Submitting order to Alpaca"
        );

        let response: AlpacaOrderResponse = self.client.post("/v2/orders", &body).await?;
        tracing::info!(
            client_order_id = %body.client_order_id,
            broker_order_id = %response.id,
            status = %response.status,
            "Order accepted by Alpaca"
        );
        Ok(response.to_order_ack())
    }

    async fn cancel(&self, broker_order_id: &BrokerOrderId) -> Result<CancelAck, BrokerError> {
        tracing::info!(broker_order_id = %broker_order_id, "Cancelling order at Alpaca");
        self.client
            .delete(&format!("/v2/orders/{broker_order_id}"))
            .await?;
        // 204 means the request was accepted; `canceled` arrives on the stream
        Ok(CancelAck { confirmed: false })
    }

    async fn query_order(&self, broker_order_id: &BrokerOrderId) -> Result<BrokerOrder, BrokerError> {
        let response: AlpacaOrderResponse = self
            .client
            .get(&format!("/v2/orders/{broker_order_id}"), &[])
            .await?;
        Ok(response.to_broker_order()?)
    }

    async fn query_order_by_client_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrder>, BrokerError> {
        let result: Result<AlpacaOrderResponse, AlpacaError> = self
            .client
            .get(
                "/v2/orders:by_client_order_id",
                &[("client_order_id", client_order_id.to_string())],
            )
            .await;
        match result {
            Ok(response) => Ok(Some(response.to_broker_order()?)),
            Err(AlpacaError::OrderNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn query_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
        self.list_orders(&[
            ("status", "open".to_string()),
            ("limit", ORDER_PAGE_LIMIT.to_string()),
        ])
        .await
    }

    async fn query_orders_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BrokerOrder>, BrokerError> {
        // Query bounds are whole seconds; widen both ends, then filter exactly
        let after = from - chrono::TimeDelta::seconds(1);
        let until = to + chrono::TimeDelta::seconds(1);
        let orders = self
            .list_orders(&[
                ("status", "all".to_string()),
                ("after", rfc3339(after)),
                ("until", rfc3339(until)),
                ("direction", "asc".to_string()),
                ("limit", ORDER_PAGE_LIMIT.to_string()),
            ])
            .await?;
        Ok(orders
            .into_iter()
            .filter(|o| o.submitted_at.is_none_or(|ts| ts >= from && ts <= to))
            .collect())
    }

    async fn query_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let responses: Vec<AlpacaPositionResponse> = self.client.get("/v2/positions", &[]).await?;
        responses
            .iter()
            .map(|p| p.to_broker_position().map_err(BrokerError::from))
            .collect()
    }
}
