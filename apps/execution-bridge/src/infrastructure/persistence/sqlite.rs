//! SQLite intent store.
//!
//! One row per intent. The full aggregate is kept as JSON in `payload`; the
//! remaining columns index it. Updates are conditional on `(state, version)`
//! and a partial unique index keeps one live intent per idempotency key.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::domain::order_intent::{IntentState, IntentStore, OrderIntent, StateGuard, StoreError};
use crate::domain::shared::{BrokerOrderId, IdempotencyKey, Instrument, IntentId};

const TERMINAL_STATES: &str = "('FILLED', 'CANCELLED', 'REJECTED', 'FAILED')";

/// SQLite-backed [`IntentStore`].
#[derive(Debug, Clone)]
pub struct SqliteIntentStore {
    pool: SqlitePool,
}

impl SqliteIntentStore {
    /// Open (creating if missing) the database at `database_url` and migrate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(backend)?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Full);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to :memory: is its own database
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await.map_err(backend)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;

        tracing::info!(database_url, "Intent store opened");
        Ok(Self { pool })
    }

    /// In-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    /// Close the pool, flushing pending writes.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_many(
        &self,
        sql: &str,
        bind: Option<String>,
    ) -> Result<Vec<OrderIntent>, StoreError> {
        let mut query = sqlx::query_as::<_, (String,)>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;
        rows.into_iter().map(|(payload,)| decode(&payload)).collect()
    }

    async fn fetch_one(
        &self,
        sql: &str,
        bind: String,
    ) -> Result<Option<OrderIntent>, StoreError> {
        let row = sqlx::query_as::<_, (String,)>(sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|(payload,)| decode(&payload)).transpose()
    }

    async fn live_holder(&self, key: &IdempotencyKey) -> Result<Option<IntentId>, StoreError> {
        let sql = format!(
            "SELECT intent_id FROM order_intents \
             WHERE idempotency_key = ?1 AND state NOT IN {TERMINAL_STATES} LIMIT 1"
        );
        let row = sqlx::query_as::<_, (String,)>(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|(id,)| IntentId::new(id)))
    }
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode(intent: &OrderIntent) -> Result<String, StoreError> {
    serde_json::to_string(intent).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(payload: &str) -> Result<OrderIntent, StoreError> {
    serde_json::from_str(payload).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn version(intent_version: u64) -> Result<i64, StoreError> {
    i64::try_from(intent_version)
        .map_err(|_| StoreError::Serialization(format!("version {intent_version} out of range")))
}

#[async_trait]
impl IntentStore for SqliteIntentStore {
    async fn create(&self, intent: &OrderIntent) -> Result<(), StoreError> {
        let payload = encode(intent)?;
        let result = sqlx::query(
            r"
            INSERT INTO order_intents (
                intent_id, idempotency_key, state, version, broker_order_id,
                instrument, created_at_ms, updated_at_ms, payload
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(intent.intent_id().as_str())
        .bind(intent.idempotency_key().as_str())
        .bind(intent.state().as_str())
        .bind(version(intent.version())?)
        .bind(intent.broker_order_id().map(BrokerOrderId::as_str))
        .bind(intent.instrument().as_str())
        .bind(intent.created_at().timestamp_millis())
        .bind(intent.updated_at().timestamp_millis())
        .bind(payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                match self.live_holder(intent.idempotency_key()).await? {
                    Some(existing) => Err(StoreError::DuplicateIdempotencyKey {
                        key: intent.idempotency_key().clone(),
                        existing,
                    }),
                    None => Err(StoreError::Backend(format!(
                        "intent {} already exists",
                        intent.intent_id()
                    ))),
                }
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn get(&self, intent_id: &IntentId) -> Result<Option<OrderIntent>, StoreError> {
        self.fetch_one(
            "SELECT payload FROM order_intents WHERE intent_id = ?1",
            intent_id.to_string(),
        )
        .await
    }

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrderIntent>, StoreError> {
        let sql = format!(
            "SELECT payload FROM order_intents WHERE idempotency_key = ?1 \
             ORDER BY CASE WHEN state IN {TERMINAL_STATES} THEN 1 ELSE 0 END, \
             updated_at_ms DESC LIMIT 1"
        );
        self.fetch_one(&sql, key.to_string()).await
    }

    async fn update_state(
        &self,
        intent: &OrderIntent,
        expected: StateGuard,
    ) -> Result<(), StoreError> {
        let payload = encode(intent)?;
        let result = sqlx::query(
            r"
            UPDATE order_intents
            SET state = ?1, version = ?2, broker_order_id = ?3, updated_at_ms = ?4, payload = ?5
            WHERE intent_id = ?6 AND state = ?7 AND version = ?8
            ",
        )
        .bind(intent.state().as_str())
        .bind(version(intent.version())?)
        .bind(intent.broker_order_id().map(BrokerOrderId::as_str))
        .bind(intent.updated_at().timestamp_millis())
        .bind(payload)
        .bind(intent.intent_id().as_str())
        .bind(expected.state.as_str())
        .bind(version(expected.version)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        if self.get(intent.intent_id()).await?.is_none() {
            return Err(StoreError::NotFound(intent.intent_id().clone()));
        }
        Err(StoreError::StaleTransition {
            intent_id: intent.intent_id().clone(),
            expected_state: expected.state,
            expected_version: expected.version,
        })
    }

    async fn list_non_terminal(&self) -> Result<Vec<OrderIntent>, StoreError> {
        let sql = format!(
            "SELECT payload FROM order_intents WHERE state NOT IN {TERMINAL_STATES} \
             ORDER BY created_at_ms, rowid"
        );
        self.fetch_many(&sql, None).await
    }

    async fn list_by_state(&self, state: IntentState) -> Result<Vec<OrderIntent>, StoreError> {
        self.fetch_many(
            "SELECT payload FROM order_intents WHERE state = ?1 ORDER BY created_at_ms, rowid",
            Some(state.as_str().to_string()),
        )
        .await
    }

    async fn list_by_instrument(
        &self,
        instrument: &Instrument,
    ) -> Result<Vec<OrderIntent>, StoreError> {
        self.fetch_many(
            "SELECT payload FROM order_intents WHERE instrument = ?1 ORDER BY created_at_ms, rowid",
            Some(instrument.to_string()),
        )
        .await
    }

    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OrderIntent>, StoreError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT payload FROM order_intents \
             WHERE created_at_ms >= ?1 AND created_at_ms <= ?2 ORDER BY created_at_ms, rowid",
        )
        .bind(from.timestamp_millis())
        .bind(to.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(|(payload,)| decode(&payload)).collect()
    }

    async fn find_by_broker_order_id(
        &self,
        broker_order_id: &BrokerOrderId,
    ) -> Result<Option<OrderIntent>, StoreError> {
        self.fetch_one(
            "SELECT payload FROM order_intents WHERE broker_order_id = ?1 LIMIT 1",
            broker_order_id.to_string(),
        )
        .await
    }
}
