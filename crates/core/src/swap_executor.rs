//! Swap Executor — §4.5: bind a stored quote to a user key, dispatch to the
//! quote's provider through the circuit breaker, persist the transaction
//! lifecycle.
//!
//! Grounded on the same provider-dispatch shape as `route_engine`'s
//! `quote_from_provider` (breaker-guarded single adapter call), scoped down
//! to one call instead of a fan-out since execution always targets exactly
//! the provider that produced the winning quote.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;

use routex_common::clock::Clock;
use routex_common::error::{RouterError, RouterResult};
use routex_common::traits::UpstreamAdapter;
use routex_common::types::{
    BuildOptions, BuiltTransaction, NormalizedQuote, QuoteRecord, SimulationResult, SwapStatus,
    SwapTransactionRecord,
};
use routex_types::config::RouterConfig;

use crate::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::db::SqliteStore;

/// Result of `execute_swap`, the public shape `apps/backend` projects onto
/// the `POST /swap/execute` response.
#[derive(Debug, Clone)]
pub struct ExecuteSwapResult {
    pub transaction_id: String,
    pub status: SwapStatus,
    pub transaction: BuiltTransaction,
    pub processing_time_ms: u64,
    pub expires_at_ms: i64,
}

/// Result of `simulate_swap`.
#[derive(Debug, Clone)]
pub struct SimulateSwapResult {
    pub transaction_id: String,
    pub status: SwapStatus,
    pub simulation: SimulationResult,
    pub processing_time_ms: u64,
}

/// In-process ledger of each swap record's `createdAt`, so
/// `update_swap_status` can compute `executionTimeMs` without re-querying
/// the store (the Design Notes' fix for the source's redundant re-read).
struct CreatedAtLedger {
    entries: HashMap<String, i64>,
}

impl CreatedAtLedger {
    fn new() -> Self {
        Self { entries: HashMap::new() }
    }
}

pub struct SwapExecutor {
    adapters: HashMap<String, Arc<dyn UpstreamAdapter>>,
    breaker: Arc<CircuitBreakerRegistry>,
    store: Arc<TokioMutex<SqliteStore>>,
    clock: Arc<dyn Clock>,
    config: RouterConfig,
    created_at: TokioMutex<CreatedAtLedger>,
}

impl SwapExecutor {
    pub fn new(
        adapters: Vec<Arc<dyn UpstreamAdapter>>,
        breaker: Arc<CircuitBreakerRegistry>,
        store: Arc<TokioMutex<SqliteStore>>,
        clock: Arc<dyn Clock>,
        config: RouterConfig,
    ) -> Self {
        let adapters = adapters.into_iter().map(|a| (a.name().to_string(), a)).collect();
        Self {
            adapters,
            breaker,
            store,
            clock,
            config,
            created_at: TokioMutex::new(CreatedAtLedger::new()),
        }
    }

    fn adapter_for(&self, provider: &str) -> RouterResult<Arc<dyn UpstreamAdapter>> {
        self.adapters
            .get(provider)
            .cloned()
            .ok_or_else(|| RouterError::RouteCalculationFailed(format!("no adapter configured for provider {provider}")))
    }

    async fn load_quote_or_not_found(&self, quote_id: &str) -> RouterResult<QuoteRecord> {
        let store = self.store.lock().await;
        store
            .get_quote_record(quote_id)?
            .ok_or_else(|| RouterError::RouteNotFound { causes: vec![format!("no quote record for {quote_id}")] })
    }

    fn quote_record_into_normalized(record: &QuoteRecord) -> RouterResult<NormalizedQuote> {
        let route_plan = serde_json::from_str(&record.route_plan_json)
            .map_err(|e| RouterError::DatabaseError(format!("corrupt route_plan_json: {e}")))?;
        Ok(NormalizedQuote {
            input_mint: record.input_mint.clone(),
            output_mint: record.output_mint.clone(),
            in_amount: record.in_amount,
            out_amount: record.out_amount,
            other_amount_threshold: record.out_amount,
            swap_mode: routex_common::types::SwapMode::ExactIn,
            slippage_bps: record.slippage_bps,
            platform_fee: record.platform_fee_amount.map(|amount| routex_common::types::PlatformFee {
                amount,
                fee_bps: 0,
            }),
            price_impact_pct: record.price_impact_pct,
            route_plan,
            time_taken_ms: record.response_time_ms,
            context_slot: None,
            gas_estimate: record.gas_estimate,
        })
    }

    /// §4.5 steps 1-6.
    pub async fn execute_swap(
        &self,
        quote_id: &str,
        user_public_key: &str,
        options: BuildOptions,
    ) -> RouterResult<ExecuteSwapResult> {
        let start_ms = self.clock.now_ms();
        let record = self.load_quote_or_not_found(quote_id).await?;

        let now = self.clock.now_ms();
        if now > record.expires_at_ms {
            return Err(RouterError::RouteExpired {
                quote_id: quote_id.to_string(),
                expires_at: record.expires_at_ms.to_string(),
            });
        }

        let quote = Self::quote_record_into_normalized(&record)?;
        let tx_id = uuid::Uuid::new_v4().to_string();
        let created_at_ms = now;
        let expires_at_ms = now + self.config.engine.swap_expiration_ms;

        let audit_blob = serde_json::json!({
            "quote": quote,
            "buildRequest": { "userPublicKey": user_public_key, "options": options },
        })
        .to_string();

        let mut tx_record = SwapTransactionRecord {
            id: tx_id.clone(),
            user_id: user_public_key.to_string(),
            input_mint: record.input_mint.clone(),
            output_mint: record.output_mint.clone(),
            in_amount: record.in_amount,
            out_amount: record.out_amount,
            min_out_amount: quote.other_amount_threshold,
            slippage_bps: record.slippage_bps,
            provider: record.provider.clone(),
            status: SwapStatus::Pending,
            tx_hash: None,
            route_data_json: audit_blob,
            fee: record.platform_fee_amount,
            gas_estimate: record.gas_estimate,
            execution_time_ms: None,
            error_code: None,
            error_message: None,
            created_at_ms,
            updated_at_ms: created_at_ms,
            expires_at_ms,
        };

        {
            let store = self.store.lock().await;
            store.upsert_swap_transaction(&tx_record)?;
        }
        self.created_at.lock().await.entries.insert(tx_id.clone(), created_at_ms);

        let adapter = self.adapter_for(&record.provider)?;
        let service_config = CircuitBreakerConfig::from_service_settings(&self.config.circuit_breaker);
        let breaker = self.breaker.clone();
        let provider = record.provider.clone();
        let user_key_owned = user_public_key.to_string();
        let options_for_call = options.clone();
        let quote_for_call = quote.clone();

        let build_result = breaker
            .execute_guarded(
                &provider,
                "build_transaction",
                service_config,
                move || async move { adapter.build_transaction(&quote_for_call, &user_key_owned, &options_for_call).await },
                None::<fn() -> RouterResult<BuiltTransaction>>,
            )
            .await;

        let built = match build_result {
            Ok(built) => built,
            Err(err) => {
                tx_record.status = SwapStatus::Failed;
                tx_record.error_code = Some(error_code_of(&err));
                tx_record.error_message = Some(err.to_string());
                tx_record.updated_at_ms = self.clock.now_ms();
                let store = self.store.lock().await;
                store.upsert_swap_transaction(&tx_record)?;
                return Err(err);
            }
        };

        tx_record.tx_hash = None;
        tx_record.updated_at_ms = self.clock.now_ms();
        {
            let store = self.store.lock().await;
            store.upsert_swap_transaction(&tx_record)?;
        }

        let processing_time_ms = (self.clock.now_ms() - start_ms).max(0) as u64;
        Ok(ExecuteSwapResult {
            transaction_id: tx_id,
            status: SwapStatus::Pending,
            transaction: built,
            processing_time_ms,
            expires_at_ms,
        })
    }

    /// Same flow as `execute_swap` through `build_transaction`, then a
    /// `simulate_transaction` call; a synthetic (non-PENDING-lifecycle)
    /// record is written for audit rather than entering the real swap
    /// lifecycle.
    pub async fn simulate_swap(&self, quote_id: &str, user_public_key: &str) -> RouterResult<SimulateSwapResult> {
        let start_ms = self.clock.now_ms();
        let record = self.load_quote_or_not_found(quote_id).await?;

        let now = self.clock.now_ms();
        if now > record.expires_at_ms {
            return Err(RouterError::RouteExpired {
                quote_id: quote_id.to_string(),
                expires_at: record.expires_at_ms.to_string(),
            });
        }

        let quote = Self::quote_record_into_normalized(&record)?;
        let adapter = self.adapter_for(&record.provider)?;
        let service_config = CircuitBreakerConfig::from_service_settings(&self.config.circuit_breaker);
        let breaker = self.breaker.clone();
        let provider = record.provider.clone();

        let user_key_for_build = user_public_key.to_string();
        let options = BuildOptions::default();
        let quote_for_build = quote.clone();
        let adapter_for_build = adapter.clone();

        let built = breaker
            .execute_guarded(
                &provider,
                "build_transaction",
                service_config,
                move || async move { adapter_for_build.build_transaction(&quote_for_build, &user_key_for_build, &options).await },
                None::<fn() -> RouterResult<BuiltTransaction>>,
            )
            .await?;

        let user_key_for_sim = user_public_key.to_string();
        let blob = built.transaction_blob.clone();
        let adapter_for_sim = adapter.clone();
        let simulation = breaker
            .execute_guarded(
                &provider,
                "simulate_transaction",
                service_config,
                move || async move { adapter_for_sim.simulate_transaction(&blob, &user_key_for_sim).await },
                None::<fn() -> RouterResult<SimulationResult>>,
            )
            .await?;

        let tx_id = uuid::Uuid::new_v4().to_string();
        let created_at_ms = now;
        let status = if simulation.success { SwapStatus::Completed } else { SwapStatus::Failed };
        let audit_blob = serde_json::json!({
            "quote": quote,
            "buildRequest": { "userPublicKey": user_public_key },
            "transactionBlob": built.transaction_blob,
            "simulation": simulation,
        })
        .to_string();

        let tx_record = SwapTransactionRecord {
            id: tx_id.clone(),
            user_id: user_public_key.to_string(),
            input_mint: record.input_mint.clone(),
            output_mint: record.output_mint.clone(),
            in_amount: record.in_amount,
            out_amount: record.out_amount,
            min_out_amount: quote.other_amount_threshold,
            slippage_bps: record.slippage_bps,
            provider: record.provider.clone(),
            status,
            tx_hash: None,
            route_data_json: audit_blob,
            fee: record.platform_fee_amount,
            gas_estimate: record.gas_estimate,
            execution_time_ms: Some((self.clock.now_ms() - created_at_ms).max(0)),
            error_code: if simulation.success { None } else { Some("SIMULATION_FAILED".to_string()) },
            error_message: simulation.error.clone(),
            created_at_ms,
            updated_at_ms: self.clock.now_ms(),
            expires_at_ms: created_at_ms + self.config.engine.swap_expiration_ms,
        };

        {
            let store = self.store.lock().await;
            store.upsert_swap_transaction(&tx_record)?;
        }

        let processing_time_ms = (self.clock.now_ms() - start_ms).max(0) as u64;
        Ok(SimulateSwapResult {
            transaction_id: tx_id,
            status,
            simulation,
            processing_time_ms,
        })
    }

    pub async fn get_swap_status(&self, transaction_id: &str) -> RouterResult<Option<SwapTransactionRecord>> {
        let store = self.store.lock().await;
        store.get_swap_transaction(transaction_id)
    }

    /// Monotone state transition: once terminal, a record never re-opens.
    /// Computes `executionTimeMs` from the in-memory `createdAt` ledger
    /// populated at creation time, falling back to the record's own
    /// `createdAtMs` if the process restarted and lost the ledger entry.
    pub async fn update_swap_status(
        &self,
        transaction_id: &str,
        new_status: SwapStatus,
        tx_hash: Option<String>,
        error_code: Option<String>,
        error_message: Option<String>,
    ) -> RouterResult<SwapTransactionRecord> {
        let mut record = {
            let store = self.store.lock().await;
            store
                .get_swap_transaction(transaction_id)?
                .ok_or_else(|| RouterError::RouteNotFound { causes: vec![format!("no swap transaction {transaction_id}")] })?
        };

        if record.status.is_terminal() {
            return Ok(record);
        }

        let now = self.clock.now_ms();
        record.status = new_status;
        record.tx_hash = tx_hash.or(record.tx_hash);
        record.error_code = error_code.or(record.error_code);
        record.error_message = error_message.or(record.error_message);
        record.updated_at_ms = now;

        if new_status.is_terminal() {
            let created_at_ms = {
                let ledger = self.created_at.lock().await;
                ledger.entries.get(transaction_id).copied().unwrap_or(record.created_at_ms)
            };
            record.execution_time_ms = Some((now - created_at_ms).max(0));
        }

        {
            let store = self.store.lock().await;
            store.upsert_swap_transaction(&record)?;
        }

        Ok(record)
    }

    /// `POST /swap/{id}/cancel`: only legal from PENDING.
    pub async fn cancel_swap(&self, transaction_id: &str) -> RouterResult<SwapTransactionRecord> {
        let record = {
            let store = self.store.lock().await;
            store
                .get_swap_transaction(transaction_id)?
                .ok_or_else(|| RouterError::RouteNotFound { causes: vec![format!("no swap transaction {transaction_id}")] })?
        };

        if record.status != SwapStatus::Pending {
            return Err(RouterError::InvalidInput(format!(
                "cannot cancel transaction {transaction_id} in status {:?}",
                record.status
            )));
        }

        self.update_swap_status(transaction_id, SwapStatus::Failed, None, Some("CANCELLED".to_string()), Some("cancelled by caller".to_string()))
            .await
    }
}

fn error_code_of(err: &RouterError) -> String {
    err.detail().code
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use routex_common::clock::FakeClock;
    use routex_common::metrics::NoopMetrics;
    use routex_common::types::{QuoteRequest, RouteStep};

    struct FakeAdapter {
        provider: &'static str,
        fail_build: bool,
        sim_success: bool,
    }

    #[async_trait]
    impl UpstreamAdapter for FakeAdapter {
        fn name(&self) -> &str {
            self.provider
        }

        async fn quote(&self, _request: &QuoteRequest) -> RouterResult<NormalizedQuote> {
            unimplemented!("not exercised by swap executor tests")
        }

        async fn build_transaction(
            &self,
            _quote: &NormalizedQuote,
            _user_key: &str,
            _options: &BuildOptions,
        ) -> RouterResult<BuiltTransaction> {
            if self.fail_build {
                return Err(RouterError::DexUnavailable {
                    provider: self.provider.to_string(),
                    message: "down".into(),
                });
            }
            Ok(BuiltTransaction {
                transaction_blob: "deadbeef".to_string(),
                last_valid_height: Some(1_000),
                priority_fee: Some(500),
            })
        }

        async fn simulate_transaction(&self, _transaction_blob: &str, _user_key: &str) -> RouterResult<SimulationResult> {
            Ok(SimulationResult {
                success: self.sim_success,
                error: if self.sim_success { None } else { Some("insufficient funds".to_string()) },
                compute_units: Some(12_345),
                logs: vec![],
            })
        }

        async fn is_healthy(&self) -> bool {
            true
        }
    }

    fn sample_quote_record(id: &str, created_at_ms: i64, expires_at_ms: i64) -> QuoteRecord {
        QuoteRecord {
            id: id.to_string(),
            provider: "orbit".to_string(),
            input_mint: "SOL".to_string(),
            output_mint: "USDC".to_string(),
            in_amount: 1_000_000_000,
            out_amount: 145_000_000,
            price_impact_pct: "0.01".parse().unwrap(),
            slippage_bps: 50,
            route_plan_json: serde_json::to_string(&vec![RouteStep {
                pool: "pool-a".into(),
                amount_in: 1_000_000_000,
                amount_out: 145_000_000,
            }])
            .unwrap(),
            platform_fee_amount: None,
            gas_estimate: Some(120_000),
            response_time_ms: 250,
            is_cached: false,
            created_at_ms,
            expires_at_ms,
            efficiency_score: Some(0.9),
            reliability_score: Some(0.95),
        }
    }

    fn executor_with(adapter: Arc<dyn UpstreamAdapter>, clock: Arc<dyn Clock>) -> (SwapExecutor, Arc<TokioMutex<SqliteStore>>) {
        let metrics = Arc::new(NoopMetrics);
        let breaker = Arc::new(CircuitBreakerRegistry::new(clock.clone(), metrics));
        let store = Arc::new(TokioMutex::new(SqliteStore::open_in_memory().unwrap()));
        let executor = SwapExecutor::new(vec![adapter], breaker, store.clone(), clock, RouterConfig::default());
        (executor, store)
    }

    #[tokio::test]
    async fn execute_swap_happy_path_creates_pending_then_attaches_blob() {
        let clock = Arc::new(FakeClock::new(1_000));
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(FakeAdapter { provider: "orbit", fail_build: false, sim_success: true });
        let (executor, store) = executor_with(adapter, clock.clone());

        {
            let store = store.lock().await;
            store.insert_quote_record(&sample_quote_record("q1", 1_000, 31_000)).unwrap();
        }

        let result = executor.execute_swap("q1", "user-key", BuildOptions::default()).await.unwrap();
        assert_eq!(result.status, SwapStatus::Pending);
        assert_eq!(result.transaction.transaction_blob, "deadbeef");

        let fetched = executor.get_swap_status(&result.transaction_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SwapStatus::Pending);
        assert_eq!(fetched.provider, "orbit");
    }

    #[tokio::test]
    async fn execute_swap_on_expired_quote_fails_without_adapter_call() {
        let clock = Arc::new(FakeClock::new(40_000));
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(FakeAdapter { provider: "orbit", fail_build: true, sim_success: true });
        let (executor, store) = executor_with(adapter, clock.clone());

        {
            let store = store.lock().await;
            store.insert_quote_record(&sample_quote_record("q1", 1_000, 31_000)).unwrap();
        }

        let err = executor.execute_swap("q1", "user-key", BuildOptions::default()).await.unwrap_err();
        assert!(matches!(err, RouterError::RouteExpired { .. }));
    }

    #[tokio::test]
    async fn execute_swap_missing_quote_is_route_not_found() {
        let clock = Arc::new(FakeClock::new(1_000));
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(FakeAdapter { provider: "orbit", fail_build: false, sim_success: true });
        let (executor, _store) = executor_with(adapter, clock);

        let err = executor.execute_swap("missing", "user-key", BuildOptions::default()).await.unwrap_err();
        assert!(matches!(err, RouterError::RouteNotFound { .. }));
    }

    #[tokio::test]
    async fn execute_swap_adapter_failure_marks_record_failed() {
        let clock = Arc::new(FakeClock::new(1_000));
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(FakeAdapter { provider: "orbit", fail_build: true, sim_success: true });
        let (executor, store) = executor_with(adapter, clock.clone());

        {
            let store = store.lock().await;
            store.insert_quote_record(&sample_quote_record("q1", 1_000, 31_000)).unwrap();
        }

        let err = executor.execute_swap("q1", "user-key", BuildOptions::default()).await.unwrap_err();
        assert!(matches!(err, RouterError::DexUnavailable { .. }));
    }

    #[tokio::test]
    async fn simulate_swap_records_outcome_without_pending_lifecycle() {
        let clock = Arc::new(FakeClock::new(1_000));
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(FakeAdapter { provider: "orbit", fail_build: false, sim_success: false });
        let (executor, store) = executor_with(adapter, clock.clone());

        {
            let store = store.lock().await;
            store.insert_quote_record(&sample_quote_record("q1", 1_000, 31_000)).unwrap();
        }

        let result = executor.simulate_swap("q1", "user-key").await.unwrap();
        assert!(!result.simulation.success);
        assert_eq!(result.status, SwapStatus::Failed);

        let fetched = executor.get_swap_status(&result.transaction_id).await.unwrap().unwrap();
        assert!(fetched.execution_time_ms.is_some());
    }

    #[tokio::test]
    async fn terminal_status_never_re_opens() {
        let clock = Arc::new(FakeClock::new(1_000));
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(FakeAdapter { provider: "orbit", fail_build: false, sim_success: true });
        let (executor, store) = executor_with(adapter, clock.clone());

        {
            let store = store.lock().await;
            store.insert_quote_record(&sample_quote_record("q1", 1_000, 31_000)).unwrap();
        }
        let result = executor.execute_swap("q1", "user-key", BuildOptions::default()).await.unwrap();

        executor
            .update_swap_status(&result.transaction_id, SwapStatus::Completed, Some("0xabc".to_string()), None, None)
            .await
            .unwrap();
        let reopened = executor
            .update_swap_status(&result.transaction_id, SwapStatus::Failed, None, Some("ERR".to_string()), None)
            .await
            .unwrap();

        assert_eq!(reopened.status, SwapStatus::Completed, "a terminal record must never transition again");
    }

    #[tokio::test]
    async fn cancel_is_only_legal_from_pending() {
        let clock = Arc::new(FakeClock::new(1_000));
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(FakeAdapter { provider: "orbit", fail_build: false, sim_success: true });
        let (executor, store) = executor_with(adapter, clock.clone());

        {
            let store = store.lock().await;
            store.insert_quote_record(&sample_quote_record("q1", 1_000, 31_000)).unwrap();
        }
        let result = executor.execute_swap("q1", "user-key", BuildOptions::default()).await.unwrap();

        let cancelled = executor.cancel_swap(&result.transaction_id).await.unwrap();
        assert_eq!(cancelled.status, SwapStatus::Failed);
        assert_eq!(cancelled.error_code.as_deref(), Some("CANCELLED"));

        let err = executor.cancel_swap(&result.transaction_id).await.unwrap_err();
        assert!(matches!(err, RouterError::InvalidInput(_)));
    }
}
