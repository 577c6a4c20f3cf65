//! Testing utilities for cfgvault workspace
//!
//! Shared fixtures and a fully wired coordinator over a temporary cache.

#![allow(missing_docs)]

use cfgvault_artifact::{
    Artifact, Clock, ConfigurationRecord, ManualClock, MaterializationError, Materialize,
    Materializer, OwnerRef, Version,
};
use cfgvault_cache::{CacheStore, ProvenanceIndex};
use cfgvault_core::{DistributionConfig, DistributionCoordinator, InMemoryRepository};
use cfgvault_token::{SigningKey, TokenService};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Start of every manual clock: 2023-11-14T22:13:20Z
pub const EPOCH_MILLIS: i64 = 1_700_000_000_000;

pub fn owner() -> OwnerRef {
    OwnerRef::new("test-user")
}

/// Fields of a configuration that passes the schema
pub fn valid_agent_fields() -> Map<String, JsonValue> {
    match json!({
        "name": "Support agent",
        "description": "Answers product questions",
        "language": "en",
        "llm_id": "llm-gpt",
        "prompt_id": "prompt-support",
        "retriever_ids": ["kb-docs", "kb-faq"],
        "tool_ids": ["tool-search"],
        "mcp_server_ids": []
    }) {
        JsonValue::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Valid fields with `field` removed
pub fn agent_fields_without(field: &str) -> Map<String, JsonValue> {
    let mut fields = valid_agent_fields();
    fields.remove(field);
    fields
}

/// Materializer that counts calls and can be slowed down
#[derive(Debug, Default)]
pub struct CountingMaterializer {
    inner: Materializer,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingMaterializer {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Materialize for CountingMaterializer {
    fn materialize(
        &self,
        record: &ConfigurationRecord,
        version: Version,
    ) -> Result<Artifact, MaterializationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.materialize(record, version)
    }
}

/// A coordinator wired to in-memory storage and a temporary cache
pub struct TestEnv {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub repository: Arc<InMemoryRepository>,
    pub cache: Arc<CacheStore>,
    pub provenance: Arc<ProvenanceIndex>,
    pub tokens: Arc<TokenService>,
    pub materializer: Arc<CountingMaterializer>,
    pub coordinator: DistributionCoordinator,
}

impl TestEnv {
    /// Default configuration, manual clock at [`EPOCH_MILLIS`]
    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::default()
    }

    /// Directory holding cache objects
    pub fn cache_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("cache")
    }
}

#[derive(Debug, Default)]
pub struct TestEnvBuilder {
    config: Option<DistributionConfig>,
    materialize_delay: Duration,
    system_clock: bool,
}

impl TestEnvBuilder {
    pub fn config(mut self, config: DistributionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn materialize_delay(mut self, delay: Duration) -> Self {
        self.materialize_delay = delay;
        self
    }

    /// Drive token expiry and pins from the real clock
    pub fn system_clock(mut self) -> Self {
        self.system_clock = true;
        self
    }

    pub async fn build(self) -> TestEnv {
        let config = self.config.unwrap_or_default();
        let dir = tempfile::tempdir().unwrap();
        let manual = Arc::new(ManualClock::at_millis(EPOCH_MILLIS));
        let clock: Arc<dyn Clock> = if self.system_clock {
            Arc::new(cfgvault_artifact::SystemClock)
        } else {
            manual.clone()
        };

        let repository = Arc::new(InMemoryRepository::new().with_clock(clock.clone()));
        let cache = Arc::new(
            CacheStore::open(dir.path().join("cache"), config.cache_capacity())
                .await
                .unwrap()
                .with_clock(clock.clone()),
        );
        let provenance = Arc::new(ProvenanceIndex::open(dir.path().join("cache")).await.unwrap());
        let tokens = Arc::new(
            TokenService::new(SigningKey::from_secret(b"test-utils secret"))
                .with_clock(clock)
                .with_max_ttl(config.max_token_ttl()),
        );
        let materializer = Arc::new(CountingMaterializer::with_delay(self.materialize_delay));

        let coordinator = DistributionCoordinator::new(
            config,
            repository.clone(),
            cache.clone(),
            provenance.clone(),
            tokens.clone(),
        )
        .with_materializer(materializer.clone());

        TestEnv {
            dir,
            clock: manual,
            repository,
            cache,
            provenance,
            tokens,
            materializer,
            coordinator,
        }
    }
}
