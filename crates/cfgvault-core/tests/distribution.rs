//! End-to-end behaviour of the distribution coordinator

use cfgvault_artifact::{canonical::to_canonical_string, Fingerprint, MaterializationError};
use cfgvault_core::{DistributionConfig, DistributionError};
use cfgvault_cache::CacheCapacity;
use cfgvault_test_utils::{agent_fields_without, owner, valid_agent_fields, TestEnv};
use cfgvault_token::SigningKey;
use chrono::Duration as ChronoDuration;
use pretty_assertions::assert_eq;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

fn cold_config() -> DistributionConfig {
    DistributionConfig::new().with_hot_cache_bytes(0)
}

#[tokio::test]
async fn download_returns_canonical_serialization() {
    let env = TestEnv::new().await;
    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let issued = env
        .coordinator
        .issue_token(saved.id, Some(Duration::from_secs(60)))
        .await
        .unwrap();

    let download = env.coordinator.download(&issued.token).await.unwrap();

    let expected = format!(
        "{}\n",
        to_canonical_string(&json!({
            "config": JsonValue::Object(valid_agent_fields()),
            "format": 1,
            "record_id": saved.id.to_string(),
            "version": 1,
        }))
    );
    assert_eq!(&download.bytes[..], expected.as_bytes());
    assert_eq!(download.content_type, "application/json");
    assert_eq!(download.file_name, format!("agent-{}-v1.json", saved.id));
    assert_eq!(
        download.fingerprint,
        Fingerprint::derive(&saved.id.to_string(), 1, expected.as_bytes())
    );
    assert_eq!(issued.fingerprint, download.fingerprint);
}

#[tokio::test]
async fn invalid_record_cannot_be_issued() {
    let env = TestEnv::new().await;
    let saved = env
        .coordinator
        .create_record(&owner(), agent_fields_without("llm_id"))
        .await
        .unwrap();

    let err = env.coordinator.issue_token(saved.id, None).await.unwrap_err();

    match err {
        DistributionError::Materialization(MaterializationError::Schema(violations)) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].field, "llm_id");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(env.coordinator.cache_stats().entry_count, 0);
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let env = TestEnv::new().await;
    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let issued = env
        .coordinator
        .issue_token(saved.id, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    env.clock.advance(ChronoDuration::seconds(2));

    assert!(matches!(
        env.coordinator.download(&issued.token).await,
        Err(DistributionError::TokenInvalid)
    ));
}

#[tokio::test]
async fn expired_token_is_rejected_in_real_time() {
    let env = TestEnv::builder().system_clock().build().await;
    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let issued = env
        .coordinator
        .issue_token(saved.id, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(matches!(
        env.coordinator.download(&issued.token).await,
        Err(DistributionError::TokenInvalid)
    ));
}

#[tokio::test]
async fn garbage_and_forged_tokens_are_rejected() {
    let env = TestEnv::new().await;
    assert!(matches!(
        env.coordinator.download("not-a-token").await,
        Err(DistributionError::TokenInvalid)
    ));

    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let issued = env.coordinator.issue_token(saved.id, None).await.unwrap();
    let mut chars: Vec<char> = issued.token.chars().collect();
    chars[40] = if chars[40] == 'A' { 'B' } else { 'A' };
    let forged: String = chars.into_iter().collect();
    assert!(matches!(
        env.coordinator.download(&forged).await,
        Err(DistributionError::TokenInvalid)
    ));
}

#[tokio::test]
async fn evicted_artifact_is_regenerated() {
    let env = TestEnv::builder().config(cold_config()).build().await;
    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let issued = env.coordinator.issue_token(saved.id, None).await.unwrap();
    let first = env.coordinator.download(&issued.token).await.unwrap();
    assert_eq!(env.materializer.calls(), 1);

    tokio::fs::remove_file(env.cache.object_path(&issued.fingerprint))
        .await
        .unwrap();

    let second = env.coordinator.download(&issued.token).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(env.materializer.calls(), 2);
    assert!(env.cache.object_path(&issued.fingerprint).exists());
}

#[tokio::test]
async fn concurrent_misses_materialize_once() {
    let env = TestEnv::builder()
        .config(cold_config())
        .materialize_delay(Duration::from_millis(100))
        .build()
        .await;
    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let issued = env.coordinator.issue_token(saved.id, None).await.unwrap();
    tokio::fs::remove_file(env.cache.object_path(&issued.fingerprint))
        .await
        .unwrap();

    let downloads = futures::future::join_all(
        (0..8).map(|_| env.coordinator.download(&issued.token)),
    )
    .await;

    let bytes: Vec<_> = downloads.into_iter().map(|d| d.unwrap().bytes).collect();
    assert!(bytes.windows(2).all(|w| w[0] == w[1]));
    // one for issuance, one shared regeneration
    assert_eq!(env.materializer.calls(), 2);
}

#[tokio::test]
async fn least_recently_used_artifact_is_evicted_once_unpinned() {
    let config = cold_config().with_cache_capacity(CacheCapacity::entries(1));
    let env = TestEnv::builder().config(config).build().await;

    let a = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let token_a = env
        .coordinator
        .issue_token(a.id, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    env.clock.advance(ChronoDuration::seconds(2));

    let b = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let token_b = env.coordinator.issue_token(b.id, None).await.unwrap();

    assert!(!env.cache.contains(&token_a.fingerprint));
    assert!(env.cache.contains(&token_b.fingerprint));
    assert_eq!(env.cache.pin_count(&token_b.fingerprint), 1);
}

#[tokio::test]
async fn pinned_artifacts_outlive_capacity_pressure() {
    let config = cold_config().with_cache_capacity(CacheCapacity::entries(1));
    let env = TestEnv::builder().config(config).build().await;

    let mut tokens = Vec::new();
    for _ in 0..3 {
        let saved = env
            .coordinator
            .create_record(&owner(), valid_agent_fields())
            .await
            .unwrap();
        tokens.push(env.coordinator.issue_token(saved.id, None).await.unwrap());
    }

    assert_eq!(env.coordinator.cache_stats().entry_count, 3);
    for issued in &tokens {
        assert!(env.coordinator.download(&issued.token).await.is_ok());
    }
    assert_eq!(env.materializer.calls(), 3);
}

#[tokio::test]
async fn deleted_record_stops_serving() {
    let env = TestEnv::new().await;
    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let issued = env.coordinator.issue_token(saved.id, None).await.unwrap();

    env.coordinator.delete_record(saved.id).await.unwrap();

    assert!(matches!(
        env.coordinator.download(&issued.token).await,
        Err(DistributionError::NotFound(_))
    ));
    assert!(matches!(
        env.coordinator.record(saved.id).await,
        Err(DistributionError::NotFound(_))
    ));
    assert!(matches!(
        env.coordinator
            .update_record(saved.id, &owner(), valid_agent_fields())
            .await,
        Err(DistributionError::NotFound(_))
    ));
    assert!(matches!(
        env.coordinator.issue_token(saved.id, None).await,
        Err(DistributionError::NotFound(_))
    ));
}

#[tokio::test]
async fn listing_pages_live_records_and_bounds_the_limit() {
    let env = TestEnv::new().await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        env.clock.advance(ChronoDuration::seconds(1));
        let saved = env
            .coordinator
            .create_record(&owner(), valid_agent_fields())
            .await
            .unwrap();
        ids.push(saved.id);
    }
    env.coordinator.delete_record(ids[0]).await.unwrap();

    let page = env.coordinator.list_records(0, 10).await.unwrap();
    assert_eq!(page.total, 2);
    let listed: Vec<_> = page.items.iter().map(|r| r.id).collect();
    assert_eq!(listed, vec![ids[1], ids[2]]);

    let second = env.coordinator.list_records(1, 1).await.unwrap();
    assert_eq!(second.offset, 1);
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].id, ids[2]);
    assert!(env.coordinator.list_records(1, 10).await.unwrap().items.is_empty());

    for limit in [0, 101] {
        assert!(matches!(
            env.coordinator.list_records(0, limit).await,
            Err(DistributionError::InvalidRequest(_))
        ));
    }
}

#[tokio::test]
async fn older_tokens_keep_serving_their_version() {
    let env = TestEnv::new().await;
    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let v1 = env.coordinator.issue_token(saved.id, None).await.unwrap();

    let mut edits = serde_json::Map::new();
    edits.insert("name".into(), json!("Renamed agent"));
    let updated = env
        .coordinator
        .update_record(saved.id, &owner(), edits)
        .await
        .unwrap();
    assert_eq!(updated.version.get(), 2);
    let v2 = env.coordinator.issue_token(saved.id, None).await.unwrap();
    assert_ne!(v1.fingerprint, v2.fingerprint);

    let old = env.coordinator.download(&v1.token).await.unwrap();
    let new = env.coordinator.download(&v2.token).await.unwrap();
    assert_eq!(old.file_name, format!("agent-{}-v1.json", saved.id));
    assert_eq!(new.file_name, format!("agent-{}-v2.json", saved.id));
    assert!(std::str::from_utf8(&new.bytes).unwrap().contains("Renamed agent"));
    assert!(!std::str::from_utf8(&old.bytes).unwrap().contains("Renamed agent"));
}

#[tokio::test]
async fn eager_mode_materializes_on_save() {
    let config = DistributionConfig::new().with_eager_materialize(true);
    let env = TestEnv::builder().config(config).build().await;

    env.coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    assert_eq!(env.materializer.calls(), 1);
    assert_eq!(env.coordinator.cache_stats().entry_count, 1);

    // invalid content is still saved, just not cached
    let invalid = env
        .coordinator
        .create_record(&owner(), agent_fields_without("name"))
        .await
        .unwrap();
    assert_eq!(env.coordinator.cache_stats().entry_count, 1);
    assert!(env.coordinator.record(invalid.id).await.is_ok());
}

#[tokio::test]
async fn lazy_mode_does_not_materialize_on_save() {
    let env = TestEnv::new().await;
    env.coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    assert_eq!(env.materializer.calls(), 0);
    assert_eq!(env.coordinator.cache_stats().entry_count, 0);
}

#[tokio::test]
async fn rotation_keeps_outstanding_tokens_valid() {
    let env = TestEnv::new().await;
    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let issued = env.coordinator.issue_token(saved.id, None).await.unwrap();

    env.coordinator
        .rotate_signing_key(SigningKey::from_secret(b"rotated"));

    assert!(env.coordinator.download(&issued.token).await.is_ok());
}

#[tokio::test]
async fn zero_ttl_and_unknown_records_are_rejected() {
    let env = TestEnv::new().await;
    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();

    assert!(matches!(
        env.coordinator.issue_token(saved.id, Some(Duration::ZERO)).await,
        Err(DistributionError::InvalidRequest(_))
    ));
    assert!(matches!(
        env.coordinator
            .update_record(cfgvault_artifact::RecordId::new(), &owner(), valid_agent_fields())
            .await,
        Err(DistributionError::NotFound(_))
    ));
}

#[tokio::test]
async fn provenance_survives_restart_of_cache() {
    let env = TestEnv::builder().config(cold_config()).build().await;
    let saved = env
        .coordinator
        .create_record(&owner(), valid_agent_fields())
        .await
        .unwrap();
    let issued = env.coordinator.issue_token(saved.id, None).await.unwrap();

    let reopened = cfgvault_cache::ProvenanceIndex::open(env.cache_dir())
        .await
        .unwrap();
    let provenance = reopened.lookup(&issued.fingerprint).await.unwrap().unwrap();
    assert_eq!(provenance.record_id, saved.id);
    assert_eq!(provenance.version.get(), 1);
}
