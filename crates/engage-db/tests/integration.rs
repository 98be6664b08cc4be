//! Offline tests for engage-db pool configuration and row types.
//! These tests do not require a live database connection.

use std::collections::HashMap;

use engage_core::build_app_config;
use engage_db::{PipelineRunRow, PlatformAccountRow, PoolConfig};

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let vars: HashMap<&str, &str> = [
        ("DATABASE_URL", "postgres://example"),
        ("REDDIT_CLIENT_ID", "id"),
        ("REDDIT_CLIENT_SECRET", "secret"),
        ("LLM_API_KEY", "key"),
        ("ENGAGE_DB_MAX_CONNECTIONS", "42"),
        ("ENGAGE_DB_MIN_CONNECTIONS", "7"),
        ("ENGAGE_DB_ACQUIRE_TIMEOUT_SECS", "9"),
    ]
    .into_iter()
    .collect();

    let app_config = build_app_config(|k| {
        vars.get(k)
            .map(ToString::to_string)
            .ok_or(std::env::VarError::NotPresent)
    })
    .expect("config should build");

    let pool_config = PoolConfig::from_app_config(&app_config);
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

/// Compile-time smoke test: confirm that [`PipelineRunRow`] has all expected
/// fields with the correct types. No database required.
#[test]
fn pipeline_run_row_has_expected_fields() {
    use chrono::Utc;
    use uuid::Uuid;

    let row = PipelineRunRow {
        id: 1_i64,
        public_id: Uuid::new_v4(),
        run_type: "engagement".to_string(),
        trigger_source: "scheduler".to_string(),
        status: "queued".to_string(),
        started_at: None,
        completed_at: None,
        records_processed: 0_i32,
        error_message: None,
        created_at: Utc::now(),
    };

    assert_eq!(row.run_type, "engagement");
    assert_eq!(row.status, "queued");
    assert!(row.started_at.is_none());
    assert_eq!(row.records_processed, 0);
}

#[test]
fn platform_account_debug_redacts_tokens() {
    let row = PlatformAccountRow {
        id: 3,
        tenant_id: 1,
        username: "acme_founder".to_string(),
        access_token: "access-secret".to_string(),
        refresh_token: "refresh-secret".to_string(),
        token_expires_at: chrono::Utc::now(),
        is_active: true,
        updated_at: chrono::Utc::now(),
    };

    let rendered = format!("{row:?}");
    assert!(rendered.contains("acme_founder"));
    assert!(!rendered.contains("access-secret"));
    assert!(!rendered.contains("refresh-secret"));
}
