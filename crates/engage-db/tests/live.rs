//! Live integration tests for engage-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/engage-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory. `DATABASE_URL` must point at a server the harness
//! may create databases on.

use chrono::{Duration, NaiveDate, Utc};
use engage_core::{InteractionStatus, ItemKind};
use engage_db::{
    approve_interaction, claim_daily_notification, claim_due_interactions,
    complete_pipeline_run, count_new_interactions, create_pipeline_run, existing_external_ids,
    get_interaction, get_lead_for_user, get_pipeline_run, has_interaction, insert_discovered_items,
    insert_interaction, link_interactions_to_lead, list_unlinked_posted, mark_permanently_failed,
    mark_posted, reconcile_lead_links, record_notification_result, requeue_interaction,
    reschedule_interaction, start_pipeline_run, upsert_lead, upsert_platform_account, DbError,
    NewDiscoveredItem, NewInteraction, NewLead,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn insert_test_tenant(pool: &sqlx::PgPool, slug: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO tenants (slug, name, product_description, keywords) \
         VALUES ($1, $1, 'A CRM for startups', ARRAY['crm']) RETURNING id",
    )
    .bind(slug)
    .fetch_one(pool)
    .await
    .unwrap_or_else(|e| panic!("insert_test_tenant failed for slug '{slug}': {e}"))
}

fn make_item(tenant_id: i64, external_id: &str) -> NewDiscoveredItem {
    NewDiscoveredItem {
        tenant_id,
        external_id: external_id.to_string(),
        kind: ItemKind::Post,
        author: "founder_jane".to_string(),
        title: Some("Looking for a CRM".to_string()),
        body: "We outgrew spreadsheets, what CRM do you use?".to_string(),
        permalink: Some(format!("/r/startups/comments/{external_id}/")),
        thread_external_id: None,
        community: "startups".to_string(),
        up_score: 12,
        down_score: 0,
        created_utc: Some(Utc::now()),
    }
}

async fn insert_item(pool: &sqlx::PgPool, tenant_id: i64, external_id: &str) -> i64 {
    insert_discovered_items(pool, &[make_item(tenant_id, external_id)])
        .await
        .expect("insert item");
    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM discovered_items WHERE tenant_id = $1 AND external_id = $2",
    )
    .bind(tenant_id)
    .bind(external_id)
    .fetch_one(pool)
    .await
    .expect("item id")
}

fn reply(tenant_id: i64, parent_item_id: i64) -> NewInteraction {
    NewInteraction {
        tenant_id,
        parent_item_id,
        target_platform_user: "founder_jane".to_string(),
        content: "We moved off spreadsheets last year and never looked back.".to_string(),
    }
}

/// Drives a fresh interaction all the way to `posted`.
async fn posted_interaction(pool: &sqlx::PgPool, tenant_id: i64, external_id: &str) -> i64 {
    let item_id = insert_item(pool, tenant_id, external_id).await;
    let id = insert_interaction(pool, &reply(tenant_id, item_id))
        .await
        .expect("insert")
        .expect("first insert creates a row");
    approve_interaction(pool, id, Utc::now() - Duration::minutes(1))
        .await
        .expect("approve");
    mark_posted(pool, id, &format!("t1_{external_id}"), Utc::now())
        .await
        .expect("mark posted");
    id
}

// ---------------------------------------------------------------------------
// Discovered items
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn ingesting_same_item_twice_stores_one_row(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;

    let first = insert_discovered_items(&pool, &[make_item(tenant_id, "abc123")])
        .await
        .expect("first insert");
    let second = insert_discovered_items(&pool, &[make_item(tenant_id, "abc123")])
        .await
        .expect("second insert");

    assert_eq!(first, 1);
    assert_eq!(second, 0);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM discovered_items")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(count, 1);

    let known = existing_external_ids(
        &pool,
        tenant_id,
        ItemKind::Post,
        &["abc123".to_string(), "zzz999".to_string()],
    )
    .await
    .expect("existing ids");
    assert!(known.contains("abc123"));
    assert!(!known.contains("zzz999"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn same_external_id_is_distinct_per_kind_and_tenant(pool: sqlx::PgPool) {
    let acme = insert_test_tenant(&pool, "acme").await;
    let globex = insert_test_tenant(&pool, "globex").await;

    let mut comment = make_item(acme, "abc123");
    comment.kind = ItemKind::Comment;

    let inserted = insert_discovered_items(
        &pool,
        &[make_item(acme, "abc123"), comment, make_item(globex, "abc123")],
    )
    .await
    .expect("insert");
    assert_eq!(inserted, 3);
}

// ---------------------------------------------------------------------------
// Interactions
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn second_live_interaction_for_same_item_is_rejected(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    let item_id = insert_item(&pool, tenant_id, "abc123").await;

    assert!(!has_interaction(&pool, item_id).await.expect("has"));

    let first = insert_interaction(&pool, &reply(tenant_id, item_id))
        .await
        .expect("first");
    let second = insert_interaction(&pool, &reply(tenant_id, item_id))
        .await
        .expect("second");

    assert!(first.is_some());
    assert!(second.is_none(), "live duplicate must be a no-op");
    assert!(has_interaction(&pool, item_id).await.expect("has"));
    assert_eq!(count_new_interactions(&pool, tenant_id).await.expect("count"), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn claimed_rows_are_leased_and_not_claimed_twice(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    upsert_platform_account(&pool, tenant_id, "acme_founder", "", "refresh", Utc::now())
        .await
        .expect("account");
    let item_id = insert_item(&pool, tenant_id, "abc123").await;
    let id = insert_interaction(&pool, &reply(tenant_id, item_id))
        .await
        .expect("insert")
        .expect("row");
    approve_interaction(&pool, id, Utc::now() - Duration::seconds(5))
        .await
        .expect("approve");

    let first = claim_due_interactions(&pool, 10, 600.0).await.expect("claim");
    let second = claim_due_interactions(&pool, 10, 600.0).await.expect("claim");

    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, id);
    assert_eq!(first[0].parent_external_id, "abc123");
    assert_eq!(first[0].parent_kind, "post");
    assert!(first[0].account_id.is_some());
    assert!(second.is_empty(), "leased row must not be handed out again");
}

#[sqlx::test(migrations = "../../migrations")]
async fn reschedule_keeps_status_and_releases_lease(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    let item_id = insert_item(&pool, tenant_id, "abc123").await;
    let id = insert_interaction(&pool, &reply(tenant_id, item_id))
        .await
        .expect("insert")
        .expect("row");
    approve_interaction(&pool, id, Utc::now()).await.expect("approve");

    let later = Utc::now() + Duration::minutes(15);
    reschedule_interaction(&pool, id, later, 0, "rate limited")
        .await
        .expect("reschedule");

    let row = get_interaction(&pool, id).await.expect("get");
    assert_eq!(row.status, InteractionStatus::Scheduled.as_str());
    assert_eq!(row.retry_count, 0);
    assert!(row.locked_until.is_none());
    assert_eq!(row.error_message.as_deref(), Some("rate limited"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn terminal_rows_reject_further_transitions(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    let id = posted_interaction(&pool, tenant_id, "abc123").await;

    let err = mark_permanently_failed(&pool, id, 1, "late failure")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidTransition { .. }));

    let row = get_interaction(&pool, id).await.expect("get");
    assert_eq!(row.status, "posted");
    assert!(row.posted_external_id.is_some());
}

#[sqlx::test(migrations = "../../migrations")]
async fn requeue_returns_failed_interaction_to_review(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    let item_id = insert_item(&pool, tenant_id, "abc123").await;
    let id = insert_interaction(&pool, &reply(tenant_id, item_id))
        .await
        .expect("insert")
        .expect("row");
    approve_interaction(&pool, id, Utc::now()).await.expect("approve");
    mark_permanently_failed(&pool, id, 3, "server error after 3 attempts")
        .await
        .expect("fail");

    requeue_interaction(&pool, id).await.expect("requeue");

    let row = get_interaction(&pool, id).await.expect("get");
    assert_eq!(row.status, "new");
    assert_eq!(row.retry_count, 0);
    assert!(row.scheduled_at.is_none());
    assert_eq!(
        row.error_message.as_deref(),
        Some("server error after 3 attempts")
    );

    let err = requeue_interaction(&pool, id).await.unwrap_err();
    assert!(matches!(
        err,
        DbError::InvalidTransition {
            expected_status: "permanently_failed",
            ..
        }
    ));
}

#[sqlx::test(migrations = "../../migrations")]
async fn requeue_is_refused_once_the_item_has_a_new_live_reply(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    let item_id = insert_item(&pool, tenant_id, "abc123").await;
    let failed = insert_interaction(&pool, &reply(tenant_id, item_id))
        .await
        .expect("insert")
        .expect("row");
    approve_interaction(&pool, failed, Utc::now()).await.expect("approve");
    mark_permanently_failed(&pool, failed, 0, "thread locked")
        .await
        .expect("fail");

    let redraft = insert_interaction(&pool, &reply(tenant_id, item_id))
        .await
        .expect("insert")
        .expect("failed rows do not block a new draft");

    let err = requeue_interaction(&pool, failed).await.unwrap_err();
    assert!(matches!(err, DbError::LiveReplyExists { id } if id == failed));
    assert_eq!(
        get_interaction(&pool, failed).await.expect("get").status,
        "permanently_failed"
    );
    assert_eq!(get_interaction(&pool, redraft).await.expect("get").status, "new");
}

// ---------------------------------------------------------------------------
// Leads
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn lead_upsert_is_idempotent_and_counts_posted_interactions(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    let first = posted_interaction(&pool, tenant_id, "abc123").await;
    let second = posted_interaction(&pool, tenant_id, "def456").await;

    let unlinked = list_unlinked_posted(&pool, 50).await.expect("unlinked");
    assert_eq!(unlinked.len(), 2);

    let lead = NewLead {
        tenant_id,
        target_platform_user: "founder_jane".to_string(),
        score: 74,
        summary: "Evaluating CRMs for a five person team".to_string(),
        buying_signals: vec!["asked for recommendations".to_string()],
        pain_points: vec!["spreadsheets".to_string()],
        analysed_interaction_ids: vec![first, second],
    };

    let lead_id = upsert_lead(&pool, &lead).await.expect("upsert");
    let again = upsert_lead(&pool, &lead).await.expect("upsert again");
    assert_eq!(lead_id, again);

    let linked = link_interactions_to_lead(&pool, lead_id, &[first, second])
        .await
        .expect("link");
    assert_eq!(linked, 2);

    let row = get_lead_for_user(&pool, tenant_id, "founder_jane")
        .await
        .expect("get")
        .expect("lead exists");
    assert_eq!(row.interaction_count, 2);
    assert!(row.first_interaction_at.is_some());
    assert!(row.first_interaction_at <= row.last_interaction_at);

    let leads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(leads, 1);
    assert!(list_unlinked_posted(&pool, 50).await.expect("unlinked").is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn reconcile_links_interactions_missed_after_lead_write(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    let id = posted_interaction(&pool, tenant_id, "abc123").await;

    // Lead written, back-link never happened.
    upsert_lead(
        &pool,
        &NewLead {
            tenant_id,
            target_platform_user: "founder_jane".to_string(),
            score: 60,
            summary: "Curious about CRMs".to_string(),
            buying_signals: vec![],
            pain_points: vec![],
            analysed_interaction_ids: vec![id],
        },
    )
    .await
    .expect("upsert");

    let linked = reconcile_lead_links(&pool).await.expect("reconcile");
    assert_eq!(linked, 1);
    assert!(get_interaction(&pool, id).await.expect("get").lead_id.is_some());
}

#[sqlx::test(migrations = "../../migrations")]
async fn reconcile_leaves_interactions_posted_during_a_run_for_analysis(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    let analysed = posted_interaction(&pool, tenant_id, "abc123").await;

    let scanned: Vec<i64> = list_unlinked_posted(&pool, 50)
        .await
        .expect("unlinked")
        .iter()
        .map(|row| row.id)
        .collect();
    assert_eq!(scanned, vec![analysed]);

    // Posted by the dispatcher while the run was assessing the scanned rows.
    let late = posted_interaction(&pool, tenant_id, "def456").await;

    let lead_id = upsert_lead(
        &pool,
        &NewLead {
            tenant_id,
            target_platform_user: "founder_jane".to_string(),
            score: 55,
            summary: "Asked about CRMs once".to_string(),
            buying_signals: vec![],
            pain_points: vec![],
            analysed_interaction_ids: scanned.clone(),
        },
    )
    .await
    .expect("upsert");
    link_interactions_to_lead(&pool, lead_id, &scanned)
        .await
        .expect("link");

    let linked = reconcile_lead_links(&pool).await.expect("reconcile");
    assert_eq!(linked, 0);
    assert_eq!(get_interaction(&pool, late).await.expect("get").lead_id, None);

    let remaining: Vec<i64> = list_unlinked_posted(&pool, 50)
        .await
        .expect("unlinked")
        .iter()
        .map(|row| row.id)
        .collect();
    assert_eq!(remaining, vec![late]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn analysed_ids_accumulate_across_upserts(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    let first = posted_interaction(&pool, tenant_id, "abc123").await;
    let second = posted_interaction(&pool, tenant_id, "def456").await;

    let lead = |ids: Vec<i64>| NewLead {
        tenant_id,
        target_platform_user: "founder_jane".to_string(),
        score: 50,
        summary: "Comparing tools".to_string(),
        buying_signals: vec![],
        pain_points: vec![],
        analysed_interaction_ids: ids,
    };
    upsert_lead(&pool, &lead(vec![first])).await.expect("first upsert");
    upsert_lead(&pool, &lead(vec![second, first])).await.expect("second upsert");

    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT analysed_interaction_ids FROM leads WHERE tenant_id = $1",
    )
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .expect("ids");
    let mut expected = vec![first, second];
    expected.sort_unstable();
    assert_eq!(ids, expected);

    assert_eq!(reconcile_lead_links(&pool).await.expect("reconcile"), 2);
}

// ---------------------------------------------------------------------------
// Notifications and runs
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn daily_notification_slot_is_claimed_once(pool: sqlx::PgPool) {
    let tenant_id = insert_test_tenant(&pool, "acme").await;
    let day = NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date");

    assert!(claim_daily_notification(&pool, tenant_id, "review_pending", day)
        .await
        .expect("claim"));
    assert!(!claim_daily_notification(&pool, tenant_id, "review_pending", day)
        .await
        .expect("claim again"));

    record_notification_result(&pool, tenant_id, "review_pending", day, Some("timeout"))
        .await
        .expect("record");
    let status: String = sqlx::query_scalar("SELECT status FROM notification_log")
        .fetch_one(&pool)
        .await
        .expect("status");
    assert_eq!(status, "failed");

    let next_day = day.succ_opt().expect("next day");
    assert!(claim_daily_notification(&pool, tenant_id, "review_pending", next_day)
        .await
        .expect("claim next day"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn pipeline_run_lifecycle(pool: sqlx::PgPool) {
    let run = create_pipeline_run(&pool, "engagement", "cli")
        .await
        .expect("create");
    assert_eq!(run.status, "queued");

    start_pipeline_run(&pool, run.id).await.expect("start");
    complete_pipeline_run(&pool, run.id, 17).await.expect("complete");

    let row = get_pipeline_run(&pool, run.id).await.expect("get");
    assert_eq!(row.status, "succeeded");
    assert_eq!(row.records_processed, 17);
    assert!(row.completed_at.is_some());

    let err = start_pipeline_run(&pool, run.id).await.unwrap_err();
    assert!(matches!(err, DbError::InvalidRunTransition { .. }));
}
