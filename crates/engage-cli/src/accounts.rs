//! Posting account registration.

use chrono::Utc;

/// Stores the tenant's posting account with an already-expired access
/// token, so the first posting attempt performs a refresh.
pub(crate) async fn run_connect(
    pool: &sqlx::PgPool,
    tenant_slug: &str,
    username: &str,
    refresh_token: &str,
) -> anyhow::Result<()> {
    let refresh_token = refresh_token.trim();
    if refresh_token.is_empty() {
        anyhow::bail!("refresh token must not be empty");
    }

    let tenant = engage_db::get_tenant_by_slug(pool, tenant_slug)
        .await?
        .ok_or_else(|| anyhow::anyhow!("tenant '{tenant_slug}' not found"))?;

    let username = username.trim().trim_start_matches("u/");
    let id = engage_db::upsert_platform_account(
        pool,
        tenant.id,
        username,
        "",
        refresh_token,
        Utc::now() - chrono::Duration::seconds(1),
    )
    .await?;

    println!("posting account u/{username} stored for {tenant_slug} (id {id})");
    Ok(())
}
