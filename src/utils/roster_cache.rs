use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use moka::future::Cache;
use once_cell::sync::OnceCell;
use sqlx::MySqlPool;

use crate::model::payroll::RosterEmployee;
use crate::model::role::Role;

const ROSTER_KEY: &str = "employees";
const DEFAULT_TTL_SECS: u64 = 300;

/// Employee roster used by identity matching; one entry, refreshed after the TTL.
static ROSTER_CACHE: OnceCell<Cache<&'static str, Arc<Vec<RosterEmployee>>>> = OnceCell::new();

fn cache() -> &'static Cache<&'static str, Arc<Vec<RosterEmployee>>> {
    ROSTER_CACHE.get_or_init(|| build(DEFAULT_TTL_SECS))
}

fn build(ttl_secs: u64) -> Cache<&'static str, Arc<Vec<RosterEmployee>>> {
    Cache::builder()
        .max_capacity(1)
        .time_to_live(Duration::from_secs(ttl_secs))
        .build()
}

/// Sets the TTL; only effective before the first lookup.
pub fn init(ttl_secs: u64) {
    let _ = ROSTER_CACHE.set(build(ttl_secs));
}

async fn load_roster(pool: &MySqlPool) -> Result<Vec<RosterEmployee>, sqlx::Error> {
    sqlx::query_as::<_, RosterEmployee>(
        r#"
        SELECT u.id AS id, CONCAT(e.first_name, ' ', e.last_name) AS name
        FROM users u
        JOIN employees e ON e.id = u.employee_id
        WHERE u.role_id = ? AND u.is_active = 1
        ORDER BY name, u.id
        "#,
    )
    .bind(Role::Employee as u8)
    .fetch_all(pool)
    .await
}

/// Cached roster, loading it from the database on a miss.
pub async fn get_roster(pool: &MySqlPool) -> Result<Arc<Vec<RosterEmployee>>, sqlx::Error> {
    if let Some(roster) = cache().get(&ROSTER_KEY).await {
        return Ok(roster);
    }

    let roster = Arc::new(load_roster(pool).await?);
    cache().insert(ROSTER_KEY, roster.clone()).await;
    Ok(roster)
}

/// Load the roster once at startup
pub async fn warmup_roster_cache(pool: &MySqlPool) -> Result<()> {
    let roster = get_roster(pool).await?;

    log::info!("Roster cache warmup complete: {} employees", roster.len());

    Ok(())
}
