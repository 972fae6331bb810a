//! Background maintenance jobs: expired-endpoint cleanup and billing
//! period reset.
//!
//! Both run as periodic loops that exit promptly on the shared shutdown
//! signal. Each tick is independent and idempotent; a crashed tick is
//! retried by the next interval.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QuerySelect,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use hookwell_store_db::entities::{
    captured_request, endpoint,
    owner::{self, Plan},
};

/// Captured requests deleted per endpoint per cleanup tick.
pub const CLEANUP_BATCH_SIZE: u64 = 100;

/// Expired endpoints / lapsed owners examined per tick.
const SCAN_LIMIT: u64 = 100;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub endpoints_deleted: u64,
    pub requests_deleted: u64,
}

/// One cleanup pass: for every expired endpoint, delete up to
/// `CLEANUP_BATCH_SIZE` captured requests; delete the endpoint itself only
/// when the batch came back short, which signals no rows remain.
pub async fn cleanup_tick(db: &DatabaseConnection) -> Result<CleanupStats, DbErr> {
    let now = Utc::now();
    let expired = endpoint::Entity::find()
        .filter(endpoint::Column::ExpiresAt.is_not_null())
        .filter(endpoint::Column::ExpiresAt.lte(now))
        .limit(SCAN_LIMIT)
        .all(db)
        .await?;

    let mut stats = CleanupStats::default();

    for expired_endpoint in expired {
        let batch: Vec<String> = captured_request::Entity::find()
            .filter(captured_request::Column::EndpointId.eq(expired_endpoint.id.clone()))
            .limit(CLEANUP_BATCH_SIZE)
            .all(db)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();

        let batch_was_full = batch.len() as u64 == CLEANUP_BATCH_SIZE;

        if !batch.is_empty() {
            let deleted = captured_request::Entity::delete_many()
                .filter(captured_request::Column::Id.is_in(batch))
                .exec(db)
                .await?;
            stats.requests_deleted += deleted.rows_affected;
        }

        if !batch_was_full {
            endpoint::Entity::delete_by_id(expired_endpoint.id)
                .exec(db)
                .await?;
            stats.endpoints_deleted += 1;
        }
    }

    Ok(stats)
}

/// One period-reset pass over owners whose billing period has lapsed.
///
/// Pro owners flagged `cancel_at_period_end` are downgraded to the free
/// plan; other pro owners roll forward one billing interval with a zeroed
/// counter and a reaffirmed pro limit. Free owners are skipped: the usage
/// ledger lazily re-activates them on their next capture.
pub async fn period_reset_tick(
    db: &DatabaseConnection,
    free_request_limit: i64,
    pro_request_limit: i64,
    billing_period_ms: i64,
) -> Result<u64, DbErr> {
    let now = Utc::now();
    let due = owner::Entity::find()
        .filter(owner::Column::PeriodEnd.is_not_null())
        .filter(owner::Column::PeriodEnd.lte(now))
        .limit(SCAN_LIMIT)
        .all(db)
        .await?;

    let mut reset = 0;

    for record in due {
        if record.plan != Plan::Pro {
            continue;
        }
        let Some(period_end) = record.period_end else {
            continue;
        };

        let owner_id = record.id;
        let cancel = record.cancel_at_period_end;
        let mut active: owner::ActiveModel = record.into();

        if cancel {
            active.plan = Set(Plan::Free);
            active.request_limit = Set(free_request_limit);
            active.requests_used = Set(0);
            active.period_start = Set(None);
            active.period_end = Set(None);
            active.cancel_at_period_end = Set(false);
            active.subscription_status = Set(Some("canceled".to_string()));
            info!(%owner_id, "downgraded owner at period end");
        } else {
            active.period_start = Set(Some(period_end));
            active.period_end =
                Set(Some(period_end + Duration::milliseconds(billing_period_ms)));
            active.requests_used = Set(0);
            active.request_limit = Set(pro_request_limit);
            info!(%owner_id, "rolled billing period forward");
        }

        active.update(db).await?;
        reset += 1;
    }

    Ok(reset)
}

pub fn spawn_cleanup(
    db: DatabaseConnection,
    interval: StdDuration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("cleanup job started");
        loop {
            if *shutdown.borrow() {
                info!("cleanup job shutting down");
                return;
            }

            match cleanup_tick(&db).await {
                Ok(stats) if stats.endpoints_deleted > 0 || stats.requests_deleted > 0 => {
                    info!(
                        endpoints = stats.endpoints_deleted,
                        requests = stats.requests_deleted,
                        "cleanup pass removed expired data"
                    );
                }
                Ok(_) => {}
                Err(error) => warn!(%error, "cleanup pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    })
}

pub fn spawn_period_reset(
    db: DatabaseConnection,
    free_request_limit: i64,
    pro_request_limit: i64,
    billing_period_ms: i64,
    interval: StdDuration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("period reset job started");
        loop {
            if *shutdown.borrow() {
                info!("period reset job shutting down");
                return;
            }

            match period_reset_tick(&db, free_request_limit, pro_request_limit, billing_period_ms)
                .await
            {
                Ok(reset) if reset > 0 => info!(owners = reset, "period reset pass complete"),
                Ok(_) => {}
                Err(error) => warn!(%error, "period reset pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    })
}
