//! Per-owner usage accounting.
//!
//! Capture commits never touch the owner row directly. Instead, each
//! insert schedules an increment onto the owner's single-consumer queue;
//! one worker task per owner applies them serially, so concurrent bursts
//! across many endpoints of the same owner cannot conflict, and counter
//! writes never block request ingest.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter,
};
use sea_orm::sea_query::Expr;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use hookwell_store_db::entities::owner::{self, Plan};

/// Schedules and applies `requests_used` increments, one worker per owner.
pub struct UsageLedger {
    db: DatabaseConnection,
    billing_period_ms: i64,
    workers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<i64>>>,
}

impl UsageLedger {
    pub fn new(db: DatabaseConnection, billing_period_ms: i64) -> Self {
        Self {
            db,
            billing_period_ms,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an increment for the owner. Runs after the capture transaction
    /// has committed; the caller never waits for the counter write.
    pub fn schedule(&self, owner_id: Uuid, count: u64) {
        if count == 0 {
            return;
        }
        let count = count as i64;

        let mut workers = match self.workers.lock() {
            Ok(workers) => workers,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(tx) = workers.get(&owner_id) {
            if tx.send(count).is_ok() {
                return;
            }
            // Worker exited; fall through and respawn it.
        }

        let tx = self.spawn_worker(owner_id);
        let _ = tx.send(count);
        workers.insert(owner_id, tx);
    }

    fn spawn_worker(&self, owner_id: Uuid) -> mpsc::UnboundedSender<i64> {
        let (tx, mut rx) = mpsc::unbounded_channel::<i64>();
        let db = self.db.clone();
        let billing_period_ms = self.billing_period_ms;

        tokio::spawn(async move {
            while let Some(count) = rx.recv().await {
                if let Err(error) = apply_increment(&db, owner_id, count, billing_period_ms).await {
                    warn!(%owner_id, count, %error, "usage increment failed");
                }
            }
            debug!(%owner_id, "usage worker stopped");
        });

        tx
    }
}

/// Apply one increment: `requests_used += count`, as a single SQL
/// read-modify-write. Free owners whose period has lapsed are lazily
/// re-activated: the period rolls to `[now, now + billing_period)` and the
/// counter restarts at `count`.
async fn apply_increment(
    db: &DatabaseConnection,
    owner_id: Uuid,
    count: i64,
    billing_period_ms: i64,
) -> Result<(), DbErr> {
    let Some(record) = owner::Entity::find_by_id(owner_id).one(db).await? else {
        warn!(%owner_id, "usage increment for unknown owner");
        return Ok(());
    };

    let now = Utc::now();
    let lapsed = record.period_end.is_some_and(|period_end| period_end <= now);

    if record.plan == Plan::Free && lapsed {
        let mut active: owner::ActiveModel = record.into();
        active.period_start = Set(Some(now));
        active.period_end = Set(Some(now + Duration::milliseconds(billing_period_ms)));
        active.requests_used = Set(count);
        active.update(db).await?;
        return Ok(());
    }

    owner::Entity::update_many()
        .col_expr(
            owner::Column::RequestsUsed,
            Expr::col(owner::Column::RequestsUsed).add(count),
        )
        .filter(owner::Column::Id.eq(owner_id))
        .exec(db)
        .await?;

    Ok(())
}
