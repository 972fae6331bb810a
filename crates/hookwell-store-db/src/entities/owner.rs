//! Owner entity: the user whose quota governs capture admission

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Billing plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum Plan {
    #[sea_orm(string_value = "free")]
    Free,

    #[sea_orm(string_value = "pro")]
    Pro,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "owners")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub email: String,

    pub plan: Plan,

    /// Requests allowed per billing period
    pub request_limit: i64,

    /// Requests consumed in the current period; advanced by the usage
    /// ledger, zeroed at period reset
    pub requests_used: i64,

    pub period_start: Option<ChronoDateTimeUtc>,
    pub period_end: Option<ChronoDateTimeUtc>,

    /// Pro owners flagged for downgrade at the end of the current period
    pub cancel_at_period_end: bool,

    pub subscription_status: Option<String>,

    /// External billing system's customer id
    #[sea_orm(unique)]
    pub billing_customer_id: Option<String>,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::endpoint::Entity")]
    Endpoints,
}

impl Related<super::endpoint::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Endpoints.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
