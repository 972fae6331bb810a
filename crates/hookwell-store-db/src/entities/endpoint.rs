//! Endpoint entity: a capture endpoint addressed by its slug

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "endpoints")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// URL-safe unique identifier (`^[A-Za-z0-9_-]{1,50}$`)
    #[sea_orm(unique)]
    pub slug: String,

    /// Owning user; null for anonymous ephemeral endpoints
    pub owner_id: Option<Uuid>,

    pub name: Option<String>,

    /// JSON-encoded `MockResponse` configured by the owner
    #[sea_orm(column_type = "Text", nullable)]
    pub mock_response: Option<String>,

    pub is_ephemeral: bool,

    /// Endpoints are live strictly before this instant; null = never expires
    pub expires_at: Option<ChronoDateTimeUtc>,

    /// Denormalized capture counter, advisory only
    pub request_count: i64,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::owner::Entity",
        from = "Column::OwnerId",
        to = "super::owner::Column::Id"
    )]
    Owner,

    #[sea_orm(has_many = "super::captured_request::Entity")]
    CapturedRequests,
}

impl Related<super::owner::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl Related<super::captured_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CapturedRequests.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
