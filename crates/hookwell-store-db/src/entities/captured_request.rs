//! CapturedRequest entity: one persisted webhook delivery

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "captured_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub endpoint_id: String,
    pub method: String,
    pub path: String,

    /// JSON-encoded headers: map of name -> value
    #[sea_orm(column_type = "Text")]
    pub headers: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub body: Option<String>,

    /// JSON-encoded query parameters: map of name -> value
    #[sea_orm(column_type = "Text")]
    pub query_params: String,

    /// Content-Type header value, extracted case-insensitively
    pub content_type: Option<String>,

    pub ip: String,

    /// Byte length of the body
    pub size: i64,

    /// Assigned by the receiver for batched captures, by the store for the
    /// single-capture path
    pub received_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::endpoint::Entity",
        from = "Column::EndpointId",
        to = "super::endpoint::Column::Id"
    )]
    Endpoint,
}

impl Related<super::endpoint::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Endpoint.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
