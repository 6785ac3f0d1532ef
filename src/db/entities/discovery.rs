use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discoveries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub ip: String,
    pub port: i32,
    /// Serialized JSON list of credential ids, e.g. `[1,2]`.
    #[sea_orm(column_type = "Text")]
    pub credential_ids: String,
    pub status: String, // "pending", "up" or "down"
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
