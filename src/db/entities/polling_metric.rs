use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "polling")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub provision_id: i32,
    #[sea_orm(column_type = "JsonBinary")]
    pub data: Json,
    pub timestamp: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::provision::Entity",
        from = "Column::ProvisionId",
        to = "super::provision::Column::Id",
        on_delete = "Cascade"
    )]
    Provision,
}

impl Related<super::provision::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Provision.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
