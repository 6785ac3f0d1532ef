use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "provisions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub ip: String,
    pub port: i32,
    #[sea_orm(column_type = "Text")]
    pub credential_ids: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::polling_metric::Entity")]
    PollingMetric,
}

impl Related<super::polling_metric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PollingMetric.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
