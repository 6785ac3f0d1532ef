//! Narrow storage interface consumed by the orchestrators.
//!
//! The engine never needs more than single-row reads and writes, so the
//! trait mirrors that: fetch one, fetch all, insert, update one column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::db::entities::{discovery, polling_metric, prelude::*, provision};
use crate::db::enums::DiscoveryStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProvision {
    pub ip: String,
    pub port: i32,
    pub credential_ids: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMetric {
    pub provision_id: i32,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn find_credential(&self, id: i32) -> Result<Option<CredentialModel>, DbErr>;

    async fn find_discovery(&self, id: i32) -> Result<Option<DiscoveryModel>, DbErr>;

    /// Returns the number of rows touched.
    async fn update_discovery_status(
        &self,
        id: i32,
        status: DiscoveryStatus,
    ) -> Result<u64, DbErr>;

    async fn list_provisions(&self) -> Result<Vec<ProvisionModel>, DbErr>;

    async fn find_provision_by_ip(&self, ip: &str) -> Result<Option<ProvisionModel>, DbErr>;

    async fn insert_provision(&self, new: NewProvision) -> Result<ProvisionModel, DbErr>;

    async fn insert_metric(&self, metric: NewMetric) -> Result<(), DbErr>;
}

/// `EngineStore` backed by a sea-orm connection pool.
#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EngineStore for SeaOrmStore {
    async fn find_credential(&self, id: i32) -> Result<Option<CredentialModel>, DbErr> {
        Credential::find_by_id(id).one(&self.db).await
    }

    async fn find_discovery(&self, id: i32) -> Result<Option<DiscoveryModel>, DbErr> {
        Discovery::find_by_id(id).one(&self.db).await
    }

    async fn update_discovery_status(
        &self,
        id: i32,
        status: DiscoveryStatus,
    ) -> Result<u64, DbErr> {
        let result = Discovery::update_many()
            .col_expr(discovery::Column::Status, Expr::value(status.as_str()))
            .filter(discovery::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn list_provisions(&self) -> Result<Vec<ProvisionModel>, DbErr> {
        Provision::find()
            .order_by_asc(provision::Column::Id)
            .all(&self.db)
            .await
    }

    async fn find_provision_by_ip(&self, ip: &str) -> Result<Option<ProvisionModel>, DbErr> {
        Provision::find()
            .filter(provision::Column::Ip.eq(ip))
            .one(&self.db)
            .await
    }

    async fn insert_provision(&self, new: NewProvision) -> Result<ProvisionModel, DbErr> {
        provision::ActiveModel {
            ip: Set(new.ip),
            port: Set(new.port),
            credential_ids: Set(new.credential_ids),
            ..Default::default()
        }
        .insert(&self.db)
        .await
    }

    async fn insert_metric(&self, metric: NewMetric) -> Result<(), DbErr> {
        let row = polling_metric::ActiveModel {
            provision_id: Set(metric.provision_id),
            data: Set(metric.data),
            timestamp: Set(metric.timestamp),
            ..Default::default()
        };
        PollingMetric::insert(row).exec(&self.db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::credential;
    use crate::db::schema::ensure_tables;
    use sea_orm::{ConnectOptions, Database, PaginatorTrait};
    use serde_json::json;

    async fn memory_db() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1);
        let db = Database::connect(opt).await.unwrap();
        ensure_tables(&db).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_credential_and_discovery_round_trip() {
        let db = memory_db().await;
        credential::ActiveModel {
            name: Set(Some("lab-ssh".to_string())),
            credential_type: Set(Some("ssh".to_string())),
            attributes: Set(r#"{"username":"admin"}"#.to_string()),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();
        let target = discovery::ActiveModel {
            name: Set("edge-router".to_string()),
            ip: Set("10.0.0.5".to_string()),
            port: Set(22),
            credential_ids: Set("[1]".to_string()),
            status: Set(DiscoveryStatus::Pending.to_string()),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let store = SeaOrmStore::new(db);
        let cred = store.find_credential(1).await.unwrap().unwrap();
        assert_eq!(cred.name.as_deref(), Some("lab-ssh"));
        assert!(store.find_credential(99).await.unwrap().is_none());

        let touched = store
            .update_discovery_status(target.id, DiscoveryStatus::Up)
            .await
            .unwrap();
        assert_eq!(touched, 1);
        let reloaded = store.find_discovery(target.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, "up");

        let missing = store
            .update_discovery_status(404, DiscoveryStatus::Down)
            .await
            .unwrap();
        assert_eq!(missing, 0);
    }

    #[tokio::test]
    async fn test_provisions_and_metrics() {
        let db = memory_db().await;
        let store = SeaOrmStore::new(db.clone());

        let device = store
            .insert_provision(NewProvision {
                ip: "10.0.0.7".to_string(),
                port: 22,
                credential_ids: "[1,2]".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(store.list_provisions().await.unwrap().len(), 1);
        assert_eq!(
            store.find_provision_by_ip("10.0.0.7").await.unwrap(),
            Some(device.clone())
        );
        assert!(store.find_provision_by_ip("10.0.0.8").await.unwrap().is_none());

        store
            .insert_metric(NewMetric {
                provision_id: device.id,
                data: json!({"cpu": 42}),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        let stored = PollingMetric::find().count(&db).await.unwrap();
        assert_eq!(stored, 1);
    }
}
