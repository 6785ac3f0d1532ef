//! Creates the engine's tables when they are missing.

use sea_orm::sea_query::TableCreateStatement;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Schema};
use tracing::info;

use crate::db::entities::prelude::*;

pub async fn ensure_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    // provisions must exist before polling references it.
    let mut statements: Vec<TableCreateStatement> = vec![
        schema.create_table_from_entity(Credential),
        schema.create_table_from_entity(Discovery),
        schema.create_table_from_entity(Provision),
        schema.create_table_from_entity(PollingMetric),
    ];

    for statement in statements.iter_mut() {
        statement.if_not_exists();
        db.execute(backend.build(&*statement)).await?;
    }

    info!(tables = statements.len(), "Database schema verified.");
    Ok(())
}
