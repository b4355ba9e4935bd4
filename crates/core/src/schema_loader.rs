//! Walks a connection's introspection surface into a full schema tree.
//!
//! Individual introspection failures become warnings; only failing to list
//! databases aborts the load.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::adapter::{BackendError, BatchIntrospector, Connection};
use crate::schema::{DatabaseSchema, SchemaNode};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaLoad {
    pub databases: Vec<DatabaseSchema>,
    pub warnings: Vec<String>,
}

pub async fn load_schema(connection: &dyn Connection) -> Result<SchemaLoad, BackendError> {
    let mut databases = connection.databases().await?;
    let mut warnings = Vec::new();

    for database in &mut databases {
        for schema in &mut database.schemas {
            if let Some(batch) = connection.batch() {
                load_batched(batch, &database.name, schema, &mut warnings).await;
            } else {
                load_per_table(connection, &database.name, schema, &mut warnings).await;
            }
        }
    }

    debug!(
        adapter = connection.adapter_name(),
        databases = databases.len(),
        warnings = warnings.len(),
        "schema load finished"
    );
    Ok(SchemaLoad {
        databases,
        warnings,
    })
}

async fn load_batched(
    batch: &dyn BatchIntrospector,
    database: &str,
    schema: &mut SchemaNode,
    warnings: &mut Vec<String>,
) {
    match batch.all_columns(database, &schema.name).await {
        Ok(mut by_table) => {
            for table in &mut schema.tables {
                table.columns = take_for(&mut by_table, &table.name);
            }
        }
        Err(error) => push_schema_warning(warnings, database, &schema.name, "columns", &error),
    }

    match batch.all_indexes(database, &schema.name).await {
        Ok(mut by_table) => {
            for table in &mut schema.tables {
                table.indexes = take_for(&mut by_table, &table.name);
            }
        }
        Err(error) => push_schema_warning(warnings, database, &schema.name, "indexes", &error),
    }

    match batch.all_foreign_keys(database, &schema.name).await {
        Ok(mut by_table) => {
            for table in &mut schema.tables {
                table.foreign_keys = take_for(&mut by_table, &table.name);
            }
        }
        Err(error) => {
            push_schema_warning(warnings, database, &schema.name, "foreign keys", &error);
        }
    }
}

async fn load_per_table(
    connection: &dyn Connection,
    database: &str,
    schema: &mut SchemaNode,
    warnings: &mut Vec<String>,
) {
    let schema_name = schema.name.as_str();
    for table in &mut schema.tables {
        match connection.columns(database, schema_name, &table.name).await {
            Ok(columns) => table.columns = columns,
            Err(error) => {
                push_table_warning(warnings, database, schema_name, &table.name, "columns", &error);
            }
        }

        match connection.indexes(database, schema_name, &table.name).await {
            Ok(indexes) => table.indexes = indexes,
            Err(error) => {
                push_table_warning(warnings, database, schema_name, &table.name, "indexes", &error);
            }
        }

        match connection
            .foreign_keys(database, schema_name, &table.name)
            .await
        {
            Ok(foreign_keys) => table.foreign_keys = foreign_keys,
            Err(error) => push_table_warning(
                warnings,
                database,
                schema_name,
                &table.name,
                "foreign keys",
                &error,
            ),
        }
    }
}

fn take_for<T>(by_table: &mut HashMap<String, Vec<T>>, table: &str) -> Vec<T> {
    by_table.remove(table).unwrap_or_default()
}

fn push_schema_warning(
    warnings: &mut Vec<String>,
    database: &str,
    schema: &str,
    facet: &str,
    error: &BackendError,
) {
    let message = format!("{database}.{schema}: failed to load {facet}: {error}");
    warn!(%message, "schema introspection degraded");
    warnings.push(message);
}

fn push_table_warning(
    warnings: &mut Vec<String>,
    database: &str,
    schema: &str,
    table: &str,
    facet: &str,
    error: &BackendError,
) {
    let message = format!("{database}.{schema}.{table}: failed to load {facet}: {error}");
    warn!(%message, "table introspection degraded");
    warnings.push(message);
}

#[cfg(test)]
mod tests {
    use super::load_schema;
    use crate::test_support::{Facet, FakeConnection};

    #[tokio::test]
    async fn per_table_path_populates_every_table() {
        let connection = FakeConnection::new();

        let loaded = load_schema(&connection).await.expect("load should succeed");

        assert!(loaded.warnings.is_empty());
        let schema = &loaded.databases[0].schemas[0];
        assert_eq!(schema.tables.len(), 3);
        for table in &schema.tables {
            assert_eq!(table.columns.len(), 2, "{} columns", table.name);
            assert_eq!(table.indexes.len(), 1, "{} indexes", table.name);
        }
        assert_eq!(schema.table("orders").map(|t| t.foreign_keys.len()), Some(1));
        assert!(connection.call_log().is_empty(), "batch path must not run");
    }

    #[tokio::test]
    async fn one_failing_table_yields_one_warning_and_keeps_the_rest() {
        let connection = FakeConnection {
            fail_tables: vec![("orders".to_string(), Facet::Columns)],
            ..FakeConnection::new()
        };

        let loaded = load_schema(&connection).await.expect("load should succeed");

        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("app.public.orders"));
        assert!(loaded.warnings[0].contains("columns"));

        let schema = &loaded.databases[0].schemas[0];
        let orders = schema.table("orders").expect("orders stays in the tree");
        assert!(orders.columns.is_empty());
        assert_eq!(orders.indexes.len(), 1, "later facets still load");
        assert_eq!(schema.table("users").map(|t| t.columns.len()), Some(2));
        assert_eq!(schema.table("sessions").map(|t| t.columns.len()), Some(2));
    }

    #[tokio::test]
    async fn batch_path_uses_three_calls_per_schema() {
        let connection = FakeConnection {
            batch_enabled: true,
            ..FakeConnection::new()
        };

        let loaded = load_schema(&connection).await.expect("load should succeed");

        assert_eq!(
            connection.call_log(),
            vec![
                "all_columns:public".to_string(),
                "all_indexes:public".to_string(),
                "all_foreign_keys:public".to_string(),
            ]
        );
        let schema = &loaded.databases[0].schemas[0];
        assert_eq!(schema.table("users").map(|t| t.columns.len()), Some(2));
        assert_eq!(schema.table("sessions").map(|t| t.foreign_keys.len()), Some(1));
    }

    #[tokio::test]
    async fn batch_index_failure_keeps_columns_and_foreign_keys() {
        let connection = FakeConnection {
            batch_enabled: true,
            fail_batch: vec![Facet::Indexes],
            ..FakeConnection::new()
        };

        let loaded = load_schema(&connection).await.expect("load should succeed");

        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("indexes"));
        let schema = &loaded.databases[0].schemas[0];
        for table in &schema.tables {
            assert_eq!(table.columns.len(), 2, "{} columns", table.name);
            assert!(table.indexes.is_empty(), "{} indexes", table.name);
        }
        assert_eq!(schema.table("orders").map(|t| t.foreign_keys.len()), Some(1));
        assert_eq!(schema.table("users").map(|t| t.foreign_keys.len()), Some(0));
    }

    #[tokio::test]
    async fn failing_to_list_databases_is_a_hard_error() {
        let connection = FakeConnection {
            fail_databases: true,
            ..FakeConnection::new()
        };

        let error = load_schema(&connection)
            .await
            .expect_err("listing databases is required");
        assert!(error.message().contains("listing databases"));
    }
}
