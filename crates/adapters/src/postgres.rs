use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sqlnav_core::adapter::{Adapter, BackendError, ColumnMeta, Connection, QueryResult, QueryRow};
use sqlnav_core::row_iterator::{Page, PageSource, PagedIterator, RowIterator};
use sqlnav_core::schema::{
    ColumnSchema, DatabaseSchema, ForeignKeySchema, IndexSchema, SchemaNode, TableSchema,
};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::paged_sql;

pub const ADAPTER_NAME: &str = "postgres";

const USER_SCHEMAS: &str = "nspname NOT IN ('pg_catalog', 'information_schema') \
                            AND nspname NOT LIKE 'pg_toast%' \
                            AND nspname NOT LIKE 'pg_temp%'";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAdapter;

#[async_trait]
impl Adapter for PostgresAdapter {
    fn name(&self) -> &'static str {
        ADAPTER_NAME
    }

    async fn connect(&self, dsn: &str) -> Result<Arc<dyn Connection>, BackendError> {
        let config: Config = dsn.parse().map_err(to_backend_error)?;
        let database = config
            .get_dbname()
            .or_else(|| config.get_user())
            .unwrap_or_default()
            .to_string();
        let (client, connection) = config.connect(NoTls).await.map_err(to_backend_error)?;

        let driver = tokio::spawn(async move {
            if let Err(error) = connection.await {
                warn!(%error, "postgres connection terminated");
            }
        });

        Ok(Arc::new(PostgresConnection {
            client: Arc::new(client),
            database,
            driver: Mutex::new(Some(driver)),
        }))
    }
}

pub struct PostgresConnection {
    client: Arc<Client>,
    database: String,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Connection for PostgresConnection {
    fn adapter_name(&self) -> &str {
        ADAPTER_NAME
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(to_backend_error)
    }

    async fn close(&self) -> Result<(), BackendError> {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.abort();
            debug!(database = %self.database, "postgres connection closed");
        }
        Ok(())
    }

    async fn cancel(&self) -> Result<(), BackendError> {
        self.client
            .cancel_token()
            .cancel_query(NoTls)
            .await
            .map_err(to_backend_error)
    }

    async fn databases(&self) -> Result<Vec<DatabaseSchema>, BackendError> {
        let name: String = self
            .client
            .query_one("SELECT current_database()::text", &[])
            .await
            .map_err(to_backend_error)?
            .get(0);

        let schemas = self
            .client
            .query(
                &format!(
                    "SELECT nspname::text FROM pg_catalog.pg_namespace \
                     WHERE {USER_SCHEMAS} ORDER BY nspname"
                ),
                &[],
            )
            .await
            .map_err(to_backend_error)?;
        let tables = self
            .client
            .query(
                "SELECT table_schema::text, table_name::text \
                 FROM information_schema.tables \
                 WHERE table_type IN ('BASE TABLE', 'VIEW') \
                 ORDER BY table_schema, table_name",
                &[],
            )
            .await
            .map_err(to_backend_error)?;

        let mut by_schema: HashMap<String, Vec<TableSchema>> = HashMap::new();
        for row in tables {
            by_schema
                .entry(row.get(0))
                .or_default()
                .push(TableSchema::named(row.get::<_, String>(1)));
        }

        let schemas = schemas
            .into_iter()
            .map(|row| {
                let schema: String = row.get(0);
                SchemaNode {
                    tables: by_schema.remove(&schema).unwrap_or_default(),
                    name: schema,
                }
            })
            .collect();

        Ok(vec![DatabaseSchema { name, schemas }])
    }

    async fn columns(
        &self,
        _database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnSchema>, BackendError> {
        let rows = self
            .client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable::text, \
                 column_default::text \
                 FROM information_schema.columns \
                 WHERE table_schema::text = $1 AND table_name::text = $2 \
                 ORDER BY ordinal_position",
                &[&schema, &table],
            )
            .await
            .map_err(to_backend_error)?;

        Ok(rows
            .into_iter()
            .map(|row| ColumnSchema {
                name: row.get(0),
                data_type: row.get(1),
                nullable: row.get::<_, String>(2).eq_ignore_ascii_case("YES"),
                default_value: row.get(3),
            })
            .collect())
    }

    async fn indexes(
        &self,
        _database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<IndexSchema>, BackendError> {
        let rows = self
            .client
            .query(
                "SELECT i.relname::text, a.attname::text, ix.indisunique, ix.indisprimary \
                 FROM pg_catalog.pg_class t \
                 JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace \
                 JOIN pg_catalog.pg_index ix ON ix.indrelid = t.oid \
                 JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid \
                 JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON true \
                 JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
                 WHERE n.nspname::text = $1 AND t.relname::text = $2 \
                 ORDER BY i.relname, k.ord",
                &[&schema, &table],
            )
            .await
            .map_err(to_backend_error)?;

        let mut indexes: Vec<IndexSchema> = Vec::new();
        for row in rows {
            let name: String = row.get(0);
            let column: String = row.get(1);
            match indexes.last_mut() {
                Some(index) if index.name == name => index.columns.push(column),
                _ => indexes.push(IndexSchema {
                    name,
                    columns: vec![column],
                    unique: row.get(2),
                    primary: row.get(3),
                }),
            }
        }
        Ok(indexes)
    }

    async fn foreign_keys(
        &self,
        _database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKeySchema>, BackendError> {
        let rows = self
            .client
            .query(
                "SELECT tc.constraint_name::text, kcu.column_name::text, \
                 ccu.table_schema::text, ccu.table_name::text, ccu.column_name::text \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON kcu.constraint_name = tc.constraint_name \
                  AND kcu.table_schema = tc.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name \
                  AND ccu.constraint_schema = tc.table_schema \
                 WHERE tc.constraint_type = 'FOREIGN KEY' \
                   AND tc.table_schema::text = $1 AND tc.table_name::text = $2 \
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &[&schema, &table],
            )
            .await
            .map_err(to_backend_error)?;

        Ok(rows
            .into_iter()
            .map(|row| ForeignKeySchema {
                constraint_name: row.get(0),
                column_name: row.get(1),
                referenced_schema: row.get(2),
                referenced_table: row.get(3),
                referenced_column: row.get(4),
            })
            .collect())
    }

    async fn execute(&self, query: &str) -> Result<QueryResult, BackendError> {
        let messages = self
            .client
            .simple_query(query)
            .await
            .map_err(to_backend_error)?;
        Ok(collect_messages(messages))
    }

    async fn execute_streaming(
        &self,
        query: &str,
        page_size: usize,
    ) -> Result<Box<dyn RowIterator>, BackendError> {
        let source = PostgresPageSource {
            client: Arc::clone(&self.client),
            query: query.to_string(),
        };
        let iterator = PagedIterator::open(source, page_size).await?;
        Ok(Box::new(iterator))
    }

    async fn completions(&self) -> Result<Vec<String>, BackendError> {
        let rows = self
            .client
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                 UNION \
                 SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                 ORDER BY 1",
                &[],
            )
            .await
            .map_err(to_backend_error)?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}

struct PostgresPageSource {
    client: Arc<Client>,
    query: String,
}

#[async_trait]
impl PageSource for PostgresPageSource {
    async fn fetch_page(&mut self, offset: u64, limit: usize) -> Result<Page, BackendError> {
        let messages = self
            .client
            .simple_query(&paged_sql(&self.query, offset, limit))
            .await
            .map_err(to_backend_error)?;
        let result = collect_messages(messages);
        Ok(Page {
            columns: result.columns,
            rows: result.rows,
        })
    }
}

/// Keeps the last row-producing result set of a simple-protocol exchange.
/// Every value arrives as text.
fn collect_messages(messages: Vec<SimpleQueryMessage>) -> QueryResult {
    let mut columns: Vec<ColumnMeta> = Vec::new();
    let mut rows = Vec::new();
    let mut affected = 0_u64;

    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(described) => {
                columns = described
                    .iter()
                    .map(|column| ColumnMeta::new(column.name(), "text"))
                    .collect();
                rows.clear();
            }
            SimpleQueryMessage::Row(row) => {
                if columns.is_empty() {
                    columns = row
                        .columns()
                        .iter()
                        .map(|column| ColumnMeta::new(column.name(), "text"))
                        .collect();
                }
                let values = (0..row.len())
                    .map(|index| row.get(index).unwrap_or("NULL").to_string())
                    .collect();
                rows.push(QueryRow::new(values));
            }
            SimpleQueryMessage::CommandComplete(count) => affected = count,
            _ => {}
        }
    }

    let row_count = if columns.is_empty() {
        i64::try_from(affected).unwrap_or(i64::MAX)
    } else {
        i64::try_from(rows.len()).unwrap_or(i64::MAX)
    };
    QueryResult {
        columns,
        rows,
        row_count,
    }
}

fn to_backend_error(error: tokio_postgres::Error) -> BackendError {
    match error.as_db_error() {
        Some(db_error) => BackendError::new(format!(
            "{}: {}",
            db_error.severity(),
            db_error.message()
        )),
        None => BackendError::new(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::collect_messages;

    #[test]
    fn empty_exchange_yields_an_empty_result() {
        let result = collect_messages(Vec::new());
        assert!(result.columns.is_empty());
        assert!(result.rows.is_empty());
        assert_eq!(result.row_count, 0);
    }
}
