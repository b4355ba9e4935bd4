use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Column, Conn, Opts, Pool, Row, Value};
use sqlnav_core::adapter::{
    Adapter, BackendError, BatchIntrospector, ColumnMeta, Connection, QueryResult, QueryRow,
};
use sqlnav_core::row_iterator::{Page, PageSource, PagedIterator, RowIterator};
use sqlnav_core::schema::{
    ColumnSchema, DatabaseSchema, ForeignKeySchema, IndexSchema, SchemaNode, TableSchema,
};
use tracing::{debug, warn};

use crate::paged_sql;

pub const ADAPTER_NAME: &str = "mysql";

const SYSTEM_DATABASES: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlAdapter;

#[async_trait]
impl Adapter for MysqlAdapter {
    fn name(&self) -> &'static str {
        ADAPTER_NAME
    }

    async fn connect(&self, dsn: &str) -> Result<Arc<dyn Connection>, BackendError> {
        let opts = Opts::from_url(dsn).map_err(|error| BackendError::new(error.to_string()))?;
        let database = opts.db_name().unwrap_or_default().to_string();
        let pool = Pool::new(opts);

        // Surface authentication and network errors here rather than on the
        // first query.
        let conn = pool.get_conn().await.map_err(to_backend_error)?;
        drop(conn);

        Ok(Arc::new(MysqlConnection {
            pool,
            database,
            running: Arc::new(RunningStatement::default()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Tracks the server thread of the statement in flight so it can be
/// targeted by `KILL QUERY`. A statement whose future is dropped keeps its
/// entry until the next cancel consumes it.
#[derive(Debug, Default)]
struct RunningStatement {
    thread_id: Mutex<Option<u32>>,
}

impl RunningStatement {
    fn start(&self, thread_id: u32) {
        *self.thread_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread_id);
    }

    fn finish(&self, thread_id: u32) {
        let mut current = self.thread_id.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == Some(thread_id) {
            *current = None;
        }
    }

    fn take(&self) -> Option<u32> {
        self.thread_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[derive(Debug)]
pub struct MysqlConnection {
    pool: Pool,
    database: String,
    running: Arc<RunningStatement>,
    closed: AtomicBool,
}

impl MysqlConnection {
    async fn conn(&self) -> Result<Conn, BackendError> {
        self.pool.get_conn().await.map_err(to_backend_error)
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    fn adapter_name(&self) -> &str {
        ADAPTER_NAME
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.conn().await?;
        conn.ping().await.map_err(to_backend_error)
    }

    async fn close(&self) -> Result<(), BackendError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(to_backend_error)
    }

    async fn cancel(&self) -> Result<(), BackendError> {
        let Some(thread_id) = self.running.take() else {
            return Ok(());
        };
        debug!(thread_id, "killing running statement");
        let mut conn = self.conn().await?;
        conn.query_drop(format!("KILL QUERY {thread_id}"))
            .await
            .map_err(to_backend_error)
    }

    async fn databases(&self) -> Result<Vec<DatabaseSchema>, BackendError> {
        let mut conn = self.conn().await?;
        let names = conn
            .query_map("SHOW DATABASES", |database: String| database)
            .await
            .map_err(to_backend_error)?;
        let tables = conn
            .query_map(
                "SELECT TABLE_SCHEMA, TABLE_NAME \
                 FROM information_schema.TABLES \
                 ORDER BY TABLE_SCHEMA, TABLE_NAME",
                |(database, table): (String, String)| (database, table),
            )
            .await
            .map_err(to_backend_error)?;

        let mut by_database: HashMap<String, Vec<TableSchema>> = HashMap::new();
        for (database, table) in tables {
            by_database
                .entry(database)
                .or_default()
                .push(TableSchema::named(table));
        }

        Ok(names
            .into_iter()
            .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
            .map(|name| {
                let tables = by_database.remove(&name).unwrap_or_default();
                DatabaseSchema {
                    schemas: vec![SchemaNode {
                        name: name.clone(),
                        tables,
                    }],
                    name,
                }
            })
            .collect())
    }

    async fn columns(
        &self,
        database: &str,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnSchema>, BackendError> {
        let mut conn = self.conn().await?;
        conn.exec_map(
            "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
            (database.to_string(), table.to_string()),
            |(name, data_type, nullable, default_value): (
                String,
                String,
                String,
                Option<String>,
            )| column_schema(name, data_type, &nullable, default_value),
        )
        .await
        .map_err(to_backend_error)
    }

    async fn indexes(
        &self,
        database: &str,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<IndexSchema>, BackendError> {
        let mut conn = self.conn().await?;
        let rows = conn
            .exec_map(
                "SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE \
                 FROM information_schema.STATISTICS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
                 ORDER BY INDEX_NAME, SEQ_IN_INDEX",
                (database.to_string(), table.to_string()),
                |(index, column, non_unique): (String, String, i64)| (index, column, non_unique),
            )
            .await
            .map_err(to_backend_error)?;
        Ok(group_indexes(rows))
    }

    async fn foreign_keys(
        &self,
        database: &str,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKeySchema>, BackendError> {
        let mut conn = self.conn().await?;
        conn.exec_map(
            "SELECT CONSTRAINT_NAME, COLUMN_NAME, REFERENCED_TABLE_SCHEMA, \
             REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
             FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
               AND REFERENCED_TABLE_NAME IS NOT NULL \
             ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION",
            (database.to_string(), table.to_string()),
            |(constraint_name, column_name, referenced_schema, referenced_table, referenced_column): (
                String,
                String,
                String,
                String,
                String,
            )| ForeignKeySchema {
                constraint_name,
                column_name,
                referenced_schema,
                referenced_table,
                referenced_column,
            },
        )
        .await
        .map_err(to_backend_error)
    }

    async fn execute(&self, query: &str) -> Result<QueryResult, BackendError> {
        let conn = self.conn().await?;
        let (columns, rows, affected) = run_tracked(conn, query, Some(&*self.running)).await?;
        let row_count = if columns.is_empty() {
            i64::try_from(affected).unwrap_or(i64::MAX)
        } else {
            i64::try_from(rows.len()).unwrap_or(i64::MAX)
        };
        Ok(QueryResult {
            columns,
            rows,
            row_count,
        })
    }

    async fn execute_streaming(
        &self,
        query: &str,
        page_size: usize,
    ) -> Result<Box<dyn RowIterator>, BackendError> {
        let source = MysqlPageSource {
            pool: self.pool.clone(),
            query: query.to_string(),
            opening: OpeningStatement::new(&self.running),
        };
        let iterator = PagedIterator::open(source, page_size).await?;
        Ok(Box::new(iterator))
    }

    async fn completions(&self) -> Result<Vec<String>, BackendError> {
        let mut conn = self.conn().await?;
        conn.query_map(
            "SELECT TABLE_NAME FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() \
             UNION \
             SELECT COLUMN_NAME FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() \
             ORDER BY 1",
            |name: String| name,
        )
        .await
        .map_err(to_backend_error)
    }

    fn batch(&self) -> Option<&dyn BatchIntrospector> {
        Some(self)
    }
}

#[async_trait]
impl BatchIntrospector for MysqlConnection {
    async fn all_columns(
        &self,
        database: &str,
        _schema: &str,
    ) -> Result<HashMap<String, Vec<ColumnSchema>>, BackendError> {
        let mut conn = self.conn().await?;
        let rows = conn
            .exec_map(
                "SELECT TABLE_NAME, COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? \
                 ORDER BY TABLE_NAME, ORDINAL_POSITION",
                (database.to_string(),),
                |(table, name, data_type, nullable, default_value): (
                    String,
                    String,
                    String,
                    String,
                    Option<String>,
                )| (table, column_schema(name, data_type, &nullable, default_value)),
            )
            .await
            .map_err(to_backend_error)?;
        Ok(group_by_table(rows))
    }

    async fn all_indexes(
        &self,
        database: &str,
        _schema: &str,
    ) -> Result<HashMap<String, Vec<IndexSchema>>, BackendError> {
        let mut conn = self.conn().await?;
        let rows = conn
            .exec_map(
                "SELECT TABLE_NAME, INDEX_NAME, COLUMN_NAME, NON_UNIQUE \
                 FROM information_schema.STATISTICS \
                 WHERE TABLE_SCHEMA = ? \
                 ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX",
                (database.to_string(),),
                |(table, index, column, non_unique): (String, String, String, i64)| {
                    (table, (index, column, non_unique))
                },
            )
            .await
            .map_err(to_backend_error)?;

        Ok(group_by_table(rows)
            .into_iter()
            .map(|(table, entries)| (table, group_indexes(entries)))
            .collect())
    }

    async fn all_foreign_keys(
        &self,
        database: &str,
        _schema: &str,
    ) -> Result<HashMap<String, Vec<ForeignKeySchema>>, BackendError> {
        let mut conn = self.conn().await?;
        let rows = conn
            .exec_map(
                "SELECT TABLE_NAME, CONSTRAINT_NAME, COLUMN_NAME, REFERENCED_TABLE_SCHEMA, \
                 REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
                 FROM information_schema.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = ? AND REFERENCED_TABLE_NAME IS NOT NULL \
                 ORDER BY TABLE_NAME, CONSTRAINT_NAME, ORDINAL_POSITION",
                (database.to_string(),),
                |(
                    table,
                    constraint_name,
                    column_name,
                    referenced_schema,
                    referenced_table,
                    referenced_column,
                ): (String, String, String, String, String, String)| {
                    (
                        table,
                        ForeignKeySchema {
                            constraint_name,
                            column_name,
                            referenced_schema,
                            referenced_table,
                            referenced_column,
                        },
                    )
                },
            )
            .await
            .map_err(to_backend_error)?;
        Ok(group_by_table(rows))
    }
}

/// Hands the connection's statement tracker to the first page fetch only.
/// The fetch that opens a stream is part of the run and may be killed by
/// `cancel`; later fetches serve whichever tab is browsing and must never
/// displace the statement a run is waiting on.
#[derive(Debug)]
struct OpeningStatement {
    running: Option<Arc<RunningStatement>>,
}

impl OpeningStatement {
    fn new(running: &Arc<RunningStatement>) -> Self {
        Self {
            running: Some(Arc::clone(running)),
        }
    }

    fn tracker(&mut self) -> Option<Arc<RunningStatement>> {
        self.running.take()
    }
}

#[derive(Debug)]
struct MysqlPageSource {
    pool: Pool,
    query: String,
    opening: OpeningStatement,
}

#[async_trait]
impl PageSource for MysqlPageSource {
    async fn fetch_page(&mut self, offset: u64, limit: usize) -> Result<Page, BackendError> {
        let tracker = self.opening.tracker();
        let conn = self.pool.get_conn().await.map_err(to_backend_error)?;
        let sql = paged_sql(&self.query, offset, limit);
        let (columns, rows, _) = run_tracked(conn, &sql, tracker.as_deref()).await?;
        Ok(Page { columns, rows })
    }
}

/// Runs a text-protocol statement and materializes its first result set.
async fn run_tracked(
    mut conn: Conn,
    sql: &str,
    running: Option<&RunningStatement>,
) -> Result<(Vec<ColumnMeta>, Vec<QueryRow>, u64), BackendError> {
    let thread_id = conn.id();
    if let Some(running) = running {
        running.start(thread_id);
    }
    let outcome = run_text_query(&mut conn, sql).await;
    if let Some(running) = running {
        running.finish(thread_id);
    }
    outcome.map_err(to_backend_error)
}

async fn run_text_query(
    conn: &mut Conn,
    sql: &str,
) -> Result<(Vec<ColumnMeta>, Vec<QueryRow>, u64), mysql_async::Error> {
    let mut result = conn.query_iter(sql).await?;
    let columns = result
        .columns()
        .map(|columns| columns.iter().map(column_meta).collect())
        .unwrap_or_default();
    let rows: Vec<Row> = result.collect().await?;
    let affected = result.affected_rows();
    if let Err(error) = result.drop_result().await {
        warn!(%error, "failed to drain remaining result sets");
    }

    Ok((
        columns,
        rows.into_iter().map(row_to_query_row).collect(),
        affected,
    ))
}

fn column_meta(column: &Column) -> ColumnMeta {
    ColumnMeta::new(column.name_str(), type_name(&format!("{:?}", column.column_type())))
}

fn type_name(debug_name: &str) -> String {
    debug_name
        .strip_prefix("MYSQL_TYPE_")
        .unwrap_or(debug_name)
        .to_ascii_lowercase()
}

fn column_schema(
    name: String,
    data_type: String,
    nullable: &str,
    default_value: Option<String>,
) -> ColumnSchema {
    ColumnSchema {
        name,
        data_type,
        nullable: nullable.eq_ignore_ascii_case("YES"),
        default_value,
    }
}

/// Folds `(index, column, non_unique)` rows, ordered by index and column
/// position, into one entry per index.
fn group_indexes(rows: Vec<(String, String, i64)>) -> Vec<IndexSchema> {
    let mut indexes: Vec<IndexSchema> = Vec::new();
    for (name, column, non_unique) in rows {
        match indexes.last_mut() {
            Some(index) if index.name == name => index.columns.push(column),
            _ => indexes.push(IndexSchema {
                primary: name == "PRIMARY",
                unique: non_unique == 0,
                columns: vec![column],
                name,
            }),
        }
    }
    indexes
}

fn group_by_table<T>(rows: Vec<(String, T)>) -> HashMap<String, Vec<T>> {
    let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
    for (table, item) in rows {
        grouped.entry(table).or_default().push(item);
    }
    grouped
}

fn row_to_query_row(row: Row) -> QueryRow {
    let values = row
        .unwrap()
        .into_iter()
        .map(mysql_value_to_string)
        .collect::<Vec<_>>();
    QueryRow::new(values)
}

fn mysql_value_to_string(value: Value) -> String {
    match value {
        Value::NULL => "NULL".to_string(),
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        ),
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            format!("{sign}{days:03} {hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        }
    }
}

fn to_backend_error(error: mysql_async::Error) -> BackendError {
    BackendError::new(error.to_string())
}
