use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::adapter::{
    Adapter, BackendError, BatchIntrospector, ColumnMeta, Connection, QueryResult, QueryRow,
};
use crate::history::{HistoryEntry, HistoryError, HistorySink};
use crate::row_iterator::{IteratorError, RowIterator, UNKNOWN_TOTAL};
use crate::schema::{
    ColumnSchema, DatabaseSchema, ForeignKeySchema, IndexSchema, SchemaNode, TableSchema,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    Columns,
    Indexes,
    ForeignKeys,
}

pub fn rows(values: &[&str]) -> Vec<QueryRow> {
    values
        .iter()
        .map(|value| QueryRow::new(vec![(*value).to_string()]))
        .collect()
}

#[derive(Debug)]
pub struct FakeIterator {
    pages: Vec<Vec<QueryRow>>,
    position: Option<usize>,
    block_fetches: bool,
    fail_fetches: bool,
    fetch_calls: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
}

impl FakeIterator {
    pub fn with_pages(pages: Vec<Vec<&str>>) -> Self {
        Self {
            pages: pages.iter().map(|page| rows(page)).collect(),
            position: None,
            block_fetches: false,
            fail_fetches: false,
            fetch_calls: Arc::new(AtomicUsize::new(0)),
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn blocking(mut self) -> Self {
        self.block_fetches = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_fetches = true;
        self
    }

    pub fn fetch_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.fetch_calls)
    }

    pub fn close_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }

    async fn guard(&self) -> Result<(), IteratorError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.block_fetches {
            std::future::pending::<()>().await;
        }
        if self.fail_fetches {
            return Err(IteratorError::Backend(BackendError::new("page fetch broke")));
        }
        Ok(())
    }
}

#[async_trait]
impl RowIterator for FakeIterator {
    async fn fetch_next(&mut self) -> Result<Vec<QueryRow>, IteratorError> {
        self.guard().await?;
        let next = self.position.map_or(0, |position| position + 1);
        let page = self.pages.get(next).cloned().ok_or(IteratorError::EndOfData)?;
        self.position = Some(next);
        Ok(page)
    }

    async fn fetch_prev(&mut self) -> Result<Vec<QueryRow>, IteratorError> {
        self.guard().await?;
        let previous = match self.position {
            None | Some(0) => return Err(IteratorError::EndOfData),
            Some(position) => position - 1,
        };
        self.position = Some(previous);
        Ok(self.pages[previous].clone())
    }

    fn columns(&self) -> &[ColumnMeta] {
        &[]
    }

    fn total_rows(&self) -> i64 {
        UNKNOWN_TOTAL
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scriptable connection. Counters and the call log are public so tests
/// can assert on what the orchestrator did.
#[derive(Debug, Default)]
pub struct FakeConnection {
    pub database: String,
    pub catalog: Vec<DatabaseSchema>,
    pub batch_enabled: bool,
    pub fail_databases: bool,
    pub fail_ping: bool,
    pub fail_batch: Vec<Facet>,
    pub fail_tables: Vec<(String, Facet)>,
    pub fail_streaming: bool,
    pub fail_execute: Option<String>,
    pub fail_page_fetches: bool,
    pub stream_pages: Vec<Vec<&'static str>>,
    pub execute_gate: Option<Arc<Notify>>,
    pub stream_gate: Option<Arc<Notify>>,
    pub schema_gate: Option<Arc<Notify>>,
    pub completions: Vec<String>,
    pub cancel_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub ping_calls: AtomicUsize,
    pub closed: AtomicBool,
    pub iterator_close_calls: Mutex<Vec<Arc<AtomicUsize>>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self {
            database: "app".to_string(),
            catalog: sample_catalog(),
            stream_pages: vec![vec!["1", "2"], vec!["3"]],
            ..Self::default()
        }
    }

    pub fn log(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.into());
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close counters of every iterator handed out so far.
    pub fn iterator_closes(&self) -> Vec<usize> {
        self.iterator_close_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|calls| calls.load(Ordering::SeqCst))
            .collect()
    }

    fn fails_table(&self, table: &str, facet: Facet) -> bool {
        self.fail_tables
            .iter()
            .any(|(name, failing)| name == table && *failing == facet)
    }

    fn find_table(&self, database: &str, schema: &str, table: &str) -> Option<&TableSchema> {
        self.catalog
            .iter()
            .find(|candidate| candidate.name == database)
            .and_then(|database| database.schema(schema))
            .and_then(|schema| schema.table(table))
    }

    fn schema_tables(&self, database: &str, schema: &str) -> Vec<TableSchema> {
        self.catalog
            .iter()
            .find(|candidate| candidate.name == database)
            .and_then(|database| database.schema(schema))
            .map(|schema| schema.tables.clone())
            .unwrap_or_default()
    }

    async fn wait(gate: Option<&Arc<Notify>>) {
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn adapter_name(&self) -> &str {
        "fake"
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ping {
            return Err(BackendError::new("ping refused"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.log("close");
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel(&self) -> Result<(), BackendError> {
        self.log("cancel");
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn databases(&self) -> Result<Vec<DatabaseSchema>, BackendError> {
        Self::wait(self.schema_gate.as_ref()).await;
        if self.fail_databases {
            return Err(BackendError::new("access denied listing databases"));
        }
        Ok(self
            .catalog
            .iter()
            .map(|database| DatabaseSchema {
                name: database.name.clone(),
                schemas: database
                    .schemas
                    .iter()
                    .map(|schema| SchemaNode {
                        name: schema.name.clone(),
                        tables: schema
                            .tables
                            .iter()
                            .map(|table| TableSchema::named(table.name.clone()))
                            .collect(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn columns(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnSchema>, BackendError> {
        if self.fails_table(table, Facet::Columns) {
            return Err(BackendError::new("columns unavailable"));
        }
        Ok(self
            .find_table(database, schema, table)
            .map(|table| table.columns.clone())
            .unwrap_or_default())
    }

    async fn indexes(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<IndexSchema>, BackendError> {
        if self.fails_table(table, Facet::Indexes) {
            return Err(BackendError::new("indexes unavailable"));
        }
        Ok(self
            .find_table(database, schema, table)
            .map(|table| table.indexes.clone())
            .unwrap_or_default())
    }

    async fn foreign_keys(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKeySchema>, BackendError> {
        if self.fails_table(table, Facet::ForeignKeys) {
            return Err(BackendError::new("foreign keys unavailable"));
        }
        Ok(self
            .find_table(database, schema, table)
            .map(|table| table.foreign_keys.clone())
            .unwrap_or_default())
    }

    async fn execute(&self, query: &str) -> Result<QueryResult, BackendError> {
        self.log(format!("execute:{query}"));
        Self::wait(self.execute_gate.as_ref()).await;
        if let Some(message) = &self.fail_execute {
            return Err(BackendError::new(message.clone()));
        }
        Ok(QueryResult {
            columns: vec![ColumnMeta::new("n", "int")],
            rows: rows(&["42"]),
            row_count: 1,
        })
    }

    async fn execute_streaming(
        &self,
        query: &str,
        _page_size: usize,
    ) -> Result<Box<dyn RowIterator>, BackendError> {
        self.log(format!("stream:{query}"));
        Self::wait(self.stream_gate.as_ref()).await;
        if self.fail_streaming {
            return Err(BackendError::new("cannot wrap statement"));
        }
        let mut iterator = FakeIterator::with_pages(self.stream_pages.clone());
        if self.fail_page_fetches {
            iterator = iterator.failing();
        }
        self.iterator_close_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(iterator.close_calls());
        Ok(Box::new(iterator))
    }

    async fn completions(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.completions.clone())
    }

    fn batch(&self) -> Option<&dyn BatchIntrospector> {
        if self.batch_enabled {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl BatchIntrospector for FakeConnection {
    async fn all_columns(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<HashMap<String, Vec<ColumnSchema>>, BackendError> {
        self.log(format!("all_columns:{schema}"));
        if self.fail_batch.contains(&Facet::Columns) {
            return Err(BackendError::new("batch columns failed"));
        }
        Ok(self
            .schema_tables(database, schema)
            .into_iter()
            .map(|table| (table.name, table.columns))
            .collect())
    }

    async fn all_indexes(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<HashMap<String, Vec<IndexSchema>>, BackendError> {
        self.log(format!("all_indexes:{schema}"));
        if self.fail_batch.contains(&Facet::Indexes) {
            return Err(BackendError::new("batch indexes failed"));
        }
        Ok(self
            .schema_tables(database, schema)
            .into_iter()
            .map(|table| (table.name, table.indexes))
            .collect())
    }

    async fn all_foreign_keys(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<HashMap<String, Vec<ForeignKeySchema>>, BackendError> {
        self.log(format!("all_foreign_keys:{schema}"));
        if self.fail_batch.contains(&Facet::ForeignKeys) {
            return Err(BackendError::new("batch foreign keys failed"));
        }
        Ok(self
            .schema_tables(database, schema)
            .into_iter()
            .map(|table| (table.name, table.foreign_keys))
            .collect())
    }
}

/// Hands out queued connections in order, then fresh default ones.
#[derive(Debug, Default)]
pub struct FakeAdapter {
    name: &'static str,
    queued: Mutex<VecDeque<Arc<FakeConnection>>>,
    pub fail_connect: AtomicBool,
    pub connect_calls: AtomicUsize,
}

impl FakeAdapter {
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn queue(&self, connection: Arc<FakeConnection>) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(connection);
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn connect(&self, dsn: &str) -> Result<Arc<dyn Connection>, BackendError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BackendError::new(format!("could not reach {dsn}")));
        }
        let next = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let connection: Arc<dyn Connection> =
            next.unwrap_or_else(|| Arc::new(FakeConnection::new()));
        Ok(connection)
    }
}

#[derive(Debug, Default)]
pub struct RecordingHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl RecordingHistory {
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HistorySink for RecordingHistory {
    fn record(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

fn column(name: &str) -> ColumnSchema {
    ColumnSchema {
        name: name.to_string(),
        data_type: "int".to_string(),
        nullable: false,
        default_value: None,
    }
}

fn table(name: &str, columns: &[&str], referenced: Option<&str>) -> TableSchema {
    TableSchema {
        name: name.to_string(),
        columns: columns.iter().map(|name| column(name)).collect(),
        indexes: vec![IndexSchema {
            name: format!("{name}_pkey"),
            columns: vec![columns[0].to_string()],
            unique: true,
            primary: true,
        }],
        foreign_keys: referenced
            .map(|target| {
                vec![ForeignKeySchema {
                    constraint_name: format!("fk_{name}_{target}"),
                    column_name: columns[columns.len() - 1].to_string(),
                    referenced_schema: "public".to_string(),
                    referenced_table: target.to_string(),
                    referenced_column: "id".to_string(),
                }]
            })
            .unwrap_or_default(),
    }
}

/// One database, one schema, three tables; `orders` and `sessions`
/// reference `users`.
pub fn sample_catalog() -> Vec<DatabaseSchema> {
    vec![DatabaseSchema {
        name: "app".to_string(),
        schemas: vec![SchemaNode {
            name: "public".to_string(),
            tables: vec![
                table("users", &["id", "email"], None),
                table("orders", &["id", "user_id"], Some("users")),
                table("sessions", &["id", "user_id"], Some("users")),
            ],
        }],
    }]
}
