//! Capability set every database backend implements.
//!
//! Calls are cancelled on the client side by dropping their futures; the
//! orchestrator races them against the run's cancellation token. `cancel`
//! is the additional best-effort request for the server to stop work.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::row_iterator::RowIterator;
use crate::schema::{ColumnSchema, DatabaseSchema, ForeignKeySchema, IndexSchema};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRow {
    pub values: Vec<String>,
}

impl QueryRow {
    #[must_use]
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
}

impl ColumnMeta {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Fully materialized outcome of a buffered execution. `row_count` is the
/// number of returned rows for row-producing statements and the affected
/// row count otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<QueryRow>,
    pub row_count: i64,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(&self, dsn: &str) -> Result<Arc<dyn Connection>, BackendError>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    fn adapter_name(&self) -> &str;
    fn database_name(&self) -> &str;

    async fn ping(&self) -> Result<(), BackendError>;
    async fn close(&self) -> Result<(), BackendError>;
    async fn cancel(&self) -> Result<(), BackendError>;

    /// Databases with their schemas and table names. Table details are
    /// left empty for the schema loader to fill in.
    async fn databases(&self) -> Result<Vec<DatabaseSchema>, BackendError>;
    async fn columns(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnSchema>, BackendError>;
    async fn indexes(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<IndexSchema>, BackendError>;
    async fn foreign_keys(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKeySchema>, BackendError>;

    async fn execute(&self, query: &str) -> Result<QueryResult, BackendError>;
    async fn execute_streaming(
        &self,
        query: &str,
        page_size: usize,
    ) -> Result<Box<dyn RowIterator>, BackendError>;

    async fn completions(&self) -> Result<Vec<String>, BackendError>;

    /// Narrows to the per-schema batch introspection capability when the
    /// backend has one.
    fn batch(&self) -> Option<&dyn BatchIntrospector> {
        None
    }
}

#[async_trait]
pub trait BatchIntrospector: Send + Sync {
    async fn all_columns(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<HashMap<String, Vec<ColumnSchema>>, BackendError>;
    async fn all_indexes(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<HashMap<String, Vec<IndexSchema>>, BackendError>;
    async fn all_foreign_keys(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<HashMap<String, Vec<ForeignKeySchema>>, BackendError>;
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<&'static str, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.register(adapter);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}
