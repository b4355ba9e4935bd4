use std::sync::Arc;

use sqlnav_core::adapter::AdapterRegistry;
use sqlnav_core::sql_classify::strip_statement_terminator;

pub mod mysql;
pub mod postgres;

pub use mysql::MysqlAdapter;
pub use postgres::PostgresAdapter;

/// Registry with every backend this crate ships.
#[must_use]
pub fn default_registry() -> AdapterRegistry {
    AdapterRegistry::new()
        .with(Arc::new(MysqlAdapter))
        .with(Arc::new(PostgresAdapter))
}

/// Wraps a read query so the server returns one window of its rows. The
/// inner query sits on its own lines so a line comment left inside it
/// cannot swallow the wrapper.
pub(crate) fn paged_sql(query: &str, offset: u64, limit: usize) -> String {
    format!(
        "SELECT * FROM (\n{}\n) AS sqlnav_page LIMIT {limit} OFFSET {offset}",
        strip_statement_terminator(query)
    )
}
