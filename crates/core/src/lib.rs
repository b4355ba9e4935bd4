pub mod adapter;
pub mod config;
pub mod connection;
pub mod dsn;
pub mod events;
mod executor;
pub mod history;
pub mod ids;
pub mod orchestrator;
pub mod row_iterator;
pub mod schema;
pub mod schema_loader;
pub mod sql_classify;
pub mod tab;

#[cfg(test)]
mod test_support;

pub use orchestrator::{ConnectionInfo, Orchestrator, Update};
