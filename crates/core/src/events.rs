//! Typed results delivered from I/O tasks to the single consumer loop.
//!
//! Every event that belongs to a run or a connection carries the
//! identifiers observed when the work was submitted. Events that own a
//! cursor hand it over by value; whoever drops such an event without
//! applying it must close the cursor first.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::adapter::{BackendError, Connection, QueryResult, QueryRow};
use crate::connection::ConnectError;
use crate::ids::{ConnectAttempt, Generation, RunStamp, SchemaLoadId};
use crate::row_iterator::{IteratorError, PageDirection, StreamingCursor};
use crate::schema::SchemaSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("not connected")]
    NotConnected,
    #[error("query cancelled")]
    Cancelled,
    #[error("query timed out after {0:?}")]
    TimedOut(Duration),
    #[error("{0}")]
    Backend(#[source] BackendError),
}

impl ExecutionError {
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaLoadError {
    #[error("schema load timed out after {0:?}")]
    TimedOut(Duration),
    #[error("schema load failed: {0}")]
    Backend(#[source] BackendError),
}

pub enum Event {
    Started {
        stamp: RunStamp,
    },
    BufferedResult {
        stamp: RunStamp,
        result: QueryResult,
        duration: Duration,
    },
    StreamingReady {
        stamp: RunStamp,
        cursor: StreamingCursor,
        duration: Duration,
    },
    QueryError {
        stamp: RunStamp,
        error: ExecutionError,
    },
    PageLoaded {
        stamp: RunStamp,
        cursor: StreamingCursor,
        direction: PageDirection,
        outcome: Result<Vec<QueryRow>, IteratorError>,
    },
    SchemaLoaded {
        generation: Generation,
        load: SchemaLoadId,
        snapshot: SchemaSnapshot,
    },
    SchemaError {
        generation: Generation,
        load: SchemaLoadId,
        error: SchemaLoadError,
    },
    CompletionsLoaded {
        generation: Generation,
        load: SchemaLoadId,
        items: Vec<String>,
    },
    Connected {
        attempt: ConnectAttempt,
        connection: Arc<dyn Connection>,
        /// Already redacted.
        dsn: String,
        latency: Duration,
    },
    ConnectError {
        attempt: ConnectAttempt,
        error: ConnectError,
    },
}

impl Event {
    #[must_use]
    pub fn stamp(&self) -> Option<RunStamp> {
        match self {
            Self::Started { stamp }
            | Self::BufferedResult { stamp, .. }
            | Self::StreamingReady { stamp, .. }
            | Self::QueryError { stamp, .. }
            | Self::PageLoaded { stamp, .. } => Some(*stamp),
            _ => None,
        }
    }

    /// Takes the cursor out of an event that owns one.
    #[must_use]
    pub fn into_cursor(self) -> Option<StreamingCursor> {
        match self {
            Self::StreamingReady { cursor, .. } | Self::PageLoaded { cursor, .. } => Some(cursor),
            _ => None,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { stamp } => f.debug_struct("Started").field("stamp", stamp).finish(),
            Self::BufferedResult {
                stamp,
                result,
                duration,
            } => f
                .debug_struct("BufferedResult")
                .field("stamp", stamp)
                .field("rows", &result.rows.len())
                .field("row_count", &result.row_count)
                .field("duration", duration)
                .finish(),
            Self::StreamingReady {
                stamp,
                cursor,
                duration,
            } => f
                .debug_struct("StreamingReady")
                .field("stamp", stamp)
                .field("cursor", cursor)
                .field("duration", duration)
                .finish(),
            Self::QueryError { stamp, error } => f
                .debug_struct("QueryError")
                .field("stamp", stamp)
                .field("error", error)
                .finish(),
            Self::PageLoaded {
                stamp,
                direction,
                outcome,
                ..
            } => f
                .debug_struct("PageLoaded")
                .field("stamp", stamp)
                .field("direction", direction)
                .field("rows", &outcome.as_ref().map(Vec::len))
                .finish(),
            Self::SchemaLoaded {
                generation,
                load,
                snapshot,
            } => f
                .debug_struct("SchemaLoaded")
                .field("generation", generation)
                .field("load", load)
                .field("tables", &snapshot.table_count())
                .field("warnings", &snapshot.warnings().len())
                .finish(),
            Self::SchemaError {
                generation,
                load,
                error,
            } => f
                .debug_struct("SchemaError")
                .field("generation", generation)
                .field("load", load)
                .field("error", error)
                .finish(),
            Self::CompletionsLoaded {
                generation,
                load,
                items,
            } => f
                .debug_struct("CompletionsLoaded")
                .field("generation", generation)
                .field("load", load)
                .field("items", &items.len())
                .finish(),
            Self::Connected {
                attempt,
                connection,
                dsn,
                latency,
            } => f
                .debug_struct("Connected")
                .field("attempt", attempt)
                .field("adapter", &connection.adapter_name())
                .field("database", &connection.database_name())
                .field("dsn", dsn)
                .field("latency", latency)
                .finish(),
            Self::ConnectError { attempt, error } => f
                .debug_struct("ConnectError")
                .field("attempt", attempt)
                .field("error", error)
                .finish(),
        }
    }
}

/// Sends `event` to the consumer. If the consumer is gone, any cursor or
/// connection carried by the event is released here instead.
pub(crate) async fn deliver(events: &UnboundedSender<Event>, event: Event) {
    let Err(rejected) = events.send(event) else {
        return;
    };

    debug!("event receiver dropped; releasing undelivered event");
    match rejected.0 {
        Event::Connected { connection, .. } => {
            if let Err(error) = connection.close().await {
                warn!(%error, "failed to close undelivered connection");
            }
        }
        other => {
            if let Some(mut cursor) = other.into_cursor() {
                if let Err(error) = cursor.close().await {
                    warn!(%error, "failed to close undelivered cursor");
                }
            }
        }
    }
}
