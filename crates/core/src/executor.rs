//! Task bodies spawned by the orchestrator. Each one reports back only
//! through the event channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterRegistry, BackendError, Connection, QueryResult};
use crate::config::ExecutionLimits;
use crate::connection::establish;
use crate::dsn::redact_dsn;
use crate::events::{deliver, Event, ExecutionError, SchemaLoadError};
use crate::history::{unix_timestamp_millis, HistoryEntry, HistorySink};
use crate::ids::{ConnectAttempt, Generation, RunStamp, SchemaLoadId};
use crate::row_iterator::{PageDirection, RowIterator, StreamingCursor, UNKNOWN_TOTAL};
use crate::schema::SchemaSnapshot;
use crate::schema_loader::load_schema;
use crate::sql_classify::is_select_like;

pub(crate) struct RunRequest {
    pub stamp: RunStamp,
    pub query: String,
    pub connection: Arc<dyn Connection>,
    pub token: CancellationToken,
    /// A previous run was still executing on this connection.
    pub preempted: bool,
    pub limits: ExecutionLimits,
    pub history: Arc<dyn HistorySink>,
    pub events: UnboundedSender<Event>,
}

enum StreamOpen {
    Ready(Box<dyn RowIterator>),
    Cancelled,
    Unavailable(BackendError),
}

pub(crate) async fn run_query(request: RunRequest) {
    let RunRequest {
        stamp,
        query,
        connection,
        token,
        preempted,
        limits,
        history,
        events,
    } = request;

    // The server-side cancel for the preempted statement must land before
    // this run's statement is issued on the same connection.
    if preempted {
        if let Err(error) = connection.cancel().await {
            warn!(%stamp, %error, "best-effort cancel of preempted run failed");
        }
    }

    debug!(%stamp, query = %query, "executing");
    let started_at = Instant::now();

    if is_select_like(&query) {
        match open_stream(connection.as_ref(), &query, limits.page_size(), &token).await {
            StreamOpen::Ready(mut iterator) => {
                let duration = started_at.elapsed();
                if token.is_cancelled() {
                    if let Err(error) = iterator.close().await {
                        warn!(%stamp, %error, "failed to close iterator of cancelled run");
                    }
                    finish_failed(&history, connection.as_ref(), &query, duration, &stamp);
                    deliver(
                        &events,
                        Event::QueryError {
                            stamp,
                            error: ExecutionError::Cancelled,
                        },
                    )
                    .await;
                    return;
                }

                // The run context stays open with no deadline for as long
                // as the cursor lives; results may be browsed indefinitely.
                // Only an explicit cancel, reconnect, tab close or shutdown
                // ends it. Do not add a timeout here.
                let cursor = StreamingCursor::new(iterator, token);
                record(
                    &history,
                    connection.as_ref(),
                    &query,
                    duration,
                    UNKNOWN_TOTAL,
                    false,
                );
                info!(%stamp, duration_ms = duration.as_millis(), "stream opened");
                deliver(
                    &events,
                    Event::StreamingReady {
                        stamp,
                        cursor,
                        duration,
                    },
                )
                .await;
                return;
            }
            StreamOpen::Cancelled => {
                finish_failed(
                    &history,
                    connection.as_ref(),
                    &query,
                    started_at.elapsed(),
                    &stamp,
                );
                deliver(
                    &events,
                    Event::QueryError {
                        stamp,
                        error: ExecutionError::Cancelled,
                    },
                )
                .await;
                return;
            }
            StreamOpen::Unavailable(error) => {
                debug!(%stamp, %error, "stream unavailable, falling back to buffered execution");
            }
        }
    }

    let outcome = execute_buffered(
        connection.as_ref(),
        &query,
        limits.buffered_timeout(),
        &token,
    )
    .await;
    token.cancel();
    let duration = started_at.elapsed();

    let event = match outcome {
        Ok(result) => {
            record(
                &history,
                connection.as_ref(),
                &query,
                duration,
                result.row_count,
                false,
            );
            info!(%stamp, rows = result.row_count, duration_ms = duration.as_millis(), "query finished");
            Event::BufferedResult {
                stamp,
                result,
                duration,
            }
        }
        Err(error) => {
            if error.is_cancellation() {
                debug!(%stamp, "query cancelled");
            } else {
                warn!(%stamp, %error, "query failed");
            }
            finish_failed(&history, connection.as_ref(), &query, duration, &stamp);
            Event::QueryError { stamp, error }
        }
    };
    deliver(&events, event).await;
}

async fn open_stream(
    connection: &dyn Connection,
    query: &str,
    page_size: usize,
    token: &CancellationToken,
) -> StreamOpen {
    tokio::select! {
        biased;
        () = token.cancelled() => StreamOpen::Cancelled,
        opened = connection.execute_streaming(query, page_size) => match opened {
            Ok(iterator) => StreamOpen::Ready(iterator),
            Err(error) => StreamOpen::Unavailable(error),
        },
    }
}

async fn execute_buffered(
    connection: &dyn Connection,
    query: &str,
    limit: Duration,
    token: &CancellationToken,
) -> Result<QueryResult, ExecutionError> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(ExecutionError::Cancelled),
        result = timeout(limit, connection.execute(query)) => match result {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(ExecutionError::Backend(error)),
            Err(_) => Err(ExecutionError::TimedOut(limit)),
        },
    }
}

fn finish_failed(
    history: &Arc<dyn HistorySink>,
    connection: &dyn Connection,
    query: &str,
    duration: Duration,
    stamp: &RunStamp,
) {
    debug!(%stamp, "recording failed run");
    record(history, connection, query, duration, 0, true);
}

fn record(
    history: &Arc<dyn HistorySink>,
    connection: &dyn Connection,
    query: &str,
    duration: Duration,
    row_count: i64,
    error: bool,
) {
    let entry = HistoryEntry {
        timestamp_unix_ms: unix_timestamp_millis(),
        query: query.to_string(),
        adapter: connection.adapter_name().to_string(),
        database: connection.database_name().to_string(),
        duration_ms: duration.as_millis(),
        row_count,
        error,
    };
    if let Err(error) = history.record(&entry) {
        warn!(%error, "failed to record query history");
    }
}

pub(crate) async fn fetch_page(
    stamp: RunStamp,
    mut cursor: StreamingCursor,
    direction: PageDirection,
    events: UnboundedSender<Event>,
) {
    let outcome = cursor.fetch(direction).await;
    deliver(
        &events,
        Event::PageLoaded {
            stamp,
            cursor,
            direction,
            outcome,
        },
    )
    .await;
}

pub(crate) async fn close_cursor(mut cursor: StreamingCursor) {
    if let Err(error) = cursor.close().await {
        warn!(%error, "failed to close cursor");
    }
}

pub(crate) async fn load_schema_for(
    generation: Generation,
    load: SchemaLoadId,
    connection: Arc<dyn Connection>,
    token: CancellationToken,
    limit: Duration,
    events: UnboundedSender<Event>,
) {
    let started_at = Instant::now();
    let outcome = tokio::select! {
        biased;
        () = token.cancelled() => {
            debug!(%generation, %load, "schema load cancelled");
            return;
        }
        outcome = timeout(limit, load_schema(connection.as_ref())) => outcome,
    };

    let event = match outcome {
        Ok(Ok(loaded)) => {
            let snapshot = SchemaSnapshot::new(generation, loaded.databases, loaded.warnings);
            info!(
                %generation,
                tables = snapshot.table_count(),
                warnings = snapshot.warnings().len(),
                duration_ms = started_at.elapsed().as_millis(),
                "schema loaded"
            );
            Event::SchemaLoaded {
                generation,
                load,
                snapshot,
            }
        }
        Ok(Err(error)) => {
            warn!(%generation, %error, "schema load failed");
            Event::SchemaError {
                generation,
                load,
                error: SchemaLoadError::Backend(error),
            }
        }
        Err(_) => {
            warn!(%generation, timeout_secs = limit.as_secs(), "schema load timed out");
            Event::SchemaError {
                generation,
                load,
                error: SchemaLoadError::TimedOut(limit),
            }
        }
    };
    deliver(&events, event).await;
}

pub(crate) async fn load_completions(
    generation: Generation,
    load: SchemaLoadId,
    connection: Arc<dyn Connection>,
    token: CancellationToken,
    limit: Duration,
    events: UnboundedSender<Event>,
) {
    let outcome = tokio::select! {
        biased;
        () = token.cancelled() => return,
        outcome = timeout(limit, connection.completions()) => outcome,
    };

    match outcome {
        Ok(Ok(items)) => {
            deliver(
                &events,
                Event::CompletionsLoaded {
                    generation,
                    load,
                    items,
                },
            )
            .await;
        }
        Ok(Err(error)) => warn!(%generation, %error, "failed to load completions"),
        Err(_) => warn!(%generation, "loading completions timed out"),
    }
}

pub(crate) async fn connect(
    attempt: ConnectAttempt,
    registry: AdapterRegistry,
    adapter: String,
    dsn: String,
    limit: Duration,
    token: CancellationToken,
    events: UnboundedSender<Event>,
) {
    let outcome = tokio::select! {
        biased;
        () = token.cancelled() => {
            debug!(%attempt, "connect attempt superseded");
            return;
        }
        outcome = establish(&registry, &adapter, &dsn, limit) => outcome,
    };

    let event = match outcome {
        Ok(established) => Event::Connected {
            attempt,
            connection: established.connection,
            dsn: redact_dsn(&dsn),
            latency: established.latency,
        },
        Err(error) => Event::ConnectError { attempt, error },
    };
    deliver(&events, event).await;
}

/// Releases everything bound to a replaced connection: the server-side
/// cancel goes first, cursors close before the connection they run on.
pub(crate) async fn tear_down(
    previous: Option<Arc<dyn Connection>>,
    was_executing: bool,
    cursors: Vec<StreamingCursor>,
) {
    if was_executing {
        if let Some(connection) = &previous {
            if let Err(error) = connection.cancel().await {
                warn!(%error, "best-effort cancel on replaced connection failed");
            }
        }
    }

    for cursor in cursors {
        close_cursor(cursor).await;
    }

    if let Some(connection) = previous {
        if let Err(error) = connection.close().await {
            warn!(%error, adapter = connection.adapter_name(), "failed to close replaced connection");
        }
    }
}
