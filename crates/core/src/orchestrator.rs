//! Query execution orchestrator.
//!
//! The orchestrator is owned by a single consumer loop. Commands (`execute`,
//! `connect`, `next_page`, ...) start I/O on spawned tasks and return
//! immediately; the tasks report back as [`Event`]s which the loop feeds to
//! [`Orchestrator::apply`] one at a time. There is no locking around tab or
//! connection state: a result is trusted only when the identifiers it was
//! stamped with still match the live counters, and every other result is
//! dropped after releasing whatever cursor it carries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterRegistry, Connection, QueryResult, QueryRow};
use crate::config::ExecutionLimits;
use crate::connection::ConnectError;
use crate::events::{Event, ExecutionError, SchemaLoadError};
use crate::executor::{self, RunRequest};
use crate::history::HistorySink;
use crate::ids::{ConnectAttempt, Generation, RunStamp, SchemaLoadId, TabId};
use crate::row_iterator::{IteratorError, PageDirection, StreamingCursor};
use crate::schema::SchemaSnapshot;
use crate::tab::{BufferedView, StreamView, Tab, TabError, TabResults};

/// What an applied event changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// The event no longer matched live state and was discarded.
    Stale,
    Tab(TabId),
    Schema,
    Completions,
    Connected,
    ConnectFailed,
}

#[derive(Debug)]
struct ActiveRun {
    stamp: RunStamp,
    token: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub adapter: String,
    pub database: String,
    /// Redacted.
    pub dsn: String,
    pub latency: Duration,
}

pub struct Orchestrator {
    registry: AdapterRegistry,
    limits: ExecutionLimits,
    history: Arc<dyn HistorySink>,
    events: UnboundedSender<Event>,
    root: CancellationToken,
    connection: Option<Arc<dyn Connection>>,
    connection_info: Option<ConnectionInfo>,
    generation: Generation,
    connecting: bool,
    connect_attempt: ConnectAttempt,
    connect_token: Option<CancellationToken>,
    connect_error: Option<ConnectError>,
    tabs: Vec<Tab>,
    last_tab: TabId,
    active_run: Option<ActiveRun>,
    executing: bool,
    schema: Option<SchemaSnapshot>,
    schema_error: Option<SchemaLoadError>,
    schema_token: Option<CancellationToken>,
    schema_load: SchemaLoadId,
    completions: Vec<String>,
    cleanup: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        registry: AdapterRegistry,
        limits: ExecutionLimits,
        history: Arc<dyn HistorySink>,
    ) -> (Self, UnboundedReceiver<Event>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let orchestrator = Self {
            registry,
            limits,
            history,
            events,
            root: CancellationToken::new(),
            connection: None,
            connection_info: None,
            generation: Generation::default(),
            connecting: false,
            connect_attempt: ConnectAttempt::default(),
            connect_token: None,
            connect_error: None,
            tabs: Vec::new(),
            last_tab: TabId::default(),
            active_run: None,
            executing: false,
            schema: None,
            schema_error: None,
            schema_token: None,
            schema_load: SchemaLoadId::default(),
            completions: Vec::new(),
            cleanup: Vec::new(),
            shut_down: false,
        };
        (orchestrator, receiver)
    }

    #[must_use]
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    #[must_use]
    pub fn limits(&self) -> ExecutionLimits {
        self.limits
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    #[must_use]
    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.connection_info.as_ref()
    }

    #[must_use]
    pub fn connect_error(&self) -> Option<&ConnectError> {
        self.connect_error.as_ref()
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.executing
    }

    #[must_use]
    pub fn schema(&self) -> Option<&SchemaSnapshot> {
        self.schema.as_ref()
    }

    #[must_use]
    pub fn schema_error(&self) -> Option<&SchemaLoadError> {
        self.schema_error.as_ref()
    }

    #[must_use]
    pub fn is_loading_schema(&self) -> bool {
        self.schema_token.is_some()
    }

    #[must_use]
    pub fn completions(&self) -> &[String] {
        &self.completions
    }

    #[must_use]
    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    #[must_use]
    pub fn tab(&self, id: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    fn tab_mut(&mut self, id: TabId) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|tab| tab.id == id)
    }

    pub fn open_tab(&mut self, title: impl Into<String>) -> TabId {
        self.last_tab = self.last_tab.next();
        self.tabs.push(Tab::new(self.last_tab, title));
        self.last_tab
    }

    pub fn set_query(&mut self, id: TabId, query: impl Into<String>) -> bool {
        match self.tab_mut(id) {
            Some(tab) => {
                tab.query = query.into();
                true
            }
            None => false,
        }
    }

    /// Destroys a tab, cancelling its in-flight run and closing its cursor.
    pub fn close_tab(&mut self, id: TabId) -> bool {
        let Some(index) = self.tabs.iter().position(|tab| tab.id == id) else {
            return false;
        };
        let mut tab = self.tabs.remove(index);

        if self
            .active_run
            .as_ref()
            .is_some_and(|active| active.stamp.tab == id)
        {
            self.abort_active_run();
        }
        if let Some(cursor) = tab.detach_cursor() {
            self.release_cursor(cursor);
        }
        debug!(tab = %id, "tab closed");
        true
    }

    /// Opens a new connection in the background. The current connection
    /// stays installed until the attempt succeeds. A newer call supersedes
    /// any attempt still in flight.
    pub fn connect(&mut self, adapter: &str, dsn: &str) -> Option<ConnectAttempt> {
        if self.shut_down {
            return None;
        }
        if let Some(previous) = self.connect_token.take() {
            previous.cancel();
        }
        self.connect_attempt = self.connect_attempt.next();
        let token = self.root.child_token();
        self.connect_token = Some(token.clone());
        self.connecting = true;
        self.connect_error = None;
        let task = executor::connect(
            self.connect_attempt,
            self.registry.clone(),
            adapter.to_string(),
            dsn.to_string(),
            self.limits.connect_timeout(),
            token,
            self.events.clone(),
        );
        tokio::spawn(task);
        Some(self.connect_attempt)
    }

    /// Runs the tab's own query text.
    pub fn execute_tab(&mut self, id: TabId) -> Option<RunStamp> {
        let query = self.tab(id)?.query.clone();
        self.execute(&query, id)
    }

    /// Starts a run of `query` on tab `id`, preempting any run still in
    /// flight. Returns the run's stamp, or `None` when the tab does not
    /// exist or the query is blank.
    pub fn execute(&mut self, query: &str, id: TabId) -> Option<RunStamp> {
        if query.trim().is_empty() || self.shut_down {
            return None;
        }
        let generation = self.generation;
        let run = self.tab_mut(id)?.bump_run();
        let stamp = RunStamp {
            tab: id,
            run,
            generation,
        };

        let preempted = self.preempt_active_run();
        let token = self.root.child_token();
        self.active_run = Some(ActiveRun {
            stamp,
            token: token.clone(),
        });
        self.executing = true;
        self.send(Event::Started { stamp });
        info!(%stamp, preempted, "run submitted");

        let Some(connection) = self.connection.clone() else {
            self.send(Event::QueryError {
                stamp,
                error: ExecutionError::NotConnected,
            });
            return Some(stamp);
        };

        tokio::spawn(executor::run_query(RunRequest {
            stamp,
            query: query.to_string(),
            connection,
            token,
            preempted,
            limits: self.limits,
            history: Arc::clone(&self.history),
            events: self.events.clone(),
        }));
        Some(stamp)
    }

    /// Cancels the run in flight, if any. The cancelled run still reports
    /// back with a cancellation error.
    pub fn cancel(&mut self) -> bool {
        let Some(active) = &self.active_run else {
            return false;
        };
        active.token.cancel();
        info!(stamp = %active.stamp, "run cancelled");
        if let Some(connection) = self.connection.clone() {
            self.spawn_cleanup(async move {
                if let Err(error) = connection.cancel().await {
                    warn!(%error, "best-effort server cancel failed");
                }
            });
        }
        true
    }

    pub fn next_page(&mut self, id: TabId) -> bool {
        self.request_page(id, PageDirection::Next)
    }

    pub fn prev_page(&mut self, id: TabId) -> bool {
        self.request_page(id, PageDirection::Previous)
    }

    fn request_page(&mut self, id: TabId, direction: PageDirection) -> bool {
        let Some(view) = self.tab_mut(id).and_then(Tab::stream_mut) else {
            return false;
        };
        let stamp = view.stamp();
        let blocked = match direction {
            PageDirection::Next => view.at_end(),
            PageDirection::Previous => !matches!(view.page(), Some(page) if page > 0),
        };
        if view.fetching || blocked {
            return false;
        }
        let Some(cursor) = view.cursor.take() else {
            return false;
        };
        view.fetching = true;

        tokio::spawn(executor::fetch_page(
            stamp,
            cursor,
            direction,
            self.events.clone(),
        ));
        true
    }

    /// Discards the current snapshot's loader, if one is running, and
    /// loads the schema again for the live connection.
    pub fn refresh_schema(&mut self) -> bool {
        if self.connection.is_none() {
            return false;
        }
        self.start_schema_load();
        true
    }

    /// Applies one event from the channel returned by [`Orchestrator::new`].
    pub fn apply(&mut self, event: Event) -> Update {
        match event {
            Event::Started { stamp } => {
                if !self.is_live_run(stamp) {
                    return self.discard(stamp, None);
                }
                let Some(tab) = self.tab_mut(stamp.tab) else {
                    return Update::Stale;
                };
                tab.loading = true;
                tab.error = None;
                Update::Tab(stamp.tab)
            }
            Event::BufferedResult {
                stamp,
                result,
                duration,
            } => {
                if !self.is_live_run(stamp) {
                    return self.discard(stamp, None);
                }
                self.finish_run();
                self.show_buffered(stamp.tab, result, duration)
            }
            Event::StreamingReady {
                stamp,
                cursor,
                duration,
            } => {
                if !self.is_live_run(stamp) {
                    return self.discard(stamp, Some(cursor));
                }
                let token = self.finish_run();
                self.show_stream(stamp, cursor, duration, token)
            }
            Event::QueryError { stamp, error } => {
                if !self.is_live_run(stamp) {
                    return self.discard(stamp, None);
                }
                self.finish_run();
                let Some(tab) = self.tab_mut(stamp.tab) else {
                    return Update::Stale;
                };
                tab.loading = false;
                tab.error = Some(TabError::Execution(error));
                Update::Tab(stamp.tab)
            }
            Event::PageLoaded {
                stamp,
                cursor,
                direction,
                outcome,
            } => self.apply_page(stamp, cursor, direction, outcome),
            Event::SchemaLoaded {
                generation,
                load,
                snapshot,
            } => {
                if !self.is_live_schema_load(generation, load) {
                    debug!(
                        %generation,
                        %load,
                        current = %self.schema_load,
                        "discarding stale schema"
                    );
                    return Update::Stale;
                }
                self.schema_token = None;
                self.schema_error = None;
                self.schema = Some(snapshot);
                Update::Schema
            }
            Event::SchemaError {
                generation,
                load,
                error,
            } => {
                if !self.is_live_schema_load(generation, load) {
                    return Update::Stale;
                }
                self.schema_token = None;
                self.schema_error = Some(error);
                Update::Schema
            }
            Event::CompletionsLoaded {
                generation,
                load,
                items,
            } => {
                if !self.is_live_schema_load(generation, load) {
                    return Update::Stale;
                }
                self.completions = items;
                Update::Completions
            }
            Event::Connected {
                attempt,
                connection,
                dsn,
                latency,
            } => {
                if self.shut_down || attempt != self.connect_attempt {
                    debug!(
                        %attempt,
                        current = %self.connect_attempt,
                        "closing superseded connection"
                    );
                    self.spawn_cleanup(executor::tear_down(Some(connection), false, Vec::new()));
                    return Update::Stale;
                }
                self.connect_token = None;
                self.install(connection, dsn, latency);
                Update::Connected
            }
            Event::ConnectError { attempt, error } => {
                if attempt != self.connect_attempt {
                    debug!(%attempt, %error, "ignoring failure of superseded connect attempt");
                    return Update::Stale;
                }
                warn!(%error, "connect failed");
                self.connect_token = None;
                self.connecting = false;
                self.connect_error = Some(error);
                Update::ConnectFailed
            }
        }
    }

    /// Waits for background cleanup started so far: cursor closes, server
    /// cancels and connection teardown.
    pub async fn flush_cleanup(&mut self) {
        for handle in std::mem::take(&mut self.cleanup) {
            if let Err(error) = handle.await {
                warn!(%error, "cleanup task failed");
            }
        }
    }

    /// Cancels all work, closes every cursor and then the connection.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        let was_executing = self.executing;
        self.root.cancel();
        self.active_run = None;
        self.executing = false;
        self.schema_token = None;
        self.connect_token = None;

        let cursors = self.detach_all_cursors();
        let connection = self.connection.take();
        self.connection_info = None;
        executor::tear_down(connection, was_executing, cursors).await;
        self.flush_cleanup().await;
        info!("orchestrator shut down");
    }

    fn send(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn spawn_cleanup<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.cleanup.retain(|handle| !handle.is_finished());
        self.cleanup.push(tokio::spawn(task));
    }

    fn release_cursor(&mut self, cursor: StreamingCursor) {
        self.spawn_cleanup(executor::close_cursor(cursor));
    }

    fn is_live_run(&self, stamp: RunStamp) -> bool {
        stamp.generation == self.generation
            && self
                .active_run
                .as_ref()
                .is_some_and(|active| active.stamp == stamp)
            && self.tab(stamp.tab).is_some_and(|tab| tab.run_id() == stamp.run)
    }

    fn is_live_schema_load(&self, generation: Generation, load: SchemaLoadId) -> bool {
        generation == self.generation && load == self.schema_load
    }

    fn discard(&mut self, stamp: RunStamp, cursor: Option<StreamingCursor>) -> Update {
        debug!(%stamp, current = %self.generation, "discarding stale result");
        if let Some(cursor) = cursor {
            self.release_cursor(cursor);
        }
        Update::Stale
    }

    /// Clears the active run and hands back its token.
    fn finish_run(&mut self) -> Option<CancellationToken> {
        self.executing = false;
        self.active_run.take().map(|active| active.token)
    }

    /// Cancels the run in flight so a new one can start. Returns whether a
    /// run was executing on the connection.
    fn preempt_active_run(&mut self) -> bool {
        let Some(active) = self.active_run.take() else {
            return false;
        };
        active.token.cancel();
        let was_executing = self.executing;
        self.executing = false;
        if let Some(tab) = self.tab_mut(active.stamp.tab) {
            tab.loading = false;
            tab.error = Some(TabError::Execution(ExecutionError::Cancelled));
        }
        debug!(stamp = %active.stamp, "run preempted");
        was_executing && self.connection.is_some()
    }

    /// Cancels the active run because its tab is going away.
    fn abort_active_run(&mut self) {
        let Some(active) = self.active_run.take() else {
            return;
        };
        active.token.cancel();
        let was_executing = std::mem::replace(&mut self.executing, false);
        if let (true, Some(connection)) = (was_executing, self.connection.clone()) {
            self.spawn_cleanup(async move {
                if let Err(error) = connection.cancel().await {
                    warn!(%error, "best-effort server cancel failed");
                }
            });
        }
    }

    fn detach_all_cursors(&mut self) -> Vec<StreamingCursor> {
        let mut cursors = Vec::new();
        for tab in &mut self.tabs {
            tab.loading = false;
            if let Some(cursor) = tab.detach_cursor() {
                cursors.push(cursor);
            }
        }
        cursors
    }

    fn install(&mut self, connection: Arc<dyn Connection>, dsn: String, latency: Duration) {
        let was_executing = self.executing;
        if let Some(active) = self.active_run.take() {
            active.token.cancel();
        }
        let cursors = self.detach_all_cursors();
        let previous = self.connection.take();
        if previous.is_some() || !cursors.is_empty() {
            self.spawn_cleanup(executor::tear_down(previous, was_executing, cursors));
        }
        if let Some(token) = self.schema_token.take() {
            token.cancel();
        }

        self.connection_info = Some(ConnectionInfo {
            adapter: connection.adapter_name().to_string(),
            database: connection.database_name().to_string(),
            dsn,
            latency,
        });
        self.connection = Some(connection);
        self.generation = self.generation.next();
        self.executing = false;
        self.connecting = false;
        self.connect_error = None;
        self.schema = None;
        self.schema_error = None;
        self.completions.clear();
        info!(generation = %self.generation, "connection installed");

        self.start_schema_load();
    }

    fn start_schema_load(&mut self) {
        let Some(connection) = self.connection.clone() else {
            return;
        };
        if let Some(previous) = self.schema_token.take() {
            previous.cancel();
        }
        let token = self.root.child_token();
        self.schema_token = Some(token.clone());
        self.schema_load = self.schema_load.next();
        let limit = self.limits.schema_timeout();

        tokio::spawn(executor::load_schema_for(
            self.generation,
            self.schema_load,
            Arc::clone(&connection),
            token.clone(),
            limit,
            self.events.clone(),
        ));
        tokio::spawn(executor::load_completions(
            self.generation,
            self.schema_load,
            connection,
            token,
            limit,
            self.events.clone(),
        ));
    }

    fn show_buffered(&mut self, id: TabId, result: QueryResult, duration: Duration) -> Update {
        let Some(tab) = self.tab_mut(id) else {
            return Update::Stale;
        };
        tab.loading = false;
        let replaced =
            tab.replace_results(TabResults::Buffered(BufferedView { result, duration }));
        if let Some(cursor) = replaced {
            self.release_cursor(cursor);
        }
        Update::Tab(id)
    }

    fn show_stream(
        &mut self,
        stamp: RunStamp,
        cursor: StreamingCursor,
        duration: Duration,
        token: Option<CancellationToken>,
    ) -> Update {
        let events = self.events.clone();
        let Some(tab) = self.tab_mut(stamp.tab) else {
            return self.discard(stamp, Some(cursor));
        };
        tab.loading = false;

        if cursor.is_cancelled() {
            tab.error = Some(TabError::Execution(ExecutionError::Cancelled));
            self.release_cursor(cursor);
            return Update::Tab(stamp.tab);
        }

        let token = token.unwrap_or_default();
        let mut view = StreamView::new(stamp, cursor.columns().to_vec(), duration, token);
        view.fetching = true;
        let replaced = tab.replace_results(TabResults::Streaming(view));
        if let Some(previous) = replaced {
            self.release_cursor(previous);
        }

        tokio::spawn(executor::fetch_page(
            stamp,
            cursor,
            PageDirection::Next,
            events,
        ));
        Update::Tab(stamp.tab)
    }

    fn apply_page(
        &mut self,
        stamp: RunStamp,
        cursor: StreamingCursor,
        direction: PageDirection,
        outcome: Result<Vec<QueryRow>, IteratorError>,
    ) -> Update {
        if stamp.generation != self.generation {
            return self.discard(stamp, Some(cursor));
        }
        // Only the run that opened the view's cursor may fill it.
        let view = self
            .tab_mut(stamp.tab)
            .and_then(Tab::stream_mut)
            .filter(|view| view.stamp() == stamp && view.fetching && view.cursor.is_none());
        let Some(view) = view else {
            return self.discard(stamp, Some(cursor));
        };
        view.fetching = false;

        let failure = match outcome {
            Ok(rows) => {
                let page = match (direction, view.page()) {
                    (PageDirection::Next, current) => current.map_or(0, |page| page + 1),
                    (PageDirection::Previous, current) => {
                        current.map_or(0, |page| page.saturating_sub(1))
                    }
                };
                if direction == PageDirection::Previous {
                    view.clear_end();
                }
                view.show_page(rows, page);
                view.cursor = Some(cursor);
                None
            }
            Err(IteratorError::EndOfData) => {
                if direction == PageDirection::Next {
                    view.mark_end();
                }
                view.cursor = Some(cursor);
                None
            }
            Err(error) => Some((error, cursor)),
        };

        if let Some((error, cursor)) = failure {
            warn!(%stamp, %error, "page fetch failed");
            if let Some(tab) = self.tab_mut(stamp.tab) {
                tab.error = Some(TabError::Page(error));
            }
            self.release_cursor(cursor);
        }
        Update::Tab(stamp.tab)
    }
}
