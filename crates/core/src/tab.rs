use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::adapter::{ColumnMeta, QueryResult, QueryRow};
use crate::events::ExecutionError;
use crate::ids::{RunId, RunStamp, TabId};
use crate::row_iterator::{IteratorError, StreamingCursor};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TabError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Page(#[from] IteratorError),
}

impl TabError {
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Execution(error) => error.is_cancellation(),
            Self::Page(error) => matches!(error, IteratorError::Cancelled),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedView {
    pub result: QueryResult,
    pub duration: Duration,
}

/// The visible page of a streamed result. Only one page of rows is held;
/// the cursor is absent while a fetch task has borrowed it and after it
/// has been closed.
#[derive(Debug)]
pub struct StreamView {
    stamp: RunStamp,
    columns: Vec<ColumnMeta>,
    rows: Vec<QueryRow>,
    page: Option<u64>,
    at_end: bool,
    duration: Duration,
    pub(crate) cursor: Option<StreamingCursor>,
    pub(crate) fetching: bool,
    pub(crate) token: CancellationToken,
}

impl StreamView {
    pub(crate) fn new(
        stamp: RunStamp,
        columns: Vec<ColumnMeta>,
        duration: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            stamp,
            columns,
            rows: Vec::new(),
            page: None,
            at_end: false,
            duration,
            cursor: None,
            fetching: false,
            token,
        }
    }

    /// The run that opened the cursor. Page fetches are stamped with it,
    /// not with the tab's latest run.
    #[must_use]
    pub fn stamp(&self) -> RunStamp {
        self.stamp
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[QueryRow] {
        &self.rows
    }

    /// Zero-based index of the page on screen, `None` before the first
    /// page arrives or when the result is empty.
    #[must_use]
    pub fn page(&self) -> Option<u64> {
        self.page
    }

    #[must_use]
    pub fn at_end(&self) -> bool {
        self.at_end
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    /// False once the cursor has been closed, for example after a
    /// reconnect. Rows already on screen stay visible.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.cursor.is_some() || self.fetching
    }

    pub(crate) fn show_page(&mut self, rows: Vec<QueryRow>, page: u64) {
        self.rows = rows;
        self.page = Some(page);
    }

    pub(crate) fn mark_end(&mut self) {
        self.at_end = true;
    }

    pub(crate) fn clear_end(&mut self) {
        self.at_end = false;
    }

    /// Cancels the run context and detaches the cursor for closing.
    pub(crate) fn detach(&mut self) -> Option<StreamingCursor> {
        self.token.cancel();
        self.fetching = false;
        self.cursor.take()
    }
}

#[derive(Debug, Default)]
pub enum TabResults {
    #[default]
    Empty,
    Buffered(BufferedView),
    Streaming(StreamView),
}

#[derive(Debug)]
pub struct Tab {
    pub id: TabId,
    pub title: String,
    pub query: String,
    run_id: RunId,
    pub(crate) results: TabResults,
    pub(crate) loading: bool,
    pub(crate) error: Option<TabError>,
}

impl Tab {
    pub(crate) fn new(id: TabId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            query: String::new(),
            run_id: RunId::default(),
            results: TabResults::Empty,
            loading: false,
            error: None,
        }
    }

    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    #[must_use]
    pub fn results(&self) -> &TabResults {
        &self.results
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn error(&self) -> Option<&TabError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn stream(&self) -> Option<&StreamView> {
        match &self.results {
            TabResults::Streaming(view) => Some(view),
            _ => None,
        }
    }

    pub(crate) fn stream_mut(&mut self) -> Option<&mut StreamView> {
        match &mut self.results {
            TabResults::Streaming(view) => Some(view),
            _ => None,
        }
    }

    pub(crate) fn bump_run(&mut self) -> RunId {
        self.run_id = self.run_id.next();
        self.run_id
    }

    /// Installs new results and returns the cursor of the replaced
    /// streaming result, if it still had one.
    pub(crate) fn replace_results(&mut self, results: TabResults) -> Option<StreamingCursor> {
        let previous = std::mem::replace(&mut self.results, results);
        match previous {
            TabResults::Streaming(mut view) => view.detach(),
            _ => None,
        }
    }

    /// Detaches the streaming cursor while keeping the rows on screen.
    pub(crate) fn detach_cursor(&mut self) -> Option<StreamingCursor> {
        self.stream_mut().and_then(StreamView::detach)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{StreamView, Tab, TabError, TabResults};
    use crate::events::ExecutionError;
    use crate::ids::{Generation, RunId, RunStamp, TabId};
    use crate::row_iterator::{IteratorError, StreamingCursor};
    use crate::test_support::FakeIterator;

    #[test]
    fn run_ids_increase_per_tab() {
        let mut tab = Tab::new(TabId::default().next(), "Query 1");
        let first = tab.bump_run();
        let second = tab.bump_run();

        assert!(first < second);
        assert_eq!(tab.run_id(), second);
    }

    #[test]
    fn replacing_streaming_results_cancels_and_hands_back_the_cursor() {
        let token = CancellationToken::new();
        let cursor = StreamingCursor::new(
            Box::new(FakeIterator::with_pages(vec![vec!["1"]])),
            token.clone(),
        );
        let stamp = RunStamp {
            tab: TabId::default().next(),
            run: RunId::default().next(),
            generation: Generation::default(),
        };
        let mut view = StreamView::new(stamp, Vec::new(), Duration::ZERO, token.clone());
        view.cursor = Some(cursor);

        let mut tab = Tab::new(TabId::default().next(), "Query 1");
        assert!(tab.replace_results(TabResults::Streaming(view)).is_none());
        let detached = tab.replace_results(TabResults::Empty);

        assert!(detached.is_some());
        assert!(token.is_cancelled());
        assert!(matches!(tab.results(), TabResults::Empty));
    }

    #[test]
    fn cancellation_is_recognised_for_both_error_kinds() {
        assert!(TabError::from(ExecutionError::Cancelled).is_cancellation());
        assert!(TabError::from(IteratorError::Cancelled).is_cancellation());
        assert!(!TabError::from(ExecutionError::NotConnected).is_cancellation());
    }
}
