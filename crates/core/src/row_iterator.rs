use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::adapter::{BackendError, ColumnMeta, QueryRow};

/// Returned by `total_rows` when the size of a result set is not known.
pub const UNKNOWN_TOTAL: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IteratorError {
    /// No page exists in the requested direction. Not a failure.
    #[error("end of data")]
    EndOfData,
    #[error("iterator is closed")]
    Closed,
    #[error("iterator context was cancelled")]
    Cancelled,
    #[error("page fetch failed: {0}")]
    Backend(#[source] BackendError),
}

impl IteratorError {
    #[must_use]
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, Self::EndOfData)
    }
}

/// Lazy, bidirectional cursor over one streamed result set.
///
/// Fetches return `IteratorError::EndOfData` instead of an empty page when
/// nothing lies in that direction. `close` must tolerate repeated calls.
#[async_trait]
pub trait RowIterator: Send {
    async fn fetch_next(&mut self) -> Result<Vec<QueryRow>, IteratorError>;
    async fn fetch_prev(&mut self) -> Result<Vec<QueryRow>, IteratorError>;
    fn columns(&self) -> &[ColumnMeta];
    fn total_rows(&self) -> i64;
    async fn close(&mut self) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    Next,
    Previous,
}

/// A row iterator bound to the cancellation context of the run that
/// opened it.
pub struct StreamingCursor {
    inner: Box<dyn RowIterator>,
    cancel: CancellationToken,
    closed: bool,
}

impl StreamingCursor {
    #[must_use]
    pub fn new(inner: Box<dyn RowIterator>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            cancel,
            closed: false,
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnMeta] {
        self.inner.columns()
    }

    #[must_use]
    pub fn total_rows(&self) -> i64 {
        self.inner.total_rows()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn fetch(&mut self, direction: PageDirection) -> Result<Vec<QueryRow>, IteratorError> {
        if self.closed {
            return Err(IteratorError::Closed);
        }
        if self.cancel.is_cancelled() {
            return Err(IteratorError::Cancelled);
        }

        let cancel = &self.cancel;
        let inner = &mut self.inner;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(IteratorError::Cancelled),
            page = async {
                match direction {
                    PageDirection::Next => inner.fetch_next().await,
                    PageDirection::Previous => inner.fetch_prev().await,
                }
            } => page,
        }
    }

    pub async fn fetch_next(&mut self) -> Result<Vec<QueryRow>, IteratorError> {
        self.fetch(PageDirection::Next).await
    }

    pub async fn fetch_prev(&mut self) -> Result<Vec<QueryRow>, IteratorError> {
        self.fetch(PageDirection::Previous).await
    }

    /// Closes the underlying iterator once. Later calls are no-ops.
    pub async fn close(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await
    }
}

impl fmt::Debug for StreamingCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingCursor")
            .field("columns", &self.inner.columns().len())
            .field("closed", &self.closed)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<QueryRow>,
}

/// Backend side of [`PagedIterator`]: fetch `limit` rows starting at
/// `offset` of a fixed statement.
#[async_trait]
pub trait PageSource: Send {
    async fn fetch_page(&mut self, offset: u64, limit: usize) -> Result<Page, BackendError>;

    async fn release(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Offset pager holding only the current page in memory.
#[derive(Debug)]
pub struct PagedIterator<S: PageSource> {
    source: S,
    page_size: usize,
    columns: Vec<ColumnMeta>,
    current: Option<u64>,
    prefetched: Option<Vec<QueryRow>>,
    known_pages: Option<u64>,
    closed: bool,
}

impl<S: PageSource> PagedIterator<S> {
    /// Fetches the first page eagerly so the column list is known up front
    /// and a statement the backend rejects fails here rather than on the
    /// first page request.
    pub async fn open(mut source: S, page_size: usize) -> Result<Self, BackendError> {
        let page_size = page_size.max(1);
        let first = source.fetch_page(0, page_size).await?;
        let known_pages = if first.rows.is_empty() {
            Some(0)
        } else if first.rows.len() < page_size {
            Some(1)
        } else {
            None
        };

        Ok(Self {
            source,
            page_size,
            columns: first.columns,
            current: None,
            prefetched: Some(first.rows),
            known_pages,
            closed: false,
        })
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    async fn load(&mut self, index: u64) -> Result<Vec<QueryRow>, IteratorError> {
        let offset = index.saturating_mul(self.page_size as u64);
        let page = self
            .source
            .fetch_page(offset, self.page_size)
            .await
            .map_err(IteratorError::Backend)?;
        Ok(page.rows)
    }
}

#[async_trait]
impl<S: PageSource> RowIterator for PagedIterator<S> {
    async fn fetch_next(&mut self) -> Result<Vec<QueryRow>, IteratorError> {
        if self.closed {
            return Err(IteratorError::Closed);
        }

        let next = self.current.map_or(0, |current| current + 1);
        if self.known_pages.is_some_and(|pages| next >= pages) {
            return Err(IteratorError::EndOfData);
        }

        let rows = match (next, self.prefetched.take()) {
            (0, Some(rows)) => rows,
            _ => self.load(next).await?,
        };

        if rows.is_empty() {
            self.known_pages = Some(next);
            return Err(IteratorError::EndOfData);
        }
        if rows.len() < self.page_size {
            self.known_pages = Some(next + 1);
        }

        self.current = Some(next);
        Ok(rows)
    }

    async fn fetch_prev(&mut self) -> Result<Vec<QueryRow>, IteratorError> {
        if self.closed {
            return Err(IteratorError::Closed);
        }

        let previous = match self.current {
            None | Some(0) => return Err(IteratorError::EndOfData),
            Some(current) => current - 1,
        };

        let rows = self.load(previous).await?;
        self.current = Some(previous);
        Ok(rows)
    }

    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn total_rows(&self) -> i64 {
        UNKNOWN_TOTAL
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.prefetched = None;
        self.source.release().await
    }
}
