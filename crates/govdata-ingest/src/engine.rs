//! Paginated fetch engine
//!
//! Drives one [`RecordSource`] through successive pages:
//!
//! ```text
//! GET <locator>&page=<n>&per_page=<size> -> parse -> persist each record -> next page
//! ```
//!
//! Each page is persisted inside its own transaction. A failing record rolls
//! back its whole page; pages committed before it stay committed.
//!
//! Pagination ends at the first page that yields no records. A page that
//! fails after earlier pages succeeded is handled by [`TerminationPolicy`]:
//! `Lenient` treats it as the end of the data (the upstream API gives no
//! other end-of-data signal), `Strict` returns the error.

use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{IngestConfig, TerminationPolicy};
use crate::error::Result;
use crate::http::{page_url, parse_locator, HttpFetcher};
use crate::source::RecordSource;
use crate::store::{RecordStore, UpsertOutcome};

/// How a source's data is retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Page by page until an empty page
    Paginated,
    /// One download, persisted in page-size chunks
    Bulk,
}

/// Tally of one page (or bulk chunk)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageOutcome {
    pub count: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl PageOutcome {
    fn record(&mut self, outcome: UpsertOutcome) {
        self.count += 1;
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Tally of one source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    /// Records decoded and persisted (skipped ones included)
    pub total: usize,
    /// Committed pages or chunks
    pub pages: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl FetchReport {
    fn absorb(&mut self, page: &PageOutcome) {
        self.total += page.count;
        self.pages += 1;
        self.inserted += page.inserted;
        self.updated += page.updated;
        self.skipped += page.skipped;
    }
}

/// Fetches record sources into a store. Cheap to clone; each clone opens
/// its own transactions.
#[derive(Clone)]
pub struct PageFetcher {
    http: HttpFetcher,
    store: Arc<dyn RecordStore>,
    page_size: usize,
    termination: TerminationPolicy,
}

impl PageFetcher {
    pub fn new(
        http: HttpFetcher,
        store: Arc<dyn RecordStore>,
        page_size: usize,
        termination: TerminationPolicy,
    ) -> Self {
        Self {
            http,
            store,
            page_size: page_size.max(1),
            termination,
        }
    }

    pub fn from_config(config: &IngestConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        config.validate()?;
        let http = HttpFetcher::new(config.http_timeout(), &config.user_agent)?;
        Ok(Self::new(http, store, config.page_size, config.termination))
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub async fn fetch(&self, source: &mut dyn RecordSource, mode: FetchMode) -> Result<FetchReport> {
        match mode {
            FetchMode::Paginated => self.fetch_all(source).await,
            FetchMode::Bulk => self.fetch_bulk(source).await,
        }
    }

    /// Fetch every page of `source`, starting at page 1.
    ///
    /// An empty first page is an empty dataset, not an error. A failure on
    /// the first page is always returned.
    #[instrument(skip_all, fields(source = source.name()))]
    pub async fn fetch_all(&self, source: &mut dyn RecordSource) -> Result<FetchReport> {
        let mut report = FetchReport::default();
        let mut page = 1;

        loop {
            match self.fetch_page(source, page).await {
                Ok(outcome) if outcome.count > 0 => {
                    report.absorb(&outcome);
                    page += 1;
                },
                Ok(_) => break,
                Err(e) if report.total == 0 => {
                    error!(page, error = %e, "First page failed");
                    return Err(e);
                },
                Err(e) => match self.termination {
                    TerminationPolicy::Lenient => {
                        warn!(
                            page,
                            total = report.total,
                            error = %e,
                            "Page failed after earlier pages succeeded, treating as end of data"
                        );
                        break;
                    },
                    TerminationPolicy::Strict => {
                        error!(page, total = report.total, error = %e, "Page failed");
                        return Err(e);
                    },
                },
            }
        }

        info!(
            total = report.total,
            pages = report.pages,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            "Fetched"
        );
        Ok(report)
    }

    /// Fetch, decode and persist one page. An empty page opens no
    /// transaction.
    pub async fn fetch_page(&self, source: &mut dyn RecordSource, page: usize) -> Result<PageOutcome> {
        let url = page_url(source.locator(), page, self.page_size)?;
        let body = self.http.get_bytes(&url).await?;
        let count = source.parse(&body)?;

        debug!(page, count, url = %url, "Page decoded");
        if count == 0 {
            return Ok(PageOutcome::default());
        }

        let outcome = self.persist_range(&*source, 0..count).await?;
        debug!(page, inserted = outcome.inserted, updated = outcome.updated, "Page committed");
        Ok(outcome)
    }

    /// Download `source` once and persist it in chunks of `page_size`
    /// records, one transaction per chunk. The first failing chunk ends the
    /// fetch; earlier chunks stay committed.
    #[instrument(skip_all, fields(source = source.name()))]
    pub async fn fetch_bulk(&self, source: &mut dyn RecordSource) -> Result<FetchReport> {
        let url = parse_locator(source.locator())?;
        let body = self.http.get_bytes(&url).await?;
        let count = source.parse(&body)?;
        info!(count, bytes = body.len(), "Bulk payload decoded");

        let mut report = FetchReport::default();
        let mut start = 0;
        while start < count {
            let end = (start + self.page_size).min(count);
            let outcome = self.persist_range(&*source, start..end).await.inspect_err(|e| {
                error!(first = start, last = end - 1, error = %e, "Chunk failed");
            })?;
            report.absorb(&outcome);
            debug!(chunk = report.pages, records = outcome.count, "Chunk committed");
            start = end;
        }

        info!(
            total = report.total,
            pages = report.pages,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            "Fetched"
        );
        Ok(report)
    }

    /// Persist the records at `positions` in one transaction: all or none.
    async fn persist_range(
        &self,
        source: &dyn RecordSource,
        positions: Range<usize>,
    ) -> Result<PageOutcome> {
        let mut tx = self.store.begin().await?;
        let mut outcome = PageOutcome::default();

        for position in positions {
            match source.persist_at(tx.as_mut(), position).await {
                Ok(result) => outcome.record(result),
                Err(e) => {
                    warn!(position, error = %e, "Record failed, rolling back page");
                    if let Err(rollback_error) = tx.rollback().await {
                        error!(error = %rollback_error, "Rollback failed");
                    }
                    return Err(e);
                },
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }
}
