//! Record source contract
//!
//! A record source knows one dataset resource: where it lives, how to decode
//! a page of it, and how to turn the record at a position into rows. The
//! fetch engine drives every source through this trait alone.

use async_trait::async_trait;

use crate::error::{IngestError, Result};
use crate::store::{PageTransaction, TableSchema, UpsertOutcome};

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    /// Base address of the resource. The engine appends paging parameters;
    /// a source never embeds them itself.
    fn locator(&self) -> &str;

    /// Tables this source writes to
    fn schemas(&self) -> Vec<&'static TableSchema>;

    /// Decode one page payload, replacing the previously decoded page.
    ///
    /// Returns the number of records found. Zero is a valid empty page.
    fn parse(&mut self, body: &[u8]) -> Result<usize>;

    /// Map the record at `position` (0-based, below the last parse count)
    /// and upsert it through `tx`.
    async fn persist_at(
        &self,
        tx: &mut dyn PageTransaction,
        position: usize,
    ) -> Result<UpsertOutcome>;
}

/// Decoded records of the current page only
#[derive(Debug)]
pub struct RecordBuffer<T> {
    records: Vec<T>,
}

impl<T> Default for RecordBuffer<T> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

impl<T> RecordBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the previous page and hold `records` instead.
    pub fn replace(&mut self, records: Vec<T>) -> usize {
        self.records = records;
        self.records.len()
    }

    pub fn at(&self, position: usize) -> Result<&T> {
        self.records.get(position).ok_or(IngestError::OutOfRange {
            position,
            count: self.records.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
