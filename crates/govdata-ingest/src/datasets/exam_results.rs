//! Key stage 4 exam results from the school performance tables
//!
//! The KS4 download is one CSV with a row per school plus summary rows for
//! local authorities and England, which have no URN and are skipped.
//! Suppressed cells (`SUPP`, `NE`, `NP`, blank) are stored as NULL.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::parse::{parse_csv, CsvRecord};
use crate::source::{RecordBuffer, RecordSource};
use crate::store::{
    upsert_entity, ColumnDef, Entity, KeyType, NaturalKey, PageTransaction, Row, TableSchema,
    UpsertOutcome, Value,
};

pub static EXAM_RESULTS: TableSchema = TableSchema {
    table: "exam_results",
    key_type: KeyType::Int,
    columns: &[
        ColumnDef::int("local_authority_id").indexed(),
        ColumnDef::text("school_name"),
        ColumnDef::text("academic_year").indexed(),
        ColumnDef::int("total_pupils"),
        ColumnDef::float("attainment_8"),
        ColumnDef::float("progress_8"),
        ColumnDef::float("ebacc_entry_pct"),
        ColumnDef::float("basics_grade_4_pct"),
    ],
};

#[derive(Debug, Clone, PartialEq)]
pub struct ExamResult {
    /// School URN
    pub id: i64,
    pub local_authority_id: Option<i64>,
    pub school_name: String,
    pub academic_year: String,
    pub total_pupils: Option<i64>,
    pub attainment_8: Option<f64>,
    pub progress_8: Option<f64>,
    pub ebacc_entry_pct: Option<f64>,
    pub basics_grade_4_pct: Option<f64>,
}

impl ExamResult {
    /// `None` for rows without a numeric URN.
    pub fn from_record(record: &CsvRecord, academic_year: &str) -> Option<Self> {
        Some(Self {
            id: record.int("URN")?,
            local_authority_id: record.int("LEA"),
            school_name: record.get("SCHNAME").to_string(),
            academic_year: academic_year.to_string(),
            total_pupils: record.int("TOTPUPS"),
            attainment_8: record.float("ATT8SCR"),
            progress_8: record.float("P8MEA"),
            ebacc_entry_pct: record.float("PTEBACC_E_PTQ_EE"),
            basics_grade_4_pct: record.float("PTL2BASICS_94"),
        })
    }
}

impl Entity for ExamResult {
    fn schema() -> &'static TableSchema {
        &EXAM_RESULTS
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Int(self.id)
    }

    fn to_row(&self) -> Row {
        Row::new(
            Self::schema(),
            self.natural_key(),
            vec![
                Value::Int(self.local_authority_id),
                self.school_name.as_str().into(),
                self.academic_year.as_str().into(),
                Value::Int(self.total_pupils),
                Value::Float(self.attainment_8),
                Value::Float(self.progress_8),
                Value::Float(self.ebacc_entry_pct),
                Value::Float(self.basics_grade_4_pct),
            ],
        )
    }
}

pub struct ExamResultSource {
    locator: String,
    academic_year: String,
    records: RecordBuffer<CsvRecord>,
}

impl ExamResultSource {
    pub fn new(locator: impl Into<String>, academic_year: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            academic_year: academic_year.into(),
            records: RecordBuffer::new(),
        }
    }
}

#[async_trait]
impl RecordSource for ExamResultSource {
    fn name(&self) -> &str {
        "exam-results"
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    fn schemas(&self) -> Vec<&'static TableSchema> {
        vec![&EXAM_RESULTS]
    }

    fn parse(&mut self, body: &[u8]) -> Result<usize> {
        Ok(self.records.replace(parse_csv(body)?))
    }

    async fn persist_at(
        &self,
        tx: &mut dyn PageTransaction,
        position: usize,
    ) -> Result<UpsertOutcome> {
        let record = self.records.at(position)?;

        match ExamResult::from_record(record, &self.academic_year) {
            Some(result) => upsert_entity(tx, &result).await,
            None => {
                debug!(position, urn = record.get("URN"), "Summary row without URN, skipping");
                Ok(UpsertOutcome::Skipped)
            },
        }
    }
}
