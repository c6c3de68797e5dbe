//! Datasets and the dataset loader
//!
//! A dataset is an ordered plan of record sources. The loader makes sure
//! every table the plan writes to exists, then fetches each source either
//! one after another or as concurrent tasks.

pub mod exam_results;
pub mod postcodes;
pub mod schools;

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, Instrument};

use crate::config::{LoadMode, SourceUrls};
use crate::engine::{FetchMode, FetchReport, PageFetcher};
use crate::error::{IngestError, Result};
use crate::source::RecordSource;
use crate::store::TableSchema;

pub use exam_results::{ExamResult, ExamResultSource};
pub use postcodes::{
    PostcodeArea, PostcodeAreaSource, PostcodeDistrict, PostcodeDistrictSource, PostcodeSector,
    PostcodeSectorSource, PostcodeSource, PostcodeUnit, PostcodeUnitSource,
};
pub use schools::{LocalAuthority, School, SchoolSource};

/// Named dataset selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Postcodes,
    Schools,
    ExamResults,
}

impl Dataset {
    pub const ALL: [Dataset; 3] = [Dataset::Postcodes, Dataset::Schools, Dataset::ExamResults];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Postcodes => "postcodes",
            Dataset::Schools => "schools",
            Dataset::ExamResults => "exam-results",
        }
    }

    /// Record sources of this dataset, in load order.
    ///
    /// Postcode districts and sectors load before units so that unit parent
    /// references usually point at rows that already exist. Nothing relies
    /// on it: references are plain indexed columns, not foreign keys.
    pub fn plan(&self, urls: &SourceUrls) -> Vec<SourcePlan> {
        match self {
            Dataset::Postcodes => vec![
                SourcePlan::paginated(PostcodeDistrictSource::from_urls(urls)),
                SourcePlan::paginated(PostcodeSectorSource::from_urls(urls)),
                SourcePlan::paginated(PostcodeAreaSource::from_urls(urls)),
                SourcePlan::paginated(PostcodeUnitSource::from_urls(urls)),
            ],
            Dataset::Schools => vec![SourcePlan::bulk(SchoolSource::new(urls.edubase.as_str()))],
            Dataset::ExamResults => vec![SourcePlan::bulk(ExamResultSource::new(
                urls.ks4_results.as_str(),
                urls.ks4_academic_year.as_str(),
            ))],
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postcode" | "postcodes" => Ok(Dataset::Postcodes),
            "school" | "schools" => Ok(Dataset::Schools),
            "exam-results" | "exams" | "ks4" => Ok(Dataset::ExamResults),
            "" => Err(IngestError::config("No data loader specified")),
            other => Err(IngestError::config(format!(
                "Unknown data loader '{}' (expected one of: {})",
                other,
                Dataset::ALL.map(|d| d.as_str()).join(", ")
            ))),
        }
    }
}

/// One record source and how to fetch it
pub struct SourcePlan {
    pub source: Box<dyn RecordSource>,
    pub mode: FetchMode,
}

impl SourcePlan {
    pub fn paginated(source: impl RecordSource + 'static) -> Self {
        Self { source: Box::new(source), mode: FetchMode::Paginated }
    }

    pub fn bulk(source: impl RecordSource + 'static) -> Self {
        Self { source: Box::new(source), mode: FetchMode::Bulk }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub report: FetchReport,
}

/// Outcome of a whole dataset load; sources in plan order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub dataset: String,
    pub sources: Vec<SourceReport>,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.sources.iter().map(|s| s.report.total).sum()
    }
}

pub struct DatasetLoader {
    fetcher: PageFetcher,
    mode: LoadMode,
}

impl DatasetLoader {
    pub fn new(fetcher: PageFetcher, mode: LoadMode) -> Self {
        Self { fetcher, mode }
    }

    pub async fn load(&self, dataset: Dataset, urls: &SourceUrls) -> Result<LoadReport> {
        self.run(dataset.as_str(), dataset.plan(urls)).await
    }

    /// Ensure schemas, then fetch every planned source. The first failing
    /// source fails the whole load.
    pub async fn run(&self, name: &str, plans: Vec<SourcePlan>) -> Result<LoadReport> {
        self.ensure_schemas(&plans).await?;

        info!(dataset = name, sources = plans.len(), mode = ?self.mode, "Loading dataset");
        let sources = match self.mode {
            LoadMode::Sequential => self.run_sequential(plans).await?,
            LoadMode::Concurrent => self.run_concurrent(plans).await?,
        };

        let report = LoadReport { dataset: name.to_string(), sources };
        info!(dataset = name, total = report.total(), "Dataset loaded");
        Ok(report)
    }

    async fn ensure_schemas(&self, plans: &[SourcePlan]) -> Result<()> {
        let mut seen = HashSet::new();
        let schemas: Vec<&'static TableSchema> = plans
            .iter()
            .flat_map(|plan| plan.source.schemas())
            .filter(|schema| seen.insert(schema.table))
            .collect();

        for schema in schemas {
            self.fetcher.store().ensure_schema(schema).await?;
        }
        Ok(())
    }

    async fn run_sequential(&self, plans: Vec<SourcePlan>) -> Result<Vec<SourceReport>> {
        let mut reports = Vec::with_capacity(plans.len());

        for SourcePlan { mut source, mode } in plans {
            let report = self.fetcher.fetch(source.as_mut(), mode).await.inspect_err(|e| {
                error!(source = source.name(), error = %e, "Source failed, aborting load");
            })?;
            reports.push(SourceReport { name: source.name().to_string(), report });
        }

        Ok(reports)
    }

    /// One task per source. Every task runs to completion; the first error
    /// to arrive is returned once all have finished. Pages a task committed
    /// before a peer failed stay committed.
    async fn run_concurrent(&self, plans: Vec<SourcePlan>) -> Result<Vec<SourceReport>> {
        let names: Vec<String> = plans.iter().map(|plan| plan.source.name().to_string()).collect();
        let mut tasks = JoinSet::new();

        for (index, SourcePlan { mut source, mode }) in plans.into_iter().enumerate() {
            let fetcher = self.fetcher.clone();
            let span = info_span!("source_task", source = %names[index]);
            tasks.spawn(
                async move {
                    let result = fetcher.fetch(source.as_mut(), mode).await;
                    (index, result)
                }
                .instrument(span),
            );
        }

        let mut reports: Vec<Option<FetchReport>> = vec![None; names.len()];
        let mut first_error = None;

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((index, Ok(report))) => {
                    reports[index] = Some(report);
                    continue;
                },
                Ok((index, Err(e))) => {
                    error!(source = %names[index], error = %e, "Source failed");
                    e
                },
                Err(join_error) => {
                    error!(error = %join_error, "Source task did not complete");
                    IngestError::from(join_error)
                },
            };
            first_error.get_or_insert(outcome);
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        names
            .into_iter()
            .zip(reports)
            .map(|(name, report)| {
                report
                    .map(|report| SourceReport { name: name.clone(), report })
                    .ok_or_else(|| IngestError::Task(format!("{} produced no report", name)))
            })
            .collect()
    }
}
