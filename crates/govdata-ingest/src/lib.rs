//! govdata ingest library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads open-government reference datasets into Postgres, keyed by the
//! natural identifiers the publishers use.
//!
//! # Supported Datasets
//!
//! - **Postcodes**: areas, districts, sectors and units from opendatacommunities.org (paginated JSON-LD)
//! - **Schools**: establishments and local authorities from the EduBase export (bulk CSV)
//! - **Exam results**: key stage 4 performance tables (bulk CSV)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use govdata_ingest::config::{DatabaseSettings, IngestConfig};
//! use govdata_ingest::datasets::{Dataset, DatasetLoader};
//! use govdata_ingest::engine::PageFetcher;
//! use govdata_ingest::store::PgRecordStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let store = PgRecordStore::connect(&DatabaseSettings::from_env()?).await?;
//!     let fetcher = PageFetcher::from_config(&config, Arc::new(store))?;
//!
//!     let report = DatasetLoader::new(fetcher, config.load_mode)
//!         .load(Dataset::Postcodes, &config.urls)
//!         .await?;
//!     println!("loaded {} records", report.total());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod datasets;
pub mod engine;
pub mod error;
pub mod http;
pub mod linked_data;
pub mod parse;
pub mod source;
pub mod store;

pub use error::{IngestError, Result};
