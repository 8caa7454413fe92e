//! medetl Ingest
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Extract → normalize → validate → publish pipeline for openFDA drug
//! adverse events and ClinicalTrials.gov studies.
//!
//! # Overview
//!
//! - [`source`]: paginated, rate-limited, retrying upstream clients
//! - [`normalize`]: versioned mapping into [`CanonicalRecord`]s with deterministic ids
//! - [`quality`]: pluggable rule set and the batch quarantine gate
//! - [`partition`]: Parquet partitions published behind an atomic manifest
//! - [`coordinator`]: one run per logical date, with page checkpoints
//! - [`summary`]: per-drug roll-up linking adverse events to trials
//!
//! # Example
//!
//! ```no_run
//! use medetl_ingest::{PipelineConfig, PipelineCoordinator, SourceKind};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> medetl_ingest::Result<()> {
//! let coordinator = PipelineCoordinator::from_config(PipelineConfig::default()).await?;
//! let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//! let result = coordinator
//!     .run(&SourceKind::ALL, date, &CancellationToken::new())
//!     .await;
//! println!("{:?}: {:?}", result.status, result.manifest_uris());
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod monitor;
pub mod normalize;
pub mod partition;
pub mod quality;
pub mod retry;
pub mod source;
pub mod storage;
pub mod summary;

pub use config::{PipelineConfig, SourceEndpoints};
pub use coordinator::{PipelineCoordinator, PipelineStores, RunResult, RunStatus, SourceOutcome, SourceStatus};
pub use error::{ErrorKind, PipelineError, Result};
pub use models::{CanonicalRecord, DateWindow, FieldValue, Provenance, RawPage, SourceKind};
pub use partition::{Manifest, ManifestReader, PartitionKey, PartitionWriter};
pub use quality::{BatchReport, BatchStatus, QualityGate, QualityVerdict};
