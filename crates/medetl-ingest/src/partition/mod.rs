//! Date-partitioned output: layout, Parquet encoding, manifests, publish

use chrono::{Datelike, NaiveDate};
use std::fmt;
use uuid::Uuid;

use crate::models::SourceKind;

pub mod manifest;
pub mod columnar;
pub mod writer;

pub use manifest::{DataFile, Manifest, ManifestReader, MANIFEST_VERSION};
pub use columnar::PartitionRow;
pub use writer::{partition_checksum, PartitionWriter, PublishContext, StagedPartition};

pub const MANIFEST_FILE: &str = "_MANIFEST.json";
pub const LOCK_FILE: &str = "_MANIFEST.lock";
pub const QUARANTINE_FILE: &str = "quarantine.jsonl";

/// Identity of one output partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub source: SourceKind,
    pub logical_date: NaiveDate,
}

impl PartitionKey {
    pub fn new(source: SourceKind, logical_date: NaiveDate) -> Self {
        Self {
            source,
            logical_date,
        }
    }

    /// `<source>/year=YYYY/month=MM/day=DD`
    pub fn prefix(&self) -> String {
        format!(
            "{}/year={:04}/month={:02}/day={:02}",
            self.source.slug(),
            self.logical_date.year(),
            self.logical_date.month(),
            self.logical_date.day()
        )
    }

    pub fn manifest_key(&self) -> String {
        format!("{}/{}", self.prefix(), MANIFEST_FILE)
    }

    pub fn lock_key(&self) -> String {
        format!("{}/{}", self.prefix(), LOCK_FILE)
    }

    /// Data files are named by run and content so a re-run never overwrites
    /// the file a live manifest points at.
    pub fn data_key(&self, run_id: Uuid, checksum: &str) -> String {
        let short = checksum.get(..16).unwrap_or(checksum);
        format!("{}/run_id={}/part-{}.parquet", self.prefix(), run_id, short)
    }

    pub fn quarantine_key(&self, run_id: Uuid) -> String {
        format!("{}/run_id={}/{}", self.prefix(), run_id, QUARANTINE_FILE)
    }

    pub fn checkpoint_prefix(&self) -> String {
        format!("{}/_checkpoints/{}", self.source.slug(), self.logical_date)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.logical_date)
    }
}

/// `<source>/_staging`
pub fn staging_root(source: SourceKind) -> String {
    format!("{}/_staging", source.slug())
}

/// `<source>/_staging/run_id=<id>`
pub fn staging_prefix(source: SourceKind, run_id: Uuid) -> String {
    format!("{}/run_id={}", staging_root(source), run_id)
}

pub fn staging_key(source: SourceKind, run_id: Uuid) -> String {
    format!("{}/part-00000.parquet", staging_prefix(source, run_id))
}
