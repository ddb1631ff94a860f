//! Import pipeline: TMX file → bounded batches → store.
//!
//! Units are pulled from the streaming reader, grouped by the chunker and
//! handed to [`CandidateStore::insert_batch`] one batch at a time, so memory
//! is bounded by `chunk_size` regardless of the input size.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::chunk::chunk;
use crate::progress::{JobProgressEvent, ProgressReporter};
use crate::store::CandidateStore;
use crate::tmx::{ParseOptions, ParseReport, TmxReader};

/// Counters for one import run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportSummary {
    pub units_read: u64,
    pub units_stored: u64,
    pub batches: u64,
    pub parse: ParseReport,
}

pub async fn run_import(
    store: &dyn CandidateStore,
    path: &Path,
    options: ParseOptions,
    chunk_size: usize,
    progress: &dyn ProgressReporter,
) -> Result<ImportSummary> {
    let job = format!("import {}", path.display());
    progress.report(JobProgressEvent::Scanning { job: job.clone() });

    let mut units = TmxReader::new(path)
        .with_options(options)
        .parse()
        .with_context(|| format!("Failed to open TMX input: {}", path.display()))?;

    let mut summary = ImportSummary::default();
    for batch in chunk(units.by_ref(), chunk_size) {
        summary.units_read += batch.len() as u64;
        let stored = store
            .insert_batch(batch)
            .await
            .context("Failed to store imported units")?;
        summary.units_stored += stored as u64;
        summary.batches += 1;
        progress.report(JobProgressEvent::Processing {
            job: job.clone(),
            n: summary.units_read,
            total: None,
        });
    }
    summary.parse = units.report().clone();

    if !summary.parse.is_clean() {
        bail!(
            "TMX input {} is broken: could not read {} (stored {} units before failing)",
            path.display(),
            summary.parse.failed_documents.join(", "),
            summary.units_stored
        );
    }

    tracing::info!(
        path = %path.display(),
        read = summary.units_read,
        stored = summary.units_stored,
        skipped = summary.parse.skipped_records,
        "import finished"
    );
    Ok(summary)
}
