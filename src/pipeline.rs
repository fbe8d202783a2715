//! Pipeline orchestration
//!
//! This module provides the public API for Competency Flux.
//! It drives one exam year from respondent partitions to comparative records.
//!
//! Pipeline stages:
//! 1. MappingStore - Resolve every mapping for the year once
//! 2. RespondentBatches - Stream each partition in bounded batches
//! 3. PartitionAccumulator - Decode, classify and accumulate per partition
//! 4. Merge - Fold surviving partitions together key by key
//! 5. StatisticFinalizer - Round running sums into statistics
//! 6. CrossScopeMerger - Assemble comparative records and documents

use crate::accumulator::{PartitionAccumulator, RunTally, YearContext};
use crate::config::RunConfig;
use crate::directory::CourseDirectory;
use crate::error::ComputeError;
use crate::finalizer::{ScopeStatistics, StatisticFinalizer};
use crate::mapping::{MappingStore, YearMappings};
use crate::merger::{ComparativeReport, CrossScopeMerger, ScopeDocument};
use crate::schema::RespondentBatches;
use crate::scope::ScopeClassifier;
use crate::types::{ExamYear, RunProvenance};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread;

/// Anything a respondent table can be read from
pub trait RespondentSource: Send + Sync {
    /// Human-readable identity for logs and reports
    fn describe(&self) -> String;

    fn open(&self) -> Result<Box<dyn Read + Send + '_>, ComputeError>;
}

/// Respondent table on disk
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RespondentSource for CsvFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> Result<Box<dyn Read + Send + '_>, ComputeError> {
        let file = std::fs::File::open(&self.path).map_err(|e| ComputeError::io(&self.path, e))?;
        Ok(Box::new(std::io::BufReader::new(file)))
    }
}

/// Respondent table held in memory
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct InMemorySource {
    name: String,
    content: Vec<u8>,
}

#[cfg(test)]
impl InMemorySource {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
impl RespondentSource for InMemorySource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> Result<Box<dyn Read + Send + '_>, ComputeError> {
        Ok(Box::new(self.content.as_slice()))
    }
}

/// One institution × year unit of input, possibly split over several tables
pub struct Partition {
    pub name: String,
    pub sources: Vec<Box<dyn RespondentSource>>,
}

impl Partition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl RespondentSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

/// A partition discarded because one of its sources could not be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPartition {
    pub partition: String,
    pub error: String,
}

/// Everything computed for one exam year
#[derive(Debug, Clone)]
pub struct YearOutcome {
    pub year: ExamYear,
    pub mappings: YearMappings,
    pub statistics: ScopeStatistics,
    pub tally: RunTally,
    pub processed_partitions: Vec<String>,
    pub failed_partitions: Vec<FailedPartition>,
}

impl YearOutcome {
    /// True when at least one partition survived
    pub fn has_data(&self) -> bool {
        !self.processed_partitions.is_empty()
    }
}

/// Run summary for one year, written next to the year's documents
#[derive(Debug, Clone, Serialize)]
pub struct YearSummary {
    pub provenance: RunProvenance,
    pub year: ExamYear,
    pub tally: RunTally,
    pub processed_partitions: Vec<String>,
    pub failed_partitions: Vec<FailedPartition>,
    pub reported_courses: usize,
}

/// Documents produced for one year
#[derive(Debug, Clone)]
pub struct YearReport {
    pub comparative: ComparativeReport,
    pub scopes: Vec<ScopeDocument>,
    pub summary: YearSummary,
}

/// Stateful driver for a multi-year aggregation run.
///
/// Holds the run-wide inputs (configuration, mappings, directory) and a single
/// run identity shared by every emitted document.
pub struct AggregationRun {
    config: RunConfig,
    store: MappingStore,
    directory: CourseDirectory,
    classifier: ScopeClassifier,
    merger: CrossScopeMerger,
}

impl AggregationRun {
    pub fn new(config: RunConfig, store: MappingStore, directory: CourseDirectory) -> Self {
        let classifier = ScopeClassifier::new(config.targets.clone());
        Self {
            config,
            store,
            directory,
            classifier,
            merger: CrossScopeMerger::new(),
        }
    }

    /// Replace the run identity, e.g. to make output reproducible
    pub fn with_merger(mut self, merger: CrossScopeMerger) -> Self {
        self.merger = merger;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    pub fn run_id(&self) -> &str {
        self.merger.run_id()
    }

    pub fn provenance(&self) -> RunProvenance {
        self.merger.provenance()
    }

    /// Aggregate one exam year.
    ///
    /// # Arguments
    /// * `year` - Exam year, used to pick mappings and layout
    /// * `partitions` - Respondent partitions for that year
    ///
    /// # Returns
    /// Finalized statistics over every partition that was read completely.
    /// Partitions that fail are listed in `failed_partitions` and contribute
    /// nothing.
    ///
    /// # Example
    /// ```ignore
    /// let run = AggregationRun::new(config, store, directory);
    /// let outcome = run.run_year("2021", &partitions);
    /// let report = run.build_report(&outcome);
    /// ```
    pub fn run_year(&self, year: &str, partitions: &[Partition]) -> YearOutcome {
        let layout = self.config.layout_for(year);
        let mappings = YearMappings::resolve(&self.store, year, &layout);
        let ctx = YearContext {
            mappings: &mappings,
            directory: &self.directory,
            classifier: &self.classifier,
        };

        tracing::info!(year, partitions = partitions.len(), workers = self.config.workers, "aggregating year");
        let results = self.process_partitions(partitions, &ctx);

        let mut merged = PartitionAccumulator::new();
        let mut processed_partitions = Vec::new();
        let mut failed_partitions = Vec::new();
        for (partition, result) in partitions.iter().zip(results) {
            match result {
                Ok(acc) => {
                    merged.merge(acc);
                    processed_partitions.push(partition.name.clone());
                }
                Err(e) => {
                    tracing::warn!(year, partition = %partition.name, error = %e, "partition discarded");
                    failed_partitions.push(FailedPartition {
                        partition: partition.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        for (group, skipped) in &merged.tally.skipped_missing_mapping {
            tracing::warn!(year, group = %group, records = skipped, "no mapping for subject group");
        }
        tracing::info!(
            year,
            records = merged.tally.records_seen,
            orphaned = merged.tally.orphaned,
            malformed = merged.tally.malformed_total(),
            failed = failed_partitions.len(),
            "year aggregated"
        );

        YearOutcome {
            year: year.to_string(),
            statistics: StatisticFinalizer::finalize_all(&merged),
            tally: merged.tally,
            mappings,
            processed_partitions,
            failed_partitions,
        }
    }

    /// Process partitions on up to `workers` scoped threads; results keep input order
    fn process_partitions(
        &self,
        partitions: &[Partition],
        ctx: &YearContext<'_>,
    ) -> Vec<Result<PartitionAccumulator, ComputeError>> {
        // Even a single worker runs on its own thread so a panic stays contained
        let workers = self.config.workers.clamp(1, partitions.len().max(1));

        let mut results: Vec<Option<Result<PartitionAccumulator, ComputeError>>> = Vec::new();
        results.resize_with(partitions.len(), || None);

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let indices: Vec<usize> = (worker..partitions.len()).step_by(workers).collect();
                    let handle = scope.spawn({
                        let indices = indices.clone();
                        move || {
                            indices
                                .into_iter()
                                .map(|i| (i, self.process_partition(&partitions[i], ctx)))
                                .collect::<Vec<_>>()
                        }
                    });
                    (indices, handle)
                })
                .collect();

            for (indices, handle) in handles {
                match handle.join() {
                    Ok(done) => {
                        for (i, result) in done {
                            results[i] = Some(result);
                        }
                    }
                    Err(_) => {
                        for i in indices {
                            results[i] = Some(Err(ComputeError::WorkerPanicked(format!(
                                "partition {}",
                                partitions[i].name
                            ))));
                        }
                    }
                }
            }
        });

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(ComputeError::WorkerPanicked("partition was not processed".into())))
            })
            .collect()
    }

    /// Accumulate one partition; any source failure discards the whole partition
    fn process_partition(
        &self,
        partition: &Partition,
        ctx: &YearContext<'_>,
    ) -> Result<PartitionAccumulator, ComputeError> {
        let prefixes = self.config.score_prefixes();
        let mut acc = PartitionAccumulator::new();

        for source in &partition.sources {
            let reader = source.open()?;
            let mut batches =
                RespondentBatches::new(reader, &self.config.table, &prefixes, self.config.batch_size)?;
            for batch in batches.by_ref() {
                let batch = batch?;
                acc.ingest_batch(&batch, ctx);
                tracing::debug!(
                    partition = %partition.name,
                    source = %source.describe(),
                    rows = batch.len(),
                    "batch ingested"
                );
            }
            tracing::debug!(
                partition = %partition.name,
                source = %source.describe(),
                rows = batches.rows_read(),
                "source exhausted"
            );
        }

        tracing::info!(partition = %partition.name, records = acc.tally.records_seen, "partition aggregated");
        Ok(acc)
    }

    /// Build the year's documents; `None` when no partition survived
    pub fn build_report(&self, outcome: &YearOutcome) -> Option<YearReport> {
        if !outcome.has_data() {
            tracing::warn!(year = %outcome.year, "no partition survived; no documents emitted");
            return None;
        }

        let ctx = YearContext {
            mappings: &outcome.mappings,
            directory: &self.directory,
            classifier: &self.classifier,
        };
        let comparative = self.merger.comparative_report(
            &outcome.year,
            &outcome.statistics,
            &ctx,
            &self.config.report,
        );
        let scopes = self.merger.scope_documents(&outcome.year, &outcome.statistics);
        let summary = YearSummary {
            provenance: self.merger.provenance(),
            year: outcome.year.clone(),
            tally: outcome.tally.clone(),
            processed_partitions: outcome.processed_partitions.clone(),
            failed_partitions: outcome.failed_partitions.clone(),
            reported_courses: comparative.course_count(),
        };

        Some(YearReport {
            comparative,
            scopes,
            summary,
        })
    }
}
