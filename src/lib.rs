//! Competency Flux - Aggregation engine for exam competency performance
//!
//! Flux turns per-respondent exam microdata into hierarchical competency
//! statistics through a deterministic pipeline: mapping resolution → response
//! decoding → scope classification → streaming accumulation → finalization →
//! cross-scope merging.
//!
//! ## Modules
//!
//! - **Aggregation**: Course, institution, state, region and nation statistics per topic
//! - **Coverage**: How many questions probe each topic, from the mappings alone

pub mod accumulator;
pub mod config;
pub mod coverage;
pub mod decoder;
pub mod directory;
pub mod error;
pub mod finalizer;
pub mod mapping;
pub mod merger;
pub mod pipeline;
pub mod schema;
pub mod scope;
pub mod types;

pub use accumulator::{PartitionAccumulator, RunTally, TopicAccumulator, YearContext};
pub use config::RunConfig;
pub use coverage::{CoverageAnalyzer, CoverageReport};
pub use decoder::ResponseDecoder;
pub use directory::{CourseDirectory, CourseEntry};
pub use error::{ComputeError, MalformedSignal};
pub use finalizer::{ScopeStatistics, StatisticFinalizer};
pub use mapping::{MappingStore, ResolvedMapping, YearMappings};
pub use merger::{ComparativeReport, CrossScopeMerger};
pub use pipeline::{AggregationRun, CsvFileSource, Partition, RespondentSource, YearOutcome};
pub use scope::ScopeClassifier;

/// Flux version embedded in all emitted documents
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for emitted documents
pub const PRODUCER_NAME: &str = "competency-flux";
