//! Run configuration
//!
//! Settings resolve in priority order:
//! 1. Command-line flags (applied by the caller)
//! 2. Environment variables (`FLUX_BATCH_SIZE`, `FLUX_WORKERS`)
//! 3. TOML config file
//! 4. Compiled defaults

use crate::error::ComputeError;
use crate::types::{ExamYear, SubjectGroupCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Rows per batch, matching the chunk size the source tables were sized for
pub const DEFAULT_BATCH_SIZE: usize = 500_000;

pub const BATCH_SIZE_ENV: &str = "FLUX_BATCH_SIZE";
pub const WORKERS_ENV: &str = "FLUX_WORKERS";

/// Column layout of respondent tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub delimiter: char,
    pub course_column: String,
    pub general_answers_column: String,
    pub specific_answers_column: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            delimiter: ';',
            course_column: "CO_CURSO".to_string(),
            general_answers_column: "DS_VT_ACE_OFG".to_string(),
            specific_answers_column: "DS_VT_ACE_OCE".to_string(),
        }
    }
}

impl TableConfig {
    pub fn delimiter_byte(&self) -> Result<u8, ComputeError> {
        if self.delimiter.is_ascii() {
            Ok(self.delimiter as u8)
        } else {
            Err(ComputeError::Config(format!(
                "delimiter {:?} is not ASCII",
                self.delimiter
            )))
        }
    }
}

/// Position and field conventions of one question block in one exam year
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLayout {
    /// Ordinal of the question stored at string index 0
    pub objective_base: u32,
    /// Answer strings shorter than this are skipped as a whole
    pub min_answer_len: usize,
    /// Score column prefix, e.g. `NT_CE_D`
    pub score_prefix: String,
    /// Subtracted from a discursive ordinal to get the score column suffix
    pub discursive_base: u32,
}

impl BlockLayout {
    pub fn general_default() -> Self {
        Self {
            objective_base: 1,
            min_answer_len: 8,
            score_prefix: "NT_FG_D".to_string(),
            discursive_base: 0,
        }
    }

    pub fn specific_default() -> Self {
        Self {
            objective_base: 9,
            min_answer_len: 27,
            score_prefix: "NT_CE_D".to_string(),
            discursive_base: 2,
        }
    }
}

/// Encoding layout of one exam year
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamLayout {
    #[serde(default = "BlockLayout::general_default")]
    pub general: BlockLayout,
    #[serde(default = "BlockLayout::specific_default")]
    pub specific: BlockLayout,
}

impl Default for ExamLayout {
    fn default() -> Self {
        Self {
            general: BlockLayout::general_default(),
            specific: BlockLayout::specific_default(),
        }
    }
}

/// The reference populations reported against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetScopes {
    pub region: Option<String>,
    pub state: Option<String>,
    pub institution: Option<String>,
    /// When set, only these subject groups feed aggregate scopes
    pub relevant_groups: Option<BTreeSet<SubjectGroupCode>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Only emit comparative records for the target institution's courses
    pub target_institution_only: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            target_institution_only: true,
        }
    }
}

/// Complete configuration for one aggregation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub years: Vec<ExamYear>,
    pub batch_size: usize,
    pub workers: usize,
    pub targets: TargetScopes,
    pub table: TableConfig,
    pub report: ReportConfig,
    /// `"default"` plus optional per-year overrides
    pub layouts: BTreeMap<String, ExamLayout>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            years: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 1,
            targets: TargetScopes::default(),
            table: TableConfig::default(),
            report: ReportConfig::default(),
            layouts: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ComputeError> {
        let mut config = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| ComputeError::io(path, e))?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ComputeError> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) -> Result<(), ComputeError> {
        if let Ok(value) = std::env::var(BATCH_SIZE_ENV) {
            self.batch_size = parse_env(BATCH_SIZE_ENV, &value)?;
        }
        if let Ok(value) = std::env::var(WORKERS_ENV) {
            self.workers = parse_env(WORKERS_ENV, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.batch_size == 0 {
            return Err(ComputeError::Config("batch_size must be positive".into()));
        }
        if self.workers == 0 {
            return Err(ComputeError::Config("workers must be positive".into()));
        }
        self.table.delimiter_byte()?;
        Ok(())
    }

    /// Layout for a year: its own override, else `default`, else built-ins
    pub fn layout_for(&self, year: &str) -> ExamLayout {
        self.layouts
            .get(year)
            .or_else(|| self.layouts.get("default"))
            .cloned()
            .unwrap_or_default()
    }

    /// Every score column prefix any layout may read
    pub fn score_prefixes(&self) -> Vec<String> {
        let mut prefixes: BTreeSet<String> = BTreeSet::new();
        let defaults = ExamLayout::default();
        for layout in self.layouts.values().chain(std::iter::once(&defaults)) {
            prefixes.insert(layout.general.score_prefix.clone());
            prefixes.insert(layout.specific.score_prefix.clone());
        }
        prefixes.into_iter().collect()
    }
}

fn parse_env(name: &str, value: &str) -> Result<usize, ComputeError> {
    value
        .trim()
        .parse()
        .map_err(|_| ComputeError::Config(format!("{name}={value:?} is not a positive integer")))
}
