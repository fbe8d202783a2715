//! Error types for Competency Flux
//!
//! Two families live here: [`ComputeError`] aborts a unit of work (a mapping
//! table, a partition, a configuration load), while [`MalformedSignal`] marks a
//! single dropped signal and never stops processing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a unit of computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Missing mapping for subject group {group} in year {year}")]
    MissingMapping { group: String, year: String },

    #[error("Missing general mapping for year {0}")]
    MissingGeneralMapping(String),

    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

impl ComputeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ComputeError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A recoverable defect affecting exactly one signal.
///
/// The first three kinds come from respondent data and are counted per
/// occurrence. The rest are mapping-table defects found while resolving a
/// mapping; they are logged once and the affected question/topic pair is
/// never decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum MalformedSignal {
    #[error("answer string shorter than question offset")]
    AnswerTooShort,

    #[error("discursive score is not numeric")]
    NonNumericScore,

    #[error("discursive score outside the supported range")]
    ScoreOutOfRange,

    #[error("question key does not encode an ordinal")]
    InvalidQuestionKey,

    #[error("question ordinal precedes the block base")]
    OrdinalBelowBase,

    #[error("topic index outside the topic list")]
    TopicIndexOutOfRange,

    #[error("topic index is not an integer")]
    NonNumericTopicIndex,
}

impl MalformedSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            MalformedSignal::AnswerTooShort => "answer_too_short",
            MalformedSignal::NonNumericScore => "non_numeric_score",
            MalformedSignal::ScoreOutOfRange => "score_out_of_range",
            MalformedSignal::InvalidQuestionKey => "invalid_question_key",
            MalformedSignal::OrdinalBelowBase => "ordinal_below_base",
            MalformedSignal::TopicIndexOutOfRange => "topic_index_out_of_range",
            MalformedSignal::NonNumericTopicIndex => "non_numeric_topic_index",
        }
    }
}
