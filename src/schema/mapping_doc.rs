//! Question→topic mapping documents
//!
//! Two document shapes feed the mapping store:
//!
//! - a subject collection, keyed by subject group code:
//!   `{group: {topicList: [...], perYear: {year: {objective: {...}, discursive: {...}}}}}`
//! - a general document, keyed by year:
//!   `{year: {topicList: [...], objective: {...}, discursive: {...}}}`
//!
//! Question maps associate a question key (`"q9"`, `"d3"`) with one or more
//! 1-based topic indices. Indices appear as integers or numeric strings, alone
//! or in a list.

use crate::error::MalformedSignal;
use crate::types::{ExamYear, SubjectGroupCode, TopicName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Question key → referenced topics
pub type QuestionMap = BTreeMap<String, TopicRefs>;

/// A single raw topic index as written in the source documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawIndex {
    Int(i64),
    Text(String),
}

impl RawIndex {
    /// Convert to a 0-based position inside a topic list of `len` entries
    pub fn position(&self, len: usize) -> Result<usize, MalformedSignal> {
        let one_based = match self {
            RawIndex::Int(i) => *i,
            RawIndex::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| MalformedSignal::NonNumericTopicIndex)?,
        };
        if one_based >= 1 && (one_based as u64) <= len as u64 {
            Ok((one_based - 1) as usize)
        } else {
            Err(MalformedSignal::TopicIndexOutOfRange)
        }
    }
}

impl From<i64> for RawIndex {
    fn from(i: i64) -> Self {
        RawIndex::Int(i)
    }
}

/// One or many topic indices for a question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicRefs {
    One(RawIndex),
    Many(Vec<RawIndex>),
}

impl TopicRefs {
    pub fn iter(&self) -> impl Iterator<Item = &RawIndex> {
        match self {
            TopicRefs::One(index) => std::slice::from_ref(index).iter(),
            TopicRefs::Many(indices) => indices.iter(),
        }
    }
}

impl From<i64> for TopicRefs {
    fn from(i: i64) -> Self {
        TopicRefs::One(RawIndex::Int(i))
    }
}

impl From<Vec<i64>> for TopicRefs {
    fn from(v: Vec<i64>) -> Self {
        TopicRefs::Many(v.into_iter().map(RawIndex::Int).collect())
    }
}

/// Objective and discursive tables for one exam year
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearTables {
    #[serde(default)]
    pub objective: QuestionMap,
    #[serde(default)]
    pub discursive: QuestionMap,
}

/// Topic taxonomy and per-year tables for one subject group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMappingDocument {
    pub topic_list: Vec<TopicName>,
    #[serde(default)]
    pub per_year: BTreeMap<ExamYear, YearTables>,
}

/// General-topic taxonomy and tables for one exam year
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralYearDocument {
    pub topic_list: Vec<TopicName>,
    #[serde(default)]
    pub objective: QuestionMap,
    #[serde(default)]
    pub discursive: QuestionMap,
}

/// All subject mapping documents, keyed by subject group
pub type SubjectMappingCollection = BTreeMap<SubjectGroupCode, SubjectMappingDocument>;

/// All general mapping documents, keyed by year
pub type GeneralMappingCollection = BTreeMap<ExamYear, GeneralYearDocument>;

/// Extract the ordinal encoded in a question key (`"q12"` → 12)
pub fn question_ordinal(key: &str) -> Option<u32> {
    let mut chars = key.trim().chars();
    chars.next()?;
    chars.as_str().parse().ok()
}
