//! Cross-scope merging
//!
//! Joins finalized statistics into one comparative record per (course, topic)
//! and lays the records out for the reporting front end: per year, grouped by
//! municipality, one entry per course. Also emits the per-scope documents.

use crate::accumulator::{GeneralKey, SpecificKey, YearContext};
use crate::config::ReportConfig;
use crate::directory::CourseEntry;
use crate::finalizer::ScopeStatistics;
use crate::types::{
    ComparativeRecord, CourseCode, ExamYear, FinalizedStatistic, LabeledStatistic,
    QuestionBlock, RunProvenance, ScopeKey, ScopeKind, SubjectGroupCode, TopicName,
};
use crate::{FLUX_VERSION, PRODUCER_NAME};
use chrono::Utc;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Comparative records for one block, in topic-list order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicTable(Vec<(TopicName, ComparativeRecord)>);

impl TopicTable {
    pub fn get(&self, topic: &str) -> Option<&ComparativeRecord> {
        self.0.iter().find(|(t, _)| t == topic).map(|(_, r)| r)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(t, _)| t.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for TopicTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (topic, record) in &self.0 {
            map.serialize_entry(topic, record)?;
        }
        map.end()
    }
}

/// One course's entry in a municipality document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePerformance {
    pub subject_group_code: SubjectGroupCode,
    pub course_name: String,
    #[serde(skip_serializing_if = "TopicTable::is_empty")]
    pub performance_by_topic: TopicTable,
    #[serde(skip_serializing_if = "TopicTable::is_empty")]
    pub general_performance_by_topic: TopicTable,
}

/// Comparative output of one year
#[derive(Debug, Clone, Serialize)]
pub struct ComparativeReport {
    pub provenance: RunProvenance,
    pub year: ExamYear,
    /// municipality → course code → performance
    pub municipalities: BTreeMap<String, BTreeMap<CourseCode, CoursePerformance>>,
}

/// One municipality's slice of a [`ComparativeReport`], as written to disk
#[derive(Debug, Serialize)]
pub struct MunicipalityDocument<'a> {
    pub provenance: &'a RunProvenance,
    pub year: &'a str,
    pub municipality: &'a str,
    pub courses: &'a BTreeMap<CourseCode, CoursePerformance>,
}

impl ComparativeReport {
    pub fn course_count(&self) -> usize {
        self.municipalities.values().map(BTreeMap::len).sum()
    }

    pub fn municipality_documents(&self) -> impl Iterator<Item = MunicipalityDocument<'_>> {
        self.municipalities
            .iter()
            .map(move |(municipality, courses)| MunicipalityDocument {
                provenance: &self.provenance,
                year: &self.year,
                municipality,
                courses,
            })
    }
}

/// Statistics of one scope kind and block: entry → topic → labeled statistic
///
/// Specific documents are keyed by course code at course scope and by subject
/// group elsewhere; general documents by course code or scope code.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeDocument {
    pub provenance: RunProvenance,
    pub year: ExamYear,
    pub scope: ScopeKind,
    pub block: QuestionBlock,
    pub entries: BTreeMap<String, BTreeMap<TopicName, LabeledStatistic>>,
}

impl ScopeDocument {
    pub fn file_stem(&self) -> String {
        let block = match self.block {
            QuestionBlock::Specific => "specific",
            QuestionBlock::General => "general",
        };
        format!("{}_{block}", self.scope.as_str())
    }
}

/// Builds comparative records and documents under a single run identity
pub struct CrossScopeMerger {
    run_id: String,
}

impl Default for CrossScopeMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossScopeMerger {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_run_id(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn provenance(&self) -> RunProvenance {
        RunProvenance {
            producer: PRODUCER_NAME.to_string(),
            version: FLUX_VERSION.to_string(),
            run_id: self.run_id.clone(),
            computed_at_utc: Utc::now().to_rfc3339(),
        }
    }

    /// Comparative records for one course, `None` when it has no data at all
    pub fn course_performance(
        &self,
        stats: &ScopeStatistics,
        ctx: &YearContext<'_>,
        course: &CourseEntry,
    ) -> Option<CoursePerformance> {
        let scopes = ctx.classifier.classify(course);
        let group = &course.subject_group;

        let performance_by_topic = match ctx.mappings.specific.get(group) {
            Some(mapping) => topic_table(&mapping.topics, &scopes, |scope, topic| {
                stats.specific.get(&SpecificKey {
                    scope: scope.clone(),
                    group: group.clone(),
                    topic: topic.to_string(),
                })
            }),
            None => TopicTable::default(),
        };
        let general_performance_by_topic = match &ctx.mappings.general {
            Some(mapping) => topic_table(&mapping.topics, &scopes, |scope, topic| {
                stats.general.get(&GeneralKey {
                    scope: scope.clone(),
                    topic: topic.to_string(),
                })
            }),
            None => TopicTable::default(),
        };

        if performance_by_topic.is_empty() && general_performance_by_topic.is_empty() {
            return None;
        }
        Some(CoursePerformance {
            subject_group_code: group.clone(),
            course_name: course.name.clone(),
            performance_by_topic,
            general_performance_by_topic,
        })
    }

    /// Comparative report over the reported courses of the directory
    pub fn comparative_report(
        &self,
        year: &str,
        stats: &ScopeStatistics,
        ctx: &YearContext<'_>,
        report: &ReportConfig,
    ) -> ComparativeReport {
        let target = ctx.classifier.targets().institution.as_deref();
        let mut municipalities: BTreeMap<String, BTreeMap<CourseCode, CoursePerformance>> =
            BTreeMap::new();

        for course in ctx.directory.entries() {
            if report.target_institution_only
                && target.is_some_and(|t| t != course.institution)
            {
                continue;
            }
            let Some(performance) = self.course_performance(stats, ctx, course) else {
                continue;
            };
            municipalities
                .entry(course.municipality_or_default().to_string())
                .or_default()
                .insert(course.course_code.clone(), performance);
        }

        ComparativeReport {
            provenance: self.provenance(),
            year: year.to_string(),
            municipalities,
        }
    }

    /// Per-scope documents for every scope kind that holds data
    pub fn scope_documents(&self, year: &str, stats: &ScopeStatistics) -> Vec<ScopeDocument> {
        let mut specific: BTreeMap<ScopeKind, BTreeMap<String, BTreeMap<TopicName, LabeledStatistic>>> =
            BTreeMap::new();
        for (key, stat) in &stats.specific {
            let kind = key.scope.kind();
            let entry = match &key.scope {
                ScopeKey::Course(code) => code.clone(),
                _ => key.group.clone(),
            };
            specific
                .entry(kind)
                .or_default()
                .entry(entry)
                .or_default()
                .insert(key.topic.clone(), stat.labeled(kind));
        }

        let mut general: BTreeMap<ScopeKind, BTreeMap<String, BTreeMap<TopicName, LabeledStatistic>>> =
            BTreeMap::new();
        for (key, stat) in &stats.general {
            let kind = key.scope.kind();
            let entry = key.scope.code().unwrap_or(kind.label()).to_string();
            general
                .entry(kind)
                .or_default()
                .entry(entry)
                .or_default()
                .insert(key.topic.clone(), stat.labeled(kind));
        }

        let provenance = self.provenance();
        let documents = |block: QuestionBlock, by_kind: BTreeMap<ScopeKind, _>| {
            by_kind
                .into_iter()
                .map(|(scope, entries)| ScopeDocument {
                    provenance: provenance.clone(),
                    year: year.to_string(),
                    scope,
                    block,
                    entries,
                })
                .collect::<Vec<_>>()
        };

        let mut all = documents(QuestionBlock::Specific, specific);
        all.extend(documents(QuestionBlock::General, general));
        all
    }
}

fn topic_table<'s>(
    topics: &[TopicName],
    scopes: &[ScopeKey],
    lookup: impl Fn(&ScopeKey, &str) -> Option<&'s FinalizedStatistic>,
) -> TopicTable {
    let mut seen = BTreeSet::new();
    let mut rows = Vec::new();

    for topic in topics {
        if !seen.insert(topic.as_str()) {
            continue;
        }
        let mut record = ComparativeRecord::default();
        for scope in scopes {
            record.set(scope.kind(), lookup(scope, topic).copied());
        }
        if !record.is_empty() {
            rows.push((topic.clone(), record));
        }
    }
    TopicTable(rows)
}
