//! Topic coverage analysis
//!
//! Counts how many questions reference each topic in a year's mapping, so
//! curriculum reviewers can see which topics an exam probes heavily or barely.
//! Works from the mapping documents alone; no respondent data is read.

use crate::mapping::MappingStore;
use crate::schema::{question_ordinal, QuestionMap};
use crate::types::{ExamYear, SubjectGroupCode, TopicName};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Coverage of one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCoverage {
    pub topic: TopicName,
    pub total: usize,
    pub objective_questions: Vec<String>,
    pub discursive_questions: Vec<String>,
}

#[derive(Serialize)]
struct CoverageEntry<'a> {
    total: usize,
    lista_obj: &'a [String],
    lista_disc: &'a [String],
}

/// Topics ranked by descending question count, serialized as an ordered map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankedCoverage(pub Vec<TopicCoverage>);

impl Serialize for RankedCoverage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for coverage in &self.0 {
            map.serialize_entry(
                &coverage.topic,
                &CoverageEntry {
                    total: coverage.total,
                    lista_obj: &coverage.objective_questions,
                    lista_disc: &coverage.discursive_questions,
                },
            )?;
        }
        map.end()
    }
}

/// Coverage of every subject group/year and every general year
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoverageReport {
    pub specific: BTreeMap<SubjectGroupCode, BTreeMap<ExamYear, RankedCoverage>>,
    pub general: BTreeMap<ExamYear, RankedCoverage>,
}

pub struct CoverageAnalyzer;

impl CoverageAnalyzer {
    /// Rank topics by how many questions reference them
    ///
    /// Topics nobody references are left out. Ties keep topic-list order and
    /// each question list is ordered by question ordinal. Unusable indices are
    /// ignored.
    pub fn analyze(
        topics: &[TopicName],
        objective: &QuestionMap,
        discursive: &QuestionMap,
    ) -> RankedCoverage {
        let mut tallies: Vec<(Vec<String>, Vec<String>)> = vec![Default::default(); topics.len()];

        for (key, refs) in objective {
            for position in refs.iter().filter_map(|raw| raw.position(topics.len()).ok()) {
                tallies[position].0.push(key.clone());
            }
        }
        for (key, refs) in discursive {
            for position in refs.iter().filter_map(|raw| raw.position(topics.len()).ok()) {
                tallies[position].1.push(key.clone());
            }
        }

        let mut ranked: Vec<TopicCoverage> = topics
            .iter()
            .zip(tallies)
            .filter(|(_, (obj, disc))| !obj.is_empty() || !disc.is_empty())
            .map(|(topic, (mut obj, mut disc))| {
                sort_by_ordinal(&mut obj);
                sort_by_ordinal(&mut disc);
                TopicCoverage {
                    topic: topic.clone(),
                    total: obj.len() + disc.len(),
                    objective_questions: obj,
                    discursive_questions: disc,
                }
            })
            .collect();

        // Stable sort keeps topic-list order among ties
        ranked.sort_by(|a, b| b.total.cmp(&a.total));
        RankedCoverage(ranked)
    }

    /// Coverage document over the whole store
    pub fn coverage_report(store: &MappingStore) -> CoverageReport {
        let mut report = CoverageReport::default();

        for (group, doc) in store.subject_groups() {
            let years = doc
                .per_year
                .iter()
                .map(|(year, tables)| {
                    let ranked = Self::analyze(&doc.topic_list, &tables.objective, &tables.discursive);
                    (year.clone(), ranked)
                })
                .collect();
            report.specific.insert(group.clone(), years);
        }

        for (year, doc) in store.general_years() {
            let ranked = Self::analyze(&doc.topic_list, &doc.objective, &doc.discursive);
            report.general.insert(year.clone(), ranked);
        }

        report
    }
}

fn sort_by_ordinal(keys: &mut Vec<String>) {
    keys.sort_by_key(|k| (question_ordinal(k), k.clone()));
    keys.dedup();
}
