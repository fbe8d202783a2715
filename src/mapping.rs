//! Mapping store
//!
//! Holds the question→topic tables for every subject group and year, plus the
//! year-scoped general tables. Tables are loaded once per run and resolved into
//! immutable [`ResolvedMapping`]s that callers hand to the decoder explicitly.

use crate::config::{BlockLayout, ExamLayout};
use crate::error::{ComputeError, MalformedSignal};
use crate::schema::{
    question_ordinal, GeneralMappingCollection, GeneralYearDocument, QuestionMap,
    SubjectMappingCollection, SubjectMappingDocument,
};
use crate::types::{ExamYear, QuestionBlock, SubjectGroupCode, TopicName};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Where a question's raw signal lives in a respondent record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionSource {
    /// Index into the block's objective answer string
    Offset(usize),
    /// Name of the discursive score column
    ScoreField(String),
}

/// A question resolved against a layout and topic list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuestion {
    pub key: String,
    pub source: QuestionSource,
    /// 0-based positions into the topic list, all in range
    pub topics: Vec<usize>,
}

/// A mapping table defect found during resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingDefect {
    pub question: String,
    pub kind: MalformedSignal,
    pub detail: String,
}

/// Immutable, decoder-ready mapping for one block of one (group, year)
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMapping {
    pub block: QuestionBlock,
    pub topics: Vec<TopicName>,
    pub min_answer_len: usize,
    pub objective: Vec<ResolvedQuestion>,
    pub discursive: Vec<ResolvedQuestion>,
    pub defects: Vec<MappingDefect>,
}

impl ResolvedMapping {
    /// Resolve raw tables against a topic list and block layout
    pub fn resolve(
        block: QuestionBlock,
        topics: &[TopicName],
        objective: &QuestionMap,
        discursive: &QuestionMap,
        layout: &BlockLayout,
    ) -> Self {
        let mut defects = Vec::new();

        let objective = resolve_questions(objective, topics, &mut defects, |ordinal| {
            ordinal
                .checked_sub(layout.objective_base)
                .map(|offset| QuestionSource::Offset(offset as usize))
        });
        let discursive = resolve_questions(discursive, topics, &mut defects, |ordinal| {
            ordinal
                .checked_sub(layout.discursive_base)
                .filter(|suffix| *suffix > 0)
                .map(|suffix| QuestionSource::ScoreField(format!("{}{}", layout.score_prefix, suffix)))
        });

        Self {
            block,
            topics: topics.to_vec(),
            min_answer_len: layout.min_answer_len,
            objective,
            discursive,
            defects,
        }
    }

    pub fn topic(&self, position: usize) -> &str {
        &self.topics[position]
    }
}

fn resolve_questions(
    table: &QuestionMap,
    topics: &[TopicName],
    defects: &mut Vec<MappingDefect>,
    locate: impl Fn(u32) -> Option<QuestionSource>,
) -> Vec<ResolvedQuestion> {
    let mut resolved = Vec::with_capacity(table.len());

    for (key, refs) in table {
        let Some(ordinal) = question_ordinal(key) else {
            defects.push(MappingDefect {
                question: key.clone(),
                kind: MalformedSignal::InvalidQuestionKey,
                detail: format!("cannot read an ordinal from {key:?}"),
            });
            continue;
        };
        let Some(source) = locate(ordinal) else {
            defects.push(MappingDefect {
                question: key.clone(),
                kind: MalformedSignal::OrdinalBelowBase,
                detail: format!("ordinal {ordinal} precedes the block base"),
            });
            continue;
        };

        let mut positions = Vec::new();
        for raw in refs.iter() {
            match raw.position(topics.len()) {
                Ok(position) => positions.push(position),
                Err(kind) => defects.push(MappingDefect {
                    question: key.clone(),
                    kind,
                    detail: format!("{raw:?} against {} topics", topics.len()),
                }),
            }
        }

        if !positions.is_empty() {
            resolved.push(ResolvedQuestion {
                key: key.clone(),
                source,
                topics: positions,
            });
        }
    }

    resolved.sort_by_key(|q| question_ordinal(&q.key));
    resolved
}

/// Defects of one table, for validation reports
#[derive(Debug, Clone, Serialize)]
pub struct TableDefects {
    pub scope: String,
    pub year: ExamYear,
    pub defects: Vec<MappingDefect>,
}

/// Read-only store of every mapping document
#[derive(Debug, Clone, Default)]
pub struct MappingStore {
    subjects: SubjectMappingCollection,
    general: GeneralMappingCollection,
}

impl MappingStore {
    pub fn from_documents(
        subjects: SubjectMappingCollection,
        general: GeneralMappingCollection,
    ) -> Self {
        Self { subjects, general }
    }

    /// Load both collections from JSON files
    pub fn load(subjects_path: &Path, general_path: &Path) -> Result<Self, ComputeError> {
        let subjects: SubjectMappingCollection = read_json(subjects_path)?;
        let general: GeneralMappingCollection = read_json(general_path)?;
        tracing::info!(
            subject_groups = subjects.len(),
            general_years = general.len(),
            "loaded mapping documents"
        );
        Ok(Self::from_documents(subjects, general))
    }

    pub fn subject_groups(&self) -> impl Iterator<Item = (&SubjectGroupCode, &SubjectMappingDocument)> {
        self.subjects.iter()
    }

    pub fn general_years(&self) -> impl Iterator<Item = (&ExamYear, &GeneralYearDocument)> {
        self.general.iter()
    }

    pub fn topics_for(&self, group: &str) -> Option<&[TopicName]> {
        self.subjects.get(group).map(|doc| doc.topic_list.as_slice())
    }

    pub fn objective_mapping(&self, group: &str, year: &str) -> Result<&QuestionMap, ComputeError> {
        self.year_tables(group, year).map(|t| &t.objective)
    }

    pub fn discursive_mapping(&self, group: &str, year: &str) -> Result<&QuestionMap, ComputeError> {
        self.year_tables(group, year).map(|t| &t.discursive)
    }

    fn year_tables(&self, group: &str, year: &str) -> Result<&crate::schema::YearTables, ComputeError> {
        self.subjects
            .get(group)
            .and_then(|doc| doc.per_year.get(year))
            .ok_or_else(|| ComputeError::MissingMapping {
                group: group.to_string(),
                year: year.to_string(),
            })
    }

    pub fn general_topics(&self, year: &str) -> Result<&[TopicName], ComputeError> {
        self.general_document(year).map(|d| d.topic_list.as_slice())
    }

    pub fn general_objective_mapping(&self, year: &str) -> Result<&QuestionMap, ComputeError> {
        self.general_document(year).map(|d| &d.objective)
    }

    pub fn general_discursive_mapping(&self, year: &str) -> Result<&QuestionMap, ComputeError> {
        self.general_document(year).map(|d| &d.discursive)
    }

    fn general_document(&self, year: &str) -> Result<&GeneralYearDocument, ComputeError> {
        self.general
            .get(year)
            .ok_or_else(|| ComputeError::MissingGeneralMapping(year.to_string()))
    }

    /// Resolve the subject-specific mapping of one (group, year)
    pub fn resolve(
        &self,
        group: &str,
        year: &str,
        layout: &BlockLayout,
    ) -> Result<ResolvedMapping, ComputeError> {
        let tables = self.year_tables(group, year)?;
        let topics = self.topics_for(group).unwrap_or_default();
        let resolved = ResolvedMapping::resolve(
            QuestionBlock::Specific,
            topics,
            &tables.objective,
            &tables.discursive,
            layout,
        );
        log_defects(&format!("group {group}"), year, &resolved.defects);
        Ok(resolved)
    }

    /// Resolve the general mapping of one year
    pub fn resolve_general(
        &self,
        year: &str,
        layout: &BlockLayout,
    ) -> Result<ResolvedMapping, ComputeError> {
        let doc = self.general_document(year)?;
        let resolved = ResolvedMapping::resolve(
            QuestionBlock::General,
            &doc.topic_list,
            &doc.objective,
            &doc.discursive,
            layout,
        );
        log_defects("general", year, &resolved.defects);
        Ok(resolved)
    }

    /// Data-quality report over every table, resolved with `layout_for(year)`
    pub fn validate(&self, layout_for: impl Fn(&str) -> ExamLayout) -> Vec<TableDefects> {
        let mut report = Vec::new();

        for (group, doc) in &self.subjects {
            for (year, tables) in &doc.per_year {
                let layout = layout_for(year);
                let resolved = ResolvedMapping::resolve(
                    QuestionBlock::Specific,
                    &doc.topic_list,
                    &tables.objective,
                    &tables.discursive,
                    &layout.specific,
                );
                if !resolved.defects.is_empty() {
                    report.push(TableDefects {
                        scope: group.clone(),
                        year: year.clone(),
                        defects: resolved.defects,
                    });
                }
            }
        }

        for (year, doc) in &self.general {
            let layout = layout_for(year);
            let resolved = ResolvedMapping::resolve(
                QuestionBlock::General,
                &doc.topic_list,
                &doc.objective,
                &doc.discursive,
                &layout.general,
            );
            if !resolved.defects.is_empty() {
                report.push(TableDefects {
                    scope: "general".to_string(),
                    year: year.clone(),
                    defects: resolved.defects,
                });
            }
        }

        report
    }
}

/// Every resolved mapping needed to decode one exam year
#[derive(Debug, Clone, Default)]
pub struct YearMappings {
    pub year: ExamYear,
    pub specific: BTreeMap<SubjectGroupCode, ResolvedMapping>,
    pub general: Option<ResolvedMapping>,
}

impl YearMappings {
    /// Resolve all groups that carry tables for `year`, plus the general tables
    pub fn resolve(store: &MappingStore, year: &str, layout: &ExamLayout) -> Self {
        let mut specific = BTreeMap::new();
        for (group, doc) in store.subject_groups() {
            if !doc.per_year.contains_key(year) {
                continue;
            }
            match store.resolve(group, year, &layout.specific) {
                Ok(resolved) => {
                    specific.insert(group.clone(), resolved);
                }
                Err(e) => tracing::warn!(group = %group, year, error = %e, "mapping not resolved"),
            }
        }

        let general = match store.resolve_general(year, &layout.general) {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                tracing::warn!(year, error = %e, "general block will be skipped");
                None
            }
        };

        tracing::info!(year, groups = specific.len(), general = general.is_some(), "resolved mappings");
        Self {
            year: year.to_string(),
            specific,
            general,
        }
    }

    /// The group's mapping, or `MissingMapping`
    pub fn specific_for(&self, group: &str) -> Result<&ResolvedMapping, ComputeError> {
        self.specific
            .get(group)
            .ok_or_else(|| ComputeError::MissingMapping {
                group: group.to_string(),
                year: self.year.clone(),
            })
    }
}

fn log_defects(scope: &str, year: &str, defects: &[MappingDefect]) {
    for defect in defects {
        tracing::warn!(
            scope,
            year,
            question = %defect.question,
            kind = defect.kind.as_str(),
            "mapping defect: {}",
            defect.detail
        );
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ComputeError> {
    let content = std::fs::read_to_string(path).map_err(|e| ComputeError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawIndex, TopicRefs, YearTables};

    fn sample_store() -> MappingStore {
        let mut objective = QuestionMap::new();
        objective.insert("q9".into(), TopicRefs::from(1));
        objective.insert("q10".into(), TopicRefs::from(vec![1, 2]));
        objective.insert("q11".into(), TopicRefs::from(vec![2, 7]));
        objective.insert("q3".into(), TopicRefs::from(1));
        objective.insert("qx".into(), TopicRefs::from(1));

        let mut discursive = QuestionMap::new();
        discursive.insert("d3".into(), TopicRefs::One(RawIndex::Text("2".into())));
        discursive.insert("d2".into(), TopicRefs::from(1));

        let mut per_year = BTreeMap::new();
        per_year.insert("2021".to_string(), YearTables { objective, discursive });

        let mut subjects = SubjectMappingCollection::new();
        subjects.insert(
            "40".to_string(),
            SubjectMappingDocument {
                topic_list: vec!["Ethics".into(), "Modeling".into()],
                per_year,
            },
        );

        let mut general = GeneralMappingCollection::new();
        let mut g_obj = QuestionMap::new();
        g_obj.insert("q1".into(), TopicRefs::from(1));
        let mut g_disc = QuestionMap::new();
        g_disc.insert("d1".into(), TopicRefs::from(1));
        general.insert(
            "2021".to_string(),
            GeneralYearDocument {
                topic_list: vec!["Citizenship".into()],
                objective: g_obj,
                discursive: g_disc,
            },
        );

        MappingStore::from_documents(subjects, general)
    }

    #[test]
    fn test_lookup_accessors() {
        let store = sample_store();
        assert_eq!(store.topics_for("40").unwrap().len(), 2);
        assert!(store.topics_for("99").is_none());
        assert_eq!(store.objective_mapping("40", "2021").unwrap().len(), 5);
        assert_eq!(store.discursive_mapping("40", "2021").unwrap().len(), 2);
        assert_eq!(store.general_topics("2021").unwrap(), ["Citizenship".to_string()]);
        assert_eq!(store.general_objective_mapping("2021").unwrap().len(), 1);
        assert_eq!(store.general_discursive_mapping("2021").unwrap().len(), 1);
    }

    #[test]
    fn test_missing_mapping() {
        let store = sample_store();
        assert!(matches!(
            store.objective_mapping("40", "2019"),
            Err(ComputeError::MissingMapping { .. })
        ));
        assert!(matches!(
            store.resolve("99", "2021", &BlockLayout::specific_default()),
            Err(ComputeError::MissingMapping { .. })
        ));
        assert!(matches!(
            store.general_topics("2019"),
            Err(ComputeError::MissingGeneralMapping(_))
        ));
    }

    #[test]
    fn test_resolve_offsets_and_fields() {
        let store = sample_store();
        let resolved = store
            .resolve("40", "2021", &BlockLayout::specific_default())
            .unwrap();

        let keys: Vec<&str> = resolved.objective.iter().map(|q| q.key.as_str()).collect();
        assert_eq!(keys, vec!["q9", "q10", "q11"]);
        assert_eq!(resolved.objective[0].source, QuestionSource::Offset(0));
        assert_eq!(resolved.objective[1].source, QuestionSource::Offset(1));
        assert_eq!(resolved.objective[1].topics, vec![0, 1]);
        // Out-of-range index 7 dropped, index 2 kept
        assert_eq!(resolved.objective[2].topics, vec![1]);

        assert_eq!(resolved.discursive.len(), 1);
        assert_eq!(
            resolved.discursive[0].source,
            QuestionSource::ScoreField("NT_CE_D1".into())
        );
        assert_eq!(resolved.discursive[0].topics, vec![1]);
    }

    #[test]
    fn test_resolve_with_shifted_layout() {
        let store = sample_store();
        let layout = BlockLayout {
            objective_base: 11,
            min_answer_len: 25,
            score_prefix: "NT_CE_D".to_string(),
            discursive_base: 0,
        };
        let resolved = store.resolve("40", "2021", &layout).unwrap();

        assert_eq!(resolved.min_answer_len, 25);
        let keys: Vec<&str> = resolved.objective.iter().map(|q| q.key.as_str()).collect();
        assert_eq!(keys, vec!["q11"]);
        assert_eq!(resolved.objective[0].source, QuestionSource::Offset(0));

        let fields: Vec<&QuestionSource> = resolved.discursive.iter().map(|q| &q.source).collect();
        assert_eq!(
            fields,
            vec![
                &QuestionSource::ScoreField("NT_CE_D2".into()),
                &QuestionSource::ScoreField("NT_CE_D3".into()),
            ]
        );
    }

    #[test]
    fn test_resolve_records_defects() {
        let store = sample_store();
        let resolved = store
            .resolve("40", "2021", &BlockLayout::specific_default())
            .unwrap();

        let mut kinds: Vec<MalformedSignal> = resolved.defects.iter().map(|d| d.kind).collect();
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                MalformedSignal::InvalidQuestionKey,
                MalformedSignal::OrdinalBelowBase,
                MalformedSignal::OrdinalBelowBase,
                MalformedSignal::TopicIndexOutOfRange,
            ]
        );
    }

    #[test]
    fn test_resolve_general() {
        let store = sample_store();
        let resolved = store
            .resolve_general("2021", &BlockLayout::general_default())
            .unwrap();
        assert_eq!(resolved.block, QuestionBlock::General);
        assert_eq!(resolved.objective[0].source, QuestionSource::Offset(0));
        assert_eq!(
            resolved.discursive[0].source,
            QuestionSource::ScoreField("NT_FG_D1".into())
        );
        assert!(resolved.defects.is_empty());
    }

    #[test]
    fn test_validate_reports_only_defective_tables() {
        let store = sample_store();
        let report = store.validate(|_| ExamLayout::default());
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].scope, "40");
        assert_eq!(report[0].defects.len(), 4);
    }

    #[test]
    fn test_year_mappings() {
        let store = sample_store();
        let year = YearMappings::resolve(&store, "2021", &ExamLayout::default());
        assert!(year.specific_for("40").is_ok());
        assert!(year.general.is_some());
        assert!(matches!(
            year.specific_for("99"),
            Err(ComputeError::MissingMapping { .. })
        ));

        let empty = YearMappings::resolve(&store, "2019", &ExamLayout::default());
        assert!(empty.specific.is_empty());
        assert!(empty.general.is_none());
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let subjects = dir.path().join("subjects.json");
        let general = dir.path().join("general.json");
        std::fs::write(
            &subjects,
            r#"{"40": {"topicList": ["Ethics"], "perYear": {"2021": {"objective": {"q9": 1}}}}}"#,
        )
        .unwrap();
        std::fs::write(&general, r#"{"2021": {"topicList": ["Citizenship"]}}"#).unwrap();

        let store = MappingStore::load(&subjects, &general).unwrap();
        assert_eq!(store.objective_mapping("40", "2021").unwrap().len(), 1);

        let missing = MappingStore::load(&dir.path().join("nope.json"), &general);
        assert!(matches!(missing, Err(ComputeError::Io { .. })));
    }
}
