//! Streaming accumulation
//!
//! Folds respondent batches into running sums keyed by (scope, topic). Every
//! update is additive, so the final buckets do not depend on record or batch
//! order, and two partial accumulators merge key-wise into the same result as a
//! single pass over both inputs.

use crate::decoder::ResponseDecoder;
use crate::directory::CourseDirectory;
use crate::error::MalformedSignal;
use crate::finalizer::StatisticFinalizer;
use crate::mapping::{ResolvedMapping, YearMappings};
use crate::schema::RespondentRecord;
use crate::scope::ScopeClassifier;
use crate::types::{
    AccumulatorBucket, FinalizedStatistic, QuestionBlock, ScopeKey, Signal, SubjectGroupCode,
    TopicName, TopicSignal,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bucket key for subject-specific topics
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpecificKey {
    pub scope: ScopeKey,
    pub group: SubjectGroupCode,
    pub topic: TopicName,
}

/// Bucket key for year-scoped general topics
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeneralKey {
    pub scope: ScopeKey,
    pub topic: TopicName,
}

/// Running buckets for one key space
#[derive(Debug, Clone, PartialEq)]
pub struct TopicAccumulator<K: Ord> {
    buckets: BTreeMap<K, AccumulatorBucket>,
}

impl<K: Ord> Default for TopicAccumulator<K> {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> TopicAccumulator<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, key: K, signal: Signal) {
        self.buckets.entry(key).or_default().apply(signal);
    }

    /// Sum another accumulator into this one, key by key
    pub fn merge(&mut self, other: TopicAccumulator<K>) {
        for (key, bucket) in other.buckets {
            self.buckets.entry(key).or_default().merge(&bucket);
        }
    }

    pub fn get(&self, key: &K) -> Option<&AccumulatorBucket> {
        self.buckets.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &AccumulatorBucket)> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn finalize(&self) -> BTreeMap<K, FinalizedStatistic> {
        self.buckets
            .iter()
            .map(|(key, bucket)| (key.clone(), StatisticFinalizer::finalize(bucket)))
            .collect()
    }
}

/// Visibility counters for one partition or run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTally {
    pub records_seen: u64,
    /// Records whose course is unknown to the directory
    pub orphaned: u64,
    /// Records skipped in the specific block, per subject group without a mapping
    pub skipped_missing_mapping: BTreeMap<SubjectGroupCode, u64>,
    /// Records skipped in the general block for lack of a general mapping
    pub skipped_missing_general: u64,
    pub malformed: BTreeMap<MalformedSignal, u64>,
}

impl RunTally {
    pub fn merge(&mut self, other: &RunTally) {
        self.records_seen += other.records_seen;
        self.orphaned += other.orphaned;
        self.skipped_missing_general += other.skipped_missing_general;
        for (group, n) in &other.skipped_missing_mapping {
            *self.skipped_missing_mapping.entry(group.clone()).or_default() += n;
        }
        for (kind, n) in &other.malformed {
            *self.malformed.entry(*kind).or_default() += n;
        }
    }

    fn record_defects(&mut self, defects: &[MalformedSignal]) {
        for defect in defects {
            *self.malformed.entry(*defect).or_default() += 1;
        }
    }

    pub fn malformed_total(&self) -> u64 {
        self.malformed.values().sum()
    }
}

/// Read-only inputs for ingesting one exam year
#[derive(Debug, Clone, Copy)]
pub struct YearContext<'a> {
    pub mappings: &'a YearMappings,
    pub directory: &'a CourseDirectory,
    pub classifier: &'a ScopeClassifier,
}

/// Accumulated state of one partition (institution × year)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionAccumulator {
    pub specific: TopicAccumulator<SpecificKey>,
    pub general: TopicAccumulator<GeneralKey>,
    pub tally: RunTally,
}

impl PartitionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest_batch(&mut self, batch: &[RespondentRecord], ctx: &YearContext<'_>) {
        for record in batch {
            self.ingest(record, ctx);
        }
    }

    fn ingest(&mut self, record: &RespondentRecord, ctx: &YearContext<'_>) {
        self.tally.records_seen += 1;

        let Some(course) = ctx.directory.entry(&record.course_code) else {
            self.tally.orphaned += 1;
            return;
        };
        let scopes = ctx.classifier.classify(course);
        let group = &course.subject_group;

        match ctx.mappings.specific_for(group) {
            Ok(mapping) => {
                for ts in self.decode(record, QuestionBlock::Specific, mapping) {
                    for scope in &scopes {
                        let key = SpecificKey {
                            scope: scope.clone(),
                            group: group.clone(),
                            topic: ts.topic.to_string(),
                        };
                        self.specific.apply(key, ts.signal);
                    }
                }
            }
            Err(_) => {
                *self.tally.skipped_missing_mapping.entry(group.clone()).or_default() += 1;
            }
        }

        match &ctx.mappings.general {
            Some(mapping) => {
                for ts in self.decode(record, QuestionBlock::General, mapping) {
                    for scope in &scopes {
                        let key = GeneralKey {
                            scope: scope.clone(),
                            topic: ts.topic.to_string(),
                        };
                        self.general.apply(key, ts.signal);
                    }
                }
            }
            None => self.tally.skipped_missing_general += 1,
        }
    }

    fn decode<'m>(
        &mut self,
        record: &RespondentRecord,
        block: QuestionBlock,
        mapping: &'m ResolvedMapping,
    ) -> Vec<TopicSignal<'m>> {
        let decoded = ResponseDecoder::decode(record, record.answers(block), mapping);
        self.tally.record_defects(&decoded.defects);
        decoded.signals
    }

    /// Fold another partition into this one
    pub fn merge(&mut self, other: PartitionAccumulator) {
        self.specific.merge(other.specific);
        self.general.merge(other.general);
        self.tally.merge(&other.tally);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExamLayout, TargetScopes};
    use crate::directory::CourseEntry;
    use crate::mapping::MappingStore;
    use crate::schema::{
        GeneralMappingCollection, GeneralYearDocument, QuestionMap, SubjectMappingCollection,
        SubjectMappingDocument, TopicRefs, YearTables,
    };
    use pretty_assertions::assert_eq;

    fn store() -> MappingStore {
        let mut objective = QuestionMap::new();
        objective.insert("q9".into(), TopicRefs::from(1));
        objective.insert("q10".into(), TopicRefs::from(vec![1, 2]));
        let mut discursive = QuestionMap::new();
        discursive.insert("d3".into(), TopicRefs::from(2));

        let mut subjects = SubjectMappingCollection::new();
        subjects.insert(
            "40".into(),
            SubjectMappingDocument {
                topic_list: vec!["Ethics".into(), "Modeling".into()],
                per_year: [("2021".to_string(), YearTables { objective, discursive })]
                    .into_iter()
                    .collect(),
            },
        );

        let mut g_obj = QuestionMap::new();
        g_obj.insert("q1".into(), TopicRefs::from(1));
        let mut general = GeneralMappingCollection::new();
        general.insert(
            "2021".into(),
            GeneralYearDocument {
                topic_list: vec!["Citizenship".into()],
                objective: g_obj,
                discursive: QuestionMap::new(),
            },
        );
        MappingStore::from_documents(subjects, general)
    }

    fn course(code: &str, group: &str, institution: &str) -> CourseEntry {
        CourseEntry {
            course_code: code.into(),
            subject_group: group.into(),
            region: "2".into(),
            state: "23".into(),
            institution: institution.into(),
            name: format!("Course {code}"),
            municipality: None,
        }
    }

    struct Fixture {
        mappings: YearMappings,
        directory: CourseDirectory,
        classifier: ScopeClassifier,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                mappings: YearMappings::resolve(&store(), "2021", &ExamLayout::default()),
                directory: CourseDirectory::from_entries(vec![
                    course("100", "40", "583"),
                    course("200", "40", "999"),
                    course("300", "77", "583"),
                ]),
                classifier: ScopeClassifier::new(TargetScopes {
                    region: Some("2".into()),
                    state: Some("23".into()),
                    institution: Some("583".into()),
                    relevant_groups: None,
                }),
            }
        }

        fn ctx(&self) -> YearContext<'_> {
            YearContext {
                mappings: &self.mappings,
                directory: &self.directory,
                classifier: &self.classifier,
            }
        }
    }

    fn specific_answers(first: char, second: char) -> String {
        let mut s = vec!['.'; 27];
        s[0] = first;
        s[1] = second;
        s.into_iter().collect()
    }

    fn records() -> Vec<RespondentRecord> {
        vec![
            RespondentRecord::new("100")
                .with_specific_answers(specific_answers('1', '0'))
                .with_general_answers("1.......")
                .with_score("NT_CE_D1", "60"),
            RespondentRecord::new("100")
                .with_specific_answers(specific_answers('0', '1'))
                .with_general_answers("0.......")
                .with_score("NT_CE_D1", "45,5"),
            RespondentRecord::new("200")
                .with_specific_answers(specific_answers('1', '1'))
                .with_score("NT_CE_D1", "x"),
            RespondentRecord::new("300").with_general_answers("1......."),
            RespondentRecord::new("999").with_specific_answers(specific_answers('1', '1')),
        ]
    }

    fn key(scope: ScopeKey, topic: &str) -> SpecificKey {
        SpecificKey {
            scope,
            group: "40".into(),
            topic: topic.into(),
        }
    }

    #[test]
    fn test_half_correct_course_bucket() {
        let fixture = Fixture::new();
        let mut acc = PartitionAccumulator::new();
        acc.ingest_batch(&records()[..2], &fixture.ctx());

        let ethics = acc.specific.get(&key(ScopeKey::Course("100".into()), "Ethics")).unwrap();
        assert_eq!(ethics.objective_valid, 4);
        assert_eq!(ethics.objective_correct, 2);

        let modeling = acc.specific.get(&key(ScopeKey::Course("100".into()), "Modeling")).unwrap();
        assert_eq!(modeling.objective_valid, 2);
        assert_eq!(modeling.objective_correct, 1);
        assert_eq!(modeling.discursive_count, 2);
        assert_eq!(modeling.discursive_sum_micros, 105_500_000);

        let finalized = acc.specific.finalize();
        let stat = finalized[&key(ScopeKey::Course("100".into()), "Modeling")];
        assert_eq!(stat.percentage_objective, Some(50.0));
        assert_eq!(stat.mean_discursive, Some(52.75));
    }

    #[test]
    fn test_scopes_receive_matching_records() {
        let fixture = Fixture::new();
        let mut acc = PartitionAccumulator::new();
        acc.ingest_batch(&records(), &fixture.ctx());

        let nation = acc.specific.get(&key(ScopeKey::Nation, "Ethics")).unwrap();
        assert_eq!(nation.objective_valid, 6);
        let institution = acc
            .specific
            .get(&key(ScopeKey::Institution("583".into()), "Ethics"))
            .unwrap();
        assert_eq!(institution.objective_valid, 4);

        let general = acc
            .general
            .get(&GeneralKey {
                scope: ScopeKey::Nation,
                topic: "Citizenship".into(),
            })
            .unwrap();
        assert_eq!(general.objective_valid, 3);
        assert_eq!(general.objective_correct, 2);
    }

    #[test]
    fn test_tally_counts_orphans_missing_mappings_and_defects() {
        let fixture = Fixture::new();
        let mut acc = PartitionAccumulator::new();
        acc.ingest_batch(&records(), &fixture.ctx());

        assert_eq!(acc.tally.records_seen, 5);
        assert_eq!(acc.tally.orphaned, 1);
        assert_eq!(acc.tally.skipped_missing_mapping.get("77"), Some(&1));
        assert_eq!(acc.tally.skipped_missing_general, 0);
        assert_eq!(acc.tally.malformed.get(&MalformedSignal::NonNumericScore), Some(&1));
        assert_eq!(acc.tally.malformed_total(), 1);
    }

    #[test]
    fn test_orphan_contributes_nothing() {
        let fixture = Fixture::new();
        let mut with_orphan = PartitionAccumulator::new();
        with_orphan.ingest_batch(&records(), &fixture.ctx());

        let mut without = PartitionAccumulator::new();
        let filtered: Vec<_> = records().into_iter().filter(|r| r.course_code != "999").collect();
        without.ingest_batch(&filtered, &fixture.ctx());

        assert_eq!(with_orphan.specific, without.specific);
        assert_eq!(with_orphan.general, without.general);
    }

    /// Every ordering of `items`
    fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut all = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                all.push(tail);
            }
        }
        all
    }

    #[test]
    fn test_every_record_order_gives_the_same_buckets() {
        let fixture = Fixture::new();
        let mut expected = PartitionAccumulator::new();
        expected.ingest_batch(&records(), &fixture.ctx());

        let orders = permutations(&records());
        assert_eq!(orders.len(), 120);
        for order in orders {
            let mut acc = PartitionAccumulator::new();
            acc.ingest_batch(&order, &fixture.ctx());
            assert_eq!(acc, expected);

            let mut one_by_one = PartitionAccumulator::new();
            for record in &order {
                one_by_one.ingest_batch(std::slice::from_ref(record), &fixture.ctx());
            }
            assert_eq!(one_by_one, expected);
        }
    }

    #[test]
    fn test_partition_merge_matches_single_pass() {
        let fixture = Fixture::new();
        let all = records();

        let mut single = PartitionAccumulator::new();
        single.ingest_batch(&all, &fixture.ctx());

        for size in 1..=all.len() {
            let parts: Vec<PartitionAccumulator> = all
                .chunks(size)
                .map(|chunk| {
                    let mut acc = PartitionAccumulator::new();
                    acc.ingest_batch(chunk, &fixture.ctx());
                    acc
                })
                .collect();

            // ((a + b) + c) ...
            let mut left = PartitionAccumulator::new();
            for part in parts.iter().cloned() {
                left.merge(part);
            }
            assert_eq!(left, single, "left fold, chunk size {size}");

            // ... (a + (b + c))
            let mut right = PartitionAccumulator::new();
            for part in parts.iter().rev().cloned() {
                let mut next = part;
                next.merge(right);
                right = next;
            }
            assert_eq!(right, single, "right fold, chunk size {size}");
        }
    }

    #[test]
    fn test_out_of_range_score_is_dropped_not_summed() {
        let fixture = Fixture::new();
        let batch = vec![
            RespondentRecord::new("100").with_score("NT_CE_D1", "1e13"),
            RespondentRecord::new("100").with_score("NT_CE_D1", "5"),
        ];
        let mut acc = PartitionAccumulator::new();
        acc.ingest_batch(&batch, &fixture.ctx());

        let modeling = acc.specific.get(&key(ScopeKey::Course("100".into()), "Modeling")).unwrap();
        assert_eq!(modeling.discursive_count, 1);
        assert_eq!(modeling.discursive_sum_micros, 5_000_000);
        assert_eq!(acc.tally.malformed.get(&MalformedSignal::ScoreOutOfRange), Some(&1));
    }

    #[test]
    fn test_missing_general_mapping_is_counted() {
        let mut fixture = Fixture::new();
        fixture.mappings.general = None;
        let mut acc = PartitionAccumulator::new();
        acc.ingest_batch(&records()[..2], &fixture.ctx());
        assert!(acc.general.is_empty());
        assert_eq!(acc.tally.skipped_missing_general, 2);
        assert!(!acc.specific.is_empty());
    }
}
