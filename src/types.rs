//! Core types for the Competency Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: decoded signals, scope keys, accumulator buckets, finalized
//! statistics and comparative records.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Exam year identifier (e.g. "2021")
pub type ExamYear = String;

/// Subject group (course family) code
pub type SubjectGroupCode = String;

/// Course code
pub type CourseCode = String;

/// Competency topic name
pub type TopicName = String;

/// The five aggregation granularities, broadest last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Course,
    Institution,
    State,
    Region,
    Nation,
}

impl ScopeKind {
    pub const ALL: [ScopeKind; 5] = [
        ScopeKind::Course,
        ScopeKind::Institution,
        ScopeKind::State,
        ScopeKind::Region,
        ScopeKind::Nation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Course => "course",
            ScopeKind::Institution => "institution",
            ScopeKind::State => "state",
            ScopeKind::Region => "region",
            ScopeKind::Nation => "nation",
        }
    }

    /// Suffix used by the reporting front end in statistic field names
    pub fn label(&self) -> &'static str {
        match self {
            ScopeKind::Course => "curso",
            ScopeKind::Institution => "ufc",
            ScopeKind::State => "uf",
            ScopeKind::Region => "regiao",
            ScopeKind::Nation => "br",
        }
    }
}

/// A concrete aggregation scope: a kind plus its identifying code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "lowercase")]
pub enum ScopeKey {
    Course(CourseCode),
    Institution(String),
    State(String),
    Region(String),
    Nation,
}

impl ScopeKey {
    pub fn kind(&self) -> ScopeKind {
        match self {
            ScopeKey::Course(_) => ScopeKind::Course,
            ScopeKey::Institution(_) => ScopeKind::Institution,
            ScopeKey::State(_) => ScopeKind::State,
            ScopeKey::Region(_) => ScopeKind::Region,
            ScopeKey::Nation => ScopeKind::Nation,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ScopeKey::Course(code)
            | ScopeKey::Institution(code)
            | ScopeKey::State(code)
            | ScopeKey::Region(code) => Some(code.as_str()),
            ScopeKey::Nation => None,
        }
    }
}

/// Which question block a signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionBlock {
    /// Cross-cutting general-education questions, year-scoped
    General,
    /// Subject-specific questions, scoped by subject group and year
    Specific,
}

/// One decoded observation for one question
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// Valid objective answer; `correct` is false for a '0'
    Objective { correct: bool },
    /// Present discursive score
    Discursive { score: f64 },
}

/// A signal attributed to one topic
#[derive(Debug, Clone, PartialEq)]
pub struct TopicSignal<'m> {
    pub topic: &'m str,
    pub signal: Signal,
}

/// Fixed-point resolution for discursive score sums
pub const SCORE_SCALE: f64 = 1_000_000.0;

/// Largest accepted discursive score magnitude. At most 1e15 micros per
/// signal and `u64` counts keep an `i128` sum from ever overflowing.
pub const MAX_ABS_SCORE: f64 = 1_000_000_000.0;

/// Running sums and counts for one (scope, topic)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorBucket {
    pub objective_valid: u64,
    pub objective_correct: u64,
    pub discursive_count: u64,
    /// Sum of discursive scores in millionths
    pub discursive_sum_micros: i128,
}

impl AccumulatorBucket {
    pub fn apply(&mut self, signal: Signal) {
        match signal {
            Signal::Objective { correct } => {
                self.objective_valid += 1;
                if correct {
                    self.objective_correct += 1;
                }
            }
            Signal::Discursive { score } => {
                self.discursive_count += 1;
                self.discursive_sum_micros += to_micros(score);
            }
        }
    }

    /// Key-wise additive merge of another partial bucket
    pub fn merge(&mut self, other: &AccumulatorBucket) {
        self.objective_valid += other.objective_valid;
        self.objective_correct += other.objective_correct;
        self.discursive_count += other.discursive_count;
        self.discursive_sum_micros += other.discursive_sum_micros;
    }

    pub fn discursive_sum(&self) -> f64 {
        self.discursive_sum_micros as f64 / SCORE_SCALE
    }

    pub fn is_empty(&self) -> bool {
        self.objective_valid == 0 && self.discursive_count == 0
    }
}

/// Scores are range-checked when parsed; the clamp keeps the sum bound for
/// signals built by hand.
fn to_micros(score: f64) -> i128 {
    (score.clamp(-MAX_ABS_SCORE, MAX_ABS_SCORE) * SCORE_SCALE).round() as i128
}

/// Rounded, read-only statistic derived from one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizedStatistic {
    pub percentage_objective: Option<f64>,
    pub mean_discursive: Option<f64>,
    pub n_objective_valid: Option<u64>,
    pub n_discursive_valid: Option<u64>,
}

impl FinalizedStatistic {
    pub fn is_empty(&self) -> bool {
        self.percentage_objective.is_none()
            && self.mean_discursive.is_none()
            && self.n_objective_valid.is_none()
            && self.n_discursive_valid.is_none()
    }

    /// View this statistic with scope-suffixed field names
    pub fn labeled(&self, scope: ScopeKind) -> LabeledStatistic {
        LabeledStatistic { stat: *self, scope }
    }

    fn fields(&self) -> [(&'static str, Option<serde_json::Value>); 4] {
        [
            (
                "percentual_objetivas",
                self.percentage_objective.map(serde_json::Value::from),
            ),
            (
                "media_discursivas",
                self.mean_discursive.map(serde_json::Value::from),
            ),
            (
                "n_objetivas_validas",
                self.n_objective_valid.map(serde_json::Value::from),
            ),
            (
                "n_discursivas_validas",
                self.n_discursive_valid.map(serde_json::Value::from),
            ),
        ]
    }
}

/// A statistic serialized as `{percentual_objetivas_<label>: .., ...}`,
/// keeping nulls; used in per-scope documents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledStatistic {
    stat: FinalizedStatistic,
    scope: ScopeKind,
}

impl Serialize for LabeledStatistic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        for (name, value) in self.stat.fields() {
            map.serialize_entry(&format!("{name}_{}", self.scope.label()), &value)?;
        }
        map.end()
    }
}

/// One course's standing on one topic against its broader populations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparativeRecord {
    pub course: Option<FinalizedStatistic>,
    pub institution: Option<FinalizedStatistic>,
    pub state: Option<FinalizedStatistic>,
    pub region: Option<FinalizedStatistic>,
    pub nation: Option<FinalizedStatistic>,
}

impl ComparativeRecord {
    pub fn get(&self, kind: ScopeKind) -> Option<&FinalizedStatistic> {
        match kind {
            ScopeKind::Course => self.course.as_ref(),
            ScopeKind::Institution => self.institution.as_ref(),
            ScopeKind::State => self.state.as_ref(),
            ScopeKind::Region => self.region.as_ref(),
            ScopeKind::Nation => self.nation.as_ref(),
        }
    }

    pub fn set(&mut self, kind: ScopeKind, stat: Option<FinalizedStatistic>) {
        let stat = stat.filter(|s| !s.is_empty());
        match kind {
            ScopeKind::Course => self.course = stat,
            ScopeKind::Institution => self.institution = stat,
            ScopeKind::State => self.state = stat,
            ScopeKind::Region => self.region = stat,
            ScopeKind::Nation => self.nation = stat,
        }
    }

    /// True when no scope carries any data
    pub fn is_empty(&self) -> bool {
        ScopeKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

// Absent and null fields are both omitted: consumers read absence as "no data".
impl Serialize for ComparativeRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for kind in ScopeKind::ALL {
            let Some(stat) = self.get(kind) else {
                continue;
            };
            for (name, value) in stat.fields() {
                if let Some(value) = value {
                    map.serialize_entry(&format!("{name}_{}", kind.label()), &value)?;
                }
            }
        }
        map.end()
    }
}

/// Provenance attached to every emitted document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProvenance {
    pub producer: String,
    pub version: String,
    pub run_id: String,
    pub computed_at_utc: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_apply_and_merge() {
        let mut a = AccumulatorBucket::default();
        a.apply(Signal::Objective { correct: true });
        a.apply(Signal::Objective { correct: false });
        a.apply(Signal::Discursive { score: 62.5 });

        let mut b = AccumulatorBucket::default();
        b.apply(Signal::Discursive { score: 0.1 });
        b.apply(Signal::Discursive { score: 0.2 });

        a.merge(&b);
        assert_eq!(a.objective_valid, 2);
        assert_eq!(a.objective_correct, 1);
        assert_eq!(a.discursive_count, 3);
        assert_eq!(a.discursive_sum_micros, 62_800_000);
        assert!((a.discursive_sum() - 62.8).abs() < 1e-9);
    }

    #[test]
    fn test_extreme_scores_never_overflow_the_sum() {
        let mut bucket = AccumulatorBucket::default();
        bucket.apply(Signal::Discursive { score: 1e300 });
        bucket.apply(Signal::Discursive { score: 5.0 });
        assert_eq!(bucket.discursive_sum_micros, 1_000_000_005_000_000);

        // Far past the i64 range of micros
        for _ in 0..40 {
            let snapshot = bucket;
            bucket.merge(&snapshot);
        }
        assert_eq!(bucket.discursive_count, 2 << 40);
        assert_eq!(bucket.discursive_sum_micros, 1_000_000_005_000_000_i128 << 40);
    }

    #[test]
    fn test_comparative_record_omits_missing_scopes() {
        let mut record = ComparativeRecord::default();
        record.set(
            ScopeKind::Course,
            Some(FinalizedStatistic {
                percentage_objective: Some(50.0),
                n_objective_valid: Some(2),
                ..Default::default()
            }),
        );
        record.set(ScopeKind::Nation, Some(FinalizedStatistic::default()));

        let json = serde_json::to_value(&record).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["percentual_objetivas_curso"], 50.0);
        assert_eq!(obj["n_objetivas_validas_curso"], 2);
        assert!(record.nation.is_none());
    }

    #[test]
    fn test_labeled_statistic_keeps_nulls() {
        let stat = FinalizedStatistic {
            mean_discursive: Some(7.25),
            n_discursive_valid: Some(4),
            ..Default::default()
        };
        let json = serde_json::to_value(stat.labeled(ScopeKind::State)).unwrap();
        assert!(json["percentual_objetivas_uf"].is_null());
        assert_eq!(json["media_discursivas_uf"], 7.25);
        assert_eq!(json["n_discursivas_validas_uf"], 4);
    }

    #[test]
    fn test_scope_key_kind_and_code() {
        assert_eq!(ScopeKey::Nation.code(), None);
        assert_eq!(ScopeKey::Region("2".into()).kind(), ScopeKind::Region);
        assert_eq!(ScopeKey::Course("100".into()).code(), Some("100"));
    }
}
