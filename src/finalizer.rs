//! Statistic finalizer
//!
//! Converts a bucket of running sums into rounded, read-only statistics.
//! Rounding is half-to-even at two decimals, applied to `value * 100`.

use crate::accumulator::{GeneralKey, PartitionAccumulator, SpecificKey};
use crate::types::{AccumulatorBucket, FinalizedStatistic};
use std::collections::BTreeMap;

/// Finalized statistics for every populated (scope, topic) of one year
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeStatistics {
    pub specific: BTreeMap<SpecificKey, FinalizedStatistic>,
    pub general: BTreeMap<GeneralKey, FinalizedStatistic>,
}

impl ScopeStatistics {
    pub fn is_empty(&self) -> bool {
        self.specific.is_empty() && self.general.is_empty()
    }
}

pub struct StatisticFinalizer;

impl StatisticFinalizer {
    /// Finalize both key spaces of a merged accumulator
    pub fn finalize_all(acc: &PartitionAccumulator) -> ScopeStatistics {
        ScopeStatistics {
            specific: acc.specific.finalize(),
            general: acc.general.finalize(),
        }
    }

    pub fn finalize(bucket: &AccumulatorBucket) -> FinalizedStatistic {
        let percentage_objective = (bucket.objective_valid > 0).then(|| {
            round2(bucket.objective_correct as f64 / bucket.objective_valid as f64 * 100.0)
        });
        let mean_discursive = (bucket.discursive_count > 0)
            .then(|| round2(bucket.discursive_sum() / bucket.discursive_count as f64));

        FinalizedStatistic {
            percentage_objective,
            mean_discursive,
            n_objective_valid: nonzero(bucket.objective_valid),
            n_discursive_valid: nonzero(bucket.discursive_count),
        }
    }
}

/// Round to two decimals, ties to even
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

fn nonzero(n: u64) -> Option<u64> {
    (n > 0).then_some(n)
}
