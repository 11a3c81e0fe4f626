use crate::types::{FarmResult, ResultStatus};
use serde::{Deserialize, Serialize};

/// Summary view over a set of task outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedResults {
    /// Number of outcomes.
    pub total: usize,
    /// Outcomes with status success.
    pub succeeded: usize,
    /// Outcomes with status failure.
    pub failed: usize,
    /// Outcomes with status blocked.
    pub blocked: usize,
    /// True iff no result failed. Blocked results do not count as failures.
    pub success: bool,
    /// Every outcome, in the order it was added.
    pub results: Vec<FarmResult>,
}

impl AggregatedResults {
    /// Same as the `success` field.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// One line such as `2/4 tasks succeeded, 1 failed, 1 blocked`.
    pub fn summary(&self) -> String {
        format!(
            "{}/{} tasks succeeded, {} failed, {} blocked",
            self.succeeded, self.total, self.failed, self.blocked
        )
    }
}

/// Accumulates [`FarmResult`]s and produces [`AggregatedResults`].
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    results: Vec<FarmResult>,
}

impl ResultAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one outcome.
    pub fn add(&mut self, result: FarmResult) {
        self.results.push(result);
    }

    /// Accumulate several outcomes.
    pub fn extend(&mut self, results: impl IntoIterator<Item = FarmResult>) {
        self.results.extend(results);
    }

    /// Number of accumulated outcomes.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Count outcomes. Does not reset the accumulator.
    pub fn aggregate(&self) -> AggregatedResults {
        let count = |status: ResultStatus| self.results.iter().filter(|r| r.status == status).count();
        let failed = count(ResultStatus::Failure);

        AggregatedResults {
            total: self.results.len(),
            succeeded: count(ResultStatus::Success),
            failed,
            blocked: count(ResultStatus::Blocked),
            success: failed == 0,
            results: self.results.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskType;

    #[test]
    fn test_empty_aggregate_is_success() {
        let agg = ResultAggregator::new().aggregate();
        assert_eq!(agg.total, 0);
        assert!(agg.is_success());
    }

    #[test]
    fn test_counts_partition_total() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(FarmResult::success("t1", "a", "ok", 5));
        aggregator.add(FarmResult::success("t2", "a", "ok", 5));
        aggregator.add(FarmResult::failure("t3", "b", "boom", 1));
        aggregator.add(FarmResult::blocked("t4", TaskType::Review));

        let agg = aggregator.aggregate();
        assert_eq!(agg.total, 4);
        assert_eq!(agg.succeeded, 2);
        assert_eq!(agg.failed, 1);
        assert_eq!(agg.blocked, 1);
        assert_eq!(agg.succeeded + agg.failed + agg.blocked, agg.total);
        assert!(!agg.is_success());
        assert_eq!(agg.summary(), "2/4 tasks succeeded, 1 failed, 1 blocked");
    }

    #[test]
    fn test_blocked_only_is_still_success() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(FarmResult::blocked("t1", TaskType::Test));
        assert!(aggregator.aggregate().is_success());
    }

    #[test]
    fn test_aggregate_is_repeatable() {
        let mut aggregator = ResultAggregator::new();
        aggregator.extend(vec![
            FarmResult::success("t1", "a", "ok", 1),
            FarmResult::failure("t2", "a", "no", 1),
        ]);
        let first = aggregator.aggregate();
        let second = aggregator.aggregate();
        assert_eq!(first, second);
        assert_eq!(aggregator.len(), 2);
    }
}
