//! False discovery rate control across many tested features.
//!
//! When every column of a table is tested against the same grouping
//! column, some p-values come out small by chance alone. The
//! [`FdrController`] runs the permutation engine once per feature,
//! applies the Benjamini-Hochberg step-up correction to the collected
//! p-values, and exposes the subset of features that survive a caller
//! chosen false discovery rate threshold.
//!
//! The controller is an explicit state machine: `idle → tested →
//! adjusted`. Calling a method out of order returns
//! [`PermuteError::InvalidState`] instead of silently producing a
//! half-corrected answer, and a failed test run leaves the controller
//! idle — an incomplete correction is never observable.
//!
//! # Example
//!
//! ```
//! use u_permute::dataframe::{Column, DataFrame};
//! use u_permute::fdr::{features_from_schema, FdrController};
//!
//! let mut df = DataFrame::new();
//! df.add_column(
//!     "group".to_string(),
//!     Column::categorical_from_labels(&["a", "a", "a", "b", "b", "b"]),
//! ).unwrap();
//! df.add_column(
//!     "separated".to_string(),
//!     Column::categorical_from_labels(&["x", "x", "x", "y", "y", "y"]),
//! ).unwrap();
//! df.add_column(
//!     "noise".to_string(),
//!     Column::numeric(vec![1.0, 4.0, 2.0, 3.0, 1.0, 4.0]),
//! ).unwrap();
//!
//! let features = features_from_schema(&df, "group");
//! let mut controller = FdrController::new();
//! controller.test(&df, "group", &features, 200, Some(42)).unwrap();
//! controller.adjust().unwrap();
//!
//! let report = controller.results(0.25).unwrap();
//! assert_eq!(report.records.len(), 2);
//! // Records come back in ascending p-value order, q-values attached.
//! assert!(report.records[0].p_value <= report.records[1].p_value);
//! ```

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::dataframe::{DataFrame, DataType};
use crate::error::PermuteError;
use crate::permutation::simulate;
use crate::statistic::StatisticKind;

// ── Features ──────────────────────────────────────────────────────────

/// A feature column tagged with how it should be tested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feature {
    /// Tested with the distributional (total variation distance) statistic.
    Categorical(String),
    /// Tested with the mean-difference statistic.
    Quantitative(String),
}

impl Feature {
    /// Returns the column name of this feature.
    pub fn name(&self) -> &str {
        match self {
            Self::Categorical(name) | Self::Quantitative(name) => name,
        }
    }

    /// Returns the statistic used to test this feature.
    pub fn statistic_kind(&self) -> StatisticKind {
        match self {
            Self::Categorical(_) => StatisticKind::Distributional,
            Self::Quantitative(_) => StatisticKind::MeanDifference,
        }
    }
}

/// Derives the tagged feature list from a frame's schema, in column
/// order, excluding the grouping column.
///
/// Numeric columns become [`Feature::Quantitative`]; categorical and
/// boolean columns become [`Feature::Categorical`].
pub fn features_from_schema(df: &DataFrame, grouping: &str) -> Vec<Feature> {
    df.iter()
        .filter(|(name, _)| *name != grouping)
        .map(|(name, column)| match column.data_type() {
            DataType::Numeric => Feature::Quantitative(name.to_string()),
            DataType::Boolean | DataType::Categorical => Feature::Categorical(name.to_string()),
        })
        .collect()
}

// ── Records ───────────────────────────────────────────────────────────

/// A tested feature before adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    /// Feature column name.
    pub feature: String,
    /// Raw permutation p-value.
    pub p_value: f64,
}

/// A tested feature with its Benjamini-Hochberg q-value.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedRecord {
    /// Feature column name.
    pub feature: String,
    /// Raw permutation p-value.
    pub p_value: f64,
    /// Adjusted p-value: smallest FDR at which this feature would be
    /// called significant.
    pub q_value: f64,
}

/// Output of [`FdrController::results`].
#[derive(Debug, Clone, PartialEq)]
pub struct FdrReport {
    /// All tested features in ascending p-value order.
    pub records: Vec<AdjustedRecord>,
    /// The largest q-value at or below the requested threshold, if any
    /// record qualifies.
    pub critical_q: Option<f64>,
    /// Features whose q-value is at or below the critical threshold;
    /// empty when `critical_q` is `None`.
    pub rejected: Vec<AdjustedRecord>,
}

// ── Controller ────────────────────────────────────────────────────────

enum ControllerState {
    Idle,
    Tested(Vec<FeatureRecord>),
    Adjusted(Vec<AdjustedRecord>),
}

impl ControllerState {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Tested(_) => "tested",
            Self::Adjusted(_) => "adjusted",
        }
    }
}

/// Multiple-testing controller: `test` → `adjust` → `results`.
pub struct FdrController {
    state: ControllerState,
}

impl FdrController {
    /// Creates an idle controller.
    pub fn new() -> Self {
        Self {
            state: ControllerState::Idle,
        }
    }

    /// Runs a permutation test for every feature against the common
    /// grouping column, collecting one p-value per feature in the given
    /// feature order.
    ///
    /// One seeded random stream is threaded through all features, so a
    /// single `seed` reproduces the entire run. No verdicts or null
    /// distributions are retained.
    ///
    /// # Errors
    ///
    /// - [`PermuteError::InvalidState`] if the controller is not idle
    ///   (call [`reset`](Self::reset) to test again).
    /// - [`PermuteError::InvalidArgument`] if `features` is empty or
    ///   `trials < 1`.
    /// - Any statistic error for a feature aborts the whole run and
    ///   leaves the controller idle; there is no partial continuation,
    ///   since a correction over a subset of the features would be
    ///   misleading.
    pub fn test(
        &mut self,
        df: &DataFrame,
        grouping: &str,
        features: &[Feature],
        trials: usize,
        seed: Option<u64>,
    ) -> Result<(), PermuteError> {
        if !matches!(self.state, ControllerState::Idle) {
            return Err(PermuteError::InvalidState {
                operation: "test",
                expected: "idle",
                actual: self.state.name(),
            });
        }
        if features.is_empty() {
            return Err(PermuteError::InvalidArgument {
                name: "features".to_string(),
                message: "at least 1 feature is required".to_string(),
            });
        }

        let mut rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let mut records = Vec::with_capacity(features.len());
        for feature in features {
            let simulation = simulate(
                df,
                grouping,
                feature.name(),
                feature.statistic_kind(),
                trials,
                &mut rng,
            )?;
            trace!(feature = feature.name(), p_value = simulation.p_value, "feature tested");
            records.push(FeatureRecord {
                feature: feature.name().to_string(),
                p_value: simulation.p_value,
            });
        }

        debug!(features = records.len(), trials, "feature sweep complete");
        self.state = ControllerState::Tested(records);
        Ok(())
    }

    /// Applies the Benjamini-Hochberg step-up correction to the
    /// collected p-values.
    ///
    /// Records are stable-sorted by ascending p-value (ties keep their
    /// submission order); the record at 1-indexed rank `i` of `k` gets
    /// the ratio `p_i * k / i`, and monotonicity is then enforced from
    /// the highest rank downward, so q-values are non-decreasing in rank
    /// order. The last rank's ratio is `p_k ≤ 1`, which bounds every
    /// final q-value into `[0, 1]` without clamping.
    ///
    /// # Errors
    ///
    /// [`PermuteError::InvalidState`] unless the controller is in the
    /// tested state.
    pub fn adjust(&mut self) -> Result<(), PermuteError> {
        match std::mem::replace(&mut self.state, ControllerState::Idle) {
            ControllerState::Tested(records) => {
                self.state = ControllerState::Adjusted(benjamini_hochberg(records));
                Ok(())
            }
            other => {
                let actual = other.name();
                self.state = other;
                Err(PermuteError::InvalidState {
                    operation: "adjust",
                    expected: "tested",
                    actual,
                })
            }
        }
    }

    /// Thresholds the adjusted records at the given false discovery
    /// rate.
    ///
    /// The critical threshold is the largest q-value at or below
    /// `fdr_threshold`; the rejection set is every record whose q-value
    /// is at or below that critical threshold. When no record qualifies
    /// the critical threshold is `None` and the rejection set is empty.
    /// Idempotent: repeated calls with the same threshold return the
    /// same report.
    ///
    /// # Errors
    ///
    /// - [`PermuteError::InvalidArgument`] if `fdr_threshold` lies
    ///   outside (0, 1].
    /// - [`PermuteError::InvalidState`] unless the controller is in the
    ///   adjusted state.
    pub fn results(&self, fdr_threshold: f64) -> Result<FdrReport, PermuteError> {
        if !(fdr_threshold > 0.0 && fdr_threshold <= 1.0) {
            return Err(PermuteError::InvalidArgument {
                name: "fdr_threshold".to_string(),
                message: format!("must lie in (0, 1], got {fdr_threshold}"),
            });
        }
        let records = match &self.state {
            ControllerState::Adjusted(records) => records,
            other => {
                return Err(PermuteError::InvalidState {
                    operation: "results",
                    expected: "adjusted",
                    actual: other.name(),
                })
            }
        };

        let critical_q = records
            .iter()
            .map(|r| r.q_value)
            .filter(|&q| q <= fdr_threshold)
            .fold(None, |max: Option<f64>, q| {
                Some(match max {
                    Some(m) => m.max(q),
                    None => q,
                })
            });

        let rejected = match critical_q {
            Some(critical) => records
                .iter()
                .filter(|r| r.q_value <= critical)
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok(FdrReport {
            records: records.clone(),
            critical_q,
            rejected,
        })
    }

    /// Returns the controller to the idle state, discarding any
    /// collected records, so `test` can run again.
    pub fn reset(&mut self) {
        self.state = ControllerState::Idle;
    }
}

impl Default for FdrController {
    fn default() -> Self {
        Self::new()
    }
}

// ── Benjamini-Hochberg ────────────────────────────────────────────────

/// Step-up FDR adjustment. Input records arrive in submission order;
/// output is sorted by ascending p-value with monotone q-values.
fn benjamini_hochberg(records: Vec<FeatureRecord>) -> Vec<AdjustedRecord> {
    let k = records.len();
    let mut sorted = records;
    // Stable sort: equal p-values keep their submission order.
    sorted.sort_by(|a, b| a.p_value.total_cmp(&b.p_value));

    let kf = k as f64;
    let mut adjusted: Vec<AdjustedRecord> = sorted
        .into_iter()
        .enumerate()
        .map(|(i, record)| AdjustedRecord {
            feature: record.feature,
            p_value: record.p_value,
            q_value: record.p_value * kf / (i + 1) as f64,
        })
        .collect();

    // Cumulative minimum from the highest rank down; the last rank
    // keeps its own ratio.
    for i in (0..k.saturating_sub(1)).rev() {
        adjusted[i].q_value = adjusted[i].q_value.min(adjusted[i + 1].q_value);
    }
    adjusted
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataframe::Column;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn records(p_values: &[f64]) -> Vec<FeatureRecord> {
        p_values
            .iter()
            .enumerate()
            .map(|(i, &p)| FeatureRecord {
                feature: format!("f{i}"),
                p_value: p,
            })
            .collect()
    }

    fn survey_frame() -> DataFrame {
        let mut df = DataFrame::new();
        df.add_column(
            "group".to_string(),
            Column::categorical_from_labels(&[
                "a", "a", "a", "a", "a", "b", "b", "b", "b", "b",
            ]),
        )
        .unwrap();
        // Perfectly separated categorical feature.
        df.add_column(
            "separated".to_string(),
            Column::categorical_from_labels(&[
                "x", "x", "x", "x", "x", "y", "y", "y", "y", "y",
            ]),
        )
        .unwrap();
        // Identically distributed categorical feature: p = 1 always.
        df.add_column(
            "balanced".to_string(),
            Column::categorical_from_labels(&[
                "x", "y", "x", "y", "x", "x", "y", "x", "y", "x",
            ]),
        )
        .unwrap();
        // Numeric feature unrelated to the grouping.
        df.add_column(
            "value".to_string(),
            Column::numeric(vec![3.1, 0.2, 2.3, 1.4, 0.5, 2.6, 0.7, 3.8, 1.9, 1.0]),
        )
        .unwrap();
        df
    }

    // ── Benjamini-Hochberg arithmetic ────────────────────────────

    #[test]
    fn bh_worked_example() {
        // p = [0.01, 0.02, 0.2, 0.5, 0.9], k = 5:
        // ratios 0.05, 0.05, 1/3, 0.625, 0.9 are already monotone.
        let adjusted = benjamini_hochberg(records(&[0.01, 0.02, 0.2, 0.5, 0.9]));
        let q: Vec<f64> = adjusted.iter().map(|r| r.q_value).collect();

        assert_abs_diff_eq!(q[0], 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(q[1], 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(q[2], 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q[3], 0.625, epsilon = 1e-12);
        assert_abs_diff_eq!(q[4], 0.9, epsilon = 1e-12);
    }

    #[test]
    fn bh_enforces_monotonicity_downward() {
        // p = [0.6, 0.9, 0.95]: ratios 1.8, 1.35, 0.95 all collapse to
        // the last rank's ratio.
        let adjusted = benjamini_hochberg(records(&[0.6, 0.9, 0.95]));
        for record in &adjusted {
            assert_abs_diff_eq!(record.q_value, 0.95, epsilon = 1e-12);
        }
    }

    #[test]
    fn bh_sorts_by_pvalue_with_stable_ties() {
        let adjusted = benjamini_hochberg(records(&[0.5, 0.1, 0.5]));
        let order: Vec<&str> = adjusted.iter().map(|r| r.feature.as_str()).collect();
        // f0 and f2 tie at 0.5; submission order is preserved.
        assert_eq!(order, vec!["f1", "f0", "f2"]);
    }

    #[test]
    fn bh_single_record_keeps_its_pvalue() {
        let adjusted = benjamini_hochberg(records(&[0.07]));
        assert_eq!(adjusted[0].q_value, 0.07);
    }

    proptest! {
        #[test]
        fn bh_qvalues_monotone_and_in_range(
            p_values in proptest::collection::vec(0.0f64..=1.0, 1..32),
        ) {
            let adjusted = benjamini_hochberg(records(&p_values));
            for window in adjusted.windows(2) {
                prop_assert!(window[0].p_value <= window[1].p_value);
                prop_assert!(window[0].q_value <= window[1].q_value);
            }
            for record in &adjusted {
                prop_assert!((0.0..=1.0).contains(&record.q_value));
                prop_assert!(record.q_value >= record.p_value);
            }
        }
    }

    // ── Controller state machine ─────────────────────────────────

    #[test]
    fn full_lifecycle() {
        let df = survey_frame();
        let features = features_from_schema(&df, "group");
        assert_eq!(
            features,
            vec![
                Feature::Categorical("separated".to_string()),
                Feature::Categorical("balanced".to_string()),
                Feature::Quantitative("value".to_string()),
            ]
        );

        let mut controller = FdrController::new();
        controller
            .test(&df, "group", &features, 200, Some(11))
            .unwrap();
        controller.adjust().unwrap();
        let report = controller.results(0.25).unwrap();

        assert_eq!(report.records.len(), 3);
        for window in report.records.windows(2) {
            assert!(window[0].p_value <= window[1].p_value);
            assert!(window[0].q_value <= window[1].q_value);
        }

        // The identically distributed feature can never be rejected.
        let balanced = report
            .records
            .iter()
            .find(|r| r.feature == "balanced")
            .unwrap();
        assert_eq!(balanced.p_value, 1.0);

        // The rejection set is exactly the records at or below the
        // critical threshold.
        match report.critical_q {
            Some(critical) => {
                assert!(critical <= 0.25);
                for record in &report.records {
                    let in_set = report.rejected.iter().any(|r| r.feature == record.feature);
                    assert_eq!(in_set, record.q_value <= critical);
                }
            }
            None => assert!(report.rejected.is_empty()),
        }
    }

    #[test]
    fn results_is_idempotent() {
        let df = survey_frame();
        let features = features_from_schema(&df, "group");
        let mut controller = FdrController::new();
        controller
            .test(&df, "group", &features, 100, Some(5))
            .unwrap();
        controller.adjust().unwrap();

        let first = controller.results(0.05).unwrap();
        let second = controller.results(0.05).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn no_record_below_threshold_yields_empty_rejection_set() {
        // Both features are identically distributed across groups, so
        // every p-value (and q-value) is 1.0.
        let mut df = DataFrame::new();
        df.add_column(
            "group".to_string(),
            Column::categorical_from_labels(&["a", "a", "b", "b"]),
        )
        .unwrap();
        df.add_column(
            "even".to_string(),
            Column::categorical_from_labels(&["x", "y", "x", "y"]),
        )
        .unwrap();
        df.add_column("flat".to_string(), Column::numeric(vec![1.0, 2.0, 1.0, 2.0]))
            .unwrap();

        let features = features_from_schema(&df, "group");
        let mut controller = FdrController::new();
        controller
            .test(&df, "group", &features, 50, Some(3))
            .unwrap();
        controller.adjust().unwrap();

        let report = controller.results(0.05).unwrap();
        assert_eq!(report.critical_q, None);
        assert!(report.rejected.is_empty());
        assert_eq!(report.records.len(), 2);
    }

    #[test]
    fn methods_out_of_order_are_invalid_state() {
        let df = survey_frame();
        let features = features_from_schema(&df, "group");
        let mut controller = FdrController::new();

        assert!(matches!(
            controller.adjust(),
            Err(PermuteError::InvalidState { .. })
        ));
        assert!(matches!(
            controller.results(0.05),
            Err(PermuteError::InvalidState { .. })
        ));

        controller
            .test(&df, "group", &features, 20, Some(1))
            .unwrap();
        assert!(matches!(
            controller.results(0.05),
            Err(PermuteError::InvalidState { .. })
        ));
        assert!(matches!(
            controller.test(&df, "group", &features, 20, Some(1)),
            Err(PermuteError::InvalidState { .. })
        ));

        controller.adjust().unwrap();
        assert!(matches!(
            controller.adjust(),
            Err(PermuteError::InvalidState { .. })
        ));
    }

    #[test]
    fn reset_allows_testing_again() {
        let df = survey_frame();
        let features = features_from_schema(&df, "group");
        let mut controller = FdrController::new();
        controller
            .test(&df, "group", &features, 20, Some(1))
            .unwrap();

        controller.reset();
        controller
            .test(&df, "group", &features, 20, Some(1))
            .unwrap();
    }

    #[test]
    fn empty_feature_set_is_invalid_argument() {
        let df = survey_frame();
        let mut controller = FdrController::new();
        assert!(matches!(
            controller.test(&df, "group", &[], 20, Some(1)),
            Err(PermuteError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn out_of_range_threshold_is_invalid_argument() {
        let df = survey_frame();
        let features = features_from_schema(&df, "group");
        let mut controller = FdrController::new();
        controller
            .test(&df, "group", &features, 20, Some(1))
            .unwrap();
        controller.adjust().unwrap();

        for threshold in [0.0, -0.5, 1.5] {
            assert!(matches!(
                controller.results(threshold),
                Err(PermuteError::InvalidArgument { .. })
            ));
        }
        // 1.0 is inclusive.
        assert!(controller.results(1.0).is_ok());
    }

    #[test]
    fn failing_feature_aborts_whole_run_and_stays_idle() {
        let df = survey_frame();
        // Mis-tagged feature: numeric column requested as categorical.
        let features = vec![
            Feature::Categorical("separated".to_string()),
            Feature::Categorical("value".to_string()),
        ];
        let mut controller = FdrController::new();
        assert!(matches!(
            controller.test(&df, "group", &features, 20, Some(1)),
            Err(PermuteError::InvalidInput { .. })
        ));

        // No partial state was kept: a valid run still works.
        let valid = features_from_schema(&df, "group");
        controller
            .test(&df, "group", &valid, 20, Some(1))
            .unwrap();
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let df = survey_frame();
        let features = features_from_schema(&df, "group");

        let mut first = FdrController::new();
        first.test(&df, "group", &features, 100, Some(21)).unwrap();
        first.adjust().unwrap();

        let mut second = FdrController::new();
        second.test(&df, "group", &features, 100, Some(21)).unwrap();
        second.adjust().unwrap();

        assert_eq!(
            first.results(0.1).unwrap(),
            second.results(0.1).unwrap()
        );
    }
}
