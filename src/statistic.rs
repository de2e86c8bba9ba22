//! Test statistics for two-group comparison.
//!
//! Pure functions that reduce the discrepancy between the two groups
//! defined by a binary grouping column to a single non-negative number:
//!
//! - [`tvd_of_groups`] — total variation distance between the groups'
//!   category distributions, for categorical (or boolean) targets.
//! - [`mean_difference_of_groups`] — absolute difference of the groups'
//!   means, for numeric targets.
//!
//! Both are deterministic for fixed inputs and never mutate the frame.
//! The [`permutation`](crate::permutation) engine recomputes them under
//! shuffled group labels to build an empirical null distribution.

use crate::dataframe::{Column, DataFrame};
use crate::error::PermuteError;

/// Which test statistic to compute for a target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticKind {
    /// Total variation distance between the groups' category distributions.
    Distributional,
    /// Absolute difference of the groups' means.
    MeanDifference,
}

// ── Public API ────────────────────────────────────────────────────────

/// Computes the total variation distance between the two groups'
/// distributions over a categorical target column.
///
/// Builds a contingency table of category counts per group, normalizes
/// each group's counts into a probability distribution, and returns half
/// the sum of absolute probability differences. The result lies in
/// `[0, 1]`: 0 means identical distributions, 1 means disjoint support.
/// A category present in only one group contributes probability 0 for the
/// other group.
///
/// # Errors
///
/// - [`PermuteError::InvalidInput`] if the grouping column does not have
///   exactly two distinct values among the rows, or if the target column
///   is empty or not categorical/boolean.
/// - [`PermuteError::InvalidArgument`] if a named column does not exist.
///
/// # Example
///
/// ```
/// use u_permute::dataframe::{Column, DataFrame};
/// use u_permute::statistic::tvd_of_groups;
///
/// let mut df = DataFrame::new();
/// df.add_column(
///     "group".to_string(),
///     Column::categorical_from_labels(&["a", "a", "a", "b", "b", "b"]),
/// ).unwrap();
/// df.add_column(
///     "answer".to_string(),
///     Column::categorical_from_labels(&["x", "x", "y", "x", "y", "y"]),
/// ).unwrap();
///
/// let tvd = tvd_of_groups(&df, "group", "answer").unwrap();
/// assert!((tvd - 1.0 / 3.0).abs() < 1e-12);
/// ```
pub fn tvd_of_groups(df: &DataFrame, grouping: &str, target: &str) -> Result<f64, PermuteError> {
    let mask = group_mask(df, grouping)?;
    let input = StatisticInput::prepare(df, target, StatisticKind::Distributional)?;
    Ok(input.evaluate(&mask))
}

/// Computes the absolute difference between the two groups' means of a
/// numeric target column.
///
/// # Errors
///
/// - [`PermuteError::InvalidInput`] if the grouping column does not have
///   exactly two distinct values (which also guarantees both groups are
///   non-empty), or if the target column is empty, not numeric, or
///   contains non-finite values.
/// - [`PermuteError::InvalidArgument`] if a named column does not exist.
///
/// # Example
///
/// ```
/// use u_permute::dataframe::{Column, DataFrame};
/// use u_permute::statistic::mean_difference_of_groups;
///
/// let mut df = DataFrame::new();
/// df.add_column(
///     "dose".to_string(),
///     Column::boolean(vec![false, false, false, true, true, true]),
/// ).unwrap();
/// df.add_column(
///     "response".to_string(),
///     Column::numeric(vec![2.0, 3.0, 4.0, 4.0, 5.0, 6.0]),
/// ).unwrap();
///
/// let diff = mean_difference_of_groups(&df, "dose", "response").unwrap();
/// assert_eq!(diff, 2.0);
/// ```
pub fn mean_difference_of_groups(
    df: &DataFrame,
    grouping: &str,
    target: &str,
) -> Result<f64, PermuteError> {
    let mask = group_mask(df, grouping)?;
    let input = StatisticInput::prepare(df, target, StatisticKind::MeanDifference)?;
    Ok(input.evaluate(&mask))
}

// ── Group labels ──────────────────────────────────────────────────────

/// Resolves the grouping column into a per-row membership mask.
///
/// `true` marks rows of the second observed group. Which group is called
/// which does not matter: both statistics are symmetric in the labels.
pub(crate) fn group_mask(df: &DataFrame, grouping: &str) -> Result<Vec<bool>, PermuteError> {
    let column = df
        .column_by_name(grouping)
        .ok_or_else(|| missing_column(grouping))?;

    let not_binary = || PermuteError::InvalidInput {
        column: grouping.to_string(),
        message: "grouping column must have exactly two distinct values".to_string(),
    };

    match column {
        Column::Boolean(values) => {
            let trues = values.iter().filter(|&&v| v).count();
            if trues == 0 || trues == values.len() {
                return Err(not_binary());
            }
            Ok(values.clone())
        }
        Column::Categorical { codes, .. } => {
            let mut seen: Vec<u32> = Vec::with_capacity(2);
            for &code in codes {
                if !seen.contains(&code) {
                    seen.push(code);
                    if seen.len() > 2 {
                        break;
                    }
                }
            }
            if seen.len() != 2 {
                return Err(not_binary());
            }
            let second = seen[1];
            Ok(codes.iter().map(|&c| c == second).collect())
        }
        Column::Numeric(_) => Err(PermuteError::InvalidInput {
            column: grouping.to_string(),
            message: "grouping column must be boolean or categorical".to_string(),
        }),
    }
}

// ── Prepared statistic input ──────────────────────────────────────────

/// A target column resolved into the dense form the simulation loop
/// evaluates against a (possibly shuffled) group mask.
pub(crate) enum StatisticInput {
    Categories { codes: Vec<u32>, cardinality: usize },
    Values(Vec<f64>),
}

impl StatisticInput {
    pub(crate) fn prepare(
        df: &DataFrame,
        target: &str,
        kind: StatisticKind,
    ) -> Result<Self, PermuteError> {
        let column = df
            .column_by_name(target)
            .ok_or_else(|| missing_column(target))?;
        if column.is_empty() {
            return Err(PermuteError::InvalidInput {
                column: target.to_string(),
                message: "target column is empty".to_string(),
            });
        }

        match kind {
            StatisticKind::Distributional => match column {
                Column::Categorical { dictionary, codes } => Ok(Self::Categories {
                    codes: codes.clone(),
                    cardinality: dictionary.len(),
                }),
                Column::Boolean(values) => Ok(Self::Categories {
                    codes: values.iter().map(|&v| u32::from(v)).collect(),
                    cardinality: 2,
                }),
                Column::Numeric(_) => Err(PermuteError::InvalidInput {
                    column: target.to_string(),
                    message: "distributional statistic requires a categorical or boolean target"
                        .to_string(),
                }),
            },
            StatisticKind::MeanDifference => match column {
                Column::Numeric(values) => {
                    if values.iter().any(|v| !v.is_finite()) {
                        return Err(PermuteError::InvalidInput {
                            column: target.to_string(),
                            message: "target column contains non-finite values".to_string(),
                        });
                    }
                    Ok(Self::Values(values.clone()))
                }
                _ => Err(PermuteError::InvalidInput {
                    column: target.to_string(),
                    message: "mean-difference statistic requires a numeric target".to_string(),
                }),
            },
        }
    }

    /// Evaluates the statistic for the given group mask.
    ///
    /// The mask must have the same length as the column and contain at
    /// least one row of each group; [`group_mask`] guarantees both, and
    /// shuffling preserves them.
    pub(crate) fn evaluate(&self, mask: &[bool]) -> f64 {
        match self {
            Self::Categories { codes, cardinality } => tvd_from_codes(mask, codes, *cardinality),
            Self::Values(values) => mean_difference_from_values(mask, values),
        }
    }
}

fn missing_column(name: &str) -> PermuteError {
    PermuteError::InvalidArgument {
        name: name.to_string(),
        message: "column not found".to_string(),
    }
}

// ── Kernels ───────────────────────────────────────────────────────────

/// Half the sum of absolute differences between the two groups'
/// per-category proportions.
fn tvd_from_codes(mask: &[bool], codes: &[u32], cardinality: usize) -> f64 {
    debug_assert_eq!(mask.len(), codes.len());

    let mut counts_a = vec![0u32; cardinality];
    let mut counts_b = vec![0u32; cardinality];
    for (&code, &in_b) in codes.iter().zip(mask) {
        if in_b {
            counts_b[code as usize] += 1;
        } else {
            counts_a[code as usize] += 1;
        }
    }

    let total_a = f64::from(counts_a.iter().sum::<u32>());
    let total_b = f64::from(counts_b.iter().sum::<u32>());

    let mut distance = 0.0;
    for (&a, &b) in counts_a.iter().zip(&counts_b) {
        distance += (f64::from(a) / total_a - f64::from(b) / total_b).abs();
    }
    distance / 2.0
}

fn mean_difference_from_values(mask: &[bool], values: &[f64]) -> f64 {
    debug_assert_eq!(mask.len(), values.len());

    let (mut sum_a, mut sum_b) = (0.0f64, 0.0f64);
    let (mut n_a, mut n_b) = (0u32, 0u32);
    for (&value, &in_b) in values.iter().zip(mask) {
        if in_b {
            sum_b += value;
            n_b += 1;
        } else {
            sum_a += value;
            n_a += 1;
        }
    }
    (sum_a / f64::from(n_a) - sum_b / f64::from(n_b)).abs()
}

// ── Tests ─────────────────────────────────────────────────────────────
