//! Monte Carlo permutation testing.
//!
//! Estimates how likely an observed two-group difference is under the
//! null hypothesis that the grouping carries no information about the
//! target column. The group labels are re-dealt as a full random
//! permutation (same multiset of labels, randomized assignment to rows)
//! N times, the test statistic is recomputed under each relabeling to
//! build an empirical null distribution, and the p-value is the fraction
//! of simulated statistics at least as large as the observed one.
//!
//! The comparison is one-sided by design: both statistics measure the
//! magnitude of the group discrepancy, so only unusually *large* values
//! count as evidence against the null.
//!
//! The test is stochastic; pass a fixed [`PermutationConfig::seed`] for
//! reproducible runs.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::dataframe::DataFrame;
use crate::error::PermuteError;
use crate::statistic::{group_mask, StatisticInput, StatisticKind};

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for a permutation test.
#[derive(Debug, Clone)]
pub struct PermutationConfig {
    /// Number of simulated trials (N). Default: 1000.
    pub trials: usize,
    /// Significance level in (0, 1) for the optional verdict.
    /// Default: `None` (no verdict is produced).
    pub significance_level: Option<f64>,
    /// Random seed. `None` seeds from OS entropy. Default: `None`.
    pub seed: Option<u64>,
}

impl Default for PermutationConfig {
    fn default() -> Self {
        Self {
            trials: 1000,
            significance_level: None,
            seed: None,
        }
    }
}

impl PermutationConfig {
    /// Sets the number of simulated trials.
    pub fn trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    /// Sets the significance level for the verdict.
    pub fn significance_level(mut self, level: Option<f64>) -> Self {
        self.significance_level = level;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

// ── Result ────────────────────────────────────────────────────────────

/// Result of a permutation test.
#[derive(Debug, Clone, PartialEq)]
pub struct PermutationTest {
    /// Test statistic on the unshuffled data.
    pub observed: f64,
    /// Fraction of the null distribution at least as large as `observed`.
    pub p_value: f64,
    /// Statistic values from the N simulated trials, in trial order.
    pub null_distribution: Vec<f64>,
    /// Human-readable assessment, present when a significance level was
    /// configured.
    pub verdict: Option<String>,
}

// ── Engine ────────────────────────────────────────────────────────────

/// Runs a permutation test of the group difference on one target column.
///
/// # Errors
///
/// - [`PermuteError::InvalidArgument`] if `config.trials < 1` or the
///   configured significance level lies outside (0, 1).
/// - Any error from the underlying statistic, propagated unchanged.
///
/// # Example
///
/// ```
/// use u_permute::dataframe::{Column, DataFrame};
/// use u_permute::permutation::{permutation_test, PermutationConfig};
/// use u_permute::statistic::StatisticKind;
///
/// let mut df = DataFrame::new();
/// df.add_column(
///     "group".to_string(),
///     Column::categorical_from_labels(&["a", "a", "a", "b", "b", "b"]),
/// ).unwrap();
/// df.add_column(
///     "value".to_string(),
///     Column::numeric(vec![2.0, 3.0, 4.0, 4.0, 5.0, 6.0]),
/// ).unwrap();
///
/// let config = PermutationConfig::default().trials(500).seed(Some(42));
/// let test = permutation_test(
///     &df, "group", "value", StatisticKind::MeanDifference, &config,
/// ).unwrap();
///
/// assert_eq!(test.observed, 2.0);
/// assert_eq!(test.null_distribution.len(), 500);
/// assert!(test.p_value >= 0.0 && test.p_value <= 1.0);
/// ```
pub fn permutation_test(
    df: &DataFrame,
    grouping: &str,
    target: &str,
    kind: StatisticKind,
    config: &PermutationConfig,
) -> Result<PermutationTest, PermuteError> {
    if let Some(level) = config.significance_level {
        if !(level > 0.0 && level < 1.0) {
            return Err(PermuteError::InvalidArgument {
                name: "significance_level".to_string(),
                message: format!("must lie in (0, 1), got {level}"),
            });
        }
    }

    let mut rng = match config.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let simulation = simulate(df, grouping, target, kind, config.trials, &mut rng)?;
    let verdict = config
        .significance_level
        .map(|level| verdict_text(simulation.observed, simulation.p_value, level));

    Ok(PermutationTest {
        observed: simulation.observed,
        p_value: simulation.p_value,
        null_distribution: simulation.null_distribution,
        verdict,
    })
}

/// Outcome of the simulation loop, before verdict formatting.
pub(crate) struct Simulation {
    pub(crate) observed: f64,
    pub(crate) p_value: f64,
    pub(crate) null_distribution: Vec<f64>,
}

/// Core simulation with an externally supplied random source, so a
/// caller testing many columns can thread one seeded stream through all
/// of them.
pub(crate) fn simulate<R: Rng>(
    df: &DataFrame,
    grouping: &str,
    target: &str,
    kind: StatisticKind,
    trials: usize,
    rng: &mut R,
) -> Result<Simulation, PermuteError> {
    if trials < 1 {
        return Err(PermuteError::InvalidArgument {
            name: "trials".to_string(),
            message: "at least 1 simulated trial is required".to_string(),
        });
    }

    let mask = group_mask(df, grouping)?;
    let input = StatisticInput::prepare(df, target, kind)?;
    let observed = input.evaluate(&mask);

    // The frame itself is never touched: only this label buffer is
    // shuffled, and each shuffle is a full permutation of the original
    // label multiset.
    let mut shuffled = mask;
    let mut null_distribution = Vec::with_capacity(trials);
    for _ in 0..trials {
        shuffled.shuffle(rng);
        null_distribution.push(input.evaluate(&shuffled));
    }

    let exceeding = null_distribution.iter().filter(|&&v| v >= observed).count();
    let p_value = exceeding as f64 / trials as f64;
    debug!(column = target, observed, p_value, trials, "permutation simulation complete");

    Ok(Simulation {
        observed,
        p_value,
        null_distribution,
    })
}

fn verdict_text(observed: f64, p_value: f64, level: f64) -> String {
    let decision = if p_value < level {
        "reject the null hypothesis"
    } else {
        "fail to reject the null hypothesis"
    };
    format!(
        "observed statistic = {observed:.4}, p-value = {p_value}: {decision} at significance level {level}"
    )
}

// ── Tests ─────────────────────────────────────────────────────────────
