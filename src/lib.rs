//! # u-permute
//!
//! Permutation hypothesis testing and false discovery rate control for
//! tabular data.
//!
//! Given a table whose rows fall into two groups according to a binary
//! grouping column, u-permute answers two related questions:
//!
//! - **Permutation testing** — how likely is the observed difference
//!   between the groups on one column if the grouping carries no real
//!   information? Group labels are re-dealt as full random permutations
//!   N times to build an empirical null distribution, and the p-value is
//!   the fraction of simulated statistics at least as large as the
//!   observed one.
//! - **FDR control** — when many columns are tested against the same
//!   grouping, which of them survive a Benjamini-Hochberg correction of
//!   the collected p-values at a chosen false discovery rate?
//!
//! The caller supplies an already-clean, in-memory [`DataFrame`](dataframe::DataFrame)
//! and consumes plain numbers and strings; loading, cleaning, and
//! persistence live outside this crate.
//!
//! ## Modules
//!
//! - [`dataframe`] — Column-major tabular data model (DataFrame, Column, DataType)
//! - [`statistic`] — Test statistics: total variation distance, mean difference
//! - [`permutation`] — Monte Carlo permutation engine with seedable randomness
//! - [`fdr`] — Benjamini-Hochberg false discovery rate controller
//! - [`error`] — Error types
//!
//! ## Quick Start
//!
//! ```
//! use u_permute::dataframe::{Column, DataFrame};
//! use u_permute::permutation::{permutation_test, PermutationConfig};
//! use u_permute::statistic::StatisticKind;
//!
//! let mut df = DataFrame::new();
//! df.add_column(
//!     "treated".to_string(),
//!     Column::categorical_from_labels(&["yes", "yes", "yes", "no", "no", "no"]),
//! ).unwrap();
//! df.add_column(
//!     "outcome".to_string(),
//!     Column::categorical_from_labels(&["good", "good", "good", "poor", "poor", "poor"]),
//! ).unwrap();
//!
//! let config = PermutationConfig::default()
//!     .trials(200)
//!     .seed(Some(42))
//!     .significance_level(Some(0.05));
//! let test = permutation_test(
//!     &df, "treated", "outcome", StatisticKind::Distributional, &config,
//! ).unwrap();
//!
//! assert_eq!(test.observed, 1.0); // perfectly separated groups
//! assert_eq!(test.null_distribution.len(), 200);
//! assert!(test.verdict.is_some());
//! ```

pub mod dataframe;
pub mod error;
pub mod fdr;
pub mod permutation;
pub mod statistic;
