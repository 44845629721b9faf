use crate::make_report;
use eyre::Report;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Algorithm used to turn a rate matrix and a branch length into a
/// transition probability matrix
#[derive(Copy, Clone, Debug, PartialEq, Eq, SmartDefault, Serialize, Deserialize)]
pub enum MatExpMethod {
  /// Scaling-and-squaring truncated power series. `min_squarings` forces a
  /// lower bound on the squaring count regardless of the matrix norm.
  #[default]
  Taylor {
    #[default = 0]
    min_squarings: usize,
  },
  /// Eigendecomposition of the generator, exponentiated on the diagonal
  Eigen,
}

/// Numeric representation used for every likelihood value
#[derive(Copy, Clone, Debug, PartialEq, Eq, SmartDefault, Serialize, Deserialize)]
pub enum ScalarKind {
  /// Native floating point. Fast, but underflows to zero on large trees.
  Plain,
  /// Normalized mantissa + binary exponent pair with unbounded dynamic range
  #[default]
  Scaled,
}

/// Per-engine configuration. Passed explicitly into engine constructors;
/// there are no process-wide switches.
#[derive(Copy, Clone, Debug, PartialEq, SmartDefault, Serialize, Deserialize)]
pub struct EngineConfig {
  pub mat_exp: MatExpMethod,
  pub scalar: ScalarKind,

  /// Worker pool size for per-site computations. `None` means one worker
  /// per available CPU.
  #[default(None)]
  pub threads: Option<usize>,

  /// Keep per-node partial likelihood vectors on results. Disable to bound
  /// memory during optimization loops.
  #[default = true]
  pub retain_partials: bool,
}

impl EngineConfig {
  /// Fixed-size worker pool for per-site computations. One pool per
  /// engine, sized here, so concurrent engines with different settings
  /// stay independent.
  pub fn build_pool(&self) -> Result<rayon::ThreadPool, Report> {
    rayon::ThreadPoolBuilder::new()
      .num_threads(self.threads.unwrap_or(0))
      .build()
      .map_err(|err| make_report!("Failed to build worker pool: {err}"))
  }
}
