pub const TINY_NUMBER: f64 = 1e-12;

/// Number of terms retained in the truncated exponential power series
pub const TAYLOR_SERIES_ORDER: usize = 12;

/// Matrix dimension above which matrix products are parallelized row-wise.
/// Nucleotide (4) and amino-acid (20) models stay single-threaded; codon
/// models (61+) benefit from the split.
pub const MATMUL_PAR_THRESHOLD: usize = 32;

/// Iteration budget for the repeated-application stationary distribution
pub const STATIONARY_MAX_ITER: usize = 100_000;
pub const STATIONARY_TOL: f64 = 1e-13;

/// Exponent gap beyond which the smaller addend of a scaled-float sum is
/// treated as an exact zero contribution
pub const SCALED_MAX_EXPONENT_GAP: i64 = 1100;
