pub mod constraints;
pub mod node_lik;
pub mod prob_cache;
pub mod pruning;
pub mod results;
pub mod root;
