use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Maps an ambiguous observation token to the set of true states it may
/// stand for. Tokens without an entry resolve to themselves.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Ambiguity {
  map: IndexMap<String, Vec<String>>,
}

impl Ambiguity {
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn with_entry(mut self, token: impl Into<String>, states: &[&str]) -> Self {
    self
      .map
      .insert(token.into(), states.iter().map(ToString::to_string).collect_vec());
    self
  }

  /// Standard IUPAC nucleotide ambiguity codes. `N` and the gap are
  /// treated as completely unknown.
  pub fn nucleotide() -> Self {
    Self::new()
      .with_entry("R", &["A", "G"])
      .with_entry("Y", &["C", "T"])
      .with_entry("S", &["C", "G"])
      .with_entry("W", &["A", "T"])
      .with_entry("K", &["G", "T"])
      .with_entry("M", &["A", "C"])
      .with_entry("D", &["A", "G", "T"])
      .with_entry("H", &["A", "C", "T"])
      .with_entry("B", &["C", "G", "T"])
      .with_entry("V", &["A", "C", "G"])
      .with_entry("N", &["A", "C", "G", "T"])
      .with_entry("-", &["A", "C", "G", "T"])
  }

  /// Possible true states behind an observed token
  pub fn resolve<'a>(&'a self, token: &'a str) -> Vec<&'a str> {
    match self.map.get(token) {
      Some(states) => states.iter().map(String::as_str).collect_vec(),
      None => vec![token],
    }
  }

  /// True when the token stands for more than one state
  pub fn is_ambiguous(&self, token: &str) -> bool {
    self.map.get(token).map_or(false, |states| states.len() > 1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[rstest]
  fn unknown_tokens_resolve_to_themselves() {
    let ambiguity = Ambiguity::new();
    assert_eq!(ambiguity.resolve("A"), vec!["A"]);
    assert!(!ambiguity.is_ambiguous("A"));
  }

  #[rstest]
  fn nucleotide_codes_resolve() {
    let ambiguity = Ambiguity::nucleotide();
    assert_eq!(ambiguity.resolve("R"), vec!["A", "G"]);
    assert_eq!(ambiguity.resolve("N"), vec!["A", "C", "G", "T"]);
    assert!(ambiguity.is_ambiguous("-"));
    assert_eq!(ambiguity.resolve("T"), vec!["T"]);
  }
}
