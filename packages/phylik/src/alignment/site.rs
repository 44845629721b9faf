use crate::make_report;
use eyre::Report;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// One column of an alignment: an observed token per taxon, plus an
/// optional class label selecting which model/tree the column belongs to.
///
/// Equality and hashing consider the taxon→token map only, so identical
/// columns of the same class deduplicate before likelihood computation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Site {
  label: Option<String>,
  states: BTreeMap<String, String>,
}

impl Site {
  pub fn new<T, S>(states: impl IntoIterator<Item = (T, S)>) -> Self
  where
    T: Into<String>,
    S: Into<String>,
  {
    Self {
      label: None,
      states: states.into_iter().map(|(t, s)| (t.into(), s.into())).collect(),
    }
  }

  pub fn with_label<T, S>(label: impl Into<String>, states: impl IntoIterator<Item = (T, S)>) -> Self
  where
    T: Into<String>,
    S: Into<String>,
  {
    Self {
      label: Some(label.into()),
      states: states.into_iter().map(|(t, s)| (t.into(), s.into())).collect(),
    }
  }

  pub fn label(&self) -> Option<&str> {
    self.label.as_deref()
  }

  /// Observed token for a taxon; unknown taxa are structural errors
  pub fn state(&self, taxon: &str) -> Result<&str, Report> {
    self
      .states
      .get(taxon)
      .map(String::as_str)
      .ok_or_else(|| make_report!("Site contains no entry for taxon '{taxon}'"))
  }

  pub fn taxa(&self) -> impl Iterator<Item = &str> {
    self.states.keys().map(String::as_str)
  }

  pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
    self.states.iter().map(|(t, s)| (t.as_str(), s.as_str()))
  }

  pub fn num_taxa(&self) -> usize {
    self.states.len()
  }
}

impl PartialEq for Site {
  fn eq(&self, other: &Self) -> bool {
    self.states == other.states
  }
}

impl Eq for Site {}

impl Hash for Site {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.states.hash(state);
  }
}
