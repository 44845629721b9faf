use crate::alignment::site::Site;
use crate::make_error;
use eyre::Report;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Column-major alignment: an ordered list of sites over one fixed taxon
/// set. Construction fails if the sites disagree on their taxa.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
  taxa: Vec<String>,
  sites: Vec<Site>,
}

impl Alignment {
  pub fn new(sites: Vec<Site>) -> Result<Self, Report> {
    let Some(first) = sites.first() else {
      return make_error!("Alignment must contain at least one site");
    };

    let taxa = first.taxa().map(ToString::to_string).collect_vec();
    for (i, site) in sites.iter().enumerate() {
      let site_taxa = site.taxa().collect_vec();
      if site_taxa != taxa.iter().map(String::as_str).collect_vec() {
        return make_error!(
          "All sites of an alignment must cover the same taxa, but site {i} covers [{}] while the first site covers [{}]",
          site_taxa.iter().join(", "),
          taxa.iter().join(", ")
        );
      }
    }

    Ok(Self { taxa, sites })
  }

  /// Build from per-taxon token sequences (rows), transposed into sites
  /// (columns). All sequences must have equal length.
  pub fn from_sequences<T, S>(sequences: IndexMap<T, Vec<S>>) -> Result<Self, Report>
  where
    T: Into<String>,
    S: Into<String>,
  {
    let sequences: IndexMap<String, Vec<String>> = sequences
      .into_iter()
      .map(|(taxon, seq)| (taxon.into(), seq.into_iter().map(Into::into).collect_vec()))
      .collect();

    let Some(length) = sequences.values().map(Vec::len).next() else {
      return make_error!("Alignment must contain at least one sequence");
    };
    if let Some((taxon, seq)) = sequences.iter().find(|(_, seq)| seq.len() != length) {
      return make_error!(
        "All sequences must have the same length, but '{taxon}' has {} tokens while the first sequence has {length}",
        seq.len()
      );
    }

    let sites = (0..length)
      .map(|pos| Site::new(sequences.iter().map(|(taxon, seq)| (taxon.clone(), seq[pos].clone()))))
      .collect_vec();

    Self::new(sites)
  }

  pub fn taxa(&self) -> &[String] {
    &self.taxa
  }

  pub fn sites(&self) -> &[Site] {
    &self.sites
  }

  pub fn len(&self) -> usize {
    self.sites.len()
  }

  pub fn is_empty(&self) -> bool {
    self.sites.is_empty()
  }

  /// Distinct class labels present, in order of first appearance
  pub fn class_labels(&self) -> IndexSet<Option<String>> {
    self
      .sites
      .iter()
      .map(|site| site.label().map(ToString::to_string))
      .collect()
  }

  /// Deduplicated sites with their multiplicities, grouped by (class
  /// label, observations) in order of first appearance. A pure
  /// optimization: identical columns of one class have identical
  /// likelihoods.
  pub fn unique_sites(&self) -> IndexMap<(Option<String>, Site), usize> {
    let mut unique: IndexMap<(Option<String>, Site), usize> = IndexMap::new();
    for site in &self.sites {
      let key = (site.label().map(ToString::to_string), site.clone());
      *unique.entry(key).or_insert(0) += 1;
    }
    unique
  }
}
