use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;

/// Restriction of internal nodes to subsets of states during
/// reconstruction. Nodes without an entry are unconstrained.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateConstraints {
  allowed: IndexMap<String, IndexSet<String>>,
}

impl StateConstraints {
  pub fn unconstrained() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn with_allowed(mut self, node: impl Into<String>, states: &[&str]) -> Self {
    self
      .allowed
      .insert(node.into(), states.iter().map(ToString::to_string).collect());
    self
  }

  /// Pin one node to a single state
  pub fn assign(&mut self, node: impl Into<String>, state: impl Into<String>) {
    self.allowed.insert(node.into(), IndexSet::from([state.into()]));
  }

  /// Allowed states for a node; `None` means every state
  pub fn allowed(&self, node: &str) -> Option<&IndexSet<String>> {
    self.allowed.get(node)
  }

  pub fn is_empty(&self) -> bool {
    self.allowed.is_empty()
  }

  /// Per-node intersection of two constraint sets. A node constrained in
  /// either input is constrained in the result.
  #[must_use]
  pub fn intersect(&self, other: &Self) -> Self {
    let mut allowed = self.allowed.clone();
    for (node, states) in &other.allowed {
      match allowed.get_mut(node) {
        Some(existing) => {
          *existing = existing.intersection(states).cloned().collect();
        }
        None => {
          allowed.insert(node.clone(), states.clone());
        }
      }
    }
    Self { allowed }
  }

  pub fn nodes(&self) -> impl Iterator<Item = &str> {
    self.allowed.keys().map(String::as_str)
  }
}

impl std::fmt::Display for StateConstraints {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.allowed.is_empty() {
      return write!(f, "(unconstrained)");
    }
    let entries = self
      .allowed
      .iter()
      .map(|(node, states)| format!("{node}:{{{}}}", states.iter().join(",")))
      .join(" ");
    write!(f, "{entries}")
  }
}
