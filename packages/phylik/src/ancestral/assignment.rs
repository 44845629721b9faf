use crate::likelihood::constraints::StateConstraints;
use indexmap::IndexMap;
use itertools::Itertools;
use std::fmt::{self, Display};

/// Partial mapping from internal node name to an assigned state index,
/// used during branch-and-bound search over ancestral assignments.
/// `Clone` is a deep copy, so an incumbent solution survives further
/// mutation of the working assignment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Assignment {
  states: IndexMap<String, usize>,
}

impl Assignment {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn assign(&mut self, node: impl Into<String>, state: usize) {
    self.states.insert(node.into(), state);
  }

  pub fn unassign(&mut self, node: &str) {
    self.states.shift_remove(node);
  }

  pub fn get(&self, node: &str) -> Option<usize> {
    self.states.get(node).copied()
  }

  pub fn is_assigned(&self, node: &str) -> bool {
    self.states.contains_key(node)
  }

  pub fn len(&self) -> usize {
    self.states.len()
  }

  pub fn is_empty(&self) -> bool {
    self.states.is_empty()
  }

  pub fn nodes(&self) -> impl Iterator<Item = &str> {
    self.states.keys().map(String::as_str)
  }

  /// Constraints pinning every assigned node to its single state;
  /// unassigned nodes stay free (marginalized by the recursion)
  pub(crate) fn to_constraints(&self, state_tokens: &[String]) -> StateConstraints {
    let mut constraints = StateConstraints::unconstrained();
    for (node, &state) in &self.states {
      constraints.assign(node.clone(), state_tokens[state].clone());
    }
    constraints
  }
}

impl Display for Assignment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}",
      self.states.iter().map(|(node, state)| format!("{node}={state}")).join(" ")
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[rstest]
  fn clone_is_independent() {
    let mut a = Assignment::new();
    a.assign("n1", 2);
    let snapshot = a.clone();
    a.assign("n1", 0);
    a.assign("n2", 1);

    assert_eq!(snapshot.get("n1"), Some(2));
    assert!(!snapshot.is_assigned("n2"));
  }

  #[rstest]
  fn converts_to_pinned_constraints() {
    let mut a = Assignment::new();
    a.assign("n1", 1);
    let states = vec!["A".to_owned(), "C".to_owned()];
    let constraints = a.to_constraints(&states);
    assert_eq!(constraints.allowed("n1").unwrap().iter().collect::<Vec<_>>(), vec!["C"]);
    assert!(constraints.allowed("n2").is_none());
  }
}
