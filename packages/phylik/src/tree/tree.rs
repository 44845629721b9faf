use crate::model::parameters::Parameters;
use crate::{make_error, make_report};
use eyre::Report;
use indexmap::IndexMap;
use itertools::Itertools;
use std::fmt::{self, Display, Write as _};

pub type NodeId = usize;
pub type BranchId = usize;

/// Directed branch from parent to child, optionally carrying a length
#[derive(Clone, Debug, PartialEq)]
pub struct Branch {
  parent: NodeId,
  child: NodeId,
  length: Option<f64>,
}

impl Branch {
  #[inline]
  pub const fn parent(&self) -> NodeId {
    self.parent
  }

  #[inline]
  pub const fn child(&self) -> NodeId {
    self.child
  }

  #[inline]
  pub const fn length(&self) -> Option<f64> {
    self.length
  }
}

#[derive(Clone, Debug)]
struct TreeNode {
  name: String,
  parent: Option<NodeId>,
  children: Vec<NodeId>,
}

/// Rooted tree stored as an arena of named nodes with precomputed
/// traversal orders.
///
/// The branch list is kept in postorder (children before parents), the
/// order required by the pruning recursion; it is computed once at
/// construction and exposed as an explicit, testable artifact. A `Tree` is
/// immutable: resolving branch lengths produces a new value.
#[derive(Clone, Debug)]
pub struct Tree {
  nodes: Vec<TreeNode>,
  names: IndexMap<String, NodeId>,
  root: NodeId,
  branches: Vec<Branch>,
  branch_above: Vec<Option<BranchId>>,
  postorder_nodes: Vec<NodeId>,
  leaves: Vec<NodeId>,
  internals: Vec<NodeId>,
}

impl Tree {
  /// Build a tree from (parent name, child name, branch length) triples.
  /// Node names may appear in any order; structure is validated eagerly:
  /// unique parent per child, exactly one root, no cycles, no disconnected
  /// nodes, nonnegative lengths.
  pub fn new<'a>(branches: impl IntoIterator<Item = (&'a str, &'a str, Option<f64>)>) -> Result<Self, Report> {
    let mut names: IndexMap<String, NodeId> = IndexMap::new();
    let mut nodes: Vec<TreeNode> = Vec::new();
    let mut raw_branches: Vec<Branch> = Vec::new();

    let node_id = |name: &str, nodes: &mut Vec<TreeNode>, names: &mut IndexMap<String, NodeId>| -> NodeId {
      *names.entry(name.to_owned()).or_insert_with(|| {
        nodes.push(TreeNode {
          name: name.to_owned(),
          parent: None,
          children: vec![],
        });
        nodes.len() - 1
      })
    };

    for (parent_name, child_name, length) in branches {
      if parent_name == child_name {
        return make_error!("Branch from '{parent_name}' to itself is not allowed");
      }
      if let Some(length) = length {
        if !(length.is_finite() && length >= 0.0) {
          return make_error!("Branch length of '{child_name}' must be finite and nonnegative, but found {length}");
        }
      }

      let parent = node_id(parent_name, &mut nodes, &mut names);
      let child = node_id(child_name, &mut nodes, &mut names);

      if nodes[child].parent.is_some() {
        return make_error!("Node '{child_name}' has more than one parent");
      }
      nodes[child].parent = Some(parent);
      nodes[parent].children.push(child);
      raw_branches.push(Branch { parent, child, length });
    }

    if nodes.is_empty() {
      return make_error!("Tree must contain at least one branch");
    }

    let roots = nodes
      .iter()
      .enumerate()
      .filter(|(_, node)| node.parent.is_none())
      .map(|(id, _)| id)
      .collect_vec();
    let root = match roots.as_slice() {
      [root] => *root,
      [] => return make_error!("Tree has no root; the branches contain a cycle"),
      roots => {
        return make_error!(
          "Tree must have exactly one root, but found {}: [{}]",
          roots.len(),
          roots.iter().map(|&id| &nodes[id].name).join(", ")
        )
      }
    };

    // Iterative depth-first postorder; also catches nodes unreachable
    // from the root (cycles hanging off the side)
    let mut postorder_nodes = Vec::with_capacity(nodes.len());
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
      if expanded {
        postorder_nodes.push(id);
      } else {
        stack.push((id, true));
        for &child in nodes[id].children.iter().rev() {
          stack.push((child, false));
        }
      }
    }
    if postorder_nodes.len() != nodes.len() {
      return make_error!(
        "Tree is not connected: {} of {} nodes are unreachable from the root '{}'",
        nodes.len() - postorder_nodes.len(),
        nodes.len(),
        nodes[root].name
      );
    }

    // Branch list in postorder of the child node
    let branch_by_child: IndexMap<NodeId, Branch> = raw_branches.into_iter().map(|b| (b.child, b)).collect();
    let branches = postorder_nodes
      .iter()
      .filter(|&&id| id != root)
      .map(|id| branch_by_child[id].clone())
      .collect_vec();

    let mut branch_above = vec![None; nodes.len()];
    for (branch_id, branch) in branches.iter().enumerate() {
      branch_above[branch.child] = Some(branch_id);
    }

    let (leaves, internals): (Vec<NodeId>, Vec<NodeId>) = postorder_nodes
      .iter()
      .copied()
      .partition(|&id| nodes[id].children.is_empty());

    Ok(Self {
      nodes,
      names,
      root,
      branches,
      branch_above,
      postorder_nodes,
      leaves,
      internals,
    })
  }

  #[inline]
  pub const fn root(&self) -> NodeId {
    self.root
  }

  pub fn root_name(&self) -> &str {
    &self.nodes[self.root].name
  }

  pub fn num_nodes(&self) -> usize {
    self.nodes.len()
  }

  pub fn name(&self, id: NodeId) -> &str {
    &self.nodes[id].name
  }

  pub fn id(&self, name: &str) -> Result<NodeId, Report> {
    self
      .names
      .get(name)
      .copied()
      .ok_or_else(|| make_report!("Tree contains no node named '{name}'"))
  }

  pub fn is_leaf(&self, id: NodeId) -> bool {
    self.nodes[id].children.is_empty()
  }

  pub fn parent(&self, id: NodeId) -> Option<NodeId> {
    self.nodes[id].parent
  }

  pub fn children(&self, id: NodeId) -> &[NodeId] {
    &self.nodes[id].children
  }

  /// Branches in postorder: every branch whose child's subtree is complete
  /// precedes the branch above it
  pub fn branches(&self) -> &[Branch] {
    &self.branches
  }

  /// The branch whose child is the given node (None for the root)
  pub fn branch_above(&self, id: NodeId) -> Option<BranchId> {
    self.branch_above[id]
  }

  /// Nodes in postorder (children before parents, root last)
  pub fn postorder_nodes(&self) -> &[NodeId] {
    &self.postorder_nodes
  }

  pub fn leaves(&self) -> &[NodeId] {
    &self.leaves
  }

  /// Internal nodes (including the root), in postorder
  pub fn internals(&self) -> &[NodeId] {
    &self.internals
  }

  pub fn leaf_names(&self) -> impl Iterator<Item = &str> {
    self.leaves.iter().map(|&id| self.nodes[id].name.as_str())
  }

  pub fn internal_names(&self) -> impl Iterator<Item = &str> {
    self.internals.iter().map(|&id| self.nodes[id].name.as_str())
  }

  /// Branch ids on the path from a node up to the root, leaf-ward first
  pub fn path_to_root(&self, id: NodeId) -> Vec<BranchId> {
    let mut path = vec![];
    let mut current = id;
    while let Some(branch_id) = self.branch_above[current] {
      path.push(branch_id);
      current = self.branches[branch_id].parent;
    }
    path
  }

  /// New tree with every branch length made concrete: lengths named in the
  /// parameters (keyed by child node name) override stored lengths;
  /// branches that end up without a length are an error.
  pub fn with_lengths_resolved(&self, params: &Parameters) -> Result<Self, Report> {
    let mut tree = self.clone();
    for branch in &mut tree.branches {
      let child_name = &self.nodes[branch.child].name;
      match params.branch_length(child_name).or(branch.length) {
        Some(length) if length.is_finite() && length >= 0.0 => branch.length = Some(length),
        Some(length) => {
          return make_error!("Branch length of '{child_name}' must be finite and nonnegative, but found {length}")
        }
        None => return make_error!("No branch length available for branch above node '{child_name}'"),
      }
    }
    Ok(tree)
  }

  fn write_newick(&self, f: &mut String, id: NodeId) -> fmt::Result {
    let node = &self.nodes[id];
    if !node.children.is_empty() {
      f.write_char('(')?;
      for (i, &child) in node.children.iter().enumerate() {
        if i > 0 {
          f.write_char(',')?;
        }
        self.write_newick(f, child)?;
      }
      f.write_char(')')?;
    }
    f.write_str(&node.name)?;
    if let Some(branch_id) = self.branch_above[id] {
      if let Some(length) = self.branches[branch_id].length {
        write!(f, ":{length}")?;
      }
    }
    Ok(())
  }
}

impl Display for Tree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut out = String::new();
    self.write_newick(&mut out, self.root)?;
    write!(f, "{out};")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  fn four_taxon_tree() -> Tree {
    Tree::new([
      ("AB", "A", Some(0.1)),
      ("AB", "B", Some(0.2)),
      ("root", "AB", Some(0.05)),
      ("CD", "C", Some(0.3)),
      ("CD", "D", Some(0.4)),
      ("root", "CD", Some(0.05)),
    ])
    .unwrap()
  }

  #[rstest]
  fn partitions_leaves_and_internals() {
    let tree = four_taxon_tree();
    assert_eq!(tree.leaf_names().collect::<Vec<_>>(), vec!["A", "B", "C", "D"]);
    assert_eq!(tree.internal_names().collect::<Vec<_>>(), vec!["AB", "CD", "root"]);
    assert_eq!(tree.root_name(), "root");
  }

  #[rstest]
  fn branch_list_is_postorder() {
    let tree = four_taxon_tree();
    let mut seen = vec![false; tree.num_nodes()];
    for branch in tree.branches() {
      // every node below this branch's child must already have appeared
      for &child_of_child in tree.children(branch.child()) {
        assert!(seen[child_of_child], "child subtree incomplete at {}", tree.name(branch.child()));
      }
      seen[branch.child()] = true;
    }
    assert_eq!(tree.branches().len(), tree.num_nodes() - 1);
  }

  #[rstest]
  fn path_to_root_walks_upward() {
    let tree = four_taxon_tree();
    let a = tree.id("A").unwrap();
    let path = tree.path_to_root(a);
    assert_eq!(path.len(), 2);
    assert_eq!(tree.name(tree.branches()[path[0]].child()), "A");
    assert_eq!(tree.name(tree.branches()[path[1]].child()), "AB");
    assert!(tree.path_to_root(tree.root()).is_empty());
  }

  #[rstest]
  fn rejects_duplicate_parent() {
    let result = Tree::new([("a", "c", None), ("b", "c", None), ("r", "a", None), ("r", "b", None)]);
    assert!(result.is_err());
  }

  #[rstest]
  fn rejects_multiple_roots() {
    let result = Tree::new([("r1", "a", None), ("r2", "b", None)]);
    assert!(result.is_err());
  }

  #[rstest]
  fn rejects_disconnected_cycles() {
    let result = Tree::new([
      ("r", "a", None),
      ("c1", "c2", None),
      ("c2", "c3", None),
      ("c3", "c1", None),
    ]);
    assert!(result.is_err());
  }

  #[rstest]
  fn rejects_negative_lengths() {
    let result = Tree::new([("r", "a", Some(-1.0))]);
    assert!(result.is_err());
  }

  #[rstest]
  fn resolves_lengths_from_parameters() {
    let tree = Tree::new([("r", "a", None), ("r", "b", Some(0.5))]).unwrap();
    let params = Parameters::new().with_branch_length("a", 0.25);
    let resolved = tree.with_lengths_resolved(&params).unwrap();

    let lengths: Vec<f64> = resolved.branches().iter().map(|b| b.length().unwrap()).collect();
    assert_eq!(lengths, vec![0.25, 0.5]);

    // the original tree is untouched
    assert!(tree.branches().iter().any(|b| b.length().is_none()));

    // a missing length is an error
    assert!(tree.with_lengths_resolved(&Parameters::new()).is_err());
  }

  #[rstest]
  fn displays_newick_like() {
    let tree = four_taxon_tree();
    assert_eq!(
      tree.to_string(),
      "((A:0.1,B:0.2)AB:0.05,(C:0.3,D:0.4)CD:0.05)root;"
    );
  }
}
