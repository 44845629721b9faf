pub mod assignment;
pub mod joint_bb;
pub mod joint_dp;
pub mod marginal;

use crate::alignment::alignment::Alignment;
use crate::alignment::ambiguity::Ambiguity;
use crate::alignment::site::Site;
use crate::ancestral::assignment::Assignment;
use crate::ancestral::joint_bb::JointBb;
use crate::ancestral::joint_dp::{JointDp, MultipleRateCategories};
use crate::config::EngineConfig;
use crate::likelihood::prob_cache::ProbabilityCache;
use crate::make_internal_report;
use crate::model::model::Model;
use crate::model::parameters::Parameters;
use crate::tree::tree::Tree;
use eyre::Report;
use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;

/// Joint maximum-likelihood ancestral reconstruction: the exact dynamic
/// program for single-category models, falling back to branch-and-bound
/// for mixtures.
pub fn reconstruct_joint(
  model: &Model,
  tree: &Tree,
  alignment: &Alignment,
  ambiguity: &Ambiguity,
  config: EngineConfig,
  params: &Parameters,
) -> Result<Alignment, Report> {
  match JointDp::new(model.clone(), tree.clone(), alignment.clone(), ambiguity.clone(), config) {
    Ok(dp) => dp.reconstruct(params),
    Err(err) if err.downcast_ref::<MultipleRateCategories>().is_some() => {
      debug!("Model is a mixture; reconstructing ancestral states by branch-and-bound");
      JointBb::new(model.clone(), tree.clone(), alignment.clone(), ambiguity.clone(), config)?.reconstruct(params)
    }
    Err(err) => Err(err),
  }
}

/// Assemble a reconstructed alignment: one column per original column,
/// leaves keeping their observed tokens, internal nodes taking their
/// assigned states.
pub(crate) fn assignments_to_alignment(
  alignment: &Alignment,
  cache: &ProbabilityCache,
  per_site: &IndexMap<(Option<String>, Site), Assignment>,
) -> Result<Alignment, Report> {
  let tree = cache.tree();

  let sites = alignment
    .sites()
    .iter()
    .map(|site| {
      let key = (site.label().map(ToString::to_string), site.clone());
      let assignment = per_site
        .get(&key)
        .ok_or_else(|| make_internal_report!("No reconstruction computed for a site that was part of the input"))?;

      let entries = tree
        .postorder_nodes()
        .iter()
        .map(|&id| {
          let name = tree.name(id);
          let token = if tree.is_leaf(id) {
            site.state(name)?.to_owned()
          } else {
            let state = assignment
              .get(name)
              .ok_or_else(|| make_internal_report!("Internal node '{name}' missing from a full assignment"))?;
            cache.state_token(state).to_owned()
          };
          Ok((name.to_owned(), token))
        })
        .collect::<Result<Vec<_>, Report>>()?;

      Ok(match site.label() {
        Some(label) => Site::with_label(label, entries),
        None => Site::new(entries),
      })
    })
    .collect::<Result<Vec<_>, Report>>()?;

  Alignment::new(sites)
}

pub(crate) fn unique_site_keys(alignment: &Alignment) -> Vec<(Option<String>, Site)> {
  alignment.unique_sites().into_keys().collect_vec()
}
