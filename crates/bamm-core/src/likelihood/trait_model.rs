//! Brownian-motion-with-shifts trait likelihood.
//!
//! Each branch accumulates trait variance at a piecewise-exponential rate
//! β(t), exactly mirroring how the diversification likelihood's λ/μ vary
//! along a branch (`TraitModel`'s proposal machinery in the original
//! sampler keeps the same event/regime structure, substituting β for
//! λ and μ). The per-branch contribution is the log-density of the
//! parent-to-child trait change under a Normal centred at zero with
//! variance equal to the branch's accumulated rate integral.

use crate::event::{EventArena, EventId};
use crate::history::BranchHistories;
use crate::tree::{NodeId, Tree};
use std::f64::consts::PI;

fn event_absolute_time(tree: &Tree, events: &EventArena, root_event: EventId, id: EventId) -> f64 {
    if id == root_event {
        0.0
    } else {
        let e = events.get(id);
        tree.absolute_time_from_map(e.attach_node, e.map_time)
    }
}

/// Analytic integral of β0·exp(shift·(t − origin)) over one step.
fn beta_integral(beta_init: f64, beta_shift: f64, origin: f64, t_lo: f64, t_hi: f64) -> f64 {
    if beta_shift == 0.0 {
        beta_init * (t_hi - t_lo)
    } else {
        (beta_init / beta_shift) * ((beta_shift * (t_hi - origin)).exp() - (beta_shift * (t_lo - origin)).exp())
    }
}

/// Total trait-rate variance (∫β dt) accumulated along `node`'s own
/// inbound branch.
fn integrate_branch_sigma2(
    tree: &Tree,
    histories: &BranchHistories,
    events: &EventArena,
    root_event: EventId,
    node: NodeId,
) -> f64 {
    let node_time = tree.node(node).time;
    let parent = tree.node(node).parent.expect("integrate_branch_sigma2 called on the root");
    let parent_time = tree.node(parent).time;

    let governors = histories.governors(node);

    let mut boundaries = Vec::with_capacity(governors.len() + 1);
    boundaries.push(node_time);
    for &gid in &governors[..governors.len() - 1] {
        boundaries.push(event_absolute_time(tree, events, root_event, gid));
    }
    boundaries.push(parent_time);

    let mut sigma2 = 0.0;
    for (seg_idx, &gid) in governors.iter().enumerate() {
        let seg_hi = boundaries[seg_idx];
        let seg_lo = boundaries[seg_idx + 1];
        if seg_hi <= seg_lo {
            continue;
        }
        let params = events
            .get(gid)
            .regime
            .as_trait()
            .expect("trait likelihood requires trait regimes");
        let origin = event_absolute_time(tree, events, root_event, gid);
        sigma2 += beta_integral(params.beta_init, params.beta_shift, origin, seg_lo, seg_hi);
    }
    sigma2
}

/// Time-averaged β over `node`'s own inbound branch, the trait-model
/// analogue of [`crate::likelihood::diversification::mean_branch_rate`].
pub fn mean_branch_rate(
    tree: &Tree,
    histories: &BranchHistories,
    events: &EventArena,
    root_event: EventId,
    node: NodeId,
) -> f64 {
    let branch_length = tree.node(node).branch_length;
    if branch_length <= 0.0 {
        return 0.0;
    }
    integrate_branch_sigma2(tree, histories, events, root_event, node) / branch_length
}

/// [`mean_branch_rate`] for every non-root node, in postorder.
pub fn mean_branch_rates(
    tree: &Tree,
    histories: &BranchHistories,
    events: &EventArena,
    root_event: EventId,
) -> Vec<(NodeId, f64)> {
    tree.postorder()
        .iter()
        .filter(|&&id| tree.node(id).parent.is_some())
        .map(|&id| (id, mean_branch_rate(tree, histories, events, root_event, id)))
        .collect()
}

fn ln_normal_pdf(mean: f64, sd: f64, x: f64) -> f64 {
    if sd <= 0.0 {
        return if x == mean { f64::INFINITY } else { f64::NEG_INFINITY };
    }
    let z = (x - mean) / sd;
    -0.5 * z * z - sd.ln() - 0.5 * (2.0 * PI).ln()
}

/// Total trait log-likelihood: the sum, over every branch, of the
/// log-density of the parent-to-child state change under its branch's
/// accumulated rate variance. `states` holds one inferred or observed
/// value per node, indexed by `NodeId`.
#[tracing::instrument(level = "trace", skip_all)]
pub fn log_likelihood(
    tree: &Tree,
    histories: &BranchHistories,
    events: &EventArena,
    root_event: EventId,
    states: &[f64],
) -> f64 {
    tree.postorder()
        .iter()
        .filter_map(|&id| {
            let parent = tree.node(id).parent?;
            let sigma2 = integrate_branch_sigma2(tree, histories, events, root_event, id);
            let diff = states[id.0 as usize] - states[parent.0 as usize];
            Some(ln_normal_pdf(0.0, sigma2.sqrt(), diff))
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BranchEvent, Regime, TraitParams};
    use crate::history::BranchHistories;
    use crate::tree::test_trees::two_tip_unit;

    #[test]
    fn constant_rate_two_tip_likelihood_matches_closed_form() {
        let tree = two_tip_unit();
        let mut histories = BranchHistories::new(&tree);
        let mut events = EventArena::new();
        let root_event = events.insert(BranchEvent::new_root(
            tree.root(),
            Regime::Trait(TraitParams { beta_init: 0.5, beta_shift: 0.0 }),
        ));
        histories.forward_propagate_from_root(&tree, root_event);

        let mut states = vec![0.0_f64; tree.len()];
        states[tree.node_by_name("A").unwrap().0 as usize] = 1.0;
        states[tree.node_by_name("B").unwrap().0 as usize] = -0.5;
        states[tree.root().0 as usize] = 0.0;

        let ll = log_likelihood(&tree, &histories, &events, root_event, &states);
        let sigma2 = 0.5 * 1.0; // beta_init * branch_length
        let expected = ln_normal_pdf(0.0, sigma2.sqrt(), 1.0) + ln_normal_pdf(0.0, sigma2.sqrt(), -0.5);
        assert!((ll - expected).abs() < 1e-9);
    }
}
