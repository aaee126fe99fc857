//! Piecewise birth-death (Kendall) likelihood.
//!
//! Grounded directly on `computeLikelihoodBranchesByInterval` in the
//! original C++ sampler: a post-order pass over the tree that propagates
//! two state variables, D (probability density of the observed branching
//! pattern) and E (probability a lineage alive at some past time leaves no
//! sampled descendant), from every tip backward to the root, integrating
//! the Kendall ODEs in fixed-size steps and log-rescaling D after every
//! step to avoid underflow.

use crate::config::{Config, NodeEValueSource};
use crate::event::{EventArena, EventId};
use crate::history::BranchHistories;
use crate::tree::{NodeId, Tree};

/// Above this extinction probability the branch-death process is
/// considered numerically degenerate; the calling proposal is rejected.
const MAX_E_PROB: f64 = 0.999;

fn event_absolute_time(tree: &Tree, events: &EventArena, root_event: EventId, id: EventId) -> f64 {
    if id == root_event {
        0.0
    } else {
        let e = events.get(id);
        tree.absolute_time_from_map(e.attach_node, e.map_time)
    }
}

/// Integrate D and E along `node`'s own inbound branch, from `node`'s time
/// (tipward end, with initial conditions `d`/`e`) back to `node`'s parent's
/// time, accumulating into `ln_l`. Returns `None` if E crosses
/// [`MAX_E_PROB`] or D becomes non-finite at any step.
fn integrate_branch(
    tree: &Tree,
    histories: &BranchHistories,
    events: &EventArena,
    root_event: EventId,
    seg_length: f64,
    node: NodeId,
    mut d: f64,
    mut e: f64,
    mut ln_l: f64,
) -> Option<(f64, f64)> {
    let node_time = tree.node(node).time;
    let parent = tree.node(node).parent.expect("integrate_branch called on the root");
    let parent_time = tree.node(parent).time;

    // Governing events, tipward to rootward: this branch's own events
    // (descending map_time) followed by the ancestral event, which governs
    // everything rootward of the last own event up to the parent.
    let governors = histories.governors(node);

    let mut boundaries = Vec::with_capacity(governors.len() + 1);
    boundaries.push(node_time);
    for &gid in &governors[..governors.len() - 1] {
        boundaries.push(event_absolute_time(tree, events, root_event, gid));
    }
    boundaries.push(parent_time);

    for (seg_idx, &gid) in governors.iter().enumerate() {
        let seg_hi = boundaries[seg_idx];
        let seg_lo = boundaries[seg_idx + 1];
        if seg_hi <= seg_lo {
            continue;
        }
        let params = events
            .get(gid)
            .regime
            .as_diversification()
            .expect("diversification likelihood requires diversification regimes");
        let origin = event_absolute_time(tree, events, root_event, gid);

        let n_steps = ((seg_hi - seg_lo) / seg_length).ceil().max(1.0) as u64;
        let step = (seg_hi - seg_lo) / n_steps as f64;
        let mut t_end = seg_hi;
        for _ in 0..n_steps {
            let t_start = t_end - step;
            let delta = t_end - t_start;
            let mid = 0.5 * (t_end + t_start) - origin;
            let lam = params.lambda_init * (params.lambda_shift * mid).exp();
            let mu = params.mu_init * (params.mu_shift * mid).exp();
            let ediff = lam - mu;
            let exp_term = (delta * (mu - lam)).exp();

            let num_l = exp_term * d * ediff * ediff;
            let denom_l = lam * (1.0 - e) + exp_term * (lam * e - mu);
            d = num_l / (denom_l * denom_l);

            let e_num = (1.0 - e) * ediff;
            let e_denom = (1.0 - e) * lam - exp_term * (mu - lam * e);
            e = 1.0 - e_num / e_denom;

            if !d.is_finite() || d <= 0.0 {
                return None;
            }
            ln_l += d.ln();
            d = 1.0;

            if e >= MAX_E_PROB {
                return None;
            }
            t_end = t_start;
        }
    }

    Some((e, ln_l))
}

/// Compute (e, ln_l) at the time of `node`'s parent: the contribution of
/// `node`'s own branch, plus — for internal nodes — the speciation term
/// and the two children's contributions, evaluated independently in
/// parallel since neither subtree's state depends on the other's.
fn node_contribution(
    tree: &Tree,
    histories: &BranchHistories,
    events: &EventArena,
    root_event: EventId,
    seg_length: f64,
    node_e_value_source: NodeEValueSource,
    node: NodeId,
) -> Option<(f64, f64)> {
    let n = tree.node(node);
    let (d_init, e_init, ln_l_base) = if n.is_tip() {
        (n.sampling_fraction, 1.0 - n.sampling_fraction, 0.0)
    } else {
        let (left, right) = (n.left.unwrap(), n.right.unwrap());
        let (left_res, right_res) = rayon::join(
            || node_contribution(tree, histories, events, root_event, seg_length, node_e_value_source, left),
            || node_contribution(tree, histories, events, root_event, seg_length, node_e_value_source, right),
        );
        let (el, ln_left) = left_res?;
        let (er, ln_right) = right_res?;
        if el >= MAX_E_PROB || er >= MAX_E_PROB {
            return None;
        }

        let node_event_id = histories
            .branch(node)
            .node_event
            .expect("every non-root branch has a node_event after forward propagation");
        let params = events
            .get(node_event_id)
            .regime
            .as_diversification()
            .expect("diversification likelihood requires diversification regimes");
        let origin = event_absolute_time(tree, events, root_event, node_event_id);
        let lambda_here = params.lambda_init * (params.lambda_shift * (n.time - origin)).exp();

        let e_chosen = match node_e_value_source {
            NodeEValueSource::LeftChild => el,
            NodeEValueSource::RightChild => er,
        };
        (1.0, e_chosen, ln_left + ln_right + lambda_here.ln())
    };

    integrate_branch(tree, histories, events, root_event, seg_length, node, d_init, e_init, ln_l_base)
}

/// Total diversification log-likelihood of the tree under the current
/// event configuration, or `f64::NEG_INFINITY` if any branch's extinction
/// probability crossed the numerical guard.
/// Time-averaged (λ, μ) over `node`'s own inbound branch under the
/// current event configuration, weighted by each governing segment's
/// duration. Used for the periodic branch-rates summary output
/// (`branchRatesWriteFreq`), mirroring `Tree::setMeanBranchSpeciation`/
/// `setMeanBranchExtinction` in the original sampler, which cache the same
/// quantity per node for the likelihood recursion to read back. Here the
/// likelihood integrates the instantaneous rate directly, so this is
/// purely a reporting aid.
pub fn mean_branch_rate(
    tree: &Tree,
    histories: &BranchHistories,
    events: &EventArena,
    root_event: EventId,
    node: NodeId,
) -> (f64, f64) {
    let node_time = tree.node(node).time;
    let parent = tree.node(node).parent.expect("mean_branch_rate called on the root");
    let parent_time = tree.node(parent).time;
    let governors = histories.governors(node);

    let mut boundaries = Vec::with_capacity(governors.len() + 1);
    boundaries.push(node_time);
    for &gid in &governors[..governors.len() - 1] {
        boundaries.push(event_absolute_time(tree, events, root_event, gid));
    }
    boundaries.push(parent_time);

    let mut lam_sum = 0.0;
    let mut mu_sum = 0.0;
    let mut total_dt = 0.0;
    for (seg_idx, &gid) in governors.iter().enumerate() {
        let seg_hi = boundaries[seg_idx];
        let seg_lo = boundaries[seg_idx + 1];
        let dt = seg_hi - seg_lo;
        if dt <= 0.0 {
            continue;
        }
        let params = events
            .get(gid)
            .regime
            .as_diversification()
            .expect("diversification branch-rate summary requires diversification regimes");
        let origin = event_absolute_time(tree, events, root_event, gid);
        let mid = 0.5 * (seg_hi + seg_lo) - origin;
        lam_sum += params.lambda_init * (params.lambda_shift * mid).exp() * dt;
        mu_sum += params.mu_init * (params.mu_shift * mid).exp() * dt;
        total_dt += dt;
    }
    if total_dt <= 0.0 {
        (0.0, 0.0)
    } else {
        (lam_sum / total_dt, mu_sum / total_dt)
    }
}

/// [`mean_branch_rate`] for every non-root node, in postorder.
pub fn mean_branch_rates(
    tree: &Tree,
    histories: &BranchHistories,
    events: &EventArena,
    root_event: EventId,
) -> Vec<(NodeId, f64, f64)> {
    tree.postorder()
        .iter()
        .filter(|&&id| tree.node(id).parent.is_some())
        .map(|&id| {
            let (lam, mu) = mean_branch_rate(tree, histories, events, root_event, id);
            (id, lam, mu)
        })
        .collect()
}

#[tracing::instrument(level = "trace", skip_all)]
pub fn log_likelihood(
    tree: &Tree,
    histories: &BranchHistories,
    events: &EventArena,
    root_event: EventId,
    config: &Config,
) -> f64 {
    if config.sample_from_prior_only {
        return 0.0;
    }

    let root = tree.root();
    let n = tree.node(root);
    let (left, right) = (
        n.left.expect("root must have two children"),
        n.right.expect("root must have two children"),
    );
    let (left_res, right_res) = rayon::join(
        || node_contribution(tree, histories, events, root_event, config.seg_length, config.node_e_value_source, left),
        || node_contribution(tree, histories, events, root_event, config.seg_length, config.node_e_value_source, right),
    );
    let Some((el, ln_left)) = left_res else {
        tracing::warn!("diversification likelihood hit the numerical guard in the left clade");
        return f64::NEG_INFINITY;
    };
    let Some((er, ln_right)) = right_res else {
        tracing::warn!("diversification likelihood hit the numerical guard in the right clade");
        return f64::NEG_INFINITY;
    };
    if el >= MAX_E_PROB || er >= MAX_E_PROB {
        return f64::NEG_INFINITY;
    }

    let mut total = ln_left + ln_right;
    if config.condition_on_survival {
        total -= (1.0 - el).ln() + (1.0 - er).ln();
    }
    total
}
