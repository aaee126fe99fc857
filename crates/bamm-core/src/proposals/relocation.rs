//! Event relocation: local and global moves. Grounded on
//! `Model::moveEventMH`/`eventLocalMove`/`eventGlobalMove` in the original
//! sampler, which draws one of the two move types by `localGlobalMoveRatio`,
//! detaches the chosen event from its branch history, repositions it, and
//! reattaches — reverting the detach/reattach exactly on rejection.

use crate::error::ModelError;
use crate::model::Model;
use crate::tree::{NodeId, Tree};
use bamm_traits::RandomSource;

/// Walk `delta` map-units from `(node, offset)` (offset measured from
/// `node`'s own `map_start`), crossing into the parent branch when the
/// walk would go rootward of position 0, or into one descendant branch
/// (chosen proportional to branch length) when it would go tipward past
/// `branch_length`. Stops at the root-adjacent branch's rootward edge or a
/// tip's tipward edge — the map has no branch beyond either.
fn walk_map_position<R: RandomSource>(
    tree: &Tree,
    rng: &mut R,
    start: NodeId,
    start_offset: f64,
    delta: f64,
) -> (NodeId, f64) {
    let mut node = start;
    let mut offset = start_offset + delta;

    loop {
        let n = tree.node(node);
        if offset < 0.0 {
            let parent = n.parent.expect("walk_map_position called on the root's own branch");
            if tree.node(parent).parent.is_none() {
                // Parent is the root: no branch above this one to cross into.
                offset = 0.0;
                break;
            }
            offset += tree.node(parent).branch_length;
            node = parent;
            continue;
        }
        if offset > n.branch_length {
            let (Some(l), Some(r)) = (n.left, n.right) else {
                // Tip: no branch below to cross into.
                offset = n.branch_length;
                break;
            };
            offset -= n.branch_length;
            let l_len = tree.node(l).branch_length;
            let r_len = tree.node(r).branch_length;
            let total = l_len + r_len;
            node = if total <= 0.0 || rng.uniform() * total < l_len { l } else { r };
            continue;
        }
        break;
    }

    let map_time = tree.node(node).map_start + offset;
    (node, map_time)
}

fn local_move<R: RandomSource>(model: &mut Model<R>, node: NodeId, map_time: f64) -> (NodeId, f64) {
    let scale = model.scales.event_location_scale * model.tree.max_root_to_tip_length();
    let delta = model.rng.uniform_range(-scale, scale);
    let offset = map_time - model.tree.node(node).map_start;
    walk_map_position(&model.tree, &mut model.rng, node, offset, delta)
}

fn global_move<R: RandomSource>(model: &mut Model<R>) -> (NodeId, f64) {
    let total = model.tree.total_map_length();
    let x = model.rng.uniform() * total;
    let node = model
        .tree
        .inverse_map(x)
        .expect("a uniform draw within [0, total_map_length) always resolves to a branch");
    (node, x)
}

pub fn propose<R: RandomSource>(model: &mut Model<R>) -> Result<bool, ModelError> {
    let ids = model.events.non_root_ids(model.root_event);
    if ids.is_empty() {
        return Ok(false);
    }
    let event_id = ids[model.rng.sample_index(ids.len())];
    let saved = model.events.get(event_id).clone();

    let is_local = model.rng.uniform() < model.config.local_move_prob();
    let (new_node, new_map_time) = if is_local {
        local_move(model, saved.attach_node, saved.map_time)
    } else {
        global_move(model)
    };

    let old_ll = model.current_log_likelihood;

    model.histories.remove_event(&model.tree, saved.attach_node, event_id)?;
    model.events.get_mut(event_id).attach_node = new_node;
    model.events.get_mut(event_id).map_time = new_map_time;
    model.histories.insert_event(&model.tree, new_node, event_id, new_map_time);

    if !model.histories.is_valid_configuration(&model.tree, new_node) {
        return revert(model, event_id, saved);
    }

    let new_ll = model.recompute_log_likelihood();
    let log_alpha = new_ll - old_ll;

    if model.accept_metropolis_hastings(log_alpha) {
        model.current_log_likelihood = new_ll;
        Ok(true)
    } else {
        revert(model, event_id, saved)
    }
}

fn revert<R: RandomSource>(
    model: &mut Model<R>,
    event_id: crate::event::EventId,
    saved: crate::event::BranchEvent,
) -> Result<bool, ModelError> {
    let current_node = model.events.get(event_id).attach_node;
    model.histories.remove_event(&model.tree, current_node, event_id)?;
    model.events.get_mut(event_id).attach_node = saved.attach_node;
    model.events.get_mut(event_id).map_time = saved.map_time;
    model
        .histories
        .insert_event(&model.tree, saved.attach_node, event_id, saved.map_time);
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::tree::test_trees::three_tip;
    use bamm_rng::BammRng;

    fn test_config() -> Config {
        Config {
            model_type: ModelType::Diversification,
            treefile: String::new(),
            traitfile: None,
            use_global_sampling_probability: true,
            global_sampling_fraction: 1.0,
            sample_probs_filename: None,
            number_generations: 1000,
            seed: Some(2),
            priors: Priors {
                poisson_rate_prior: 1.0,
                lambda_init_prior: 1.0,
                lambda_shift_prior: 1.0,
                mu_init_prior: 1.0,
                mu_shift_prior: 1.0,
                beta_init_prior: 1.0,
                beta_shift_prior: 1.0,
            },
            initial_regime: InitialRegime {
                lambda_init0: 0.2,
                lambda_shift0: 0.0,
                mu_init0: 0.05,
                mu_shift0: 0.0,
                beta_init0: 1.0,
                beta_shift_init0: 0.0,
            },
            scales: ProposalScales {
                event_location_scale: 0.5,
                event_rate_scale: 1.0,
                lambda_init_scale: 1.0,
                lambda_shift_scale: 1.0,
                mu_init_scale: 1.0,
                mu_shift_scale: 1.0,
                beta_scale: 1.0,
                beta_shift_scale: 1.0,
                node_state_scale: 1.0,
            },
            weights: ProposalWeights {
                birth_death: 1.0,
                event_relocation: 0.0,
                event_rate: 0.0,
                lambda_init: 0.0,
                lambda_shift: 0.0,
                mu_init: 0.0,
                mu_shift: 0.0,
                beta_init: 0.0,
                beta_shift: 0.0,
                node_state: 0.0,
            },
            local_global_move_ratio: 1.0,
            seg_length: 0.05,
            initial_number_events: 0,
            load_event_data: false,
            event_data_infile: None,
            min_clade_size_for_shift: 1,
            sample_from_prior_only: false,
            condition_on_survival: true,
            adaptive_proposal: false,
            node_e_value_source: NodeEValueSource::LeftChild,
            autotune: false,
            write_freq: WriteFrequencies {
                mcmc_write_freq: 1,
                event_data_write_freq: 1,
                print_freq: 1,
                accept_write_freq: 1,
                branch_rates_write_freq: 1,
            },
            outputs: OutputPaths {
                out_name: "run".into(),
                mcmc_outfile: "run_mcmc_out.txt".into(),
                event_data_outfile: "run_event_data.txt".into(),
                branch_rates_outfile: "run_branch_rates.txt".into(),
            },
        }
    }

    #[test]
    fn relocation_with_no_events_is_a_no_op_rejection() {
        let tree = three_tip();
        let config = test_config();
        let rng = BammRng::seed_from_u64(1);
        let mut model = Model::new(tree, config, rng, Vec::new(), Vec::new()).unwrap();
        assert!(!propose(&mut model).unwrap());
    }

    #[test]
    fn relocation_preserves_i2_and_event_count_over_many_steps() {
        use crate::proposals::birth_death;

        let tree = three_tip();
        let config = test_config();
        let rng = BammRng::seed_from_u64(77);
        let mut model = Model::new(tree, config, rng, Vec::new(), Vec::new()).unwrap();

        // Force a birth so there is an event to relocate.
        while model.event_count() == 0 {
            birth_death::propose(&mut model).unwrap();
        }
        let k_before = model.event_count();

        for _ in 0..300 {
            propose(&mut model).unwrap();
            assert!(model.histories.check_i2(&model.tree));
        }
        assert_eq!(model.event_count(), k_before);
    }

    #[test]
    fn large_scale_local_move_can_cross_a_speciation_node() {
        use crate::event::{BranchEvent, DiversificationParams, Regime};

        let tree = three_tip();
        let mut config = test_config();
        config.scales.event_location_scale = 10.0; // s much larger than any branch
        let rng = BammRng::seed_from_u64(5);
        let mut model = Model::new(tree, config, rng, Vec::new(), Vec::new()).unwrap();

        let internal = model.tree.mrca("A", "B").unwrap();
        let id = model.events.insert(BranchEvent {
            attach_node: internal,
            map_time: model.tree.node(internal).map_start + 0.5,
            regime: Regime::Diversification(DiversificationParams {
                lambda_init: 0.2,
                lambda_shift: 0.0,
                mu_init: 0.05,
                mu_shift: 0.0,
            }),
            is_time_variable: true,
        });
        model
            .histories
            .insert_event(&model.tree, internal, id, model.tree.node(internal).map_start + 0.5);
        model.current_log_likelihood = model.recompute_log_likelihood();

        let mut moved_branches = false;
        for _ in 0..200 {
            propose(&mut model).unwrap();
            assert!(model.histories.check_i2(&model.tree));
            if model.events.get(id).attach_node != internal {
                moved_branches = true;
            }
        }
        assert!(moved_branches, "a large-scale local move should eventually cross a node");
    }
}
