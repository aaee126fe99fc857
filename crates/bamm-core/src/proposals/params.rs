//! Parameter-update kernels: fixed-dimension Metropolis-Hastings moves that
//! perturb one regime parameter (or the Poisson event rate, or one
//! internal node's inferred trait state) without touching the event set's
//! size. Grounded on `updateLambdaInitMH`/`updateLambdaShiftMH`/
//! `updateMuInitMH`/`updateMuShiftMH`/`updateEventRateMH` in the original
//! sampler: positive rates get a multiplicative proposal with a
//! log-Jacobian term, shift parameters get an additive Normal proposal
//! with no Jacobian, and the event rate is a multiplicative update whose
//! acceptance ratio never touches the likelihood (it does not appear in
//! it).

use crate::error::ModelError;
use crate::event::{EventId, Regime};
use crate::model::Model;
use bamm_traits::RandomSource;

/// Pick the target event for a parameter update uniformly over
/// `{root event} ∪ {non-root events}`, as `updateLambdaInitMH` does by
/// sampling an index in `[0, eventCollection.size()]` with `0` meaning the
/// root event.
fn choose_target_event<R: RandomSource>(model: &mut Model<R>) -> EventId {
    let ids = model.events.non_root_ids(model.root_event);
    let n = ids.len() + 1;
    let idx = model.rng.sample_index(n);
    if idx == 0 {
        model.root_event
    } else {
        ids[idx - 1]
    }
}

/// Multiplicative proposal `new = old * exp(scale * (U - 0.5))`, common to
/// every strictly-positive rate parameter. Returns `(multiplier, new)`.
fn multiplicative_proposal<R: RandomSource>(rng: &mut R, scale: f64, old: f64) -> (f64, f64) {
    let multiplier = (scale * (rng.uniform() - 0.5)).exp();
    (multiplier, multiplier * old)
}

macro_rules! multiplicative_kernel {
    ($name:ident, $accessor:ident, $scale_field:ident, $prior_field:ident, $as_regime:ident, $param:ident, $ctor:expr) => {
        pub fn $name<R: RandomSource>(model: &mut Model<R>) -> Result<bool, ModelError> {
            let target = choose_target_event(model);
            let old = model
                .events
                .get(target)
                .regime
                .$as_regime()
                .expect("parameter kernel applied to the wrong regime kind")
                .$param;
            let scale = model.scales.$scale_field;
            let (multiplier, new) = multiplicative_proposal(&mut model.rng, scale, old);

            let mut updated = *model.events.get(target).regime.$as_regime().unwrap();
            updated.$param = new;
            model.events.get_mut(target).regime = $ctor(updated);

            let old_ll = model.current_log_likelihood;
            let new_ll = model.recompute_log_likelihood();

            let log_prior_ratio = model.rng.ln_exponential_pdf(model.config.priors.$prior_field, new)
                - model.rng.ln_exponential_pdf(model.config.priors.$prior_field, old);
            let log_proposal_ratio = multiplier.ln();
            let log_alpha = (new_ll - old_ll) + log_prior_ratio + log_proposal_ratio;

            if new_ll.is_finite() && model.accept_metropolis_hastings(log_alpha) {
                model.current_log_likelihood = new_ll;
                model.current_log_prior = model.recompute_log_prior();
                Ok(true)
            } else {
                let mut reverted = *model.events.get(target).regime.$as_regime().unwrap();
                reverted.$param = old;
                model.events.get_mut(target).regime = $ctor(reverted);
                Ok(false)
            }
        }
    };
}

macro_rules! additive_kernel {
    ($name:ident, $scale_field:ident, $prior_field:ident, $as_regime:ident, $param:ident, $ctor:expr) => {
        pub fn $name<R: RandomSource>(model: &mut Model<R>) -> Result<bool, ModelError> {
            let target = choose_target_event(model);
            let old = model
                .events
                .get(target)
                .regime
                .$as_regime()
                .expect("parameter kernel applied to the wrong regime kind")
                .$param;
            let scale = model.scales.$scale_field;
            let new = old + model.rng.normal(0.0, scale);

            let mut updated = *model.events.get(target).regime.$as_regime().unwrap();
            updated.$param = new;
            model.events.get_mut(target).regime = $ctor(updated);

            let old_ll = model.current_log_likelihood;
            let new_ll = model.recompute_log_likelihood();

            let log_prior_ratio = model.rng.ln_normal_pdf(0.0, model.config.priors.$prior_field, new)
                - model.rng.ln_normal_pdf(0.0, model.config.priors.$prior_field, old);
            let log_alpha = (new_ll - old_ll) + log_prior_ratio;

            if new_ll.is_finite() && model.accept_metropolis_hastings(log_alpha) {
                model.current_log_likelihood = new_ll;
                model.current_log_prior = model.recompute_log_prior();
                Ok(true)
            } else {
                let mut reverted = *model.events.get(target).regime.$as_regime().unwrap();
                reverted.$param = old;
                model.events.get_mut(target).regime = $ctor(reverted);
                Ok(false)
            }
        }
    };
}

multiplicative_kernel!(
    propose_lambda_init,
    lambda_init,
    lambda_init_scale,
    lambda_init_prior,
    as_diversification,
    lambda_init,
    Regime::Diversification
);
multiplicative_kernel!(
    propose_mu_init,
    mu_init,
    mu_init_scale,
    mu_init_prior,
    as_diversification,
    mu_init,
    Regime::Diversification
);
multiplicative_kernel!(
    propose_beta_init,
    beta_init,
    beta_scale,
    beta_init_prior,
    as_trait,
    beta_init,
    Regime::Trait
);

additive_kernel!(
    propose_lambda_shift,
    lambda_shift_scale,
    lambda_shift_prior,
    as_diversification,
    lambda_shift,
    Regime::Diversification
);
additive_kernel!(
    propose_mu_shift,
    mu_shift_scale,
    mu_shift_prior,
    as_diversification,
    mu_shift,
    Regime::Diversification
);
additive_kernel!(
    propose_beta_shift,
    beta_shift_scale,
    beta_shift_prior,
    as_trait,
    beta_shift,
    Regime::Trait
);

/// The Poisson event-rate hyper-parameter. The likelihood does not depend
/// on it, so the acceptance ratio is prior-times-Jacobian only
/// (`updateEventRateMH` never recomputes `computeLikelihoodBranches`).
pub fn propose_event_rate<R: RandomSource>(model: &mut Model<R>) -> Result<bool, ModelError> {
    let old = model.event_rate;
    let scale = model.scales.event_rate_scale;
    let (multiplier, new) = multiplicative_proposal(&mut model.rng, scale, old);

    let log_prior_ratio = model.rng.ln_exponential_pdf(model.config.priors.poisson_rate_prior, new)
        - model.rng.ln_exponential_pdf(model.config.priors.poisson_rate_prior, old);
    let log_proposal_ratio = multiplier.ln();
    let log_alpha = log_prior_ratio + log_proposal_ratio;

    model.event_rate = new;
    if model.accept_metropolis_hastings(log_alpha) {
        model.current_log_prior = model.recompute_log_prior();
        Ok(true)
    } else {
        model.event_rate = old;
        Ok(false)
    }
}

/// The trait model's inferred ancestral/missing state: an additive Normal
/// proposal on one latent node chosen uniformly over every internal node
/// plus every tip that has no observed value (`Model::trait_state_is_latent`).
pub fn propose_node_state<R: RandomSource>(model: &mut Model<R>) -> Result<bool, ModelError> {
    let latent_nodes: Vec<_> = model
        .tree
        .postorder()
        .iter()
        .copied()
        .filter(|&id| model.trait_state_is_latent[id.0 as usize])
        .collect();
    if latent_nodes.is_empty() {
        return Ok(false);
    }
    let node = latent_nodes[model.rng.sample_index(latent_nodes.len())];
    let idx = node.0 as usize;

    let old = model.trait_states[idx];
    let scale = model.scales.node_state_scale;
    let new = old + model.rng.normal(0.0, scale);
    model.trait_states[idx] = new;

    let old_ll = model.current_log_likelihood;
    let new_ll = model.recompute_log_likelihood();
    let log_alpha = new_ll - old_ll;

    if new_ll.is_finite() && model.accept_metropolis_hastings(log_alpha) {
        model.current_log_likelihood = new_ll;
        Ok(true)
    } else {
        model.trait_states[idx] = old;
        Ok(false)
    }
}
