//! `MCMCDriver`: the top-level loop — repeatedly call `Model::step`, flush
//! outputs at the configured cadences, and optionally auto-tune proposal
//! scales. `bamm-core` has no file I/O of its own, so the driver is
//! generic over an [`OutputSink`] the caller (`bamm-io`/`bamm-cli`)
//! implements against real files.

use crate::config::Config;
use crate::error::ModelError;
use crate::event::Regime;
use crate::model::{BranchRates, Model};
use crate::tree::NodeId;
use bamm_traits::RandomSource;

/// The destination for everything the driver emits during a run. Methods
/// take `&mut self` so implementors can buffer/flush CSV writers.
pub trait OutputSink {
    /// One row of the MCMC log.
    fn write_mcmc_row(
        &mut self,
        generation: u64,
        log_likelihood: f64,
        log_prior: f64,
        event_count: usize,
        event_rate: f64,
        acceptance_rate: f64,
    );

    /// The live event set as of `generation` (the periodic event-data
    /// snapshot).
    fn write_event_data(&mut self, generation: u64, snapshot: &[(NodeId, f64, Regime)]);

    /// Node-averaged rates as of `generation` (`branchRatesWriteFreq`).
    fn write_branch_rates(&mut self, generation: u64, rates: &BranchRates);

    /// Console progress line (`printFreq`).
    fn print_progress(&mut self, generation: u64, log_likelihood: f64, event_count: usize);
}

/// Target acceptance-rate band the optional autotuner nudges every
/// proposal scale toward. Outside [`AUTOTUNE_CHECK_GENERATIONS`]-sized
/// windows the acceptance rate it reacts to is too noisy to be meaningful.
const AUTOTUNE_LOW: f64 = 0.2;
const AUTOTUNE_HIGH: f64 = 0.44;
const AUTOTUNE_CHECK_GENERATIONS: u64 = 100;
const AUTOTUNE_FACTOR: f64 = 1.1;

pub struct MCMCDriver {
    number_generations: u64,
}

impl MCMCDriver {
    pub fn new(config: &Config) -> Self {
        MCMCDriver {
            number_generations: config.number_generations,
        }
    }

    /// Run the chain to completion, calling `sink`'s methods at the
    /// cadences configured in `model.config().write_freq`.
    pub fn run<R: RandomSource, O: OutputSink>(
        &self,
        model: &mut Model<R>,
        sink: &mut O,
    ) -> Result<(), ModelError> {
        let write_freq = model.config().write_freq;
        let autotune = model.config().autotune;

        let due = |freq: u64, gen: u64| freq > 0 && gen % freq == 0;

        for _ in 0..self.number_generations {
            model.step()?;
            let gen = model.generation();

            if due(write_freq.mcmc_write_freq, gen) {
                sink.write_mcmc_row(
                    gen,
                    model.log_likelihood(),
                    model.log_prior(),
                    model.event_count(),
                    model.event_rate(),
                    model.acceptance_counters().rate(),
                );
            }
            if due(write_freq.event_data_write_freq, gen) {
                sink.write_event_data(gen, &model.snapshot());
            }
            if due(write_freq.branch_rates_write_freq, gen) {
                sink.write_branch_rates(gen, &model.branch_rates());
            }
            if due(write_freq.print_freq, gen) {
                sink.print_progress(gen, model.log_likelihood(), model.event_count());
            }
            if due(write_freq.accept_write_freq, gen) {
                if autotune && gen % AUTOTUNE_CHECK_GENERATIONS == 0 {
                    let rate = model.acceptance_counters().rate();
                    if rate < AUTOTUNE_LOW {
                        model.scale_all(1.0 / AUTOTUNE_FACTOR);
                    } else if rate > AUTOTUNE_HIGH {
                        model.scale_all(AUTOTUNE_FACTOR);
                    }
                }
                model.reset_acceptance_counters();
            }
        }
        Ok(())
    }
}
