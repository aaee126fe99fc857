//! File-backed [`bamm_core::OutputSink`]: the three CSV/TSV output files
//! and the stdout progress line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bamm_core::{BranchRates, NodeId, OutputSink, Regime, Tree};

use crate::error::DataError;
use crate::event_data;

/// Owns the three output files for one run and implements
/// [`OutputSink`] against them. Constructed once at startup from
/// `config.outputs`; dropped (and flushed) when the driver loop returns.
pub struct FileOutputSink {
    tree: Tree,
    mcmc: csv::Writer<BufWriter<File>>,
    event_data: csv::Writer<BufWriter<File>>,
    branch_rates: csv::Writer<BufWriter<File>>,
}

impl FileOutputSink {
    pub fn create(
        tree: Tree,
        mcmc_path: impl AsRef<Path>,
        event_data_path: impl AsRef<Path>,
        branch_rates_path: impl AsRef<Path>,
    ) -> Result<Self, DataError> {
        tracing::info!(mcmc = %mcmc_path.as_ref().display(), "opening output files");
        let open = |path: &Path| -> Result<csv::Writer<BufWriter<File>>, DataError> {
            let file = File::create(path).map_err(|e| DataError::Io(path.display().to_string(), e))?;
            Ok(csv::WriterBuilder::new().has_headers(false).from_writer(BufWriter::new(file)))
        };

        let mut mcmc = open(mcmc_path.as_ref())?;
        mcmc.write_record(["generation", "logLikelihood", "logPrior", "numberEvents", "eventRate", "acceptRate"])
            .map_err(|e| DataError::Parse(mcmc_path.as_ref().display().to_string(), 0, e.to_string()))?;

        let event_data = open(event_data_path.as_ref())?;
        let mut branch_rates = open(branch_rates_path.as_ref())?;
        branch_rates
            .write_record(["generation", "leftTipName", "rightTipName", "rate1", "rate2"])
            .map_err(|e| DataError::Parse(branch_rates_path.as_ref().display().to_string(), 0, e.to_string()))?;

        Ok(FileOutputSink { tree, mcmc, event_data, branch_rates })
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.mcmc.flush()?;
        self.event_data.flush()?;
        self.branch_rates.flush()?;
        Ok(())
    }
}

impl OutputSink for FileOutputSink {
    fn write_mcmc_row(
        &mut self,
        generation: u64,
        log_likelihood: f64,
        log_prior: f64,
        event_count: usize,
        event_rate: f64,
        acceptance_rate: f64,
    ) {
        let _ = self.mcmc.write_record(&[
            generation.to_string(),
            log_likelihood.to_string(),
            log_prior.to_string(),
            event_count.to_string(),
            event_rate.to_string(),
            acceptance_rate.to_string(),
        ]);
    }

    fn write_event_data(&mut self, generation: u64, snapshot: &[(NodeId, f64, Regime)]) {
        for &(node, absolute_time, regime) in snapshot {
            if let Err(e) = event_data::write_row(&mut self.event_data, &self.tree, generation, node, absolute_time, regime) {
                tracing::warn!(error = %e, generation, "failed to write an event-data row");
            }
        }
    }

    fn write_branch_rates(&mut self, generation: u64, rates: &BranchRates) {
        match rates {
            BranchRates::Diversification(rows) => {
                for &(node, lambda, mu) in rows {
                    let (left, right) = event_data::tip_pair_for_node(&self.tree, node);
                    let _ = self.branch_rates.write_record(&[
                        generation.to_string(),
                        left,
                        right,
                        lambda.to_string(),
                        mu.to_string(),
                    ]);
                }
            }
            BranchRates::Trait(rows) => {
                for &(node, beta) in rows {
                    let (left, right) = event_data::tip_pair_for_node(&self.tree, node);
                    let _ = self.branch_rates.write_record(&[
                        generation.to_string(),
                        left,
                        right,
                        beta.to_string(),
                        String::new(),
                    ]);
                }
            }
        }
    }

    fn print_progress(&mut self, generation: u64, log_likelihood: f64, event_count: usize) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "generation {generation}\tlogLik {log_likelihood:.4}\tevents {event_count}");
    }
}
