//! The core rjMCMC sampler for macroevolutionary rate-shift inference:
//! the branch-history data structure, the reversible-jump proposal
//! kernels, the two likelihood evaluators, and the top-level driver loop.
//! Pure and allocation-only — no file I/O, no CLI. `bamm-io` and
//! `bamm-cli` build the runnable tool on top of this.

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod history;
pub mod likelihood;
pub mod model;
pub mod proposals;
pub mod tree;

pub use config::{Config, ModelType};
pub use driver::{MCMCDriver, OutputSink};
pub use error::ModelError;
pub use event::{BranchEvent, DiversificationParams, EventArena, EventId, Regime, TraitParams};
pub use model::{AcceptanceCounters, BranchRates, InitialEvent, Kernel, Model};
pub use tree::{NodeData, NodeId, RawNode, Tree, TreeError};
