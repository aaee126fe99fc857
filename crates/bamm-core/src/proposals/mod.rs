//! The MCMC proposal kernels `Model::step` dispatches to. Each `propose`
//! function mutates the model in place and returns whether the move was
//! accepted; on rejection the model is left exactly as it was found.

pub mod birth_death;
pub mod params;
pub mod relocation;
