//! Likelihood evaluators. Exactly one of these is active for a given run,
//! selected by `Config::model_type`.

pub mod diversification;
pub mod trait_model;
