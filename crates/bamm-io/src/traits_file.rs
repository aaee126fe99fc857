//! Trait-value TSV reader (`tip<TAB>value`, no header), resolved against
//! an already-built tree into the `(NodeId, f64)` pairs `bamm_core::Model`
//! wants for its tip states. A tip the file leaves out is not an error:
//! per §4.7 its value is latent, and `Model::new` draws it from the prior
//! and hands it to the node-state kernel like any other inferred state.

use bamm_core::{NodeId, Tree};

use crate::error::DataError;

pub fn parse(path: &str, input: &str, tree: &Tree) -> Result<Vec<(NodeId, f64)>, DataError> {
    let mut values = Vec::new();

    for (lineno, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let tip = fields
            .next()
            .ok_or_else(|| DataError::Parse(path.to_string(), lineno + 1, "missing tip name".into()))?
            .trim();
        let raw_value = fields
            .next()
            .ok_or_else(|| DataError::Parse(path.to_string(), lineno + 1, "missing trait value".into()))?
            .trim();
        let value: f64 = raw_value.parse().map_err(|_| {
            DataError::Parse(path.to_string(), lineno + 1, format!("invalid trait value {raw_value:?}"))
        })?;

        let node = tree
            .node_by_name(tip)
            .map_err(|_| DataError::UnknownTraitTip(tip.to_string()))?;
        values.push((node, value));
    }

    Ok(values)
}
