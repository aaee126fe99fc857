//! Per-tip sampling-fraction TSV (`tip<TAB>fraction`), applied onto the
//! raw Newick node list before [`bamm_core::Tree::build`] runs — one of
//! `sampleProbsFilename`'s two mutually exclusive ways (the other being
//! `globalSamplingFraction`) of setting `NodeData::sampling_fraction`.

use bamm_core::RawNode;

use crate::error::DataError;

pub fn apply(path: &str, input: &str, raw: &mut [RawNode]) -> Result<(), DataError> {
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
        let raw_fraction = fields
            .next()
            .ok_or_else(|| DataError::Parse(path.to_string(), lineno + 1, "missing sampling fraction".into()))?
            .trim();
        let fraction: f64 = raw_fraction.parse().map_err(|_| {
            DataError::Parse(path.to_string(), lineno + 1, format!("invalid sampling fraction {raw_fraction:?}"))
        })?;

        let node = raw
            .iter_mut()
            .find(|n| n.name.as_deref() == Some(tip))
            .ok_or_else(|| DataError::UnknownTraitTip(tip.to_string()))?;
        node.sampling_fraction = fraction;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> Vec<RawNode> {
        vec![
            RawNode { parent: None, branch_length: 0.0, name: None, sampling_fraction: 1.0 },
            RawNode { parent: Some(0), branch_length: 1.0, name: Some("A".into()), sampling_fraction: 1.0 },
            RawNode { parent: Some(0), branch_length: 1.0, name: Some("B".into()), sampling_fraction: 1.0 },
        ]
    }

    #[test]
    fn applies_per_tip_fractions() {
        let mut raw = sample_raw();
        apply("test", "A\t0.5\nB\t0.9\n", &mut raw).unwrap();
        assert_eq!(raw[1].sampling_fraction, 0.5);
        assert_eq!(raw[2].sampling_fraction, 0.9);
    }

    #[test]
    fn unknown_tip_is_an_error() {
        let mut raw = sample_raw();
        let err = apply("test", "Z\t0.5\n", &mut raw).unwrap_err();
        assert!(matches!(err, DataError::UnknownTraitTip(_)));
    }
}
