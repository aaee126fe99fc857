//! Event-data snapshot TSV:
//! `generation, leftTipName, rightTipName, absoluteTime, <regime params>`
//! format, read back in on `loadEventData` and written out on
//! `eventDataWriteFreq`.

use bamm_core::{DiversificationParams, InitialEvent, NodeId, Regime, TraitParams, Tree};

use crate::error::DataError;

/// The pair of tip names locating `node` on the tree, per the format's
/// convention: the root is `("NA", "NA")`, a tip's own terminal branch is
/// `(tip, "NA")`, and an internal branch is named by its leftmost and
/// rightmost descendant tips.
pub fn tip_pair_for_node(tree: &Tree, node: NodeId) -> (String, String) {
    if node == tree.root() {
        return ("NA".to_string(), "NA".to_string());
    }
    let n = tree.node(node);
    if n.is_tip() {
        (n.name.clone().unwrap_or_default(), "NA".to_string())
    } else {
        let left = tree.node(tree.leftmost_tip(node)).name.clone().unwrap_or_default();
        let right = tree.node(tree.rightmost_tip(node)).name.clone().unwrap_or_default();
        (left, right)
    }
}

fn resolve_attach_node(tree: &Tree, left: &str, right: &str) -> Result<Option<NodeId>, DataError> {
    match (left, right) {
        ("NA", "NA") => Ok(None),
        (tip, "NA") | ("NA", tip) => {
            Ok(Some(tree.node_by_name(tip).map_err(|_| DataError::UnknownEventTip(tip.to_string()))?))
        }
        (a, b) => {
            let na = tree.node_by_name(a).map_err(|_| DataError::UnknownEventTip(a.to_string()))?;
            let nb = tree.node_by_name(b).map_err(|_| DataError::UnknownEventTip(b.to_string()))?;
            Ok(Some(tree.mrca_of(na, nb)))
        }
    }
}

/// Parse a previously written event-data file into the root-excluded
/// initial-event list `bamm_core::Model::new` expects. The root event
/// (the `NA/NA` row, if present) carries the model's initial regime and is
/// not itself represented as an `InitialEvent` — `Model::new` always
/// constructs the root event from the control file's `*0` keys, so that
/// row is read only far enough to be skipped.
pub fn parse(path: &str, input: &str, tree: &Tree, diversification: bool) -> Result<Vec<InitialEvent>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_reader(input.as_bytes());

    let mut events = Vec::new();
    for (lineno, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DataError::Parse(path.to_string(), lineno + 1, e.to_string()))?;
        let field = |i: usize| -> Result<&str, DataError> {
            record
                .get(i)
                .ok_or_else(|| DataError::Parse(path.to_string(), lineno + 1, "row is missing a column".into()))
        };
        let left = field(1)?;
        let right = field(2)?;
        let Some(attach_node) = resolve_attach_node(tree, left, right)? else {
            continue;
        };
        let map_time: f64 = field(3)?
            .parse()
            .map_err(|_| DataError::Parse(path.to_string(), lineno + 1, "invalid absoluteTime".into()))?;
        let map_time = tree.map_from_absolute_time(attach_node, map_time);

        let regime = if diversification {
            let p = DiversificationParams {
                lambda_init: parse_field(path, lineno, field(4)?)?,
                lambda_shift: parse_field(path, lineno, field(5)?)?,
                mu_init: parse_field(path, lineno, field(6)?)?,
                mu_shift: parse_field(path, lineno, field(7)?)?,
            };
            Regime::Diversification(p)
        } else {
            let p = TraitParams {
                beta_init: parse_field(path, lineno, field(4)?)?,
                beta_shift: parse_field(path, lineno, field(5)?)?,
            };
            Regime::Trait(p)
        };

        events.push(InitialEvent { attach_node, map_time, regime });
    }
    Ok(events)
}

fn parse_field(path: &str, lineno: usize, raw: &str) -> Result<f64, DataError> {
    raw.parse()
        .map_err(|_| DataError::Parse(path.to_string(), lineno + 1, format!("invalid numeric field {raw:?}")))
}

/// Write one snapshot row (one event, as returned by `Model::snapshot`).
pub fn write_row<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    tree: &Tree,
    generation: u64,
    node: NodeId,
    absolute_time: f64,
    regime: Regime,
) -> csv::Result<()> {
    let (left, right) = tip_pair_for_node(tree, node);
    match regime {
        Regime::Diversification(p) => writer.write_record(&[
            generation.to_string(),
            left,
            right,
            absolute_time.to_string(),
            p.lambda_init.to_string(),
            p.lambda_shift.to_string(),
            p.mu_init.to_string(),
            p.mu_shift.to_string(),
        ]),
        Regime::Trait(p) => writer.write_record(&[
            generation.to_string(),
            left,
            right,
            absolute_time.to_string(),
            p.beta_init.to_string(),
            p.beta_shift.to_string(),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bamm_core::RawNode;

    fn three_tip() -> Tree {
        Tree::build(vec![
            RawNode { parent: None, branch_length: 0.0, name: None, sampling_fraction: 1.0 },
            RawNode { parent: Some(0), branch_length: 1.0, name: None, sampling_fraction: 1.0 },
            RawNode { parent: Some(0), branch_length: 2.0, name: Some("C".into()), sampling_fraction: 1.0 },
            RawNode { parent: Some(1), branch_length: 1.0, name: Some("A".into()), sampling_fraction: 1.0 },
            RawNode { parent: Some(1), branch_length: 1.0, name: Some("B".into()), sampling_fraction: 1.0 },
        ])
        .unwrap()
    }

    #[test]
    fn round_trips_a_single_internal_event() {
        let tree = three_tip();
        let internal = tree.mrca("A", "B").unwrap();
        let at = tree.node(internal).time - 0.5;

        let mut buf = Vec::new();
        {
            let mut w = csv::WriterBuilder::new().delimiter(b'\t').has_headers(false).from_writer(&mut buf);
            write_row(
                &mut w,
                &tree,
                1000,
                internal,
                at,
                Regime::Diversification(DiversificationParams {
                    lambda_init: 0.3,
                    lambda_shift: 0.0,
                    mu_init: 0.05,
                    mu_shift: 0.0,
                }),
            )
            .unwrap();
            w.flush().unwrap();
        }

        let parsed = parse("test", std::str::from_utf8(&buf).unwrap(), &tree, true).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].attach_node, internal);
        assert!((tree.map_from_absolute_time(internal, at) - parsed[0].map_time).abs() < 1e-9);
    }

    #[test]
    fn tip_terminal_branch_round_trips() {
        let tree = three_tip();
        let c = tree.node_by_name("C").unwrap();
        let (left, right) = tip_pair_for_node(&tree, c);
        assert_eq!((left.as_str(), right.as_str()), ("C", "NA"));
    }

    #[test]
    fn root_marker_rows_are_skipped() {
        let tree = three_tip();
        let parsed = parse("test", "5\tNA\tNA\t0.0\t0.2\t0.0\t0.01\t0.0\n", &tree, true).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn unknown_tip_in_event_row_is_an_error() {
        let tree = three_tip();
        let err = parse("test", "5\tZ\tNA\t1.0\t0.2\t0.0\t0.01\t0.0\n", &tree, true).unwrap_err();
        assert!(matches!(err, DataError::UnknownEventTip(_)));
    }
}
