//! A small recursive-descent Newick parser, producing the
//! [`bamm_core::RawNode`] list that [`bamm_core::Tree::build`] consumes.
//!
//! Supports the subset of the grammar BAMM control files actually use:
//! nested parenthesised clades, `name:branch_length` pairs, and a
//! trailing `;`. Quoted names and NHX-style `[&&NHX...]` comments are not
//! recognised (neither appears in the retrieved reference trees).

use bamm_core::RawNode;
use std::iter::Peekable;
use std::str::Chars;

use crate::error::DataError;

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    pos: usize,
    nodes: Vec<RawNode>,
}

fn err(path: &str, pos: usize, msg: impl Into<String>) -> DataError {
    DataError::Parse(path.to_string(), pos, msg.into())
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Parse one subtree (a leaf, or a parenthesised list of children)
    /// rooted under `parent`, pushing it (and everything below it) onto
    /// `self.nodes`. Returns the new node's own index.
    fn parse_clade(&mut self, path: &str, parent: Option<usize>) -> Result<usize, DataError> {
        let mut children = Vec::new();
        if self.peek() == Some('(') {
            self.next();
            loop {
                let child = self.parse_clade(path, None)?;
                children.push(child);
                match self.peek() {
                    Some(',') => {
                        self.next();
                    }
                    Some(')') => {
                        self.next();
                        break;
                    }
                    _ => return Err(err(path, self.pos, "unterminated clade, expected ',' or ')'")),
                }
            }
        }

        let name = self.parse_label();
        let branch_length = if self.peek() == Some(':') {
            self.next();
            self.parse_number(path)?
        } else {
            0.0
        };

        let idx = self.nodes.len();
        self.nodes.push(RawNode {
            parent,
            branch_length,
            name,
            sampling_fraction: 1.0,
        });
        for child in children {
            self.nodes[child].parent = Some(idx);
        }
        Ok(idx)
    }

    fn parse_label(&mut self) -> Option<String> {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c == ':' || c == ',' || c == ')' || c == '(' || c == ';' {
                break;
            }
            s.push(c);
            self.next();
        }
        let s = s.trim();
        if s.is_empty() {
            None
        } else {
            Some(s.replace('_', " "))
        }
    }

    fn parse_number(&mut self, path: &str) -> Result<f64, DataError> {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E' {
                s.push(c);
                self.next();
            } else {
                break;
            }
        }
        s.parse::<f64>()
            .map_err(|_| err(path, self.pos, format!("invalid branch length {s:?}")))
    }
}

/// Parse a single Newick tree from `input`. `path` is used only to label
/// error messages.
pub fn parse(path: &str, input: &str) -> Result<Vec<RawNode>, DataError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(err(path, 0, "empty Newick input"));
    }
    let mut parser = Parser {
        chars: trimmed.chars().peekable(),
        pos: 0,
        nodes: Vec::new(),
    };
    parser.parse_clade(path, None)?;
    // Trailing whitespace/';' are permitted and otherwise ignored.
    while let Some(c) = parser.peek() {
        if c == ';' || c.is_whitespace() {
            parser.next();
        } else {
            return Err(err(path, parser.pos, format!("unexpected trailing character {c:?}")));
        }
    }
    Ok(parser.nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_tip_tree_with_internal_names_and_lengths() {
        let raw = parse("test", "((A:1,B:1):1,C:2);").unwrap();
        assert_eq!(raw.len(), 5);
        let names: Vec<_> = raw.iter().map(|n| n.name.clone()).collect();
        assert!(names.contains(&Some("A".to_string())));
        assert!(names.contains(&Some("C".to_string())));
        let root_children: Vec<_> = raw
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .collect();
        assert_eq!(root_children.len(), 1);
    }

    #[test]
    fn single_tip_no_parens_is_a_degenerate_tree() {
        let raw = parse("test", "A:1;").unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].name, Some("A".to_string()));
    }

    #[test]
    fn underscore_is_translated_to_space_in_names() {
        let raw = parse("test", "(Homo_sapiens:1,Pan_troglodytes:1);").unwrap();
        assert_eq!(raw[0].name, Some("Homo sapiens".to_string()));
    }

    #[test]
    fn unterminated_clade_is_an_error() {
        let err = parse("test", "(A:1,B:1;").unwrap_err();
        assert!(matches!(err, DataError::Parse(_, _, _)));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(parse("test", "").is_err());
    }
}
