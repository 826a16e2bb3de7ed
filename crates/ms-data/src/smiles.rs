//! Minimal SMILES reader producing a molecular graph.
//!
//! Covers the organic subset, bracket atoms, branches, ring closures
//! (including `%nn`), explicit bond symbols and disconnected fragments.
//! Stereo marks are accepted and dropped. No valence or aromaticity
//! perception is attempted.

use std::collections::HashMap;

use ms_types::DataError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// Element symbol with canonical capitalization (`C`, `Cl`, `Se`), `*` for wildcards.
    pub element: String,
    pub aromatic: bool,
    pub charge: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Aromatic,
}

impl BondOrder {
    pub fn code(&self) -> u8 {
        match self {
            BondOrder::Single => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
            BondOrder::Aromatic => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bond {
    pub a: usize,
    pub b: usize,
    pub order: BondOrder,
}

/// An undirected molecular graph.
#[derive(Debug, Clone, Default)]
pub struct MolGraph {
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    adjacency: Vec<Vec<(usize, BondOrder)>>,
}

impl MolGraph {
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn neighbors(&self, atom: usize) -> &[(usize, BondOrder)] {
        &self.adjacency[atom]
    }

    pub fn degree(&self, atom: usize) -> usize {
        self.adjacency[atom].len()
    }

    fn add_atom(&mut self, atom: Atom) -> usize {
        self.atoms.push(atom);
        self.adjacency.push(Vec::new());
        self.atoms.len() - 1
    }

    fn add_bond(&mut self, a: usize, b: usize, order: BondOrder) -> Result<(), String> {
        if a == b {
            return Err(format!("atom {a} bonded to itself"));
        }
        if self.adjacency[a].iter().any(|(n, _)| *n == b) {
            return Err(format!("duplicate bond between atoms {a} and {b}"));
        }
        self.bonds.push(Bond { a, b, order });
        self.adjacency[a].push((b, order));
        self.adjacency[b].push((a, order));
        Ok(())
    }

    fn implicit_order(&self, a: usize, b: usize) -> BondOrder {
        if self.atoms[a].aromatic && self.atoms[b].aromatic {
            BondOrder::Aromatic
        } else {
            BondOrder::Single
        }
    }
}

const AROMATIC_TWO_LETTER: [&str; 3] = ["se", "as", "te"];

/// Parse a SMILES string into a [`MolGraph`].
pub fn parse_smiles(smiles: &str) -> Result<MolGraph, DataError> {
    Parser::new(smiles).run().map_err(|message| DataError::UnparsableDescriptor {
        descriptor: smiles.to_string(),
        message,
    })
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    graph: MolGraph,
    prev: Option<usize>,
    branches: Vec<Option<usize>>,
    pending: Option<BondOrder>,
    rings: HashMap<u32, (usize, Option<BondOrder>)>,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.trim().chars().collect(),
            pos: 0,
            graph: MolGraph::default(),
            prev: None,
            branches: Vec::new(),
            pending: None,
            rings: HashMap::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn run(mut self) -> Result<MolGraph, String> {
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '(' => {
                    if self.prev.is_none() {
                        return Err(format!("branch opened before any atom at {}", self.pos));
                    }
                    self.branches.push(self.prev);
                }
                ')' => {
                    if self.pending.is_some() {
                        return Err(format!("dangling bond before ')' at {}", self.pos));
                    }
                    self.prev = self
                        .branches
                        .pop()
                        .ok_or_else(|| format!("unbalanced ')' at {}", self.pos))?;
                }
                '-' | '/' | '\\' => self.set_bond(BondOrder::Single)?,
                '=' => self.set_bond(BondOrder::Double)?,
                '#' | '$' => self.set_bond(BondOrder::Triple)?,
                ':' => self.set_bond(BondOrder::Aromatic)?,
                '.' => {
                    if self.pending.is_some() {
                        return Err(format!("bond before '.' at {}", self.pos));
                    }
                    self.prev = None;
                }
                '%' => {
                    let digits: String = self.take_while(|c| c.is_ascii_digit(), 2);
                    if digits.len() != 2 {
                        return Err(format!("'%' must be followed by two digits at {}", self.pos));
                    }
                    let label = digits.parse::<u32>().map_err(|e| e.to_string())?;
                    self.ring_closure(label)?;
                }
                d if d.is_ascii_digit() => {
                    let label = d.to_digit(10).unwrap_or_default();
                    self.ring_closure(label)?;
                }
                '[' => {
                    let atom = self.bracket_atom()?;
                    self.place_atom(atom)?;
                }
                '*' => self.place_atom(Atom {
                    element: "*".to_string(),
                    aromatic: false,
                    charge: 0,
                })?,
                c if c.is_ascii_alphabetic() => {
                    let atom = self.organic_atom(c)?;
                    self.place_atom(atom)?;
                }
                other => return Err(format!("unexpected character {other:?} at {}", self.pos)),
            }
        }

        if self.graph.atoms.is_empty() {
            return Err("no atoms".to_string());
        }
        if !self.branches.is_empty() {
            return Err("unclosed branch".to_string());
        }
        if self.pending.is_some() {
            return Err("trailing bond symbol".to_string());
        }
        if let Some(label) = self.rings.keys().min() {
            return Err(format!("ring closure {label} never closed"));
        }
        Ok(self.graph)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool, max: usize) -> String {
        let mut out = String::new();
        while out.len() < max {
            match self.peek() {
                Some(c) if pred(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                _ => break,
            }
        }
        out
    }

    fn set_bond(&mut self, order: BondOrder) -> Result<(), String> {
        if self.pending.is_some() {
            return Err(format!("two bond symbols in a row at {}", self.pos));
        }
        self.pending = Some(order);
        Ok(())
    }

    fn place_atom(&mut self, atom: Atom) -> Result<(), String> {
        let idx = self.graph.add_atom(atom);
        if let Some(prev) = self.prev {
            let order = self
                .pending
                .take()
                .unwrap_or_else(|| self.graph.implicit_order(prev, idx));
            self.graph.add_bond(prev, idx, order)?;
        } else if self.pending.is_some() {
            return Err(format!("bond symbol without a preceding atom at {}", self.pos));
        }
        self.prev = Some(idx);
        Ok(())
    }

    fn ring_closure(&mut self, label: u32) -> Result<(), String> {
        let current = self
            .prev
            .ok_or_else(|| format!("ring closure {label} before any atom"))?;
        let explicit = self.pending.take();
        match self.rings.remove(&label) {
            Some((opener, opener_order)) => {
                if let (Some(a), Some(b)) = (opener_order, explicit) {
                    if a != b {
                        return Err(format!("conflicting bond orders on ring closure {label}"));
                    }
                }
                let order = explicit
                    .or(opener_order)
                    .unwrap_or_else(|| self.graph.implicit_order(opener, current));
                self.graph.add_bond(opener, current, order)
            }
            None => {
                self.rings.insert(label, (current, explicit));
                Ok(())
            }
        }
    }

    fn organic_atom(&mut self, first: char) -> Result<Atom, String> {
        let (element, aromatic) = match first {
            'C' if self.peek() == Some('l') => {
                self.pos += 1;
                ("Cl", false)
            }
            'B' if self.peek() == Some('r') => {
                self.pos += 1;
                ("Br", false)
            }
            'B' => ("B", false),
            'C' => ("C", false),
            'N' => ("N", false),
            'O' => ("O", false),
            'P' => ("P", false),
            'S' => ("S", false),
            'F' => ("F", false),
            'I' => ("I", false),
            'b' => ("B", true),
            'c' => ("C", true),
            'n' => ("N", true),
            'o' => ("O", true),
            'p' => ("P", true),
            's' => ("S", true),
            other => {
                return Err(format!(
                    "{other:?} at {} is not an organic-subset atom; use brackets",
                    self.pos
                ))
            }
        };
        Ok(Atom {
            element: element.to_string(),
            aromatic,
            charge: 0,
        })
    }

    fn bracket_atom(&mut self) -> Result<Atom, String> {
        let start = self.pos;
        let close = self.chars[start..]
            .iter()
            .position(|c| *c == ']')
            .ok_or_else(|| format!("unclosed '[' at {start}"))?;
        let body: Vec<char> = self.chars[start..start + close].to_vec();
        self.pos = start + close + 1;

        let mut i = 0;
        while i < body.len() && body[i].is_ascii_digit() {
            i += 1;
        }

        let (element, aromatic) = match body.get(i) {
            Some('*') => {
                i += 1;
                ("*".to_string(), false)
            }
            Some(c) if c.is_ascii_uppercase() => {
                let mut symbol = c.to_string();
                i += 1;
                if let Some(next) = body.get(i) {
                    if next.is_ascii_lowercase() {
                        symbol.push(*next);
                        i += 1;
                    }
                }
                (symbol, false)
            }
            Some(c) if c.is_ascii_lowercase() => {
                let two: String = body[i..body.len().min(i + 2)].iter().collect();
                let symbol = if AROMATIC_TWO_LETTER.contains(&two.as_str()) {
                    i += 2;
                    two
                } else {
                    i += 1;
                    c.to_string()
                };
                let mut chars = symbol.chars();
                let capitalized = match chars.next() {
                    Some(f) => f.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                };
                (capitalized, true)
            }
            _ => return Err(format!("bracket atom without element at {start}")),
        };

        let mut charge: i32 = 0;
        while i < body.len() {
            match body[i] {
                '@' | 'H' | ':' => i += 1,
                d if d.is_ascii_digit() => i += 1,
                sign @ ('+' | '-') => {
                    let unit = if sign == '+' { 1 } else { -1 };
                    i += 1;
                    let digits: String = body[i..].iter().take_while(|c| c.is_ascii_digit()).collect();
                    if digits.is_empty() {
                        charge = charge.saturating_add(unit);
                    } else {
                        i += digits.len();
                        let magnitude = digits.parse::<i32>().map_err(|e| e.to_string())?;
                        charge = charge.saturating_add(unit.saturating_mul(magnitude));
                    }
                }
                other => return Err(format!("unexpected {other:?} inside bracket atom at {start}")),
            }
        }

        Ok(Atom {
            element,
            aromatic,
            charge: charge.clamp(i8::MIN as i32, i8::MAX as i32) as i8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_benzene_ring() {
        let graph = parse_smiles("c1ccccc1").unwrap();
        assert_eq!(graph.atom_count(), 6);
        assert_eq!(graph.bonds().len(), 6);
        assert!(graph.bonds().iter().all(|b| b.order == BondOrder::Aromatic));
        assert!((0..6).all(|a| graph.degree(a) == 2));
    }

    #[test]
    fn parses_branches_and_bond_orders() {
        let graph = parse_smiles("CC(=O)O").unwrap();
        assert_eq!(graph.atom_count(), 4);
        assert_eq!(graph.degree(1), 3);
        let double = graph.bonds().iter().find(|b| b.order == BondOrder::Double).unwrap();
        assert_eq!((double.a, double.b), (1, 2));
    }

    #[test]
    fn parses_two_letter_and_bracket_atoms() {
        let graph = parse_smiles("ClC(Br)[NH3+]").unwrap();
        let elements: Vec<&str> = graph.atoms().iter().map(|a| a.element.as_str()).collect();
        assert_eq!(elements, vec!["Cl", "C", "Br", "N"]);
        assert_eq!(graph.atoms()[3].charge, 1);

        let pyrrole = parse_smiles("c1cc[nH]c1").unwrap();
        assert_eq!(pyrrole.atom_count(), 5);
        assert!(pyrrole.atoms()[3].aromatic);
        assert_eq!(pyrrole.atoms()[3].element, "N");
    }

    #[test]
    fn oversized_charges_saturate() {
        let graph = parse_smiles("[C+2147483647+2147483647]").unwrap();
        assert_eq!(graph.atoms()[0].charge, i8::MAX);

        let graph = parse_smiles("[O-2147483647-2147483647-]").unwrap();
        assert_eq!(graph.atoms()[0].charge, i8::MIN);
    }

    #[test]
    fn parses_percent_ring_labels_and_fragments() {
        let graph = parse_smiles("C%10CCCC%10.[Na+]").unwrap();
        assert_eq!(graph.atom_count(), 6);
        assert_eq!(graph.bonds().len(), 5);
        assert_eq!(graph.degree(5), 0);
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "C1CC", "C(C", "C)C", "C==C", "Xx", "C[C", "(C)", "C=", "c1cc1c1"] {
            assert!(
                matches!(parse_smiles(bad), Err(DataError::UnparsableDescriptor { .. })),
                "expected {bad:?} to be rejected"
            );
        }
    }
}
