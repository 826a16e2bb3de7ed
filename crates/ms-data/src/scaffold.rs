//! Scaffold keys: the structural core used to group related molecules.

use std::hash::Hasher;

use ms_types::ScaffoldKey;
use rustc_hash::FxHasher;
use tracing::debug;

use crate::smiles::{parse_smiles, BondOrder, MolGraph};

/// Maps a structural descriptor to its scaffold key.
///
/// Implementations must be deterministic: the same descriptor always yields
/// the same key, across runs and machines.
pub trait ScaffoldFn: Send + Sync {
    fn scaffold(&self, descriptor: &str) -> ScaffoldKey;

    fn name(&self) -> &str;
}

/// Murcko-style framework: ring systems plus the linkers joining them.
///
/// Terminal atoms are removed until none remain, except that atoms held to
/// the framework by a double or triple bond (`=O`, `=N`, `=S`, `#N`) are put
/// back. What is left is hashed with a Weisfeiler-Lehman refinement over
/// element, aromaticity and bond order. Acyclic molecules reduce to nothing
/// and share the empty key.
#[derive(Debug, Clone)]
pub struct MurckoFramework {
    rounds: usize,
}

impl MurckoFramework {
    pub fn new() -> Self {
        Self { rounds: 4 }
    }

    pub fn with_rounds(rounds: usize) -> Self {
        Self { rounds }
    }

    /// Mask of atoms that survive iterative removal of atoms with at most one
    /// neighbor, plus exocyclic atoms multiply bonded to a survivor.
    pub fn framework_mask(graph: &MolGraph) -> Vec<bool> {
        let n = graph.atom_count();
        let mut alive = vec![true; n];
        let mut degree: Vec<usize> = (0..n).map(|a| graph.degree(a)).collect();
        let mut stack: Vec<usize> = (0..n).filter(|a| degree[*a] <= 1).collect();

        while let Some(atom) = stack.pop() {
            if !alive[atom] {
                continue;
            }
            alive[atom] = false;
            for (neighbor, _) in graph.neighbors(atom) {
                if alive[*neighbor] {
                    degree[*neighbor] -= 1;
                    if degree[*neighbor] == 1 {
                        stack.push(*neighbor);
                    }
                }
            }
        }

        let pruned = alive.clone();
        for atom in (0..n).filter(|a| !pruned[*a] && graph.degree(*a) == 1) {
            let multiply_bonded = graph.neighbors(atom).iter().any(|(neighbor, order)| {
                pruned[*neighbor] && matches!(order, BondOrder::Double | BondOrder::Triple)
            });
            if multiply_bonded {
                alive[atom] = true;
            }
        }
        alive
    }

    fn framework_key(&self, graph: &MolGraph) -> String {
        let alive = Self::framework_mask(graph);
        let kept: Vec<usize> = (0..graph.atom_count()).filter(|a| alive[*a]).collect();
        if kept.is_empty() {
            return String::new();
        }

        let mut labels: Vec<u64> = (0..graph.atom_count())
            .map(|a| {
                let atom = &graph.atoms()[a];
                let mut h = FxHasher::default();
                h.write(atom.element.as_bytes());
                h.write(&[atom.aromatic as u8]);
                h.finish()
            })
            .collect();

        for _ in 0..self.rounds {
            let next: Vec<u64> = (0..graph.atom_count())
                .map(|a| {
                    if !alive[a] {
                        return labels[a];
                    }
                    let mut env: Vec<(u8, u64)> = graph
                        .neighbors(a)
                        .iter()
                        .filter(|(n, _)| alive[*n])
                        .map(|(n, order)| (order.code(), labels[*n]))
                        .collect();
                    env.sort_unstable();
                    let mut h = FxHasher::default();
                    h.write_u64(labels[a]);
                    for (order, label) in env {
                        h.write(&[order]);
                        h.write_u64(label);
                    }
                    h.finish()
                })
                .collect();
            labels = next;
        }

        let mut final_labels: Vec<u64> = kept.iter().map(|a| labels[*a]).collect();
        final_labels.sort_unstable();
        let mut h = FxHasher::default();
        for label in &final_labels {
            h.write_u64(*label);
        }
        let bond_count = graph
            .bonds()
            .iter()
            .filter(|b| alive[b.a] && alive[b.b])
            .count();
        format!("{}-{}-{:016x}", kept.len(), bond_count, h.finish())
    }
}

impl Default for MurckoFramework {
    fn default() -> Self {
        Self::new()
    }
}

impl ScaffoldFn for MurckoFramework {
    fn scaffold(&self, descriptor: &str) -> ScaffoldKey {
        match parse_smiles(descriptor) {
            Ok(graph) => ScaffoldKey::Framework(self.framework_key(&graph)),
            Err(e) => {
                debug!("No scaffold for {descriptor:?}: {e}");
                ScaffoldKey::Unparseable
            }
        }
    }

    fn name(&self) -> &str {
        "murcko_framework"
    }
}

// FxHasher carries no per-process random state, so keys are stable across runs.
pub(crate) fn stable_hash(parts: &[&[u8]]) -> u64 {
    let mut h = FxHasher::default();
    for part in parts {
        h.write(part);
    }
    h.finish()
}

pub(crate) fn stable_hash_u64s(values: &[u64]) -> u64 {
    let mut h = FxHasher::default();
    for value in values {
        h.write_u64(*value);
    }
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(smiles: &str) -> ScaffoldKey {
        MurckoFramework::new().scaffold(smiles)
    }

    #[test]
    fn side_chains_do_not_change_the_framework() {
        assert_eq!(key("c1ccccc1"), key("Cc1ccccc1"));
        assert_eq!(key("c1ccccc1"), key("OCCc1ccccc1"));
        assert_eq!(key("c1ccc(cc1)CC(=O)O"), key("c1ccccc1C"));
    }

    #[test]
    fn atom_order_does_not_change_the_key() {
        assert_eq!(key("c1ccncc1"), key("n1ccccc1"));
        assert_eq!(key("C1CC1c1ccccc1"), key("c1ccc(cc1)C1CC1"));
    }

    #[test]
    fn different_frameworks_differ() {
        assert_ne!(key("c1ccccc1"), key("C1CCCCC1"));
        assert_ne!(key("c1ccccc1"), key("c1ccncc1"));
        assert_ne!(key("c1ccccc1"), key("c1ccc2ccccc2c1"));
        // Linker length is part of the framework.
        assert_ne!(key("c1ccccc1Cc1ccccc1"), key("c1ccccc1CCc1ccccc1"));
    }

    #[test]
    fn exocyclic_multiple_bonds_stay_on_the_framework() {
        assert_ne!(key("O=C1CCCCC1"), key("C1CCCCC1"));
        assert_eq!(key("O=C1CCCCC1"), key("C1CCC(=O)CC1"));
        assert_ne!(key("O=C1CCCCC1"), key("S=C1CCCCC1"));
        // A double bond beyond a pruned atom is still a side chain.
        assert_eq!(key("c1ccccc1C(=O)O"), key("c1ccccc1"));
        assert_eq!(key("C=Cc1ccccc1"), key("c1ccccc1"));

        let graph = parse_smiles("O=C1CCCCC1CC").unwrap();
        let mask = MurckoFramework::framework_mask(&graph);
        assert_eq!(mask, vec![true, true, true, true, true, true, true, false, false]);
    }

    #[test]
    fn keys_are_deterministic() {
        let a = MurckoFramework::new().scaffold("O=C1CCc2ccccc2N1");
        let b = MurckoFramework::new().scaffold("O=C1CCc2ccccc2N1");
        assert_eq!(a, b);
        assert_eq!(stable_hash(&[b"CCO"]), stable_hash(&[b"CCO"]));
        assert_ne!(stable_hash_u64s(&[1, 2]), stable_hash_u64s(&[2, 1]));
    }

    #[test]
    fn acyclic_molecules_share_the_empty_key() {
        assert_eq!(key("CCO"), ScaffoldKey::Framework(String::new()));
        assert_eq!(key("CCCCN"), key("CCO"));
    }

    #[test]
    fn unparseable_descriptors_collapse_to_the_sentinel() {
        assert_eq!(key("C1CC"), ScaffoldKey::Unparseable);
        assert_eq!(key("not a smiles"), ScaffoldKey::Unparseable);
    }

    #[test]
    fn framework_mask_keeps_linkers() {
        let graph = parse_smiles("c1ccccc1CCc1ccccc1").unwrap();
        let mask = MurckoFramework::framework_mask(&graph);
        assert!(mask.iter().all(|alive| *alive));

        let graph = parse_smiles("CCc1ccccc1").unwrap();
        let mask = MurckoFramework::framework_mask(&graph);
        assert_eq!(mask.iter().filter(|alive| **alive).count(), 6);
    }
}
