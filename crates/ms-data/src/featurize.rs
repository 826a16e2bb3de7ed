use ms_types::{EncoderKind, ReprSpec};
use tracing::warn;

use crate::dataset::MoleculeDataset;
use crate::scaffold::{stable_hash, stable_hash_u64s};
use crate::smiles::{parse_smiles, MolGraph};

/// Turns structural descriptors into fixed-width input vectors.
///
/// Each atom environment up to `radius` bonds is hashed into one of `bits`
/// buckets; the output holds `ln(1 + count)` per bucket. Descriptors that do
/// not parse map to the zero vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Featurizer {
    encoder: EncoderKind,
    radius: usize,
    bits: usize,
}

impl Featurizer {
    pub fn new(encoder: EncoderKind, radius: usize, bits: usize) -> Self {
        let radius = match encoder {
            EncoderKind::Fingerprint => radius,
            EncoderKind::AtomCounts => 0,
        };
        Self {
            encoder,
            radius,
            bits: bits.max(1),
        }
    }

    pub fn for_repr(repr: &ReprSpec, radius: usize, bits: usize) -> Self {
        Self::new(repr.encoder, radius, bits)
    }

    pub fn dim(&self) -> usize {
        self.bits
    }

    pub fn featurize(&self, smiles: &str) -> Vec<f64> {
        match parse_smiles(smiles) {
            Ok(graph) => self.encode(&graph),
            Err(e) => {
                warn!("Featurizing unparsable descriptor as zeros: {e}");
                vec![0.0; self.bits]
            }
        }
    }

    pub fn featurize_dataset(&self, dataset: &MoleculeDataset) -> Vec<Vec<f64>> {
        dataset.iter().map(|r| self.featurize(&r.smiles)).collect()
    }

    fn encode(&self, graph: &MolGraph) -> Vec<f64> {
        let mut counts = vec![0u32; self.bits];
        let mut labels: Vec<u64> = graph
            .atoms()
            .iter()
            .enumerate()
            .map(|(i, atom)| match self.encoder {
                EncoderKind::AtomCounts => stable_hash(&[atom.element.as_bytes()]),
                EncoderKind::Fingerprint => stable_hash(&[
                    atom.element.as_bytes(),
                    &[atom.aromatic as u8],
                    &atom.charge.to_le_bytes(),
                    &(graph.degree(i) as u64).to_le_bytes(),
                ]),
            })
            .collect();

        for round in 0..=self.radius {
            for label in &labels {
                let bucket = stable_hash_u64s(&[*label, round as u64]) % self.bits as u64;
                counts[bucket as usize] += 1;
            }
            if round == self.radius {
                break;
            }
            labels = (0..graph.atom_count())
                .map(|i| {
                    let mut env: Vec<u64> = graph
                        .neighbors(i)
                        .iter()
                        .map(|(n, order)| stable_hash_u64s(&[order.code() as u64, labels[*n]]))
                        .collect();
                    env.sort_unstable();
                    env.insert(0, labels[i]);
                    stable_hash_u64s(&env)
                })
                .collect();
        }

        counts.into_iter().map(|c| (c as f64).ln_1p()).collect()
    }
}
