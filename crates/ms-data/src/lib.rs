//! Molecule datasets, scaffold-aware splitting, stratified folds and result tables.

pub mod dataset;
pub mod featurize;
pub mod loaders;
pub mod sampling;
pub mod scaffold;
pub mod smiles;
pub mod split;
pub mod storage;

pub use dataset::*;
pub use featurize::*;
pub use loaders::*;
pub use sampling::*;
pub use scaffold::*;
pub use smiles::*;
pub use split::*;
pub use storage::*;
