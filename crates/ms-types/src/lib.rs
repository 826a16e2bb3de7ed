pub mod errors;
pub mod molecule;
pub mod params;
pub mod settings;

pub use errors::*;
pub use molecule::*;
pub use params::*;
pub use settings::*;
