//! Stems: the stem set, its mixer rules and placeholder separation

pub mod mixer;
pub mod separator;
pub mod stem;

pub use mixer::Mixer;
pub use separator::{StemSeparator, STEM_NAMES};
pub use stem::{Stem, StemInfo, StemKind};
