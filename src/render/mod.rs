//! Rendering: the shared signal graph, offline mix-down and PCM encoding

pub mod graph;
pub mod offline;
pub mod wav;

pub use graph::{GraphPlan, GraphRunner, PlanSource, OUTPUT_CHANNELS};
pub use offline::OfflineRenderer;
pub use wav::PcmEncoder;
