//! Layout: constraints, per-node caching, the two pre-layout walks, and
//! the measurement engine.

pub mod cache;
pub mod collect;
pub mod constraints;
pub mod dirty;
pub mod engine;

pub use cache::{compute_cache_slot, LayoutCache, MEASURE_SLOT_COUNT};
pub use constraints::{AvailableSpace, LayoutInput, LayoutOutput, MeasureMode};
pub use dirty::{run_phase0, Phase0Stats};
pub use engine::LayoutContext;
