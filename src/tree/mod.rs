//! Node tree: generation-checked arenas and the View/Text/Root node model.

pub mod arena;
pub mod node;

pub use arena::SlotArena;
pub use node::{CommonData, ElementNode, NodeId, NodeKind, NodeTree, TextNode};
