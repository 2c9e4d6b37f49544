//! Reflow: an incremental layout and text measurement pipeline.
//!
//! The crate models a retained tree of View, Text, and Root nodes whose
//! layout is recomputed incrementally: embedders mutate the tree and mark
//! nodes dirty, and one [`LayoutContext::calc`] call brings every root's
//! layout up to date again. A pass has three stages:
//!
//! 1. **Phase0** ([`layout::dirty`]): prune clean subtrees, invalidate
//!    measurement caches, thread text-layout ownership through inline
//!    content.
//! 2. **Phase1** ([`layout::collect`]): rebuild the paragraph/item/scope
//!    model of every dirty text container.
//! 3. **Measurement** ([`layout::engine`]): recursive sizing through
//!    per-node slot caches; for text containers this runs segmentation
//!    (script, bidi, font, style), shaping through a pluggable
//!    [`text::backend::ShapingBackend`], and greedy line breaking.
//!
//! Font identity for renderers lives in [`text::font_cache::FontIdCache`],
//! which maps shared face handles to stable `u32` ids with recency-based
//! retirement.
//!
//! ```
//! use reflow::layout::LayoutContext;
//! use reflow::style::{ContainerKind, NodeStyle};
//! use reflow::text::MonospaceBackend;
//!
//! let mut ctx = LayoutContext::new(Box::new(MonospaceBackend::new()));
//! let root = ctx.tree.create_root(NodeStyle {
//!   container: ContainerKind::Text,
//!   ..NodeStyle::default()
//! });
//! let text = ctx.tree.create_text("hello world");
//! ctx.tree.add_child(root, text).unwrap();
//! ctx.calc().unwrap();
//! assert!(ctx.layout_of(root).is_some());
//! ```

pub mod error;
pub mod geometry;
pub mod layout;
pub mod style;
pub mod text;
pub mod tree;

pub use error::{clear_last_error, last_error, Error, Result};
pub use geometry::{EdgeOffsets, Point, Rect, Size};
pub use layout::{AvailableSpace, LayoutContext, LayoutInput, LayoutOutput, MeasureMode};
pub use style::{ContainerKind, FlowMode, FontRequest, NodeStyle, Overflow, WrapMode};
pub use text::{FontId, FontIdCache, ShapingBackend};
pub use tree::{NodeId, NodeKind, NodeTree};
