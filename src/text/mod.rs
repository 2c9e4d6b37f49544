//! Text pipeline: paragraphs, segmentation, shaping, line breaking, and
//! font identity.

pub mod backend;
pub mod font_cache;
pub mod line_break;
pub mod paragraph;
pub mod segment;
pub mod shape;

pub use backend::{FontFace, MonospaceBackend, ShapingBackend, SystemBackend};
pub use font_cache::{FontEvent, FontId, FontIdCache};
pub use line_break::{BreakContext, LineBreaker, LineSpan};
pub use paragraph::{Paragraph, TextLayout};
pub use segment::Run;
pub use shape::ShapedParagraph;
