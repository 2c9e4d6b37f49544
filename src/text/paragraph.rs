//! Paragraphs, items, and scopes: the output of the Phase1 collector.
//!
//! A [`TextLayout`] belongs to one text container and holds the container's
//! content regrouped into [`Paragraph`]s - maximal runs of items of uniform
//! flow. Text items contribute their characters to the paragraph's logical
//! text; inline-block and block items contribute a single object
//! replacement character so every partition built later still covers the
//! full logical length.
//!
//! Scopes are style-bearing, flow-transparent inline subtrees. The builder
//! tracks them as a stack; every appended item records the style at the
//! top of the stack as a scope span, and the collector must balance each
//! push with a pop before the build is finalized (debug-asserted).

use crate::style::{FontRequest, NodeStyle, TextOrientation};
use crate::text::backend::FontFace;
use crate::tree::node::NodeId;

/// Placeholder character occupying one logical position for each
/// inline-block or block item.
pub const OBJECT_REPLACEMENT: char = '\u{FFFC}';

/// Flow class of a paragraph and its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowClass {
  Inline,
  Block,
}

/// One paragraph content unit.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
  /// A slice of a Text node's content.
  Text {
    node: NodeId,
    /// Index of the slice within the node's content (always 0 today;
    /// reserved for split text references).
    text_index: u32,
    /// Length of the slice in characters.
    len: usize,
  },
  /// An inline-level box opaque to the text flow.
  InlineBlock { node: NodeId },
  /// A block-level box.
  Block { node: NodeId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
  pub kind: ItemKind,
  /// Cumulative character offset of this item within its paragraph.
  pub logic_text_start: usize,
}

impl Item {
  /// Logical length this item occupies in the paragraph.
  pub fn logic_len(&self) -> usize {
    match &self.kind {
      ItemKind::Text { len, .. } => *len,
      ItemKind::InlineBlock { .. } | ItemKind::Block { .. } => 1,
    }
  }

  pub fn is_text(&self) -> bool {
    matches!(self.kind, ItemKind::Text { .. })
  }
}

/// The style facts a scope contributes to the text under it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeStyle {
  pub font: FontRequest,
  pub font_size: f32,
  pub orientation: TextOrientation,
  /// Whether the scope's own node had any non-zero box edge. Style
  /// segmentation starts a fresh range at such scopes.
  pub has_box_edges: bool,
}

impl ScopeStyle {
  pub fn from_node_style(style: &NodeStyle) -> Self {
    Self {
      font: style.font,
      font_size: style.font_size,
      orientation: style.orientation,
      has_box_edges: style.has_box_edges(),
    }
  }
}

/// A contiguous span of paragraph text governed by one scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeSpan {
  pub start: usize,
  pub end: usize,
  pub style: ScopeStyle,
}

/// An ordered group of items of uniform flow.
#[derive(Debug, Clone)]
pub struct Paragraph {
  pub flow: FlowClass,
  pub items: Vec<Item>,
  /// The paragraph's logical text: text item characters plus one
  /// replacement character per non-text item.
  pub text: String,
  /// Total logical length in characters. Grows monotonically as items
  /// append.
  pub logic_text_len: usize,
  /// Scope coverage of the logical text, in order, gap-free.
  pub scope_spans: Vec<ScopeSpan>,
}

impl Paragraph {
  fn new(flow: FlowClass) -> Self {
    Self {
      flow,
      items: Vec::new(),
      text: String::new(),
      logic_text_len: 0,
      scope_spans: Vec::new(),
    }
  }

  fn push_item(&mut self, kind: ItemKind, text: Option<&str>, style: ScopeStyle) {
    let start = self.logic_text_len;
    let len = match (&kind, text) {
      (ItemKind::Text { len, .. }, Some(s)) => {
        debug_assert_eq!(*len, s.chars().count());
        self.text.push_str(s);
        *len
      }
      _ => {
        self.text.push(OBJECT_REPLACEMENT);
        1
      }
    };
    self.items.push(Item {
      kind,
      logic_text_start: start,
    });
    self.logic_text_len = start + len;
    self.scope_spans.push(ScopeSpan {
      start,
      end: self.logic_text_len,
      style,
    });
  }
}

/// The per-text-container layout object.
///
/// Created on a container's first dirty visit, rebuilt (with caches
/// cleared) when the container is text-dirty, destroyed when the style
/// container changes away from Text.
#[derive(Debug, Default)]
pub struct TextLayout {
  pub paragraphs: Vec<Paragraph>,
  /// Undefined-glyph font for spans no fallback list covers, probed once
  /// per owner and kept across rebuilds.
  pub fallback_font: Option<FontFace>,
  /// Scope stack during a build. Index 0 is the container's own style.
  scope_stack: Vec<ScopeStyle>,
  building: bool,
  built: bool,
}

impl TextLayout {
  pub fn new() -> Self {
    Self::default()
  }

  /// Whether a finished build is available for segmentation.
  pub fn is_built(&self) -> bool {
    self.built
  }

  /// Starts (or restarts) a build, clearing prior paragraphs.
  pub fn begin_build(&mut self, container_style: ScopeStyle) {
    self.paragraphs.clear();
    self.scope_stack.clear();
    self.scope_stack.push(container_style);
    self.building = true;
    self.built = false;
  }

  /// Enters a flow-transparent scope.
  pub fn push_scope(&mut self, style: ScopeStyle) {
    debug_assert!(self.building, "push_scope outside of a build");
    self.scope_stack.push(style);
  }

  /// Leaves the innermost scope. Must balance `push_scope` exactly; the
  /// container's own base scope is never popped.
  pub fn pop_scope(&mut self) {
    debug_assert!(self.building, "pop_scope outside of a build");
    debug_assert!(self.scope_stack.len() > 1, "unbalanced scope pop");
    if self.scope_stack.len() > 1 {
      self.scope_stack.pop();
    }
  }

  fn current_scope(&self) -> ScopeStyle {
    *self.scope_stack.last().expect("scope stack holds the base scope")
  }

  fn paragraph_for(&mut self, flow: FlowClass) -> &mut Paragraph {
    let start_new = match self.paragraphs.last() {
      Some(p) => p.flow != flow,
      None => true,
    };
    if start_new {
      self.paragraphs.push(Paragraph::new(flow));
    }
    self.paragraphs.last_mut().expect("just ensured")
  }

  /// Appends a text item to the current (or a new) inline paragraph.
  /// Empty text contributes nothing; callers filter it out before this.
  pub fn append_text_item(&mut self, node: NodeId, text_index: u32, text: &str) {
    debug_assert!(self.building, "append outside of a build");
    debug_assert!(!text.is_empty(), "empty text never becomes an item");
    let style = self.current_scope();
    let len = text.chars().count();
    self.paragraph_for(FlowClass::Inline).push_item(
      ItemKind::Text {
        node,
        text_index,
        len,
      },
      Some(text),
      style,
    );
  }

  /// Appends an opaque inline-level box.
  pub fn append_inline_block(&mut self, node: NodeId) {
    debug_assert!(self.building, "append outside of a build");
    let style = self.current_scope();
    self
      .paragraph_for(FlowClass::Inline)
      .push_item(ItemKind::InlineBlock { node }, None, style);
  }

  /// Appends a block-level box, breaking the inline paragraph.
  pub fn append_block(&mut self, node: NodeId) {
    debug_assert!(self.building, "append outside of a build");
    let style = self.current_scope();
    self
      .paragraph_for(FlowClass::Block)
      .push_item(ItemKind::Block { node }, None, style);
  }

  /// Commits the build. Scope pushes and pops must have balanced.
  pub fn finalize_build(&mut self) {
    debug_assert!(self.building, "finalize without begin");
    debug_assert_eq!(self.scope_stack.len(), 1, "unbalanced scope stack at finalize");
    self.building = false;
    self.built = true;
  }
}
