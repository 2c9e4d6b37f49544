//! Per-node style inputs consumed by the layout and text pipeline.
//!
//! Reflow has no style-parsing front end; embedders fill [`NodeStyle`]
//! directly. Only the properties the pipeline actually reads are modeled:
//! the box edges that decide scope transparency, the font request that
//! drives character-to-font mapping, and the flow/wrap switches.

use crate::geometry::EdgeOffsets;

/// What kind of content a node's style establishes.
///
/// A `Text` container owns a text layout object and gathers the inline
/// content of its subtree into paragraphs. Note this is a style property,
/// independent of the node kind: a View node styled as a Text container is
/// what starts an inline formatting flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerKind {
  #[default]
  View,
  Text,
}

/// Outer flow mode of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowMode {
  #[default]
  Block,
  Inline,
}

/// Per-axis overflow behavior. Anything other than `Visible` makes an
/// inline node opaque to the surrounding text flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
  #[default]
  Visible,
  Hidden,
}

/// Line wrapping mode for a text container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
  #[default]
  Wrap,
  NoWrap,
}

/// Orientation of glyphs within a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextOrientation {
  #[default]
  Horizontal,
  Vertical,
}

/// The font selection request carried by a node's style.
///
/// Two text items merge into one font-mapping group only when every field
/// here matches. The fallback list is referenced by identity: the embedder
/// registers concrete face lists with the shaping backend under these ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontRequest {
  /// Identity of the registered fallback list.
  pub fallback_list: u32,
  /// Weight on the usual 100..=900 scale.
  pub weight: u16,
  /// Width (stretch) as a percentage of normal, 100.0 = normal.
  pub width: f32,
  pub italic: bool,
  /// Oblique slant in degrees. Clamped to [-90, 90] at mapping time.
  pub oblique_deg: f32,
}

impl Default for FontRequest {
  fn default() -> Self {
    Self {
      fallback_list: 0,
      weight: 400,
      width: 100.0,
      italic: false,
      oblique_deg: 0.0,
    }
  }
}

impl FontRequest {
  /// Oblique angle with the contract clamp applied.
  #[inline]
  pub fn clamped_oblique(&self) -> f32 {
    self.oblique_deg.clamp(-90.0, 90.0)
  }
}

/// The style inputs of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStyle {
  pub container: ContainerKind,
  pub flow: FlowMode,

  pub insets: EdgeOffsets,
  pub margins: EdgeOffsets,
  pub paddings: EdgeOffsets,
  pub borders: EdgeOffsets,

  /// Explicit size, when the embedder has resolved one.
  pub width: Option<f32>,
  pub height: Option<f32>,
  pub aspect_ratio: Option<f32>,

  pub overflow_x: Overflow,
  pub overflow_y: Overflow,

  pub font: FontRequest,
  pub font_size: f32,
  pub orientation: TextOrientation,
  pub wrap: WrapMode,
  /// BCP 47 language tag driving locale-sensitive shaping.
  pub locale: String,
}

impl Default for NodeStyle {
  fn default() -> Self {
    Self {
      container: ContainerKind::View,
      flow: FlowMode::Block,
      insets: EdgeOffsets::ZERO,
      margins: EdgeOffsets::ZERO,
      paddings: EdgeOffsets::ZERO,
      borders: EdgeOffsets::ZERO,
      width: None,
      height: None,
      aspect_ratio: None,
      overflow_x: Overflow::Visible,
      overflow_y: Overflow::Visible,
      font: FontRequest::default(),
      font_size: 16.0,
      orientation: TextOrientation::Horizontal,
      wrap: WrapMode::Wrap,
      locale: String::new(),
    }
  }
}

impl NodeStyle {
  /// True when an inline node is transparent to the surrounding text flow:
  /// zero box model on every edge, no aspect ratio, visible overflow on
  /// both axes. Transparent nodes become scopes instead of inline blocks.
  pub fn is_flow_transparent(&self) -> bool {
    self.flow == FlowMode::Inline
      && self.insets.is_zero()
      && self.margins.is_zero()
      && self.paddings.is_zero()
      && self.borders.is_zero()
      && self.aspect_ratio.is_none()
      && self.overflow_x == Overflow::Visible
      && self.overflow_y == Overflow::Visible
  }

  /// True when any box-model edge of this node is non-zero. Style range
  /// segmentation starts a new range at such scopes.
  pub fn has_box_edges(&self) -> bool {
    !(self.insets.is_zero() && self.margins.is_zero() && self.paddings.is_zero() && self.borders.is_zero())
  }
}
