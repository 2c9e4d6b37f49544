//! Layout constraints and outputs.
//!
//! This module defines how available space is communicated to measurement:
//! a per-axis [`AvailableSpace`] (definite, min-content, or max-content)
//! plus optional pre-resolved "known" dimensions the caller has already
//! decided, which bypass measurement on that axis.

/// Available space in one dimension.
///
/// Layout can have three types of available space:
/// 1. **Definite**: fixed size
/// 2. **MinContent**: shrink to minimum content size
/// 3. **MaxContent**: expand to maximum content size without wrapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AvailableSpace {
  /// Definite size - a specific length value
  Definite(f32),

  /// Shrink to minimum content size. For text this is typically the
  /// longest unbreakable segment.
  MinContent,

  /// Expand to maximum content size; text never wraps.
  MaxContent,
}

impl AvailableSpace {
  /// Returns true if this is a definite (fixed) size.
  #[inline]
  pub fn is_definite(&self) -> bool {
    matches!(self, Self::Definite(_))
  }

  /// Returns the definite value if this is `Definite`, otherwise `None`.
  #[inline]
  pub fn definite_value(&self) -> Option<f32> {
    match self {
      Self::Definite(v) => Some(*v),
      _ => None,
    }
  }

  /// Whether this is the min-content keyword. The measure-slot classifier
  /// splits on exactly this distinction.
  #[inline]
  pub fn is_min_content(&self) -> bool {
    matches!(self, Self::MinContent)
  }
}

/// The input signature of one measurement or layout query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutInput {
  /// Pre-resolved width, when the caller already knows it.
  pub known_width: Option<f32>,
  /// Pre-resolved height, when the caller already knows it.
  pub known_height: Option<f32>,
  pub available_width: AvailableSpace,
  pub available_height: AvailableSpace,
}

impl LayoutInput {
  pub fn new(available_width: AvailableSpace, available_height: AvailableSpace) -> Self {
    Self {
      known_width: None,
      known_height: None,
      available_width,
      available_height,
    }
  }

  pub fn with_known_width(mut self, width: f32) -> Self {
    self.known_width = Some(width);
    self
  }

  pub fn with_known_height(mut self, height: f32) -> Self {
    self.known_height = Some(height);
    self
  }
}

/// Whether a query wants a size only or a committed full layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureMode {
  /// Size-only query; served from (and stored into) the 9 measure slots.
  ComputeSize,
  /// Full layout; served from (and stored into) the single final slot.
  PerformLayout,
}

/// The result of measuring or laying out one node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayoutOutput {
  pub width: f32,
  pub height: f32,
  /// Extent of the content, which can exceed the box under visible
  /// overflow.
  pub content_width: f32,
  pub content_height: f32,
  /// Position of the first text baseline, when the node has one.
  pub first_baseline_x: Option<f32>,
  pub first_baseline_y: Option<f32>,
  /// Top/bottom margins participating in margin collapsing.
  pub collapsible_margin_top: f32,
  pub collapsible_margin_bottom: f32,
  /// True when the box is empty enough that its top and bottom margins
  /// collapse through it.
  pub margins_can_collapse_through: bool,
}

impl LayoutOutput {
  pub fn from_size(width: f32, height: f32) -> Self {
    Self {
      width,
      height,
      content_width: width,
      content_height: height,
      ..Self::default()
    }
  }
}
