//! Basic geometric types used throughout layout and text measurement.
//!
//! All values are f32 logical pixels. Layout math in this crate is
//! single-threaded and never needs more than sizes, points, and per-edge
//! offsets, so the types here stay deliberately small.

use std::fmt;

/// A 2D size (width and height).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
  pub width: f32,
  pub height: f32,
}

impl Size {
  pub const ZERO: Size = Size {
    width: 0.0,
    height: 0.0,
  };

  #[inline]
  pub fn new(width: f32, height: f32) -> Self {
    Self { width, height }
  }

  /// Returns true if either dimension is zero or negative.
  #[inline]
  pub fn is_empty(self) -> bool {
    self.width <= 0.0 || self.height <= 0.0
  }
}

impl fmt::Display for Size {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

/// A 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

impl Point {
  pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

  #[inline]
  pub fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }

  #[inline]
  pub fn translate(self, other: Point) -> Self {
    Self {
      x: self.x + other.x,
      y: self.y + other.y,
    }
  }
}

/// A rectangle described by its top-left origin and size.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
  pub origin: Point,
  pub size: Size,
}

impl Rect {
  #[inline]
  pub fn new(origin: Point, size: Size) -> Self {
    Self { origin, size }
  }

  #[inline]
  pub fn width(self) -> f32 {
    self.size.width
  }

  #[inline]
  pub fn height(self) -> f32 {
    self.size.height
  }

  #[inline]
  pub fn max_x(self) -> f32 {
    self.origin.x + self.size.width
  }

  #[inline]
  pub fn max_y(self) -> f32 {
    self.origin.y + self.size.height
  }
}

/// Per-edge offsets (margins, borders, paddings, insets).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EdgeOffsets {
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
  pub left: f32,
}

impl EdgeOffsets {
  pub const ZERO: EdgeOffsets = EdgeOffsets {
    top: 0.0,
    right: 0.0,
    bottom: 0.0,
    left: 0.0,
  };

  #[inline]
  pub fn uniform(value: f32) -> Self {
    Self {
      top: value,
      right: value,
      bottom: value,
      left: value,
    }
  }

  /// Sum of left and right offsets.
  #[inline]
  pub fn horizontal(self) -> f32 {
    self.left + self.right
  }

  /// Sum of top and bottom offsets.
  #[inline]
  pub fn vertical(self) -> f32 {
    self.top + self.bottom
  }

  /// Returns true if every edge is exactly zero.
  #[inline]
  pub fn is_zero(self) -> bool {
    self.top == 0.0 && self.right == 0.0 && self.bottom == 0.0 && self.left == 0.0
  }
}
