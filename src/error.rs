//! Error types for Reflow
//!
//! This module provides error types for the layout and text subsystems:
//! - Layout errors (invalid constraints, stale node ids)
//! - Text errors (segmentation, line breaking)
//! - Font errors (mapping, face parsing)
//! - Backend errors (shaping/analysis capability failures)
//!
//! All errors use the `thiserror` crate for minimal boilerplate and proper
//! error trait implementations.
//!
//! Backend failures abort the whole `calc()` pass; in addition to the
//! returned `Err`, a descriptive message is recorded in a thread-local
//! last-error slot retrievable via [`last_error`]. This mirrors the
//! all-or-nothing contract: no partial results for the failing subtree are
//! ever committed.

use std::cell::RefCell;
use thiserror::Error;

/// Result type alias for Reflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Reflow.
///
/// Each variant wraps a more specific error type for that subsystem.
#[derive(Error, Debug, Clone)]
pub enum Error {
  /// Layout error
  #[error("Layout error: {0}")]
  Layout(#[from] LayoutError),

  /// Text segmentation or line breaking error
  #[error("Text error: {0}")]
  Text(#[from] TextError),

  /// Font mapping or face error
  #[error("Font error: {0}")]
  Font(#[from] FontError),

  /// Shaping backend failure
  #[error("Backend error: {0}")]
  Backend(#[from] BackendError),
}

/// Errors that occur during layout computation.
#[derive(Error, Debug, Clone)]
pub enum LayoutError {
  /// A node id no longer refers to a live node (generation mismatch).
  #[error("Stale node id: index {index}, version {version}")]
  StaleNodeId { index: u32, version: u32 },

  /// Invalid layout constraints
  #[error("Invalid layout constraints: {message}")]
  InvalidConstraints { message: String },
}

/// Errors that occur during paragraph segmentation and line breaking.
#[derive(Error, Debug, Clone)]
pub enum TextError {
  /// The four interval partitions of a paragraph do not cover the same
  /// logical length.
  #[error("Partition coverage mismatch in paragraph: {message}")]
  PartitionMismatch { message: String },

  /// Line breaking failed
  #[error("Line breaking failed: {reason}")]
  LineBreakingFailed { reason: String },
}

/// Errors that occur during font mapping and identity resolution.
#[derive(Error, Debug, Clone)]
pub enum FontError {
  /// No font could be mapped, not even the reserved fallback.
  #[error("No font available for fallback list {list_id}")]
  NoFontAvailable { list_id: u32 },

  /// Font face data could not be parsed.
  #[error("Invalid font face: {reason}")]
  InvalidFace { reason: String },
}

/// Errors reported by the platform shaping backend.
///
/// Any of these aborts the whole `calc()` call. `InsufficientBuffer` is the
/// one exception: the shaping adapter retries it locally with doubled
/// scratch buffers and it never escapes to callers.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
  /// Script analysis failed
  #[error("Script analysis failed: {reason}")]
  ScriptAnalysisFailed { reason: String },

  /// Bidi analysis failed
  #[error("Bidi analysis failed: {reason}")]
  BidiAnalysisFailed { reason: String },

  /// Character-to-font mapping failed
  #[error("Character mapping failed at offset {offset}: {reason}")]
  MappingFailed { offset: usize, reason: String },

  /// Glyph generation failed
  #[error("Glyph generation failed: {reason}")]
  ShapingFailed { reason: String },

  /// Glyph placement failed
  #[error("Glyph placement failed: {reason}")]
  PlacementFailed { reason: String },

  /// The provided output buffers were too small. Retried internally by
  /// doubling; never user-visible.
  #[error("Insufficient buffer: need at least {needed} slots")]
  InsufficientBuffer { needed: usize },
}

thread_local! {
  static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Records `err` in the thread-local last-error slot and returns it.
pub(crate) fn record_last_error(err: Error) -> Error {
  LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(err.to_string()));
  err
}

/// Returns the message of the most recent failed `calc()` on this thread.
///
/// The slot is overwritten by each failure and cleared by
/// [`clear_last_error`]; successful passes leave it untouched.
pub fn last_error() -> Option<String> {
  LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Clears the thread-local last-error slot.
pub fn clear_last_error() {
  LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}
