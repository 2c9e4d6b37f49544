//! Greedy line breaking over shaped runs.
//!
//! A [`LineBreaker`] walks one run's characters, accumulating cluster
//! advances and consulting the paragraph's break-opportunity table. It is
//! a forward-only pull iterator: spans come out lazily, nothing is
//! buffered, and a consumed breaker cannot be restarted - callers create
//! a fresh one (and a fresh [`BreakContext`]) to re-break at a different
//! width.
//!
//! The context lives outside the breaker so an unfinished line carries
//! across run boundaries: breaking a paragraph means running one breaker
//! per run in logical order against the same context, with `is_last` set
//! on the final run to flush the open line.

use crate::text::backend::BreakClass;
use crate::text::shape::ShapedParagraph;

/// Carry-over state of the line being assembled.
///
/// One context spans all runs of a paragraph; line numbers and the open
/// line's start offset and width survive run boundaries.
#[derive(Debug, Clone, Default)]
pub struct BreakContext {
  pub line_number: u32,
  /// Logical start of the in-progress line.
  pub line_start: usize,
  /// Width accumulated on the in-progress line so far.
  pub line_width: f32,
  /// Best break opportunity on the open line: (position, width up to it).
  candidate: Option<(usize, f32)>,
}

impl BreakContext {
  pub fn new() -> Self {
    Self::default()
  }
}

/// One emitted line span, `[start, end)` in paragraph logical offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSpan {
  pub start: usize,
  pub end: usize,
  pub width: f32,
  pub line_number: u32,
  /// True when the span boundary falls inside a shaping cluster; the
  /// consumer must reshape the split pieces before placement is valid.
  pub needs_reshape: bool,
  /// True when the span ended at a mandatory break.
  pub hard_break: bool,
}

/// Breaks one run against an available width.
pub struct LineBreaker<'a> {
  ctx: &'a mut BreakContext,
  shaped: &'a ShapedParagraph,
  /// Paragraph-wide break classes, one per character.
  breaks: &'a [BreakClass],
  run_end: usize,
  /// Width limit; `f32::INFINITY` under max-content or with wrapping off.
  available: f32,
  wrap: bool,
  /// Flush the open line when this run is exhausted.
  is_last: bool,
  pos: usize,
  finished: bool,
}

impl<'a> LineBreaker<'a> {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    ctx: &'a mut BreakContext,
    shaped: &'a ShapedParagraph,
    breaks: &'a [BreakClass],
    run_start: usize,
    run_end: usize,
    available: f32,
    wrap: bool,
    is_last: bool,
  ) -> Self {
    debug_assert!(run_start <= run_end);
    debug_assert!(breaks.len() >= run_end);
    Self {
      ctx,
      shaped,
      breaks,
      run_end,
      available: if wrap { available } else { f32::INFINITY },
      wrap,
      is_last,
      pos: run_start,
      finished: false,
    }
  }

  /// Whether splitting before `end` falls inside a shaping cluster.
  fn boundary_needs_reshape(&self, end: usize) -> bool {
    end
      .checked_sub(1)
      .and_then(|i| self.shaped.char_props.get(i))
      .map_or(false, |p| !p.can_break_shaping_after)
  }

  fn emit(&mut self, end: usize, width: f32, hard_break: bool) -> LineSpan {
    let span = LineSpan {
      start: self.ctx.line_start,
      end,
      width,
      line_number: self.ctx.line_number,
      needs_reshape: !hard_break && self.boundary_needs_reshape(end),
      hard_break,
    };
    self.ctx.line_number += 1;
    self.ctx.line_start = end;
    self.ctx.line_width -= width;
    if self.ctx.line_width < 0.0 {
      self.ctx.line_width = 0.0;
    }
    self.ctx.candidate = None;
    span
  }
}

impl Iterator for LineBreaker<'_> {
  type Item = LineSpan;

  fn next(&mut self) -> Option<LineSpan> {
    if self.finished {
      return None;
    }

    while self.pos < self.run_end {
      let pos = self.pos;
      self.pos += 1;

      self.ctx.line_width += self.shaped.char_advances[pos];

      match self.breaks[pos] {
        BreakClass::Must => {
          // Mandatory breaks always emit, wrapping or not.
          let width = self.ctx.line_width;
          return Some(self.emit(pos + 1, width, true));
        }
        BreakClass::Can if self.wrap => {
          self.ctx.candidate = Some((pos + 1, self.ctx.line_width));
        }
        _ => {}
      }

      if self.wrap && self.ctx.line_width > self.available {
        if let Some((cpos, cwidth)) = self.ctx.candidate {
          // Only opportunities strictly before the cursor are usable; one
          // recorded at the cursor itself is taken on the next character.
          if cpos > self.ctx.line_start && cpos <= pos {
            return Some(self.emit(cpos, cwidth, false));
          }
        }
        // No usable opportunity yet: the line overflows until one shows
        // up (long unbreakable word).
      }
    }

    self.finished = true;
    if self.is_last && self.ctx.line_start < self.run_end {
      let width = self.ctx.line_width;
      return Some(self.emit(self.run_end, width, false));
    }
    None
  }
}
