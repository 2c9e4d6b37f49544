//! Paragraph segmentation: the four interval partitions and their merge.
//!
//! An inline paragraph's logical text is partitioned four independent
//! ways - script, bidi level, mapped font, and style - and the partitions
//! are then refined into [`Run`]s, the unit handed to the shaping adapter.
//! Every partition covers `[0, logic_text_len)` exactly; a coverage
//! mismatch between them is a contract violation reported as
//! [`TextError::PartitionMismatch`].

use crate::error::{Result, TextError};
use crate::style::{FontRequest, TextOrientation};
use crate::text::backend::{BidiRange, FontFace, ScriptRange, ShapingBackend};
use crate::text::paragraph::{ItemKind, Paragraph};

/// Character used to probe a fallback list for its undefined-glyph font.
const FALLBACK_PROBE: char = ' ';

/// A maximal span of paragraph text mapped to one font.
#[derive(Debug, Clone)]
pub struct FontRange {
  pub start: usize,
  pub len: usize,
  /// The mapped font; `None` when the fallback list covers nothing here
  /// and the undefined-glyph probe also failed.
  pub font: Option<FontFace>,
  pub scale: f32,
  /// True for the single-position range of an inline-block or block item.
  /// Such ranges never merge with neighbours and are not shaped.
  pub is_inline_block: bool,
}

/// A maximal span of paragraph text with uniform text style.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleRange {
  pub start: usize,
  pub len: usize,
  pub font_size: f32,
  pub orientation: TextOrientation,
}

/// One shaping unit: the intersection of the four partitions.
///
/// Runs are ordered, contiguous, and cover the paragraph text exactly.
/// Each index points into the partition vector the run was refined from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
  pub start: usize,
  pub len: usize,
  pub script_index: usize,
  pub bidi_index: usize,
  pub font_index: usize,
  pub style_index: usize,
}

/// Fields of a font request that decide mapping-group identity.
fn same_request(a: &FontRequest, b: &FontRequest) -> bool {
  a.fallback_list == b.fallback_list
    && a.weight == b.weight
    && a.width == b.width
    && a.italic == b.italic
    && a.clamped_oblique() == b.clamped_oblique()
}

fn can_merge(a: &FontRange, b: &FontRange) -> bool {
  if a.is_inline_block || b.is_inline_block {
    return false;
  }
  a.scale == b.scale
    && match (&a.font, &b.font) {
      (Some(x), Some(y)) => x == y,
      (None, None) => true,
      _ => false,
    }
}

fn merge_forward(ranges: Vec<FontRange>) -> Vec<FontRange> {
  let mut out: Vec<FontRange> = Vec::with_capacity(ranges.len());
  for r in ranges {
    match out.last_mut() {
      Some(last) if can_merge(last, &r) => last.len += r.len,
      _ => out.push(r),
    }
  }
  out
}

fn merge_backward(mut ranges: Vec<FontRange>) -> Vec<FontRange> {
  let mut i = ranges.len();
  while i > 1 {
    i -= 1;
    if can_merge(&ranges[i - 1], &ranges[i]) {
      let absorbed = ranges.remove(i);
      ranges[i - 1].len += absorbed.len;
    }
  }
  ranges
}

/// Builds the font partition of one paragraph.
///
/// Consecutive text items with an identical font request form one mapping
/// group; each group is consumed by repeated `map_characters` calls until
/// covered. Inline-block and block items contribute a one-position range
/// that is opaque to coalescing. Afterward, zero-length ranges are
/// dropped, adjacent same-font ranges merge (one forward and one backward
/// pass), and unmapped ranges resolve to the owner's cached
/// undefined-glyph font, probed once per text layout.
pub fn build_font_ranges(
  paragraph: &Paragraph,
  backend: &dyn ShapingBackend,
  fallback_font: &mut Option<FontFace>,
) -> Result<Vec<FontRange>> {
  let chars: Vec<char> = paragraph.text.chars().collect();
  let mut raw: Vec<FontRange> = Vec::new();

  let mut i = 0usize;
  while i < paragraph.items.len() {
    let item = &paragraph.items[i];
    if !item.is_text() {
      debug_assert!(matches!(
        item.kind,
        ItemKind::InlineBlock { .. } | ItemKind::Block { .. }
      ));
      raw.push(FontRange {
        start: item.logic_text_start,
        len: 1,
        font: None,
        scale: 1.0,
        is_inline_block: true,
      });
      i += 1;
      continue;
    }

    // Extend the mapping group over items sharing the font request.
    let request = paragraph.scope_spans[i].style.font;
    let group_start = item.logic_text_start;
    let mut group_end = group_start + item.logic_len();
    let mut j = i + 1;
    while j < paragraph.items.len()
      && paragraph.items[j].is_text()
      && same_request(&paragraph.scope_spans[j].style.font, &request)
    {
      group_end = paragraph.items[j].logic_text_start + paragraph.items[j].logic_len();
      j += 1;
    }
    i = j;

    let mut pos = group_start;
    while pos < group_end {
      let mapped = backend.map_characters(&chars, pos, group_end - pos, &request)?;
      debug_assert!(mapped.mapped_len > 0, "mapping must make progress");
      let len = mapped.mapped_len.max(1).min(group_end - pos);
      raw.push(FontRange {
        start: pos,
        len,
        font: mapped.font,
        scale: mapped.scale,
        is_inline_block: false,
      });
      pos += len;
    }
  }

  // Zero-length ranges are dropped before any merging.
  raw.retain(|r| r.len > 0);

  let mut ranges = merge_forward(raw);

  // Unmapped spans render with the list's undefined-glyph font, probed
  // once and cached on the owning text layout.
  for range in ranges.iter_mut() {
    if range.font.is_some() || range.is_inline_block {
      continue;
    }
    if fallback_font.is_none() {
      let request = font_request_at(paragraph, range.start).unwrap_or_default();
      let probe = [FALLBACK_PROBE];
      if let Ok(mapped) = backend.map_characters(&probe, 0, 1, &request) {
        *fallback_font = mapped.font;
      }
    }
    range.font = fallback_font.clone();
  }

  // Fallback resolution can create new same-font adjacencies; the
  // backward pass catches them.
  Ok(merge_backward(ranges))
}

/// Font request governing the given logical position.
fn font_request_at(paragraph: &Paragraph, pos: usize) -> Option<FontRequest> {
  paragraph
    .scope_spans
    .iter()
    .find(|s| s.start <= pos && pos < s.end)
    .map(|s| s.style.font)
}

/// Builds the style partition from the paragraph's scope spans.
///
/// Adjacent spans fold together unless the font size or orientation
/// differs, or the span's scope carried box edges (such scopes always
/// start a fresh range so edge extents attach to a range boundary).
pub fn build_style_ranges(paragraph: &Paragraph) -> Vec<StyleRange> {
  let mut ranges: Vec<StyleRange> = Vec::new();
  for span in &paragraph.scope_spans {
    if span.end <= span.start {
      continue;
    }
    let style = &span.style;
    let splits = style.has_box_edges;
    match ranges.last_mut() {
      Some(last)
        if !splits && last.font_size == style.font_size && last.orientation == style.orientation =>
      {
        last.len += span.end - span.start;
      }
      _ => ranges.push(StyleRange {
        start: span.start,
        len: span.end - span.start,
        font_size: style.font_size,
        orientation: style.orientation,
      }),
    }
  }
  ranges
}

fn partition_len(label: &str, total: usize, expected: usize) -> Result<()> {
  if total != expected {
    return Err(
      TextError::PartitionMismatch {
        message: format!("{} ranges end at {}, expected {}", label, total, expected),
      }
      .into(),
    );
  }
  Ok(())
}

/// Refines the four partitions into runs by walking all of them with one
/// cursor and cutting at the nearest range end.
///
/// Each emitted run lies inside exactly one range of every partition. The
/// partitions must all cover `expected_len`.
pub fn collect_runs(
  scripts: &[ScriptRange],
  bidi: &[BidiRange],
  fonts: &[FontRange],
  styles: &[StyleRange],
  expected_len: usize,
) -> Result<Vec<Run>> {
  partition_len("script", scripts.iter().map(|r| r.len).sum(), expected_len)?;
  partition_len("bidi", bidi.iter().map(|r| r.len).sum(), expected_len)?;
  partition_len("font", fonts.iter().map(|r| r.len).sum(), expected_len)?;
  partition_len("style", styles.iter().map(|r| r.len).sum(), expected_len)?;

  let mut runs = Vec::new();
  let (mut si, mut bi, mut fi, mut yi) = (0usize, 0usize, 0usize, 0usize);
  let mut cursor = 0usize;

  while cursor < expected_len {
    let ends = [
      scripts[si].start + scripts[si].len,
      bidi[bi].start + bidi[bi].len,
      fonts[fi].start + fonts[fi].len,
      styles[yi].start + styles[yi].len,
    ];
    let next = *ends.iter().min().expect("four partitions");
    debug_assert!(next > cursor, "partitions must advance the cursor");

    runs.push(Run {
      start: cursor,
      len: next - cursor,
      script_index: si,
      bidi_index: bi,
      font_index: fi,
      style_index: yi,
    });

    cursor = next;
    if ends[0] == next {
      si += 1;
    }
    if ends[1] == next {
      bi += 1;
    }
    if ends[2] == next {
      fi += 1;
    }
    if ends[3] == next {
      yi += 1;
    }
  }

  debug_assert_eq!(si, scripts.len());
  debug_assert_eq!(bi, bidi.len());
  debug_assert_eq!(fi, fonts.len());
  debug_assert_eq!(yi, styles.len());
  Ok(runs)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::style::NodeStyle;
  use crate::text::backend::{MonospaceBackend, Script};
  use crate::text::paragraph::{ScopeStyle, TextLayout};
  use crate::tree::node::{NodeId, NodeKind};

  fn nid(index: u32, kind: NodeKind) -> NodeId {
    NodeId {
      index,
      version: 1,
      kind,
    }
  }

  fn scope(style: &NodeStyle) -> ScopeStyle {
    ScopeStyle::from_node_style(style)
  }

  fn inline_paragraph(build: impl FnOnce(&mut TextLayout)) -> TextLayout {
    let mut layout = TextLayout::new();
    layout.begin_build(scope(&NodeStyle::default()));
    build(&mut layout);
    layout.finalize_build();
    layout
  }

  #[test]
  fn test_same_request_items_coalesce_into_one_range() {
    let layout = inline_paragraph(|l| {
      l.append_text_item(nid(0, NodeKind::Text), 0, "Hello ");
      l.append_text_item(nid(1, NodeKind::Text), 0, "World");
    });
    let backend = MonospaceBackend::new();
    let mut fallback = None;
    let ranges = build_font_ranges(&layout.paragraphs[0], &backend, &mut fallback).unwrap();
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].start, 0);
    assert_eq!(ranges[0].len, 11);
    assert!(ranges[0].font.is_some());
  }

  #[test]
  fn test_different_weight_splits_font_ranges() {
    let bold = NodeStyle {
      font: FontRequest {
        weight: 700,
        ..FontRequest::default()
      },
      ..NodeStyle::default()
    };
    let layout = inline_paragraph(|l| {
      l.append_text_item(nid(0, NodeKind::Text), 0, "Hello ");
      l.push_scope(scope(&bold));
      l.append_text_item(nid(1, NodeKind::Text), 0, "World");
      l.pop_scope();
    });
    let backend = MonospaceBackend::new();
    let mut fallback = None;
    let ranges = build_font_ranges(&layout.paragraphs[0], &backend, &mut fallback).unwrap();
    assert_eq!(ranges.len(), 2);
    assert_eq!((ranges[0].start, ranges[0].len), (0, 6));
    assert_eq!((ranges[1].start, ranges[1].len), (6, 5));
    assert_ne!(ranges[0].font, ranges[1].font);
  }

  #[test]
  fn test_inline_block_range_is_opaque() {
    let layout = inline_paragraph(|l| {
      l.append_text_item(nid(0, NodeKind::Text), 0, "ab");
      l.append_inline_block(nid(1, NodeKind::View));
      l.append_text_item(nid(2, NodeKind::Text), 0, "cd");
    });
    let backend = MonospaceBackend::new();
    let mut fallback = None;
    let ranges = build_font_ranges(&layout.paragraphs[0], &backend, &mut fallback).unwrap();
    assert_eq!(ranges.len(), 3);
    assert!(ranges[1].is_inline_block);
    assert_eq!((ranges[1].start, ranges[1].len), (2, 1));
    // Text on either side does not merge across the box.
    assert_eq!((ranges[0].start, ranges[0].len), (0, 2));
    assert_eq!((ranges[2].start, ranges[2].len), (3, 2));
  }

  #[test]
  fn test_unmapped_span_gets_fallback_font() {
    let layout = inline_paragraph(|l| {
      l.append_text_item(nid(0, NodeKind::Text), 0, "a\u{1F600}b");
    });
    let backend = MonospaceBackend::new().with_unmapped(['\u{1F600}']);
    let mut fallback = None;
    let ranges = build_font_ranges(&layout.paragraphs[0], &backend, &mut fallback).unwrap();
    // The probe resolves the undefined-glyph font, and since it is the
    // same synthetic face the backward pass merges everything back.
    assert_eq!(ranges.len(), 1);
    assert!(ranges[0].font.is_some());
    assert!(fallback.is_some());
  }

  #[test]
  fn test_style_ranges_fold_equal_styles() {
    let layout = inline_paragraph(|l| {
      l.append_text_item(nid(0, NodeKind::Text), 0, "one");
      l.append_text_item(nid(1, NodeKind::Text), 0, "two");
    });
    let ranges = build_style_ranges(&layout.paragraphs[0]);
    assert_eq!(ranges.len(), 1);
    assert_eq!((ranges[0].start, ranges[0].len), (0, 6));
  }

  #[test]
  fn test_style_ranges_split_on_font_size() {
    let big = NodeStyle {
      font_size: 32.0,
      ..NodeStyle::default()
    };
    let layout = inline_paragraph(|l| {
      l.append_text_item(nid(0, NodeKind::Text), 0, "one");
      l.push_scope(scope(&big));
      l.append_text_item(nid(1, NodeKind::Text), 0, "two");
      l.pop_scope();
    });
    let ranges = build_style_ranges(&layout.paragraphs[0]);
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[1].font_size, 32.0);
  }

  #[test]
  fn test_box_edge_scope_starts_fresh_style_range() {
    let padded = {
      let mut s = NodeStyle::default();
      s.paddings.left = 4.0;
      s
    };
    let layout = inline_paragraph(|l| {
      l.append_text_item(nid(0, NodeKind::Text), 0, "one");
      l.push_scope(scope(&padded));
      l.append_text_item(nid(1, NodeKind::Text), 0, "two");
      l.pop_scope();
    });
    let ranges = build_style_ranges(&layout.paragraphs[0]);
    assert_eq!(ranges.len(), 2, "box edges force a range boundary");
    assert_eq!(ranges[0].font_size, ranges[1].font_size);
  }

  #[test]
  fn test_collect_runs_refines_at_every_boundary() {
    let scripts = vec![ScriptRange {
      start: 0,
      len: 10,
      script: Script::Latin,
    }];
    let bidi = vec![
      BidiRange {
        start: 0,
        len: 4,
        level: 0,
      },
      BidiRange {
        start: 4,
        len: 6,
        level: 1,
      },
    ];
    let fonts = vec![
      FontRange {
        start: 0,
        len: 7,
        font: None,
        scale: 1.0,
        is_inline_block: false,
      },
      FontRange {
        start: 7,
        len: 3,
        font: None,
        scale: 1.0,
        is_inline_block: false,
      },
    ];
    let styles = vec![StyleRange {
      start: 0,
      len: 10,
      font_size: 16.0,
      orientation: TextOrientation::Horizontal,
    }];

    let runs = collect_runs(&scripts, &bidi, &fonts, &styles, 10).unwrap();
    let bounds: Vec<(usize, usize)> = runs.iter().map(|r| (r.start, r.len)).collect();
    assert_eq!(bounds, vec![(0, 4), (4, 3), (7, 3)]);
    assert_eq!(runs[1].bidi_index, 1);
    assert_eq!(runs[2].font_index, 1);
    let total: usize = runs.iter().map(|r| r.len).sum();
    assert_eq!(total, 10);
  }

  #[test]
  fn test_collect_runs_rejects_partition_mismatch() {
    let scripts = vec![ScriptRange {
      start: 0,
      len: 9,
      script: Script::Latin,
    }];
    let bidi = vec![BidiRange {
      start: 0,
      len: 10,
      level: 0,
    }];
    let fonts = vec![FontRange {
      start: 0,
      len: 10,
      font: None,
      scale: 1.0,
      is_inline_block: false,
    }];
    let styles = vec![StyleRange {
      start: 0,
      len: 10,
      font_size: 16.0,
      orientation: TextOrientation::Horizontal,
    }];
    let err = collect_runs(&scripts, &bidi, &fonts, &styles, 10).unwrap_err();
    assert!(err.to_string().contains("Partition coverage mismatch"));
  }
}
