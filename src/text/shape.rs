//! The shaping adapter: turns runs into paragraph-wide glyph buffers.
//!
//! Each shapeable run is handed to the backend with a fixed OpenType
//! feature set and the script/direction/locale resolved during
//! segmentation. Glyph output accumulates in flat per-paragraph buffers;
//! every run records its `[glyph_start, glyph_count)` window so later
//! stages never re-slice per run.
//!
//! Output buffer sizing is a negotiation: the adapter starts at roughly
//! 1.5x the run's character count and doubles (or jumps to the reported
//! need) whenever the backend answers `InsufficientBuffer`. The retry
//! never escapes this module.

use crate::error::{BackendError, Error, Result};
use crate::text::backend::{
  BidiRange, CharProps, Feature, FontFace, GlyphOffset, GlyphProps, ScriptRange, ShapingBackend, ShapingOptions,
};
use crate::text::paragraph::Paragraph;
use crate::text::segment::{FontRange, Run, StyleRange};

/// Features applied to every shaped run.
pub const DEFAULT_FEATURES: [Feature; 9] = [
  Feature { tag: *b"liga", value: 1 },
  Feature { tag: *b"rlig", value: 1 },
  Feature { tag: *b"clig", value: 1 },
  Feature { tag: *b"calt", value: 1 },
  Feature { tag: *b"locl", value: 1 },
  Feature { tag: *b"ccmp", value: 1 },
  Feature { tag: *b"mark", value: 1 },
  Feature { tag: *b"mkmk", value: 1 },
  Feature { tag: *b"kern", value: 1 },
];

/// Sentinel in the paragraph cluster map for characters of unshaped runs.
pub const NO_GLYPH: u32 = u32::MAX;

/// One run's window into the paragraph glyph buffers.
#[derive(Debug, Clone)]
pub struct RunShape {
  pub run: Run,
  pub glyph_start: usize,
  pub glyph_count: usize,
  /// Total advance width of the run in pixels.
  pub width: f32,
  pub font_size: f32,
  pub rtl: bool,
  /// The font the run shaped with; `None` for inline-block and unmapped
  /// runs, which produce no glyphs.
  pub font: Option<FontFace>,
}

/// Paragraph-wide shaping output.
///
/// All vectors indexed by glyph are parallel; `cluster_map` and
/// `char_props` and `char_advances` are parallel per character of the
/// paragraph's logical text.
#[derive(Debug, Clone, Default)]
pub struct ShapedParagraph {
  pub glyph_ids: Vec<u32>,
  pub glyph_props: Vec<GlyphProps>,
  pub advances: Vec<f32>,
  pub offsets: Vec<GlyphOffset>,
  /// Per character: index of the first glyph of its cluster, or
  /// [`NO_GLYPH`] when the run did not shape.
  pub cluster_map: Vec<u32>,
  pub char_props: Vec<CharProps>,
  /// Per character: the full advance of its cluster on its first
  /// character, 0 elsewhere. The line breaker accumulates these.
  pub char_advances: Vec<f32>,
  pub runs: Vec<RunShape>,
}

impl ShapedParagraph {
  /// Overrides the advance attributed to one logical position. Used for
  /// inline-block items once their box has been measured.
  pub fn set_char_advance(&mut self, pos: usize, advance: f32) {
    if let Some(slot) = self.char_advances.get_mut(pos) {
      *slot = advance;
    }
  }

  /// The run shape covering a logical position.
  pub fn run_at(&self, pos: usize) -> Option<&RunShape> {
    self.runs.iter().find(|r| r.run.start <= pos && pos < r.run.start + r.run.len)
  }
}

/// Initial output capacity for a run of `len` characters.
fn initial_capacity(len: usize) -> usize {
  len + len / 2 + 8
}

/// Shapes every run of one paragraph into flat buffers.
pub fn shape_paragraph(
  paragraph: &Paragraph,
  runs: &[Run],
  scripts: &[ScriptRange],
  bidi: &[BidiRange],
  fonts: &[FontRange],
  styles: &[StyleRange],
  locale: &str,
  backend: &dyn ShapingBackend,
) -> Result<ShapedParagraph> {
  let char_count = paragraph.logic_text_len;
  let chars: Vec<char> = paragraph.text.chars().collect();
  debug_assert_eq!(chars.len(), char_count);

  let mut shaped = ShapedParagraph {
    cluster_map: vec![NO_GLYPH; char_count],
    char_props: vec![
      CharProps {
        can_break_shaping_after: true,
      };
      char_count
    ],
    char_advances: vec![0.0; char_count],
    ..ShapedParagraph::default()
  };

  for run in runs {
    let font_range = &fonts[run.font_index];
    let style_range = &styles[run.style_index];
    let rtl = bidi[run.bidi_index].level & 1 == 1;

    let font = if font_range.is_inline_block {
      None
    } else {
      font_range.font.clone()
    };
    let Some(font) = font else {
      // Inline-block positions and unmappable spans contribute no
      // glyphs; their advances are patched in by the box measurer.
      shaped.runs.push(RunShape {
        run: *run,
        glyph_start: shaped.glyph_ids.len(),
        glyph_count: 0,
        width: 0.0,
        font_size: style_range.font_size,
        rtl,
        font: None,
      });
      continue;
    };

    let run_text: String = chars[run.start..run.start + run.len].iter().collect();
    let options = ShapingOptions {
      rtl,
      script: scripts[run.script_index].script,
      locale,
      features: &DEFAULT_FEATURES,
    };

    let mut cluster_map = vec![0u32; run.len];
    let mut char_props = vec![CharProps::default(); run.len];
    let mut capacity = initial_capacity(run.len);
    loop {
      let mut glyph_ids = vec![0u32; capacity];
      let mut glyph_props = vec![GlyphProps::default(); capacity];
      match backend.get_glyphs(
        &run_text,
        &font,
        &options,
        &mut cluster_map,
        &mut char_props,
        &mut glyph_ids,
        &mut glyph_props,
      ) {
        Ok(count) => {
          glyph_ids.truncate(count);
          glyph_props.truncate(count);
          let mut advances = vec![0.0f32; count];
          let mut offsets = vec![GlyphOffset::default(); count];
          backend.get_glyph_placements(
            &run_text,
            &font,
            style_range.font_size,
            &options,
            &cluster_map,
            &glyph_ids,
            &mut advances,
            &mut offsets,
          )?;
          // Synthetic scale from character mapping (bitmap-only faces):
          // all placement geometry is in the face's units and must be
          // brought to the requested size.
          if font_range.scale != 1.0 {
            for advance in advances.iter_mut() {
              *advance *= font_range.scale;
            }
            for offset in offsets.iter_mut() {
              offset.x *= font_range.scale;
              offset.y *= font_range.scale;
            }
          }
          let glyph_start = shaped.glyph_ids.len();
          let width: f32 = advances.iter().sum();

          append_run(
            &mut shaped,
            run,
            glyph_start,
            &cluster_map,
            &char_props,
            &advances,
          );
          shaped.glyph_ids.extend_from_slice(&glyph_ids);
          shaped.glyph_props.extend_from_slice(&glyph_props);
          shaped.advances.extend_from_slice(&advances);
          shaped.offsets.extend_from_slice(&offsets);
          shaped.runs.push(RunShape {
            run: *run,
            glyph_start,
            glyph_count: count,
            width,
            font_size: style_range.font_size,
            rtl,
            font: Some(font.clone()),
          });
          break;
        }
        Err(Error::Backend(BackendError::InsufficientBuffer { needed })) => {
          capacity = needed.max(capacity * 2);
        }
        Err(other) => return Err(other),
      }
    }
  }

  Ok(shaped)
}

/// Folds one run's local shaping output into the paragraph buffers.
fn append_run(
  shaped: &mut ShapedParagraph,
  run: &Run,
  glyph_start: usize,
  cluster_map: &[u32],
  char_props: &[CharProps],
  advances: &[f32],
) {
  // Rebase the char -> glyph map and copy shaping properties.
  for (local, &glyph) in cluster_map.iter().enumerate() {
    shaped.cluster_map[run.start + local] = glyph_start as u32 + glyph;
    shaped.char_props[run.start + local] = char_props[local];
  }

  // Attribute each cluster's advance to its first character. Cluster
  // starts are the characters whose mapped glyph differs from their
  // predecessor's; sorting the starts by glyph index yields each
  // cluster's glyph span in either text direction.
  let mut starts: Vec<(u32, usize)> = Vec::new();
  for local in 0..cluster_map.len() {
    let is_start = local == 0 || cluster_map[local] != cluster_map[local - 1];
    if is_start {
      starts.push((cluster_map[local], local));
    }
  }
  starts.sort_by_key(|&(glyph, _)| glyph);
  for (i, &(glyph, local)) in starts.iter().enumerate() {
    let end = starts
      .get(i + 1)
      .map(|&(next, _)| next as usize)
      .unwrap_or(advances.len());
    let total: f32 = advances[glyph as usize..end].iter().sum();
    shaped.char_advances[run.start + local] = total;
  }
}
