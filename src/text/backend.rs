//! The shaping backend contract and the default implementation.
//!
//! Everything platform-specific about text lives behind [`ShapingBackend`]:
//! script analysis, bidi analysis, line-break classification,
//! character-to-font mapping, glyph generation, and glyph placement. The
//! segmentation engine, shaping adapter, and line breaker consume only this
//! trait, so tests substitute deterministic backends and embedders can plug
//! in a platform shaper.
//!
//! Two implementations ship with the crate:
//!
//! - [`SystemBackend`]: rustybuzz shaping over embedder-registered font
//!   data, with unicode-bidi (UAX #9) and unicode-linebreak (UAX #14) for
//!   analysis. Parsed faces are cached in an LRU keyed by the underlying
//!   data pointer, so different handles to the same bytes share entries.
//! - [`MonospaceBackend`]: a deterministic fixed-advance backend with no
//!   font data at all, for tests and headless measurement.
//!
//! Glyph generation uses caller-provided output buffers and reports
//! [`BackendError::InsufficientBuffer`] when they are too small; the
//! shaping adapter retries with doubled buffers.

use crate::error::{BackendError, FontError, Result};
use crate::style::FontRequest;
use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use rustybuzz::{Direction as HbDirection, Face as HbFace, Language as HbLanguage, UnicodeBuffer};
use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Font face handle
// ============================================================================

/// A clonable shared-ownership handle to one face within a font blob.
///
/// Cloning the handle is the sole duplication path; the underlying data is
/// released exactly once when the last clone drops. Identity (for caches
/// and for run coalescing) is the data pointer plus the face index, not
/// the bytes.
#[derive(Debug, Clone)]
pub struct FontFace {
  data: Arc<Vec<u8>>,
  index: u32,
}

/// Cache/identity key of a [`FontFace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceKey {
  data_ptr: usize,
  index: u32,
}

impl FontFace {
  pub fn new(data: Arc<Vec<u8>>, index: u32) -> Self {
    Self { data, index }
  }

  #[inline]
  pub fn data(&self) -> &Arc<Vec<u8>> {
    &self.data
  }

  #[inline]
  pub fn index(&self) -> u32 {
    self.index
  }

  #[inline]
  pub fn key(&self) -> FaceKey {
    FaceKey {
      data_ptr: Arc::as_ptr(&self.data) as usize,
      index: self.index,
    }
  }
}

impl PartialEq for FontFace {
  fn eq(&self, other: &Self) -> bool {
    self.key() == other.key()
  }
}

impl Eq for FontFace {}

// ============================================================================
// Analysis outputs
// ============================================================================

/// Unicode script class, reduced to what itemization needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Script {
  /// Punctuation, digits, symbols; merges with neighbours.
  Common,
  /// Combining marks; merges with neighbours.
  Inherited,
  Unknown,
  #[default]
  Latin,
  Greek,
  Cyrillic,
  Arabic,
  Hebrew,
  Devanagari,
  Thai,
  Han,
  Hiragana,
  Katakana,
  Hangul,
}

impl Script {
  /// Detects the script of a character from Unicode block ranges.
  pub fn detect(c: char) -> Self {
    let cp = c as u32;
    match cp {
      0x0000..=0x007F => {
        if c.is_ascii_alphabetic() {
          Self::Latin
        } else {
          Self::Common
        }
      }
      0x0080..=0x024F | 0x1E00..=0x1EFF => Self::Latin,
      0x0300..=0x036F => Self::Inherited,
      0x0370..=0x03FF | 0x1F00..=0x1FFF => Self::Greek,
      0x0400..=0x052F => Self::Cyrillic,
      0x0590..=0x05FF | 0xFB1D..=0xFB4F => Self::Hebrew,
      0x0600..=0x06FF | 0x0750..=0x077F | 0xFB50..=0xFDFF | 0xFE70..=0xFEFF => Self::Arabic,
      0x0900..=0x097F => Self::Devanagari,
      0x0E00..=0x0E7F => Self::Thai,
      0x3040..=0x309F => Self::Hiragana,
      0x30A0..=0x30FF | 0x31F0..=0x31FF => Self::Katakana,
      0x1100..=0x11FF | 0x3130..=0x318F | 0xA960..=0xA97F | 0xAC00..=0xD7FF => Self::Hangul,
      0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x3134F => Self::Han,
      0x2000..=0x214F | 0x20A0..=0x20CF => Self::Common,
      _ => Self::Unknown,
    }
  }

  /// True for classes that merge with any surrounding script.
  #[inline]
  pub fn is_neutral(self) -> bool {
    matches!(self, Self::Common | Self::Inherited | Self::Unknown)
  }

  /// ISO 15924 conversion for the shaper; `None` means auto-detect.
  pub fn to_rustybuzz(self) -> Option<rustybuzz::Script> {
    let tag: Option<[u8; 4]> = match self {
      Self::Latin => Some(*b"Latn"),
      Self::Greek => Some(*b"Grek"),
      Self::Cyrillic => Some(*b"Cyrl"),
      Self::Arabic => Some(*b"Arab"),
      Self::Hebrew => Some(*b"Hebr"),
      Self::Devanagari => Some(*b"Deva"),
      Self::Thai => Some(*b"Thai"),
      Self::Han => Some(*b"Hani"),
      Self::Hiragana => Some(*b"Hira"),
      Self::Katakana => Some(*b"Kana"),
      Self::Hangul => Some(*b"Hang"),
      Self::Common | Self::Inherited | Self::Unknown => None,
    };
    tag.and_then(|t| {
      let tag = rustybuzz::ttf_parser::Tag::from_bytes(&t);
      rustybuzz::Script::from_iso15924_tag(tag)
    })
  }
}

/// A maximal run of characters sharing one script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptRange {
  /// Start offset in characters.
  pub start: usize,
  /// Length in characters.
  pub len: usize,
  pub script: Script,
}

/// A maximal run of characters sharing one resolved bidi level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidiRange {
  pub start: usize,
  pub len: usize,
  /// Resolved embedding level; odd levels are right-to-left.
  pub level: u8,
}

impl BidiRange {
  #[inline]
  pub fn is_rtl(&self) -> bool {
    self.level & 1 == 1
  }
}

/// Break opportunity class after one character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakClass {
  /// The line must break after this character.
  Must,
  /// The line can break after this character if wrapping.
  Can,
  /// No break after this character.
  No,
}

/// Result of one character-to-font mapping call.
#[derive(Debug, Clone)]
pub struct MappedChars {
  /// Number of characters (from the requested start) mapped to `font`.
  /// May be shorter than the requested length; callers re-query the
  /// remainder. Always at least 1.
  pub mapped_len: usize,
  /// The mapped font, or `None` when nothing in the list covers the
  /// leading character.
  pub font: Option<FontFace>,
  /// Synthetic scale to apply to the mapped font's advances (1.0 for
  /// outline faces).
  pub scale: f32,
}

// ============================================================================
// Shaping inputs and outputs
// ============================================================================

/// An OpenType feature toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feature {
  pub tag: [u8; 4],
  pub value: u32,
}

/// Per-run inputs to glyph generation and placement.
#[derive(Debug, Clone, Copy)]
pub struct ShapingOptions<'a> {
  pub rtl: bool,
  pub script: Script,
  /// BCP 47 language tag; empty means unspecified.
  pub locale: &'a str,
  pub features: &'a [Feature],
}

/// Per-character shaping properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharProps {
  /// True when the shaper can cleanly split after this character: the
  /// next character starts a fresh cluster. False across ligatures and
  /// multi-character clusters; splitting there needs a reshape.
  pub can_break_shaping_after: bool,
}

/// Per-glyph shaping properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlyphProps {
  /// True for the first glyph of each cluster.
  pub is_cluster_start: bool,
}

/// A glyph's offset from its pen position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlyphOffset {
  pub x: f32,
  pub y: f32,
}

// ============================================================================
// The backend contract
// ============================================================================

/// The platform text capability consumed by the pipeline.
///
/// All offsets and lengths are in characters of the analyzed text. Each
/// analysis method must return ranges that cover the input exactly, in
/// order, without gaps or overlaps.
pub trait ShapingBackend {
  /// Splits text into maximal same-script ranges. Neutral characters
  /// (punctuation, marks) merge into the surrounding script.
  fn analyze_script(&self, text: &str) -> Result<Vec<ScriptRange>>;

  /// Resolves bidi embedding levels (UAX #9) into maximal same-level
  /// ranges. `base_rtl` sets the paragraph base direction.
  fn analyze_bidi(&self, text: &str, base_rtl: bool) -> Result<Vec<BidiRange>>;

  /// Classifies the break opportunity after every character (UAX #14).
  /// The returned vector has exactly one entry per character.
  fn analyze_line_breakpoints(&self, text: &str) -> Result<Vec<BreakClass>>;

  /// Maps a prefix of `chars[start..start + len]` to one font from the
  /// request's registered fallback list. See [`MappedChars`].
  fn map_characters(&self, chars: &[char], start: usize, len: usize, request: &FontRequest) -> Result<MappedChars>;

  /// Generates glyphs for `text` with `font`.
  ///
  /// `cluster_map` and `char_props` must each hold exactly one slot per
  /// character. `glyph_ids` and `glyph_props` are output buffers whose
  /// length is the capacity; when the shaped result does not fit, the
  /// backend returns [`BackendError::InsufficientBuffer`] with the needed
  /// size and writes nothing. On success returns the glyph count.
  #[allow(clippy::too_many_arguments)]
  fn get_glyphs(
    &self,
    text: &str,
    font: &FontFace,
    options: &ShapingOptions<'_>,
    cluster_map: &mut [u32],
    char_props: &mut [CharProps],
    glyph_ids: &mut [u32],
    glyph_props: &mut [GlyphProps],
  ) -> Result<usize>;

  /// Computes advances and offsets for previously generated glyphs,
  /// scaled to `font_size` pixels. `advances` and `offsets` hold one
  /// slot per glyph.
  #[allow(clippy::too_many_arguments)]
  fn get_glyph_placements(
    &self,
    text: &str,
    font: &FontFace,
    font_size: f32,
    options: &ShapingOptions<'_>,
    cluster_map: &[u32],
    glyph_ids: &[u32],
    advances: &mut [f32],
    offsets: &mut [GlyphOffset],
  ) -> Result<()>;
}

// ============================================================================
// Shared analysis (backend-independent)
// ============================================================================

/// Script itemization over character offsets, shared by both backends.
///
/// Neutral characters inherit the current script; a leading neutral span
/// inherits the first strong script that follows (or Latin).
pub(crate) fn itemize_script(text: &str) -> Vec<ScriptRange> {
  let mut ranges: Vec<ScriptRange> = Vec::new();
  let mut current: Option<(usize, Script)> = None;
  let mut pos = 0usize;

  for c in text.chars() {
    let detected = Script::detect(c);
    match current {
      None => {
        current = Some((pos, detected));
      }
      Some((start, script)) => {
        let merged = if detected.is_neutral() {
          script
        } else if script.is_neutral() {
          // Leading neutrals adopt the first strong script.
          detected
        } else {
          detected
        };
        if !detected.is_neutral() && !script.is_neutral() && merged != script {
          ranges.push(ScriptRange {
            start,
            len: pos - start,
            script,
          });
          current = Some((pos, detected));
        } else {
          current = Some((start, merged));
        }
      }
    }
    pos += 1;
  }

  if let Some((start, script)) = current {
    let script = if script.is_neutral() { Script::Latin } else { script };
    ranges.push(ScriptRange {
      start,
      len: pos - start,
      script,
    });
  }
  ranges
}

pub(crate) fn itemize_bidi(text: &str, base_rtl: bool) -> Vec<BidiRange> {
  if text.is_empty() {
    return Vec::new();
  }
  let base = if base_rtl {
    unicode_bidi::Level::rtl()
  } else {
    unicode_bidi::Level::ltr()
  };
  let info = unicode_bidi::BidiInfo::new(text, Some(base));

  let mut ranges: Vec<BidiRange> = Vec::new();
  let mut pos = 0usize;
  for (byte_idx, _) in text.char_indices() {
    let level = info.levels.get(byte_idx).copied().unwrap_or(base).number();
    match ranges.last_mut() {
      Some(last) if last.level == level => last.len += 1,
      _ => ranges.push(BidiRange {
        start: pos,
        len: 1,
        level,
      }),
    }
    pos += 1;
  }
  ranges
}

pub(crate) fn classify_breakpoints(text: &str) -> Vec<BreakClass> {
  let char_count = text.chars().count();
  let mut classes = vec![BreakClass::No; char_count];
  if char_count == 0 {
    return classes;
  }

  // Byte offset of each character, for translating UAX #14 positions.
  let starts: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();

  for (byte_offset, opportunity) in unicode_linebreak::linebreaks(text) {
    // The algorithm always reports end-of-text; that is not a layout
    // break opportunity.
    if byte_offset >= text.len() {
      continue;
    }
    // The opportunity sits before `byte_offset`; attribute it to the
    // character ending there.
    let char_pos = match starts.binary_search(&byte_offset) {
      Ok(i) => i,
      Err(i) => i,
    };
    if char_pos == 0 {
      continue;
    }
    let idx = char_pos - 1;
    classes[idx] = match opportunity {
      unicode_linebreak::BreakOpportunity::Mandatory => BreakClass::Must,
      unicode_linebreak::BreakOpportunity::Allowed => BreakClass::Can,
    };
  }
  classes
}

// ============================================================================
// SystemBackend
// ============================================================================

/// Maximum number of parsed faces kept in memory at once.
const FACE_CACHE_SIZE: usize = 64;

struct CachedFace {
  // Keeps the transmuted face's data alive.
  _data: Arc<Vec<u8>>,
  face: ttf_parser::Face<'static>,
}

impl CachedFace {
  fn parse(handle: &FontFace) -> Result<Arc<Self>> {
    let data = Arc::clone(handle.data());
    // SAFETY: the Arc keeps the font data alive for the lifetime of the
    // cached face.
    let static_data: &'static [u8] = unsafe { std::mem::transmute::<&[u8], &'static [u8]>(data.as_slice()) };
    let face = ttf_parser::Face::parse(static_data, handle.index()).map_err(|e| FontError::InvalidFace {
      reason: e.to_string(),
    })?;
    Ok(Arc::new(Self { _data: data, face }))
  }
}

/// Metadata of one registered face, for request matching.
struct RegisteredFace {
  handle: FontFace,
  weight: u16,
  width: f32,
  italic: bool,
}

/// Key of the one-entry shape memo shared by `get_glyphs` and
/// `get_glyph_placements`, so placement does not re-run the shaper.
#[derive(PartialEq)]
struct ShapeMemoKey {
  face: FaceKey,
  text: String,
  rtl: bool,
  features: Vec<Feature>,
}

struct ShapeMemo {
  key: ShapeMemoKey,
  // Unscaled (font-unit) advances and offsets, one per glyph.
  advances: Vec<i32>,
  offsets: Vec<(i32, i32)>,
  units_per_em: u16,
}

/// The default backend: rustybuzz shaping over embedder-registered fonts.
///
/// Font data never comes from the system implicitly; the embedder
/// registers fallback lists of [`FontFace`] handles under the ids that
/// node styles reference.
pub struct SystemBackend {
  fallback_lists: FxHashMap<u32, Vec<RegisteredFace>>,
  faces: Mutex<LruCache<FaceKey, Arc<CachedFace>>>,
  shape_memo: RefCell<Option<ShapeMemo>>,
}

impl Default for SystemBackend {
  fn default() -> Self {
    Self::new()
  }
}

impl SystemBackend {
  pub fn new() -> Self {
    Self {
      fallback_lists: FxHashMap::default(),
      faces: Mutex::new(LruCache::new(NonZeroUsize::new(FACE_CACHE_SIZE).unwrap())),
      shape_memo: RefCell::new(None),
    }
  }

  /// Registers the faces of fallback list `list_id`, in priority order.
  /// Replaces any previous registration of the same id.
  pub fn register_fallback_list(&mut self, list_id: u32, faces: Vec<FontFace>) -> Result<()> {
    let mut registered = Vec::with_capacity(faces.len());
    for handle in faces {
      let parsed = self.cached_face(&handle)?;
      registered.push(RegisteredFace {
        weight: parsed.face.weight().to_number(),
        width: parsed.face.width().to_number() as f32,
        italic: parsed.face.is_italic(),
        handle,
      });
    }
    self.fallback_lists.insert(list_id, registered);
    Ok(())
  }

  fn cached_face(&self, handle: &FontFace) -> Result<Arc<CachedFace>> {
    let key = handle.key();
    if let Some(face) = self.faces.lock().get(&key) {
      return Ok(Arc::clone(face));
    }
    let parsed = CachedFace::parse(handle)?;
    self.faces.lock().put(key, Arc::clone(&parsed));
    Ok(parsed)
  }

  /// Distance of a registered face from a request; lower is better.
  fn match_score(face: &RegisteredFace, request: &FontRequest) -> f32 {
    let weight = (face.weight as f32 - request.weight as f32).abs();
    let width = (face.width - request.width).abs() * 4.0;
    let wants_slant = request.italic || request.clamped_oblique() != 0.0;
    let slant = if face.italic == wants_slant { 0.0 } else { 500.0 };
    weight + width + slant
  }

  fn shape_uncached(
    &self,
    text: &str,
    font: &FontFace,
    options: &ShapingOptions<'_>,
  ) -> Result<(Vec<rustybuzz::GlyphInfo>, Vec<rustybuzz::GlyphPosition>, u16)> {
    let face = self.cached_face(font)?;
    let hb_face = HbFace::from_slice(font.data().as_slice(), font.index()).ok_or_else(|| BackendError::ShapingFailed {
      reason: "face rejected by shaper".to_string(),
    })?;

    let mut buffer = UnicodeBuffer::new();
    buffer.push_str(text);
    buffer.set_direction(if options.rtl {
      HbDirection::RightToLeft
    } else {
      HbDirection::LeftToRight
    });
    if let Some(script) = options.script.to_rustybuzz() {
      buffer.set_script(script);
    }
    if !options.locale.is_empty() {
      if let Ok(lang) = HbLanguage::from_str(options.locale) {
        buffer.set_language(lang);
      }
    }
    // Monotone character clusters: no grapheme merging, so every cluster
    // value is the byte offset of some character in the input.
    buffer.set_cluster_level(rustybuzz::BufferClusterLevel::MonotoneCharacters);

    let features: Vec<rustybuzz::Feature> = options
      .features
      .iter()
      .map(|f| rustybuzz::Feature::new(rustybuzz::ttf_parser::Tag::from_bytes(&f.tag), f.value, ..))
      .collect();

    let output = rustybuzz::shape(&hb_face, &features, buffer);
    let infos = output.glyph_infos().to_vec();
    let positions = output.glyph_positions().to_vec();
    Ok((infos, positions, face.face.units_per_em()))
  }
}

impl ShapingBackend for SystemBackend {
  fn analyze_script(&self, text: &str) -> Result<Vec<ScriptRange>> {
    Ok(itemize_script(text))
  }

  fn analyze_bidi(&self, text: &str, base_rtl: bool) -> Result<Vec<BidiRange>> {
    Ok(itemize_bidi(text, base_rtl))
  }

  fn analyze_line_breakpoints(&self, text: &str) -> Result<Vec<BreakClass>> {
    Ok(classify_breakpoints(text))
  }

  fn map_characters(&self, chars: &[char], start: usize, len: usize, request: &FontRequest) -> Result<MappedChars> {
    debug_assert!(len > 0, "mapping a zero-length span");
    let span = &chars[start..start + len];
    let list = self.fallback_lists.get(&request.fallback_list);

    // Candidate faces closest to the request first.
    let mut candidates: Vec<&RegisteredFace> = list.map(|l| l.iter().collect()).unwrap_or_default();
    candidates.sort_by(|a, b| {
      Self::match_score(a, request)
        .partial_cmp(&Self::match_score(b, request))
        .unwrap_or(std::cmp::Ordering::Equal)
    });

    let first = span[0];
    for candidate in &candidates {
      let parsed = self.cached_face(&candidate.handle)?;
      if parsed.face.glyph_index(first).is_none() {
        continue;
      }
      // Extend over the covered prefix.
      let mut mapped = 1;
      while mapped < span.len() && parsed.face.glyph_index(span[mapped]).is_some() {
        mapped += 1;
      }
      return Ok(MappedChars {
        mapped_len: mapped,
        font: Some(candidate.handle.clone()),
        scale: 1.0,
      });
    }

    // Nothing covers the leading character: report the uncovered prefix
    // so the caller makes progress.
    let mut unmapped = 1;
    'outer: while unmapped < span.len() {
      for candidate in &candidates {
        let parsed = self.cached_face(&candidate.handle)?;
        if parsed.face.glyph_index(span[unmapped]).is_some() {
          break 'outer;
        }
      }
      unmapped += 1;
    }
    Ok(MappedChars {
      mapped_len: unmapped,
      font: None,
      scale: 1.0,
    })
  }

  fn get_glyphs(
    &self,
    text: &str,
    font: &FontFace,
    options: &ShapingOptions<'_>,
    cluster_map: &mut [u32],
    char_props: &mut [CharProps],
    glyph_ids: &mut [u32],
    glyph_props: &mut [GlyphProps],
  ) -> Result<usize> {
    let char_count = text.chars().count();
    debug_assert_eq!(cluster_map.len(), char_count);
    debug_assert_eq!(char_props.len(), char_count);

    let (infos, positions, units_per_em) = self.shape_uncached(text, font, options)?;
    if infos.len() > glyph_ids.len() || infos.len() > glyph_props.len() {
      return Err(BackendError::InsufficientBuffer { needed: infos.len() }.into());
    }

    // Record unscaled placements for the placement call.
    *self.shape_memo.borrow_mut() = Some(ShapeMemo {
      key: ShapeMemoKey {
        face: font.key(),
        text: text.to_string(),
        rtl: options.rtl,
        features: options.features.to_vec(),
      },
      advances: positions.iter().map(|p| p.x_advance).collect(),
      offsets: positions.iter().map(|p| (p.x_offset, p.y_offset)).collect(),
      units_per_em,
    });

    // Glyph outputs plus the char -> first-glyph-of-cluster map. Cluster
    // values are byte offsets of character starts; translate through the
    // char_indices table.
    let mut char_of_byte = FxHashMap::default();
    for (char_idx, (byte_idx, _)) in text.char_indices().enumerate() {
      char_of_byte.insert(byte_idx as u32, char_idx);
    }
    for slot in cluster_map.iter_mut() {
      *slot = u32::MAX;
    }
    let mut prev_cluster = u32::MAX;
    for (i, info) in infos.iter().enumerate() {
      glyph_ids[i] = info.glyph_id;
      let is_start = info.cluster != prev_cluster;
      glyph_props[i] = GlyphProps {
        is_cluster_start: is_start,
      };
      prev_cluster = info.cluster;
      let c = match char_of_byte.get(&info.cluster) {
        Some(&c) => c,
        None => continue,
      };
      if cluster_map[c] == u32::MAX {
        cluster_map[c] = i as u32;
      }
    }
    // Characters inside a cluster point at the cluster's first glyph.
    let mut last = 0u32;
    for slot in cluster_map.iter_mut() {
      if *slot == u32::MAX {
        *slot = last;
      } else {
        last = *slot;
      }
    }

    // A clean shaping split exists after char i when char i+1 starts a
    // cluster of its own.
    for i in 0..char_count {
      let here = cluster_map[i];
      let next = cluster_map.get(i + 1).copied();
      char_props[i] = CharProps {
        can_break_shaping_after: next.map_or(true, |n| n != here),
      };
    }

    Ok(infos.len())
  }

  fn get_glyph_placements(
    &self,
    text: &str,
    font: &FontFace,
    font_size: f32,
    options: &ShapingOptions<'_>,
    _cluster_map: &[u32],
    glyph_ids: &[u32],
    advances: &mut [f32],
    offsets: &mut [GlyphOffset],
  ) -> Result<()> {
    debug_assert!(advances.len() >= glyph_ids.len());
    debug_assert!(offsets.len() >= glyph_ids.len());

    let key = ShapeMemoKey {
      face: font.key(),
      text: text.to_string(),
      rtl: options.rtl,
      features: options.features.to_vec(),
    };

    let memo = self.shape_memo.borrow();
    let (unscaled_advances, unscaled_offsets, units_per_em) = match memo.as_ref() {
      Some(m) if m.key == key => (m.advances.clone(), m.offsets.clone(), m.units_per_em),
      _ => {
        drop(memo);
        let (_, positions, upem) = self.shape_uncached(text, font, options)?;
        if positions.len() != glyph_ids.len() {
          return Err(
            BackendError::PlacementFailed {
              reason: format!("glyph count changed: {} != {}", positions.len(), glyph_ids.len()),
            }
            .into(),
          );
        }
        (
          positions.iter().map(|p| p.x_advance).collect(),
          positions.iter().map(|p| (p.x_offset, p.y_offset)).collect(),
          upem,
        )
      }
    };

    let scale = font_size / units_per_em as f32;
    for i in 0..glyph_ids.len() {
      advances[i] = unscaled_advances[i] as f32 * scale;
      let (x, y) = unscaled_offsets[i];
      offsets[i] = GlyphOffset {
        x: x as f32 * scale,
        y: y as f32 * scale,
      };
    }
    Ok(())
  }
}

// ============================================================================
// MonospaceBackend
// ============================================================================

/// Deterministic fixed-advance backend for tests and headless use.
///
/// Every character shapes to one glyph advancing `advance_factor *
/// font_size` pixels. Distinct font requests resolve to distinct
/// synthetic [`FontFace`] identities, so coalescing and font-identity
/// behavior are observable without real font data.
pub struct MonospaceBackend {
  pub advance_factor: f32,
  fonts: RefCell<FxHashMap<(u32, u16, bool), FontFace>>,
  /// Characters no synthetic font covers; they map with `font: None`.
  unmapped: Vec<char>,
  /// Character pairs shaped into one cluster (a synthetic ligature);
  /// splitting between them requires a reshape.
  ligatures: Vec<(char, char)>,
}

impl Default for MonospaceBackend {
  fn default() -> Self {
    Self::new()
  }
}

impl MonospaceBackend {
  pub fn new() -> Self {
    Self {
      advance_factor: 0.5,
      fonts: RefCell::new(FxHashMap::default()),
      unmapped: Vec::new(),
      ligatures: Vec::new(),
    }
  }

  pub fn with_unmapped(mut self, chars: impl IntoIterator<Item = char>) -> Self {
    self.unmapped.extend(chars);
    self
  }

  pub fn with_ligature(mut self, a: char, b: char) -> Self {
    self.ligatures.push((a, b));
    self
  }

  fn font_for(&self, request: &FontRequest) -> FontFace {
    let key = (request.fallback_list, request.weight, request.italic);
    self
      .fonts
      .borrow_mut()
      .entry(key)
      .or_insert_with(|| {
        // Identity is the allocation, not the bytes.
        FontFace::new(Arc::new(vec![0u8; 4]), 0)
      })
      .clone()
  }

  fn is_ligature(&self, a: char, b: char) -> bool {
    self.ligatures.iter().any(|&(x, y)| x == a && y == b)
  }
}

impl ShapingBackend for MonospaceBackend {
  fn analyze_script(&self, text: &str) -> Result<Vec<ScriptRange>> {
    Ok(itemize_script(text))
  }

  fn analyze_bidi(&self, text: &str, base_rtl: bool) -> Result<Vec<BidiRange>> {
    Ok(itemize_bidi(text, base_rtl))
  }

  fn analyze_line_breakpoints(&self, text: &str) -> Result<Vec<BreakClass>> {
    Ok(classify_breakpoints(text))
  }

  fn map_characters(&self, chars: &[char], start: usize, len: usize, request: &FontRequest) -> Result<MappedChars> {
    debug_assert!(len > 0);
    let span = &chars[start..start + len];
    let covered = |c: char| !self.unmapped.contains(&c);

    if covered(span[0]) {
      let mut mapped = 1;
      while mapped < span.len() && covered(span[mapped]) {
        mapped += 1;
      }
      Ok(MappedChars {
        mapped_len: mapped,
        font: Some(self.font_for(request)),
        scale: 1.0,
      })
    } else {
      let mut unmapped = 1;
      while unmapped < span.len() && !covered(span[unmapped]) {
        unmapped += 1;
      }
      Ok(MappedChars {
        mapped_len: unmapped,
        font: None,
        scale: 1.0,
      })
    }
  }

  fn get_glyphs(
    &self,
    text: &str,
    _font: &FontFace,
    _options: &ShapingOptions<'_>,
    cluster_map: &mut [u32],
    char_props: &mut [CharProps],
    glyph_ids: &mut [u32],
    glyph_props: &mut [GlyphProps],
  ) -> Result<usize> {
    let chars: Vec<char> = text.chars().collect();
    debug_assert_eq!(cluster_map.len(), chars.len());
    debug_assert_eq!(char_props.len(), chars.len());

    // One glyph per cluster; ligated pairs collapse into one glyph.
    let mut glyph_count = 0usize;
    let mut i = 0usize;
    let mut clusters: Vec<(usize, usize)> = Vec::new();
    while i < chars.len() {
      let width = if i + 1 < chars.len() && self.is_ligature(chars[i], chars[i + 1]) {
        2
      } else {
        1
      };
      clusters.push((i, width));
      glyph_count += 1;
      i += width;
    }

    if glyph_count > glyph_ids.len() || glyph_count > glyph_props.len() {
      return Err(BackendError::InsufficientBuffer { needed: glyph_count }.into());
    }

    for (g, &(start, width)) in clusters.iter().enumerate() {
      glyph_ids[g] = chars[start] as u32;
      glyph_props[g] = GlyphProps {
        is_cluster_start: true,
      };
      for c in start..start + width {
        cluster_map[c] = g as u32;
        char_props[c] = CharProps {
          can_break_shaping_after: c + 1 >= start + width,
        };
      }
    }
    if let Some(last) = char_props.last_mut() {
      last.can_break_shaping_after = true;
    }
    Ok(glyph_count)
  }

  fn get_glyph_placements(
    &self,
    text: &str,
    _font: &FontFace,
    font_size: f32,
    _options: &ShapingOptions<'_>,
    cluster_map: &[u32],
    glyph_ids: &[u32],
    advances: &mut [f32],
    offsets: &mut [GlyphOffset],
  ) -> Result<()> {
    // A ligature glyph advances by the width of the characters it covers.
    let mut chars_per_glyph = vec![0usize; glyph_ids.len()];
    for &g in cluster_map {
      chars_per_glyph[g as usize] += 1;
    }
    let _ = text;
    for i in 0..glyph_ids.len() {
      advances[i] = self.advance_factor * font_size * chars_per_glyph[i] as f32;
      offsets[i] = GlyphOffset::default();
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_script_itemization_merges_neutrals() {
    let ranges = itemize_script("abc def");
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].script, Script::Latin);
    assert_eq!(ranges[0].len, 7);
  }

  #[test]
  fn test_script_itemization_splits_scripts() {
    let ranges = itemize_script("abcΔΕΖ");
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[0].script, Script::Latin);
    assert_eq!(ranges[0].len, 3);
    assert_eq!(ranges[1].script, Script::Greek);
    assert_eq!(ranges[1].len, 3);
  }

  #[test]
  fn test_script_ranges_cover_text() {
    let text = "hi שלום there";
    let ranges = itemize_script(text);
    let total: usize = ranges.iter().map(|r| r.len).sum();
    assert_eq!(total, text.chars().count());
    for pair in ranges.windows(2) {
      assert_eq!(pair[0].start + pair[0].len, pair[1].start);
    }
  }

  #[test]
  fn test_bidi_levels_split_rtl() {
    let ranges = itemize_bidi("abc שלום", false);
    let total: usize = ranges.iter().map(|r| r.len).sum();
    assert_eq!(total, 8);
    assert!(!ranges.first().unwrap().is_rtl());
    assert!(ranges.iter().any(|r| r.is_rtl()));
  }

  #[test]
  fn test_breakpoints_space_and_newline() {
    let classes = classify_breakpoints("ab cd\nef");
    // Break allowed after the space (index 2), mandatory after '\n'
    // (index 5), none elsewhere.
    assert_eq!(classes[2], BreakClass::Can);
    assert_eq!(classes[5], BreakClass::Must);
    assert_eq!(classes[0], BreakClass::No);
    assert_eq!(classes[7], BreakClass::No);
  }

  #[test]
  fn test_monospace_map_and_shape() {
    let backend = MonospaceBackend::new();
    let chars: Vec<char> = "hello".chars().collect();
    let request = FontRequest::default();
    let mapped = backend.map_characters(&chars, 0, chars.len(), &request).unwrap();
    assert_eq!(mapped.mapped_len, 5);
    let font = mapped.font.unwrap();

    let mut cluster_map = vec![0u32; 5];
    let mut char_props = vec![CharProps::default(); 5];
    let mut glyph_ids = vec![0u32; 8];
    let mut glyph_props = vec![GlyphProps::default(); 8];
    let options = ShapingOptions {
      rtl: false,
      script: Script::Latin,
      locale: "",
      features: &[],
    };
    let count = backend
      .get_glyphs("hello", &font, &options, &mut cluster_map, &mut char_props, &mut glyph_ids, &mut glyph_props)
      .unwrap();
    assert_eq!(count, 5);

    let mut advances = vec![0.0; count];
    let mut offsets = vec![GlyphOffset::default(); count];
    backend
      .get_glyph_placements("hello", &font, 10.0, &options, &cluster_map, &glyph_ids[..count], &mut advances, &mut offsets)
      .unwrap();
    assert!((advances.iter().sum::<f32>() - 25.0).abs() < 1e-4);
  }

  #[test]
  fn test_monospace_insufficient_buffer() {
    let backend = MonospaceBackend::new();
    let font = FontFace::new(Arc::new(vec![0u8]), 0);
    let mut cluster_map = vec![0u32; 5];
    let mut char_props = vec![CharProps::default(); 5];
    let mut glyph_ids = vec![0u32; 2];
    let mut glyph_props = vec![GlyphProps::default(); 2];
    let options = ShapingOptions {
      rtl: false,
      script: Script::Latin,
      locale: "",
      features: &[],
    };
    let err = backend
      .get_glyphs("hello", &font, &options, &mut cluster_map, &mut char_props, &mut glyph_ids, &mut glyph_props)
      .unwrap_err();
    assert!(err.to_string().contains("Insufficient buffer"));
  }

  #[test]
  fn test_monospace_ligature_blocks_shaping_split() {
    let backend = MonospaceBackend::new().with_ligature('f', 'i');
    let font = FontFace::new(Arc::new(vec![0u8]), 0);
    let text = "fin";
    let mut cluster_map = vec![0u32; 3];
    let mut char_props = vec![CharProps::default(); 3];
    let mut glyph_ids = vec![0u32; 4];
    let mut glyph_props = vec![GlyphProps::default(); 4];
    let options = ShapingOptions {
      rtl: false,
      script: Script::Latin,
      locale: "",
      features: &[],
    };
    let count = backend
      .get_glyphs(text, &font, &options, &mut cluster_map, &mut char_props, &mut glyph_ids, &mut glyph_props)
      .unwrap();
    assert_eq!(count, 2);
    assert_eq!(cluster_map, vec![0, 0, 1]);
    assert!(!char_props[0].can_break_shaping_after);
    assert!(char_props[1].can_break_shaping_after);
  }

  #[test]
  fn test_monospace_font_identity_stable_per_request() {
    let backend = MonospaceBackend::new();
    let chars: Vec<char> = "x".chars().collect();
    let regular = FontRequest::default();
    let bold = FontRequest {
      weight: 700,
      ..FontRequest::default()
    };
    let a = backend.map_characters(&chars, 0, 1, &regular).unwrap().font.unwrap();
    let b = backend.map_characters(&chars, 0, 1, &regular).unwrap().font.unwrap();
    let c = backend.map_characters(&chars, 0, 1, &bold).unwrap().font.unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn test_monospace_unmapped_prefix() {
    let backend = MonospaceBackend::new().with_unmapped(['\u{1F600}']);
    let chars: Vec<char> = "\u{1F600}\u{1F600}ok".chars().collect();
    let mapped = backend
      .map_characters(&chars, 0, chars.len(), &FontRequest::default())
      .unwrap();
    assert_eq!(mapped.mapped_len, 2);
    assert!(mapped.font.is_none());
  }
}
