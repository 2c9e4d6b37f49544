//! End-to-end pipeline tests over the public API, using the
//! deterministic monospace backend.

use reflow::error::{clear_last_error, last_error, BackendError, Result};
use reflow::layout::collect::run_phase1;
use reflow::layout::dirty::run_phase0;
use reflow::layout::LayoutContext;
use reflow::style::{ContainerKind, FlowMode, FontRequest, NodeStyle, WrapMode};
use reflow::text::backend::{
  BidiRange, BreakClass, CharProps, FontFace, GlyphOffset, GlyphProps, MappedChars, ScriptRange, ShapingBackend,
  ShapingOptions,
};
use reflow::text::segment::{build_font_ranges, build_style_ranges, collect_runs};
use reflow::text::{FontIdCache, MonospaceBackend};
use reflow::{NodeTree, Size};

fn text_container() -> NodeStyle {
  NodeStyle {
    container: ContainerKind::Text,
    ..NodeStyle::default()
  }
}

fn context() -> LayoutContext {
  LayoutContext::new(Box::new(MonospaceBackend::new()))
}

#[test]
fn test_text_edit_invalidates_and_remeasures() {
  let mut ctx = context();
  let root = ctx.tree.create_root(text_container());
  let text = ctx.tree.create_text("short");
  ctx.tree.add_child(root, text).unwrap();
  ctx.calc().unwrap();
  let before = ctx.layout_of(root).unwrap();

  ctx.tree.set_text(text, "a considerably longer content string").unwrap();
  ctx.tree.mark_text_dirty(root).unwrap();
  ctx.calc().unwrap();
  let after = ctx.layout_of(root).unwrap();

  assert!(after.content_width > before.content_width);
}

#[test]
fn test_nested_container_edit_refreshes_owner_paragraphs() {
  let mut ctx = context();
  let owner = ctx.tree.create_root(text_container());
  let nested = ctx.tree.create_view(NodeStyle {
    flow: FlowMode::Inline,
    container: ContainerKind::Text,
    ..NodeStyle::default()
  });
  let text = ctx.tree.create_text("old");
  ctx.tree.add_child(owner, nested).unwrap();
  ctx.tree.add_child(nested, text).unwrap();
  ctx.calc().unwrap();
  {
    let layout = ctx.tree.element(owner).unwrap().common.text_layout.as_deref().unwrap();
    assert_eq!(layout.paragraphs[0].text, "old");
  }

  // Marking only the nested transparent container must still refresh the
  // owner, whose paragraphs hold the nested content.
  ctx.tree.set_text(text, "replacement").unwrap();
  ctx.tree.mark_text_dirty(nested).unwrap();
  ctx.calc().unwrap();

  let layout = ctx.tree.element(owner).unwrap().common.text_layout.as_deref().unwrap();
  assert_eq!(layout.paragraphs[0].text, "replacement");
  // The nested container flows into the owner; it never grows a layout
  // object of its own.
  assert!(ctx.tree.element(nested).unwrap().common.text_layout.is_none());
}

#[test]
fn test_phase0_converges_after_one_pass() {
  let mut ctx = context();
  let root = ctx.tree.create_root(text_container());
  let text = ctx.tree.create_text("content");
  ctx.tree.add_child(root, text).unwrap();

  let first = run_phase0(&mut ctx.tree, root);
  assert!(first.visited >= 1);
  run_phase1(&mut ctx.tree, root).unwrap();

  let second = run_phase0(&mut ctx.tree, root);
  assert_eq!(second.visited, 0);
  assert_eq!(second.cache_clears, 0);
}

#[test]
fn test_two_font_requests_make_two_runs() {
  let mut tree = NodeTree::new();
  let root = tree.create_root(text_container());
  let plain = tree.create_text("Hello ");
  let bold_scope = tree.create_view(NodeStyle {
    flow: FlowMode::Inline,
    font: FontRequest {
      weight: 700,
      ..FontRequest::default()
    },
    ..NodeStyle::default()
  });
  let bold = tree.create_text("World");
  tree.add_child(root, plain).unwrap();
  tree.add_child(root, bold_scope).unwrap();
  tree.add_child(bold_scope, bold).unwrap();

  run_phase0(&mut tree, root);
  run_phase1(&mut tree, root).unwrap();

  let layout = tree.element(root).unwrap().common.text_layout.as_deref().unwrap();
  let paragraph = &layout.paragraphs[0];
  assert_eq!(paragraph.text, "Hello World");

  let backend = MonospaceBackend::new();
  let scripts = backend.analyze_script(&paragraph.text).unwrap();
  let bidi = backend.analyze_bidi(&paragraph.text, false).unwrap();
  let mut fallback = None;
  let fonts = build_font_ranges(paragraph, &backend, &mut fallback).unwrap();
  let styles = build_style_ranges(paragraph);

  assert_eq!(fonts.len(), 2, "distinct font requests split the partition");

  // Every partition covers the full logical text.
  let expected = paragraph.logic_text_len;
  assert_eq!(scripts.iter().map(|r| r.len).sum::<usize>(), expected);
  assert_eq!(bidi.iter().map(|r| r.len).sum::<usize>(), expected);
  assert_eq!(fonts.iter().map(|r| r.len).sum::<usize>(), expected);
  assert_eq!(styles.iter().map(|r| r.len).sum::<usize>(), expected);

  let runs = collect_runs(&scripts, &bidi, &fonts, &styles, expected).unwrap();
  assert_eq!(runs.len(), 2);
  assert_eq!(runs.iter().map(|r| r.len).sum::<usize>(), expected);
}

#[test]
fn test_wrap_splits_at_opportunity_nowrap_does_not() {
  // 15 chars at 10px (font size 20 x 0.5) with one opportunity after
  // the space at width 60, available 100.
  let make = |wrap| {
    let mut ctx = context();
    let mut style = text_container();
    style.width = Some(100.0);
    style.font_size = 20.0;
    style.wrap = wrap;
    let root = ctx.tree.create_root(style);
    let text = ctx.tree.create_text("abcde fghijklmn");
    ctx.tree.add_child(root, text).unwrap();
    ctx.calc().unwrap();
    ctx.layout_of(root).unwrap()
  };

  let wrapped = make(WrapMode::Wrap);
  // Two lines of 60 and 90; content width is the widest line.
  assert!((wrapped.content_width - 90.0).abs() < 1e-3);
  assert!((wrapped.content_height - 2.0 * 24.0).abs() < 1e-3);

  let unwrapped = make(WrapMode::NoWrap);
  assert!((unwrapped.content_width - 150.0).abs() < 1e-3);
  assert!((unwrapped.content_height - 24.0).abs() < 1e-3);
}

#[test]
fn test_empty_text_node_makes_no_item() {
  let mut tree = NodeTree::new();
  let root = tree.create_root(text_container());
  let empty = tree.create_text("");
  tree.add_child(root, empty).unwrap();

  run_phase0(&mut tree, root);
  run_phase1(&mut tree, root).unwrap();

  let layout = tree.element(root).unwrap().common.text_layout.as_deref().unwrap();
  assert!(layout.is_built());
  assert!(layout.paragraphs.is_empty());
}

#[test]
fn test_roots_lay_out_in_insertion_order() {
  let mut ctx = context();
  let first = ctx.tree.create_root(NodeStyle {
    width: Some(10.0),
    height: Some(10.0),
    ..NodeStyle::default()
  });
  let second = ctx.tree.create_root(NodeStyle {
    width: Some(20.0),
    height: Some(20.0),
    ..NodeStyle::default()
  });
  assert_eq!(ctx.tree.roots(), &[first, second]);

  ctx.calc().unwrap();
  assert_eq!(ctx.layout_of(first).unwrap().width, 10.0);
  assert_eq!(ctx.layout_of(second).unwrap().width, 20.0);
}

#[test]
fn test_font_ids_stable_until_eviction() {
  let cache = FontIdCache::new();
  cache.set_expire_frames(4);
  cache.set_expire_seconds(0.0);

  let face = FontFace::new(std::sync::Arc::new(vec![1u8; 16]), 0);
  let id = cache.font_face_to_id(&face);
  assert_eq!(cache.font_face_to_id(&face.clone()), id);
  assert_eq!(cache.id_to_font_face(id), Some(face.clone()));

  cache.update(0.0); // bootstrap
  for i in 0..12 {
    cache.update(1.0 + i as f64);
  }
  assert_eq!(cache.id_to_font_face(id), None);

  // A re-added face gets a fresh id.
  let readded = cache.font_face_to_id(&face);
  assert_ne!(readded, id);
}

#[test]
fn test_style_change_triggers_relayout() {
  let mut ctx = context();
  let root = ctx.tree.create_root(NodeStyle {
    width: Some(100.0),
    height: Some(40.0),
    ..NodeStyle::default()
  });
  ctx.calc().unwrap();
  assert_eq!(ctx.layout_of(root).unwrap().width, 100.0);

  ctx
    .tree
    .set_style(
      root,
      NodeStyle {
        width: Some(250.0),
        height: Some(40.0),
        ..NodeStyle::default()
      },
    )
    .unwrap();
  ctx.calc().unwrap();
  assert_eq!(ctx.layout_of(root).unwrap().width, 250.0);
}

struct FailingBackend;

impl ShapingBackend for FailingBackend {
  fn analyze_script(&self, _text: &str) -> Result<Vec<ScriptRange>> {
    Err(
      BackendError::ScriptAnalysisFailed {
        reason: "analysis unavailable".to_string(),
      }
      .into(),
    )
  }

  fn analyze_bidi(&self, _text: &str, _base_rtl: bool) -> Result<Vec<BidiRange>> {
    Err(
      BackendError::BidiAnalysisFailed {
        reason: "analysis unavailable".to_string(),
      }
      .into(),
    )
  }

  fn analyze_line_breakpoints(&self, _text: &str) -> Result<Vec<BreakClass>> {
    Ok(Vec::new())
  }

  fn map_characters(&self, _chars: &[char], offset: usize, _len: usize, _request: &FontRequest) -> Result<MappedChars> {
    Err(
      BackendError::MappingFailed {
        offset,
        reason: "mapping unavailable".to_string(),
      }
      .into(),
    )
  }

  fn get_glyphs(
    &self,
    _text: &str,
    _font: &FontFace,
    _options: &ShapingOptions<'_>,
    _cluster_map: &mut [u32],
    _char_props: &mut [CharProps],
    _glyph_ids: &mut [u32],
    _glyph_props: &mut [GlyphProps],
  ) -> Result<usize> {
    Err(
      BackendError::ShapingFailed {
        reason: "shaping unavailable".to_string(),
      }
      .into(),
    )
  }

  fn get_glyph_placements(
    &self,
    _text: &str,
    _font: &FontFace,
    _font_size: f32,
    _options: &ShapingOptions<'_>,
    _cluster_map: &[u32],
    _glyph_ids: &[u32],
    _advances: &mut [f32],
    _offsets: &mut [GlyphOffset],
  ) -> Result<()> {
    Err(
      BackendError::PlacementFailed {
        reason: "placement unavailable".to_string(),
      }
      .into(),
    )
  }
}

#[test]
fn test_backend_failure_aborts_and_records_last_error() {
  clear_last_error();

  let mut ctx = LayoutContext::new(Box::new(FailingBackend));
  let root = ctx.tree.create_root(text_container());
  let text = ctx.tree.create_text("doomed");
  ctx.tree.add_child(root, text).unwrap();

  let err = ctx.calc().unwrap_err();
  assert!(err.to_string().contains("Script analysis failed"));
  let recorded = last_error().expect("failure recorded");
  assert!(recorded.contains("analysis unavailable"));
  // Nothing was committed for the failing root.
  assert!(ctx.layout_of(root).is_none());

  clear_last_error();
}

#[test]
fn test_viewport_drives_root_size() {
  let mut ctx = context();
  let root = ctx.tree.create_root(text_container());
  let text = ctx.tree.create_text("x");
  ctx.tree.add_child(root, text).unwrap();
  ctx.set_viewport(Size::new(320.0, 200.0));

  ctx.calc().unwrap();
  let out = ctx.layout_of(root).unwrap();
  // Width fills the viewport; height hugs the single 16px line.
  assert_eq!(out.width, 320.0);
  assert!((out.height - 16.0 * 1.2).abs() < 1e-3);
}
