//! The layout engine: `calc()` and the per-node measurement recursion.
//!
//! A [`LayoutContext`] owns the node tree, the shaping backend, and the
//! font identity cache. One `calc()` call runs the full pipeline over
//! every root in insertion order: the dirty walk (Phase0), collection
//! (Phase1), then recursive measurement bottom-up, consulting each
//! node's slot cache before computing anything.
//!
//! Any backend failure aborts the whole pass: the error is recorded in
//! the thread-local last-error slot and nothing is committed for the
//! failing subtree (caches are only written on success).

use crate::error::{record_last_error, LayoutError, Result};
use crate::geometry::Size;
use crate::layout::collect::run_phase1;
use crate::layout::constraints::{AvailableSpace, LayoutInput, LayoutOutput, MeasureMode};
use crate::layout::dirty::run_phase0;
use crate::style::{ContainerKind, NodeStyle, WrapMode};
use crate::text::backend::{BreakClass, FontFace, ShapingBackend};
use crate::text::font_cache::FontIdCache;
use crate::text::line_break::{BreakContext, LineBreaker, LineSpan};
use crate::text::paragraph::{FlowClass, ItemKind, Paragraph, TextLayout};
use crate::text::segment::{build_font_ranges, build_style_ranges, collect_runs};
use crate::text::shape::{shape_paragraph, ShapedParagraph};
use crate::tree::node::{NodeId, NodeTree};

/// Line box height as a multiple of the governing font size.
const LINE_HEIGHT_FACTOR: f32 = 1.2;
/// Baseline position within a line as a fraction of the font size.
const ASCENT_FACTOR: f32 = 0.8;

/// Everything one layout pass operates on.
pub struct LayoutContext {
  pub tree: NodeTree,
  backend: Box<dyn ShapingBackend>,
  pub font_cache: FontIdCache,
  viewport: Size,
}

impl LayoutContext {
  pub fn new(backend: Box<dyn ShapingBackend>) -> Self {
    Self {
      tree: NodeTree::new(),
      backend,
      font_cache: FontIdCache::new(),
      viewport: Size::new(800.0, 600.0),
    }
  }

  /// Sets the size roots lay out against when their style has no
  /// explicit dimensions.
  pub fn set_viewport(&mut self, viewport: Size) {
    self.viewport = viewport;
  }

  pub fn backend(&self) -> &dyn ShapingBackend {
    &*self.backend
  }

  /// Runs the full pipeline over every root, in insertion order.
  pub fn calc(&mut self) -> Result<()> {
    let roots: Vec<NodeId> = self.tree.roots().to_vec();
    for &root in &roots {
      run_phase0(&mut self.tree, root);
    }
    for &root in &roots {
      run_phase1(&mut self.tree, root).map_err(record_last_error)?;
    }
    for &root in &roots {
      self.layout_root(root).map_err(record_last_error)?;
    }
    Ok(())
  }

  /// The committed result of a node's last full layout, if any.
  pub fn layout_of(&self, id: NodeId) -> Option<LayoutOutput> {
    self.tree.element(id)?.common.cache.final_output()
  }

  fn root_input(&self, style: &NodeStyle) -> LayoutInput {
    let mut input = LayoutInput::new(
      AvailableSpace::Definite(style.width.unwrap_or(self.viewport.width)),
      AvailableSpace::Definite(style.height.unwrap_or(self.viewport.height)),
    );
    if let Some(w) = style.width {
      input = input.with_known_width(w);
    }
    if let Some(h) = style.height {
      input = input.with_known_height(h);
    }
    input
  }

  fn layout_root(&mut self, root: NodeId) -> Result<()> {
    let style = self
      .tree
      .element(root)
      .ok_or(LayoutError::StaleNodeId {
        index: root.index,
        version: root.version,
      })?
      .style
      .clone();
    let input = self.root_input(&style);
    self.layout_node(root, input, MeasureMode::PerformLayout)?;
    Ok(())
  }

  /// Measures or lays out one node, consulting its slot cache first.
  pub fn layout_node(&mut self, id: NodeId, input: LayoutInput, mode: MeasureMode) -> Result<LayoutOutput> {
    let node = self.tree.element(id).ok_or(LayoutError::StaleNodeId {
      index: id.index,
      version: id.version,
    })?;
    if let Some(hit) = node.common.cache.get_output(&input, mode) {
      return Ok(hit);
    }
    let style = node.style.clone();

    let output = self.compute(id, &style, input, mode)?;

    // Commit only on success.
    let node = self.tree.element_mut(id).expect("looked up above");
    match mode {
      MeasureMode::ComputeSize => node.common.cache.store_measure(input, output),
      MeasureMode::PerformLayout => node.common.cache.store_final(input, output),
    }
    Ok(output)
  }

  fn compute(&mut self, id: NodeId, style: &NodeStyle, input: LayoutInput, mode: MeasureMode) -> Result<LayoutOutput> {
    let edges_h = style.paddings.horizontal() + style.borders.horizontal();
    let edges_v = style.paddings.vertical() + style.borders.vertical();

    // Resolve what we already know about the box size.
    let mut known_width = input.known_width.or(style.width);
    let mut known_height = input.known_height.or(style.height);
    if let Some(ratio) = style.aspect_ratio {
      if known_width.is_none() {
        known_width = known_height.map(|h| h * ratio);
      } else if known_height.is_none() {
        known_height = known_width.map(|w| w / ratio);
      }
    }

    // Inner constraint for content measurement.
    let inner_width = match known_width {
      Some(w) => AvailableSpace::Definite((w - edges_h).max(0.0)),
      None => match input.available_width {
        AvailableSpace::Definite(w) => AvailableSpace::Definite((w - edges_h).max(0.0)),
        other => other,
      },
    };

    let (content, baseline) = if style.container == ContainerKind::Text {
      self.layout_text_container(id, style, inner_width, mode)?
    } else {
      self.layout_block_children(id, style, inner_width, mode)?
    };

    // Block boxes fill a definite containing width; otherwise the box
    // shrinks to its content.
    let width = known_width
      .or_else(|| input.available_width.definite_value())
      .unwrap_or(content.width + edges_h);
    let height = known_height.unwrap_or(content.height + edges_v);

    Ok(LayoutOutput {
      width,
      height,
      content_width: content.width + edges_h,
      content_height: content.height + edges_v,
      first_baseline_x: baseline.map(|_| style.paddings.left + style.borders.left),
      first_baseline_y: baseline.map(|b| b + style.paddings.top + style.borders.top),
      collapsible_margin_top: style.margins.top,
      collapsible_margin_bottom: style.margins.bottom,
      margins_can_collapse_through: height == 0.0 && edges_v == 0.0,
    })
  }

  /// Stacks element children vertically; Text-node children are ignored
  /// outside text containers.
  fn layout_block_children(
    &mut self,
    id: NodeId,
    _style: &NodeStyle,
    inner_width: AvailableSpace,
    mode: MeasureMode,
  ) -> Result<(Size, Option<f32>)> {
    let children: Vec<NodeId> = self
      .tree
      .element(id)
      .map(|n| n.children.clone())
      .unwrap_or_default();

    let mut content = Size::ZERO;
    let mut baseline = None;
    let mut prev_margin_bottom = 0.0f32;
    let mut first = true;

    for child in children {
      if self.tree.element(child).is_none() {
        continue;
      }
      let child_input = LayoutInput::new(inner_width, AvailableSpace::MaxContent);
      let out = self.layout_node(child, child_input, mode)?;

      // Adjacent sibling margins collapse to their maximum.
      let gap = if first {
        out.collapsible_margin_top
      } else {
        prev_margin_bottom.max(out.collapsible_margin_top)
      };
      content.height += gap + out.height;
      content.width = content.width.max(out.width);
      if baseline.is_none() {
        baseline = out.first_baseline_y.map(|b| b + content.height - out.height);
      }
      prev_margin_bottom = if out.margins_can_collapse_through {
        prev_margin_bottom.max(out.collapsible_margin_bottom)
      } else {
        out.collapsible_margin_bottom
      };
      first = false;
    }
    content.height += prev_margin_bottom;

    Ok((content, baseline))
  }

  /// Measures a text container: segmentation, shaping, and line breaking
  /// over every paragraph, plus child layout for block and inline-block
  /// items.
  fn layout_text_container(
    &mut self,
    id: NodeId,
    style: &NodeStyle,
    inner_width: AvailableSpace,
    mode: MeasureMode,
  ) -> Result<(Size, Option<f32>)> {
    // Detach the layout object so paragraph processing and child
    // recursion never alias the node.
    let mut layout = self
      .tree
      .element_mut(id)
      .and_then(|n| n.common.text_layout.take());

    let result = match layout.as_deref_mut() {
      Some(tl) if tl.is_built() => self.measure_text_layout(tl, style, inner_width, mode),
      _ => Ok((Size::ZERO, None)),
    };

    if let Some(node) = self.tree.element_mut(id) {
      node.common.text_layout = layout;
    }
    result
  }

  fn measure_text_layout(
    &mut self,
    layout: &mut TextLayout,
    style: &NodeStyle,
    inner_width: AvailableSpace,
    mode: MeasureMode,
  ) -> Result<(Size, Option<f32>)> {
    let mut content = Size::ZERO;
    let mut baseline = None;

    let paragraphs = std::mem::take(&mut layout.paragraphs);
    let mut result = Ok(());
    for paragraph in &paragraphs {
      let size = match paragraph.flow {
        FlowClass::Block => self.measure_block_paragraph(paragraph, inner_width, mode),
        FlowClass::Inline => {
          self.measure_inline_paragraph(paragraph, &mut layout.fallback_font, style, inner_width, mode, &mut baseline, content.height)
        }
      };
      match size {
        Ok(size) => {
          content.width = content.width.max(size.width);
          content.height += size.height;
        }
        Err(e) => {
          result = Err(e);
          break;
        }
      }
    }
    layout.paragraphs = paragraphs;
    result?;
    Ok((content, baseline))
  }

  fn measure_block_paragraph(&mut self, paragraph: &Paragraph, inner_width: AvailableSpace, mode: MeasureMode) -> Result<Size> {
    let mut size = Size::ZERO;
    for item in &paragraph.items {
      let ItemKind::Block { node } = item.kind else {
        continue;
      };
      let out = self.layout_node(node, LayoutInput::new(inner_width, AvailableSpace::MaxContent), mode)?;
      size.width = size.width.max(out.width);
      size.height += out.collapsible_margin_top + out.height + out.collapsible_margin_bottom;
    }
    Ok(size)
  }

  #[allow(clippy::too_many_arguments)]
  fn measure_inline_paragraph(
    &mut self,
    paragraph: &Paragraph,
    fallback_font: &mut Option<FontFace>,
    style: &NodeStyle,
    inner_width: AvailableSpace,
    mode: MeasureMode,
    baseline: &mut Option<f32>,
    y_offset: f32,
  ) -> Result<Size> {
    let backend = &*self.backend;
    let scripts = backend.analyze_script(&paragraph.text)?;
    let bidi = backend.analyze_bidi(&paragraph.text, false)?;
    let breaks = backend.analyze_line_breakpoints(&paragraph.text)?;
    let fonts = build_font_ranges(paragraph, backend, fallback_font)?;
    let styles = build_style_ranges(paragraph);
    let runs = collect_runs(&scripts, &bidi, &fonts, &styles, paragraph.logic_text_len)?;
    let mut shaped = shape_paragraph(paragraph, &runs, &scripts, &bidi, &fonts, &styles, &style.locale, backend)?;

    // Keep mapped font identities warm for the embedder.
    for range in &fonts {
      if let Some(font) = &range.font {
        self.font_cache.font_face_to_id(font);
      }
    }

    // Inline boxes get measured and their widths patched into the
    // advance table before breaking.
    for item in &paragraph.items {
      if let ItemKind::InlineBlock { node } = item.kind {
        let out = self.layout_node(
          node,
          LayoutInput::new(AvailableSpace::MaxContent, AvailableSpace::MaxContent),
          mode,
        )?;
        shaped.set_char_advance(item.logic_text_start, out.width);
      }
    }

    let (available, wrap) = match inner_width {
      AvailableSpace::Definite(w) => (w, style.wrap == WrapMode::Wrap),
      AvailableSpace::MinContent => (0.0, style.wrap == WrapMode::Wrap),
      AvailableSpace::MaxContent => (f32::INFINITY, false),
    };

    let spans = break_paragraph(&shaped, &breaks, available, wrap);

    let mut size = Size::ZERO;
    for span in &spans {
      let font_size = max_font_size_in(&shaped, span, style.font_size);
      size.width = size.width.max(span.width);
      if baseline.is_none() {
        *baseline = Some(y_offset + font_size * ASCENT_FACTOR);
      }
      size.height += font_size * LINE_HEIGHT_FACTOR;
    }
    Ok(size)
  }
}

/// Breaks every run of a shaped paragraph against one width, carrying a
/// single context across runs.
fn break_paragraph(shaped: &ShapedParagraph, breaks: &[BreakClass], available: f32, wrap: bool) -> Vec<LineSpan> {
  let mut ctx = BreakContext::new();
  let mut spans = Vec::new();
  let run_count = shaped.runs.len();
  for (i, rs) in shaped.runs.iter().enumerate() {
    let is_last = i + 1 == run_count;
    let breaker = LineBreaker::new(
      &mut ctx,
      shaped,
      breaks,
      rs.run.start,
      rs.run.start + rs.run.len,
      available,
      wrap,
      is_last,
    );
    spans.extend(breaker);
  }
  spans
}

/// Largest font size among runs a span overlaps; the container's font
/// size is used when the span overlaps no run.
fn max_font_size_in(shaped: &ShapedParagraph, span: &LineSpan, container_font_size: f32) -> f32 {
  let mut max = 0.0f32;
  for rs in &shaped.runs {
    let run_start = rs.run.start;
    let run_end = rs.run.start + rs.run.len;
    if run_start < span.end && span.start < run_end {
      max = max.max(rs.font_size);
    }
  }
  if max == 0.0 {
    container_font_size
  } else {
    max
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::style::{FlowMode, FontRequest};
  use crate::text::backend::MonospaceBackend;

  fn context() -> LayoutContext {
    LayoutContext::new(Box::new(MonospaceBackend::new()))
  }

  fn text_container() -> NodeStyle {
    NodeStyle {
      container: ContainerKind::Text,
      ..NodeStyle::default()
    }
  }

  #[test]
  fn test_simple_text_measurement() {
    let mut ctx = context();
    let root = ctx.tree.create_root(text_container());
    let text = ctx.tree.create_text("hello");
    ctx.tree.add_child(root, text).unwrap();
    ctx.set_viewport(Size::new(400.0, 300.0));

    ctx.calc().unwrap();

    let out = ctx.layout_of(root).unwrap();
    // Root takes the viewport size; content is 5 chars x 8px.
    assert_eq!(out.width, 400.0);
    assert!((out.content_width - 40.0).abs() < 1e-3);
  }

  #[test]
  fn test_wrapping_grows_content_height() {
    let mut ctx = context();
    let mut style = text_container();
    style.width = Some(100.0);
    let root = ctx.tree.create_root(style);
    // 24 chars with breaks every 6: at 8px each, 48px per segment, two
    // segments per 100px line.
    let text = ctx.tree.create_text("aaaaa bbbbb ccccc ddddd");
    ctx.tree.add_child(root, text).unwrap();

    ctx.calc().unwrap();
    let out = ctx.layout_of(root).unwrap();
    // 23 chars * 8px = 184px total: at least two lines.
    assert!(out.content_height >= 2.0 * 16.0 * LINE_HEIGHT_FACTOR - 1e-3);
  }

  #[test]
  fn test_second_calc_hits_caches() {
    let mut ctx = context();
    let root = ctx.tree.create_root(text_container());
    let text = ctx.tree.create_text("stable content");
    ctx.tree.add_child(root, text).unwrap();

    ctx.calc().unwrap();
    let first = ctx.layout_of(root).unwrap();
    ctx.calc().unwrap();
    let second = ctx.layout_of(root).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn test_block_children_stack_with_margin_collapse() {
    let mut ctx = context();
    let root = ctx.tree.create_root(NodeStyle::default());
    let mut a_style = NodeStyle {
      height: Some(50.0),
      ..NodeStyle::default()
    };
    a_style.margins.bottom = 20.0;
    let mut b_style = NodeStyle {
      height: Some(30.0),
      ..NodeStyle::default()
    };
    b_style.margins.top = 12.0;
    let a = ctx.tree.create_view(a_style);
    let b = ctx.tree.create_view(b_style);
    ctx.tree.add_child(root, a).unwrap();
    ctx.tree.add_child(root, b).unwrap();

    ctx.calc().unwrap();
    let out = ctx.layout_of(root).unwrap();
    // 50 + max(20, 12) + 30 + trailing 0-margin.
    assert!((out.content_height - 100.0).abs() < 1e-3);
  }

  #[test]
  fn test_inline_block_width_patched_into_line() {
    let mut ctx = context();
    let mut style = text_container();
    style.width = Some(500.0);
    let root = ctx.tree.create_root(style);
    let before = ctx.tree.create_text("ab");
    let mut box_style = NodeStyle {
      flow: FlowMode::Inline,
      width: Some(40.0),
      height: Some(10.0),
      ..NodeStyle::default()
    };
    box_style.margins.left = 1.0; // opaque
    let boxed = ctx.tree.create_view(box_style);
    let after = ctx.tree.create_text("cd");
    ctx.tree.add_child(root, before).unwrap();
    ctx.tree.add_child(root, boxed).unwrap();
    ctx.tree.add_child(root, after).unwrap();

    ctx.calc().unwrap();
    let out = ctx.layout_of(root).unwrap();
    // 4 chars * 8px + 40px box on one line.
    assert!((out.content_width - 72.0).abs() < 1e-3);
  }

  #[test]
  fn test_font_cache_fed_during_calc() {
    let mut ctx = context();
    let root = ctx.tree.create_root(text_container());
    let a = ctx.tree.create_text("plain ");
    let bold_scope = ctx.tree.create_view(NodeStyle {
      flow: FlowMode::Inline,
      font: FontRequest {
        weight: 700,
        ..FontRequest::default()
      },
      ..NodeStyle::default()
    });
    let b = ctx.tree.create_text("bold");
    ctx.tree.add_child(root, a).unwrap();
    ctx.tree.add_child(root, bold_scope).unwrap();
    ctx.tree.add_child(bold_scope, b).unwrap();

    ctx.calc().unwrap();
    // Two distinct fonts were mapped and registered.
    assert_eq!(ctx.font_cache.len(), 2);
  }

  #[test]
  fn test_line_font_size_defaults_to_container() {
    let shaped = ShapedParagraph::default();
    let span = LineSpan {
      start: 0,
      end: 1,
      width: 0.0,
      line_number: 0,
      needs_reshape: false,
      hard_break: false,
    };
    assert_eq!(max_font_size_in(&shaped, &span, 20.0), 20.0);
  }

  #[test]
  fn test_stale_root_is_reported() {
    let mut ctx = context();
    let root = ctx.tree.create_root(NodeStyle::default());
    let bogus = NodeId {
      index: root.index + 7,
      version: 1,
      kind: root.kind,
    };
    let err = ctx
      .layout_node(
        bogus,
        LayoutInput::new(AvailableSpace::MaxContent, AvailableSpace::MaxContent),
        MeasureMode::ComputeSize,
      )
      .unwrap_err();
    assert!(err.to_string().contains("Stale node id"));
  }
}
