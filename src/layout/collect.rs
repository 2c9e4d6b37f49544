//! Phase1: collecting inline content into text layout objects.
//!
//! Runs after the dirty walk. For every dirty text container it creates
//! or rebuilds the container's [`TextLayout`], walking the subtree and
//! translating each node into the paragraph model:
//!
//! - Text nodes append their characters as text items (empty content
//!   appends nothing),
//! - flow-transparent inline views become scopes around their children,
//! - opaque inline views become inline-block items,
//! - block views become block items,
//!
//! and the last two stop the inline flow: their own subtrees are
//! processed standalone. A clean container keeps its item list; the walk
//! still descends to reach dirty descendants.

use crate::error::Result;
use crate::style::{ContainerKind, FlowMode};
use crate::text::paragraph::ScopeStyle;
use crate::tree::node::{NodeId, NodeKind, NodeTree};

/// Runs the collection walk over one root.
pub fn run_phase1(tree: &mut NodeTree, root: NodeId) -> Result<()> {
  visit(tree, root, None)
}

fn visit(tree: &mut NodeTree, id: NodeId, owner: Option<NodeId>) -> Result<()> {
  if id.kind == NodeKind::Text {
    if let Some(o) = owner {
      let content = tree.text(id).map(|t| t.text.clone()).unwrap_or_default();
      if !content.is_empty() {
        if let Some(layout) = tree.element_mut(o).and_then(|n| n.common.text_layout.as_deref_mut()) {
          layout.append_text_item(id, 0, &content);
        }
      }
    }
    return Ok(());
  }

  let Some(node) = tree.element(id) else {
    return Ok(());
  };
  let style = node.style.clone();
  let children = node.children.clone();
  // Phase0 emptied the caches of everything that needs re-layout.
  let dirty = node.common.cache.is_empty();
  let text_dirty = node.common.is_text_dirty();
  let has_layout = node.common.text_layout.is_some();

  if let Some(o) = owner {
    if style.is_flow_transparent() {
      // Scope: style applies to the inline content, the box disappears.
      let scope = ScopeStyle::from_node_style(&style);
      if let Some(layout) = tree.element_mut(o).and_then(|n| n.common.text_layout.as_deref_mut()) {
        layout.push_scope(scope);
      }
      for child in children {
        visit(tree, child, Some(o))?;
      }
      if let Some(layout) = tree.element_mut(o).and_then(|n| n.common.text_layout.as_deref_mut()) {
        layout.pop_scope();
      }
      return Ok(());
    }

    // Opaque boxes occupy one logical position and end the inline flow;
    // their own subtree is handled below, outside the owner's build.
    if let Some(layout) = tree.element_mut(o).and_then(|n| n.common.text_layout.as_deref_mut()) {
      if style.flow == FlowMode::Inline {
        layout.append_inline_block(id);
      } else {
        layout.append_block(id);
      }
    }
  }

  if !dirty {
    return Ok(());
  }

  if style.container == ContainerKind::Text {
    let rebuild = !has_layout || text_dirty;
    if rebuild {
      let scope = ScopeStyle::from_node_style(&style);
      {
        let node = tree.element_mut(id).expect("looked up above");
        let layout = node.common.text_layout.get_or_insert_with(Box::default);
        layout.begin_build(scope);
        node.common.mark_text_processed();
      }
      for child in children {
        visit(tree, child, Some(id))?;
      }
      if let Some(layout) = tree.element_mut(id).and_then(|n| n.common.text_layout.as_deref_mut()) {
        layout.finalize_build();
      }
      return Ok(());
    }
    // Reuse: the item list is current, but dirty descendants (nested
    // boxes) still need their own collection.
  }

  for child in children {
    visit(tree, child, None)?;
  }
  Ok(())
}
