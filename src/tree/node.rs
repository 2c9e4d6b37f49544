//! The node tree: View/Text/Root nodes over generation-checked arenas.
//!
//! Per-kind node data lives in parallel dense arrays indexed by the id's
//! `index`; the id also carries the slot generation and the kind, so a
//! stale or mis-kinded id is caught at lookup time instead of aliasing a
//! different node.
//!
//! Dirtiness is expressed as version-counter pairs on [`CommonData`]:
//! a node is layout-dirty when `last_layout_version != layout_version`,
//! and text-dirty when the text pair differs. Marking text dirty always
//! marks layout dirty too; Phase0 debug-asserts that invariant.

use crate::error::{LayoutError, Result};
use crate::layout::cache::LayoutCache;
use crate::style::{ContainerKind, NodeStyle};
use crate::text::paragraph::TextLayout;
use crate::tree::arena::SlotArena;

/// Which arena a node lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
  View,
  Text,
  Root,
}

/// Stable node address: dense index, slot generation, and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
  pub index: u32,
  pub version: u32,
  pub kind: NodeKind,
}

/// Version counters and cached state shared by View and Root nodes.
///
/// Text-kind nodes hold none of this; they are no-ops for dirty
/// propagation and carry only their content string.
#[derive(Debug, Default)]
pub struct CommonData {
  pub layout_version: u32,
  pub last_layout_version: u32,
  pub text_layout_version: u32,
  pub last_text_layout_version: u32,
  /// Bounded measurement cache (1 final + 9 measure slots).
  pub cache: LayoutCache,
  /// Present only while this node's style container is Text.
  pub text_layout: Option<Box<TextLayout>>,
}

impl CommonData {
  #[inline]
  pub fn is_layout_dirty(&self) -> bool {
    self.last_layout_version != self.layout_version
  }

  #[inline]
  pub fn is_text_dirty(&self) -> bool {
    self.last_text_layout_version != self.text_layout_version
  }

  /// Latches the layout counter; the node reads as clean afterwards.
  #[inline]
  pub fn mark_layout_processed(&mut self) {
    self.last_layout_version = self.layout_version;
  }

  #[inline]
  pub fn mark_text_processed(&mut self) {
    self.last_text_layout_version = self.text_layout_version;
  }
}

/// Payload of a View or Root node.
#[derive(Debug, Default)]
pub struct ElementNode {
  pub style: NodeStyle,
  pub parent: Option<NodeId>,
  pub children: Vec<NodeId>,
  pub common: CommonData,
}

/// Payload of a Text node: raw content only.
#[derive(Debug, Default)]
pub struct TextNode {
  pub text: String,
}

/// The tree of nodes a layout context operates on.
///
/// Roots are remembered in insertion order; `calc()` iterates them in that
/// order so multi-root layout is deterministic.
#[derive(Debug, Default)]
pub struct NodeTree {
  views: SlotArena<ElementNode>,
  texts: SlotArena<TextNode>,
  roots: SlotArena<ElementNode>,
  root_order: Vec<NodeId>,
}

impl NodeTree {
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a root node. Roots are laid out in creation order.
  pub fn create_root(&mut self, style: NodeStyle) -> NodeId {
    let (index, version) = self.roots.insert(ElementNode {
      style,
      ..ElementNode::default()
    });
    let id = NodeId {
      index,
      version,
      kind: NodeKind::Root,
    };
    self.root_order.push(id);
    id
  }

  pub fn create_view(&mut self, style: NodeStyle) -> NodeId {
    let (index, version) = self.views.insert(ElementNode {
      style,
      ..ElementNode::default()
    });
    NodeId {
      index,
      version,
      kind: NodeKind::View,
    }
  }

  pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
    let (index, version) = self.texts.insert(TextNode { text: text.into() });
    NodeId {
      index,
      version,
      kind: NodeKind::Text,
    }
  }

  /// Roots in insertion order.
  pub fn roots(&self) -> &[NodeId] {
    &self.root_order
  }

  /// Element payload of a View or Root id; `None` for Text ids or stale ids.
  pub fn element(&self, id: NodeId) -> Option<&ElementNode> {
    match id.kind {
      NodeKind::View => self.views.get(id.index, id.version),
      NodeKind::Root => self.roots.get(id.index, id.version),
      NodeKind::Text => None,
    }
  }

  pub fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementNode> {
    match id.kind {
      NodeKind::View => self.views.get_mut(id.index, id.version),
      NodeKind::Root => self.roots.get_mut(id.index, id.version),
      NodeKind::Text => None,
    }
  }

  pub fn text(&self, id: NodeId) -> Option<&TextNode> {
    match id.kind {
      NodeKind::Text => self.texts.get(id.index, id.version),
      _ => None,
    }
  }

  /// Replaces a Text node's content. The owning text container must be
  /// marked text-dirty separately for the change to take effect.
  pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) -> Result<()> {
    match id.kind {
      NodeKind::Text => {
        let node = self
          .texts
          .get_mut(id.index, id.version)
          .ok_or(LayoutError::StaleNodeId {
            index: id.index,
            version: id.version,
          })?;
        node.text = text.into();
        Ok(())
      }
      _ => Err(
        LayoutError::InvalidConstraints {
          message: "set_text on non-Text node".to_string(),
        }
        .into(),
      ),
    }
  }

  /// Replaces a node's style and marks it layout-dirty. When the container
  /// kind moves away from Text, the node's text layout object is destroyed.
  pub fn set_style(&mut self, id: NodeId, style: NodeStyle) -> Result<()> {
    let node = self.element_mut(id).ok_or(LayoutError::StaleNodeId {
      index: id.index,
      version: id.version,
    })?;
    let was_text = node.style.container == ContainerKind::Text;
    let is_text = style.container == ContainerKind::Text;
    node.style = style;
    if was_text && !is_text {
      node.common.text_layout = None;
    }
    node.common.layout_version = node.common.layout_version.wrapping_add(1);
    if is_text {
      node.common.text_layout_version = node.common.text_layout_version.wrapping_add(1);
    }
    self.bump_ancestors(id);
    Ok(())
  }

  /// Propagates layout dirtiness to every ancestor so the Phase0 walk
  /// reaches the changed node without scanning clean branches.
  fn bump_ancestors(&mut self, id: NodeId) {
    let mut cursor = self.element(id).and_then(|n| n.parent);
    while let Some(p) = cursor {
      let Some(node) = self.element_mut(p) else {
        break;
      };
      node.common.layout_version = node.common.layout_version.wrapping_add(1);
      cursor = node.parent;
    }
  }

  /// Carries a text change upward through flow-transparent nodes: their
  /// content lives in the paragraphs of the enclosing text containers, so
  /// those containers must re-collect. Stops at the first opaque node.
  fn propagate_text_dirty(&mut self, id: NodeId) {
    let mut cursor = id;
    loop {
      let transparent = match self.element(cursor) {
        Some(node) => node.style.is_flow_transparent(),
        None => return,
      };
      if !transparent {
        return;
      }
      let Some(parent) = self.element(cursor).and_then(|n| n.parent) else {
        return;
      };
      if let Some(pnode) = self.element_mut(parent) {
        if pnode.style.container == ContainerKind::Text {
          pnode.common.text_layout_version = pnode.common.text_layout_version.wrapping_add(1);
        }
      }
      cursor = parent;
    }
  }

  pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
    // Validate the child id before mutating the parent.
    let child_live = match child.kind {
      NodeKind::View => self.views.get(child.index, child.version).is_some(),
      NodeKind::Text => self.texts.get(child.index, child.version).is_some(),
      NodeKind::Root => false,
    };
    if !child_live {
      return Err(
        LayoutError::StaleNodeId {
          index: child.index,
          version: child.version,
        }
        .into(),
      );
    }
    let node = self.element_mut(parent).ok_or(LayoutError::StaleNodeId {
      index: parent.index,
      version: parent.version,
    })?;
    node.children.push(child);
    node.common.layout_version = node.common.layout_version.wrapping_add(1);
    // Structural changes under a text container change its item list.
    if node.style.container == ContainerKind::Text {
      node.common.text_layout_version = node.common.text_layout_version.wrapping_add(1);
    }
    if let Some(child_node) = self.element_mut(child) {
      child_node.parent = Some(parent);
    }
    self.propagate_text_dirty(parent);
    self.bump_ancestors(parent);
    Ok(())
  }

  /// Removes `child` from `parent` and destroys its whole subtree. Nodes
  /// are owned by the tree; removal from the parent's child set is the
  /// point of destruction.
  pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
    let node = self.element_mut(parent).ok_or(LayoutError::StaleNodeId {
      index: parent.index,
      version: parent.version,
    })?;
    let before = node.children.len();
    node.children.retain(|c| *c != child);
    if node.children.len() == before {
      return Err(
        LayoutError::StaleNodeId {
          index: child.index,
          version: child.version,
        }
        .into(),
      );
    }
    node.common.layout_version = node.common.layout_version.wrapping_add(1);
    if node.style.container == ContainerKind::Text {
      node.common.text_layout_version = node.common.text_layout_version.wrapping_add(1);
    }
    self.destroy_subtree(child);
    self.propagate_text_dirty(parent);
    self.bump_ancestors(parent);
    Ok(())
  }

  fn destroy_subtree(&mut self, id: NodeId) {
    match id.kind {
      NodeKind::Text => {
        self.texts.remove(id.index, id.version);
      }
      NodeKind::View | NodeKind::Root => {
        let children = match id.kind {
          NodeKind::View => self.views.remove(id.index, id.version).map(|n| n.children),
          _ => self.roots.remove(id.index, id.version).map(|n| n.children),
        };
        if let Some(children) = children {
          for child in children {
            self.destroy_subtree(child);
          }
        }
      }
    }
  }

  /// Marks a View/Root node layout-dirty.
  pub fn mark_layout_dirty(&mut self, id: NodeId) -> Result<()> {
    let node = self.element_mut(id).ok_or(LayoutError::StaleNodeId {
      index: id.index,
      version: id.version,
    })?;
    node.common.layout_version = node.common.layout_version.wrapping_add(1);
    self.bump_ancestors(id);
    Ok(())
  }

  /// Marks a text container text-dirty. Text-dirty implies layout-dirty,
  /// so both counters are bumped together; marking only the text counter
  /// would violate the Phase0 invariant. When the node is flow-transparent
  /// its content belongs to an enclosing container's paragraphs, so the
  /// text dirtiness travels up to there too.
  pub fn mark_text_dirty(&mut self, id: NodeId) -> Result<()> {
    let node = self.element_mut(id).ok_or(LayoutError::StaleNodeId {
      index: id.index,
      version: id.version,
    })?;
    node.common.text_layout_version = node.common.text_layout_version.wrapping_add(1);
    node.common.layout_version = node.common.layout_version.wrapping_add(1);
    self.propagate_text_dirty(id);
    self.bump_ancestors(id);
    Ok(())
  }

  pub fn live_node_count(&self) -> usize {
    self.views.len() + self.texts.len() + self.roots.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_create_and_lookup() {
    let mut tree = NodeTree::new();
    let root = tree.create_root(NodeStyle::default());
    let view = tree.create_view(NodeStyle::default());
    let text = tree.create_text("hello");

    assert!(tree.element(root).is_some());
    assert!(tree.element(view).is_some());
    assert!(tree.element(text).is_none());
    assert_eq!(tree.text(text).unwrap().text, "hello");
    assert_eq!(tree.roots(), &[root]);
  }

  #[test]
  fn test_remove_child_destroys_subtree() {
    let mut tree = NodeTree::new();
    let root = tree.create_root(NodeStyle::default());
    let view = tree.create_view(NodeStyle::default());
    let text = tree.create_text("x");
    tree.add_child(root, view).unwrap();
    tree.add_child(view, text).unwrap();
    assert_eq!(tree.live_node_count(), 3);

    tree.remove_child(root, view).unwrap();
    assert_eq!(tree.live_node_count(), 1);
    assert!(tree.element(view).is_none());
    assert!(tree.text(text).is_none());
  }

  #[test]
  fn test_mark_text_dirty_implies_layout_dirty() {
    let mut tree = NodeTree::new();
    let style = NodeStyle {
      container: ContainerKind::Text,
      ..NodeStyle::default()
    };
    let root = tree.create_root(style);
    // Settle counters so the node starts clean.
    let common = &mut tree.element_mut(root).unwrap().common;
    common.mark_layout_processed();
    common.mark_text_processed();
    assert!(!common.is_layout_dirty());

    tree.mark_text_dirty(root).unwrap();
    let common = &tree.element(root).unwrap().common;
    assert!(common.is_text_dirty());
    assert!(common.is_layout_dirty());
  }

  #[test]
  fn test_text_dirty_on_nested_container_reaches_owner() {
    use crate::style::FlowMode;

    let mut tree = NodeTree::new();
    let owner = tree.create_root(NodeStyle {
      container: ContainerKind::Text,
      ..NodeStyle::default()
    });
    let span = tree.create_view(NodeStyle {
      flow: FlowMode::Inline,
      ..NodeStyle::default()
    });
    let nested = tree.create_view(NodeStyle {
      flow: FlowMode::Inline,
      container: ContainerKind::Text,
      ..NodeStyle::default()
    });
    tree.add_child(owner, span).unwrap();
    tree.add_child(span, nested).unwrap();
    for id in [owner, span, nested] {
      let common = &mut tree.element_mut(id).unwrap().common;
      common.mark_layout_processed();
      common.mark_text_processed();
    }

    tree.mark_text_dirty(nested).unwrap();
    let owner_node = tree.element(owner).unwrap();
    assert!(owner_node.common.is_text_dirty());
    assert!(owner_node.common.is_layout_dirty());
    // The plain span is not a container; only its layout counter moves.
    assert!(!tree.element(span).unwrap().common.is_text_dirty());
  }

  #[test]
  fn test_container_change_drops_text_layout() {
    let mut tree = NodeTree::new();
    let root = tree.create_root(NodeStyle {
      container: ContainerKind::Text,
      ..NodeStyle::default()
    });
    tree.element_mut(root).unwrap().common.text_layout = Some(Box::new(TextLayout::new()));

    tree
      .set_style(
        root,
        NodeStyle {
          container: ContainerKind::View,
          ..NodeStyle::default()
        },
      )
      .unwrap();
    assert!(tree.element(root).unwrap().common.text_layout.is_none());
  }

  #[test]
  fn test_stale_child_rejected() {
    let mut tree = NodeTree::new();
    let root = tree.create_root(NodeStyle::default());
    let view = tree.create_view(NodeStyle::default());
    tree.add_child(root, view).unwrap();
    tree.remove_child(root, view).unwrap();
    assert!(tree.add_child(root, view).is_err());
  }
}
