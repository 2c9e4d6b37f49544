//! Phase0: the pre-layout dirty walk.
//!
//! Runs top-down over one root before any collection or measurement. Its
//! jobs are cheap and structural: prune clean subtrees, invalidate the
//! measurement caches of dirty nodes, latch their layout counters, and
//! thread the active text-layout owner through inline content so nested
//! text containers can delegate their rebuild upward.
//!
//! After this pass a node's pending work is readable from its cache (an
//! empty cache means "lay out again") and from its text counters (still
//! diverged means "rebuild the item list in Phase1").

use crate::style::ContainerKind;
use crate::tree::node::{NodeId, NodeKind, NodeTree};

/// Counters reported by one Phase0 run, mostly for tests and tracing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Phase0Stats {
  /// Nodes actually processed (pruned subtree roots are not counted).
  pub visited: usize,
  /// Measurement caches invalidated.
  pub cache_clears: usize,
}

/// Runs the dirty walk over one root.
pub fn run_phase0(tree: &mut NodeTree, root: NodeId) -> Phase0Stats {
  let mut stats = Phase0Stats::default();
  visit(tree, root, None, &mut stats);
  stats
}

fn visit(tree: &mut NodeTree, id: NodeId, owner: Option<NodeId>, stats: &mut Phase0Stats) {
  // Text nodes carry no dirty state of their own.
  if id.kind == NodeKind::Text {
    return;
  }
  let Some(node) = tree.element(id) else {
    return;
  };

  debug_assert!(
    node.common.is_layout_dirty() || !node.common.is_text_dirty(),
    "text-dirty node must also be layout-dirty"
  );

  let dirty = node.common.is_layout_dirty();
  // Clean subtree with no text flow passing through: nothing below can
  // need work either.
  if !dirty && owner.is_none() {
    return;
  }
  stats.visited += 1;

  let is_text_container = node.style.container == ContainerKind::Text;
  let transparent = node.style.is_flow_transparent();
  let node_text_dirty = node.common.is_text_dirty();
  let children = node.children.clone();

  if dirty {
    let node = tree.element_mut(id).expect("looked up above");
    node.common.cache.clear();
    node.common.mark_layout_processed();
    stats.cache_clears += 1;
  }

  let next_owner = match owner {
    None => is_text_container.then_some(id),
    Some(o) => {
      if transparent {
        // Flow-transparent nodes stay inside the owner's inline flow. A
        // transparent text container among them delegates its rebuild to
        // the owner, which re-collects this subtree's inline content.
        if is_text_container && node_text_dirty {
          if let Some(owner_node) = tree.element_mut(o) {
            owner_node.common.text_layout_version = owner_node.common.text_layout_version.wrapping_add(1);
          }
          if let Some(node) = tree.element_mut(id) {
            node.common.mark_text_processed();
          }
        }
        Some(o)
      } else if is_text_container {
        // An opaque text container starts its own inline flow.
        Some(id)
      } else {
        // An opaque non-text container interrupts the flow.
        None
      }
    }
  };

  for child in children {
    visit(tree, child, next_owner, stats);
  }
}
