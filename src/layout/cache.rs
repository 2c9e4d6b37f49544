//! Bounded per-node measurement cache.
//!
//! Every View/Root node carries one of these. It memoizes layout results
//! across passes and frames in ten fixed slots: one "final" slot written by
//! a full layout, and nine "measure" slots for size-only queries. The slot
//! for a measure store is chosen by a deterministic, pure classifier over
//! the input signature, so the nine combinations partition the whole input
//! domain without overlap and identical inputs always land in the same
//! slot.
//!
//! `clear()` resets only a validity bitmask; entry payloads are left in
//! place and simply become unreadable until overwritten.

use crate::layout::constraints::{AvailableSpace, LayoutInput, LayoutOutput, MeasureMode};

/// Number of size-only measurement slots.
pub const MEASURE_SLOT_COUNT: usize = 9;

/// Comparison tolerance for definite sizes in cache signatures.
const SIZE_EPSILON: f32 = 0.0001;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
  input: LayoutInput,
  output: LayoutOutput,
}

/// Classifies an input signature into one of the nine measure slots.
///
/// Pure and total over `(has_known_width, has_known_height, available
/// width, available height)`:
/// - slot 0: both dimensions known
/// - slots 1/2: width known only, split by whether the height axis is
///   min-content
/// - slots 3/4: height known only, symmetric split on the width axis
/// - slots 5-8: neither known, classified by the (max-content-or-definite
///   vs min-content) combination on each axis
pub fn compute_cache_slot(
  has_known_width: bool,
  has_known_height: bool,
  available_width: AvailableSpace,
  available_height: AvailableSpace,
) -> usize {
  match (has_known_width, has_known_height) {
    (true, true) => 0,
    (true, false) => {
      if available_height.is_min_content() {
        1
      } else {
        2
      }
    }
    (false, true) => {
      if available_width.is_min_content() {
        3
      } else {
        4
      }
    }
    (false, false) => match (available_width.is_min_content(), available_height.is_min_content()) {
      (false, false) => 5,
      (false, true) => 6,
      (true, false) => 7,
      (true, true) => 8,
    },
  }
}

fn available_space_matches(cached: AvailableSpace, requested: AvailableSpace) -> bool {
  match (cached, requested) {
    // Definite values compare within epsilon; keywords match by kind only.
    (AvailableSpace::Definite(a), AvailableSpace::Definite(b)) => (a - b).abs() < SIZE_EPSILON,
    (AvailableSpace::MinContent, AvailableSpace::MinContent) => true,
    (AvailableSpace::MaxContent, AvailableSpace::MaxContent) => true,
    _ => false,
  }
}

fn known_dim_matches(cached: Option<f32>, requested: Option<f32>) -> bool {
  match (cached, requested) {
    (None, None) => true,
    (Some(a), Some(b)) => (a - b).abs() < SIZE_EPSILON,
    _ => false,
  }
}

impl CacheEntry {
  fn signature_matches(&self, input: &LayoutInput) -> bool {
    known_dim_matches(self.input.known_width, input.known_width)
      && known_dim_matches(self.input.known_height, input.known_height)
      && available_space_matches(self.input.available_width, input.available_width)
      && available_space_matches(self.input.available_height, input.available_height)
  }

  /// Alternative reuse rule: every known dimension the request carries
  /// equals this entry's output size. This lets a full-layout query reuse
  /// an earlier size-only measurement whose result already settled the
  /// requested axis.
  fn output_matches_known(&self, input: &LayoutInput) -> bool {
    if input.known_width.is_none() && input.known_height.is_none() {
      return false;
    }
    if let Some(w) = input.known_width {
      if (self.output.width - w).abs() >= SIZE_EPSILON {
        return false;
      }
    }
    if let Some(h) = input.known_height {
      if (self.output.height - h).abs() >= SIZE_EPSILON {
        return false;
      }
    }
    true
  }

  fn matches(&self, input: &LayoutInput) -> bool {
    self.signature_matches(input) || self.output_matches_known(input)
  }
}

/// The per-node cache: 1 final + 9 measure slots behind a validity mask.
#[derive(Debug, Default)]
pub struct LayoutCache {
  final_entry: Option<CacheEntry>,
  measure: [Option<CacheEntry>; MEASURE_SLOT_COUNT],
  /// Bit 0 = final slot, bits 1-9 = measure slots.
  valid: u16,
}

impl LayoutCache {
  pub fn new() -> Self {
    Self::default()
  }

  #[inline]
  fn final_valid(&self) -> bool {
    self.valid & 1 != 0
  }

  #[inline]
  fn measure_valid(&self, slot: usize) -> bool {
    self.valid & (1 << (slot + 1)) != 0
  }

  /// Looks up a cached result for `input`.
  ///
  /// Full-layout queries consult only the final slot; size-only queries
  /// scan the nine measure slots. Both use the same matching rule:
  /// signature equality (definite values within epsilon, keywords by
  /// kind), or the requested known dimensions equaling the cached output
  /// size.
  pub fn get_output(&self, input: &LayoutInput, mode: MeasureMode) -> Option<LayoutOutput> {
    match mode {
      MeasureMode::PerformLayout => {
        if !self.final_valid() {
          return None;
        }
        let entry = self.final_entry.as_ref()?;
        entry.matches(input).then_some(entry.output)
      }
      MeasureMode::ComputeSize => {
        for slot in 0..MEASURE_SLOT_COUNT {
          if !self.measure_valid(slot) {
            continue;
          }
          if let Some(entry) = self.measure[slot].as_ref() {
            if entry.matches(input) {
              return Some(entry.output);
            }
          }
        }
        None
      }
    }
  }

  /// Stores a size-only measurement in the slot picked by the classifier.
  pub fn store_measure(&mut self, input: LayoutInput, output: LayoutOutput) {
    let slot = compute_cache_slot(
      input.known_width.is_some(),
      input.known_height.is_some(),
      input.available_width,
      input.available_height,
    );
    self.measure[slot] = Some(CacheEntry { input, output });
    self.valid |= 1 << (slot + 1);
  }

  /// Stores the result of a committed full layout in the final slot.
  pub fn store_final(&mut self, input: LayoutInput, output: LayoutOutput) {
    self.final_entry = Some(CacheEntry { input, output });
    self.valid |= 1;
  }

  /// The final slot's output regardless of input signature, for readback
  /// after a committed layout pass.
  pub fn final_output(&self) -> Option<LayoutOutput> {
    if !self.final_valid() {
      return None;
    }
    self.final_entry.as_ref().map(|e| e.output)
  }

  /// Invalidates everything by resetting the validity mask. Entry payloads
  /// are not wiped.
  pub fn clear(&mut self) {
    self.valid = 0;
  }

  /// True when no slot is valid.
  pub fn is_empty(&self) -> bool {
    self.valid == 0
  }
}
