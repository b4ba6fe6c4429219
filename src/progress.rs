/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::progress
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Percentage callbacks shared between the orchestrator,
    feed reader, and fetch pipeline.

  Security / Safety Notes:
    Callbacks are invoked while holding the accumulator lock;
    implementations must not call back into the pipeline.

  Dependencies:
    Standard library only.

  Operational Scope:
    Sub-ranges scale nested phases into an outer range; the
    weighted accumulator folds per-file progress into one
    monotonic figure.

  Revision History:
    2025-11-17 COD  Introduced progress plumbing.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Monotonic reporting under concurrency
    - No allocation on the reporting path
============================================================*/

use std::sync::{Arc, Mutex};

/// Callback receiving a percentage in `0..=100`.
pub type Progress = Arc<dyn Fn(u8) + Send + Sync>;

/// Callback that discards every report.
pub fn silent() -> Progress {
    Arc::new(|_| {})
}

/// Map `0..=100` reported to the returned callback onto `start..=end` of
/// `outer`.
pub fn sub_range(outer: &Progress, start: u8, end: u8) -> Progress {
    let outer = Arc::clone(outer);
    let start = start.min(100);
    let end = end.clamp(start, 100);
    Arc::new(move |percent: u8| {
        let span = u32::from(end - start);
        let scaled = u32::from(start) + span * u32::from(percent.min(100)) / 100;
        outer(scaled as u8);
    })
}

#[derive(Debug)]
struct WeightedState {
    items: Vec<u8>,
    reported: u8,
}

/// Folds per-item percentages into an aggregate where each of `count` items
/// weighs `100 / count`. Reports never decrease.
pub struct WeightedProgress {
    state: Mutex<WeightedState>,
    sink: Progress,
}

impl WeightedProgress {
    pub fn new(count: usize, sink: Progress) -> Self {
        Self {
            state: Mutex::new(WeightedState {
                items: vec![0; count],
                reported: 0,
            }),
            sink,
        }
    }

    /// Record `percent` for item `index` and forward the aggregate if it grew.
    pub fn update(&self, index: usize, percent: u8) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let Some(slot) = state.items.get_mut(index) else {
            return;
        };
        *slot = (*slot).max(percent.min(100));

        let count = state.items.len() as u64;
        let sum: u64 = state.items.iter().map(|value| u64::from(*value)).sum();
        let aggregate = (sum / count.max(1)) as u8;
        if aggregate > state.reported {
            state.reported = aggregate;
            (self.sink)(aggregate);
        }
    }

    pub fn complete(&self, index: usize) {
        self.update(index, 100);
    }

    /// Highest aggregate forwarded so far.
    pub fn reported(&self) -> u8 {
        self.state.lock().map(|state| state.reported).unwrap_or(0)
    }
}
