// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use crate::zio::Zio;

/// Book-keeping for a line whose device fill is still outstanding.
#[derive(Default)]
pub(crate) struct Fill {
    /// Client reads awaiting this fill, in arrival order.
    pub delegates: Vec<Arc<Zio>>,
    /// A write overlapped the line mid-fill. Queued delegates still get the
    /// pre-write view; the entry is evicted once the fill completes.
    pub missed_update: bool,
}

pub(crate) enum LineState {
    /// `data` holds the device contents, patched by any later writes.
    Ready,
    /// The device read is in flight; `data` must not be served.
    Filling(Fill),
}

/// One cache line. Lives in the offset index and the LRU index, always in
/// both or in neither; every field is guarded by the cache lock.
pub(crate) struct CacheEntry {
    /// Aligned device offset, a multiple of the line size.
    pub offset: u64,
    /// Tick of the most recent access. Updates go through `Inner::touch` so
    /// the LRU index stays in step.
    pub last_used: u64,
    /// Telemetry only.
    pub hits: u64,
    /// Exactly one line of device data.
    pub data: Vec<u8>,
    pub state: LineState,
}

impl CacheEntry {
    pub fn is_filling(&self) -> bool {
        matches!(self.state, LineState::Filling(_))
    }

    /// Composite LRU key; the offset keeps the order total even if two
    /// entries ever carried the same tick.
    pub fn lru_key(&self) -> (u64, u64) {
        (self.last_used, self.offset)
    }
}
