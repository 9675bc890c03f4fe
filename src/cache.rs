// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The cache engine: indices, LRU eviction, and the
//! allocate / fill / read / write / evict state machine.
//!
//! One instance serves one device. A read that misses widens to an aligned
//! line-sized device fill; readers of the same missing line piggy-back on
//! the outstanding fill instead of issuing their own. Writes never touch the
//! device through the cache: they patch resident lines in place, or doom a
//! line whose fill they overlapped.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, Fill, LineState};
use crate::errors::Error;
use crate::metrics;
use crate::zio::{ChildIo, Vdev, Zio, ZioFlags, ZioPriority, ZioType};

fn align_down(x: u64, align: u64) -> u64 {
    x & !(align - 1)
}

fn align_up(x: u64, align: u64) -> u64 {
    align_down(x + align - 1, align)
}

/// Index state, all guarded by the one cache mutex.
#[derive(Default)]
struct Inner {
    /// Offset index: aligned line offset to entry.
    lines: BTreeMap<u64, CacheEntry>,
    /// LRU index keyed `(last_used, offset)`; first element is the eldest.
    lru: BTreeSet<(u64, u64)>,
    /// Coarse monotonic clock, bumped under the lock before every stamp.
    tick: u64,
}

impl Inner {
    /// Refresh `last_used`, re-seating the entry in the LRU index.
    fn touch(&mut self, offset: u64) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.lines.get_mut(&offset) {
            self.lru.remove(&entry.lru_key());
            entry.last_used = tick;
            self.lru.insert(entry.lru_key());
        }
    }

    /// Remove an entry from both indices. The entry must not be filling;
    /// the fill callback drains delegates before eviction is reachable.
    fn evict(&mut self, offset: u64) {
        if let Some(entry) = self.lines.remove(&offset) {
            debug_assert!(!entry.is_filling());
            self.lru.remove(&entry.lru_key());
            trace!(
                "vdev cache: evicted line {:#x} after {} hits",
                offset,
                entry.hits
            );
        }
    }
}

struct Shared {
    config: CacheConfig,
    line_size: usize,
    vdev: Arc<dyn Vdev>,
    inner: Mutex<Inner>,
}

/// Per-device read-ahead cache.
///
/// `read` either rejects the I/O (caller issues it uncached) or absorbs it:
/// an absorbed I/O is bypassed and will be resumed through [`Zio::execute`],
/// possibly before `read` returns. Dropping the cache releases every line;
/// callers quiesce the device first so no fill is in flight.
pub struct VdevCache {
    shared: Arc<Shared>,
}

enum Lookup {
    Stale,
    Delegated,
    Hit,
    Miss,
}

impl VdevCache {
    pub fn new(vdev: Arc<dyn Vdev>, config: CacheConfig) -> Self {
        let line_size = config.line_size();
        debug!(
            "vdev cache: {} byte lines, {} byte budget, max cacheable I/O {} bytes",
            line_size, config.size_limit, config.max_io_size
        );
        Self {
            shared: Arc::new(Shared {
                line_size,
                config,
                vdev,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Number of resident lines.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently pinned by resident lines.
    pub fn resident_bytes(&self) -> usize {
        self.len() * self.shared.line_size
    }

    /// Try to absorb a client read.
    ///
    /// On `Ok(())` the I/O has been bypassed and its completion will be (or
    /// already was) delivered through [`Zio::execute`]; the caller must not
    /// issue it to the device. On error the cache is untouched and the
    /// caller performs its own uncached I/O.
    pub fn read(&self, io: &Arc<Zio>) -> Result<(), Error> {
        debug_assert_eq!(io.kind(), ZioType::Read);

        if io.flags().contains(ZioFlags::DONT_CACHE) {
            return Err(Error::Uncacheable);
        }
        if io.size() > self.shared.config.max_io_size {
            return Err(Error::TooLarge(io.size()));
        }
        let line = self.shared.line_size as u64;
        let line_offset = align_down(io.offset(), line);
        if (io.offset() - line_offset) + io.size() as u64 > line {
            return Err(Error::CrossesLine);
        }

        let mut inner = self.shared.inner.lock();
        let outcome = match inner.lines.get_mut(&line_offset) {
            Some(entry) => match &mut entry.state {
                LineState::Filling(fill) if fill.missed_update => Lookup::Stale,
                LineState::Filling(fill) => {
                    fill.delegates.push(Arc::clone(io));
                    io.bypass();
                    Lookup::Delegated
                }
                LineState::Ready => {
                    let start = (io.offset() - line_offset) as usize;
                    io.data().copy_from_slice(&entry.data[start..start + io.size()]);
                    entry.hits += 1;
                    io.bypass();
                    Lookup::Hit
                }
            },
            None => Lookup::Miss,
        };

        match outcome {
            Lookup::Stale => return Err(Error::Stale),
            Lookup::Delegated => {
                drop(inner);
                metrics::DELEGATIONS.inc();
                return Ok(());
            }
            Lookup::Hit => {
                inner.touch(line_offset);
                drop(inner);
                io.execute();
                metrics::HITS.inc();
                return Ok(());
            }
            Lookup::Miss => {}
        }

        if !self.allocate(&mut inner, line_offset) {
            return Err(Error::NoSpace);
        }
        if let Some(entry) = inner.lines.get_mut(&line_offset) {
            if let LineState::Filling(fill) = &mut entry.state {
                fill.delegates.push(Arc::clone(io));
            }
        }
        io.bypass();
        drop(inner);

        let shared = Arc::clone(&self.shared);
        let child = ChildIo::new(
            line_offset,
            vec![0; self.shared.line_size],
            ZioPriority::CacheFill,
            ZioFlags::DONT_CACHE
                | ZioFlags::DONT_PROPAGATE
                | ZioFlags::DONT_RETRY
                | ZioFlags::NO_BOOKMARK,
            Box::new(move |child, error| Shared::fill_done(&shared, child, error)),
        );
        self.shared.vdev.submit_read(child);
        metrics::MISSES.inc();
        Ok(())
    }

    /// Note a client write.
    ///
    /// The write itself flows past the cache to the device; here each
    /// overlapped resident line is patched in place, and each overlapped
    /// in-flight fill is doomed (its entry is evicted once the fill
    /// completes, after already-queued delegates got the pre-write view).
    /// Writes do not refresh `last_used`.
    pub fn write(&self, io: &Zio) {
        debug_assert_eq!(io.kind(), ZioType::Write);

        if io.size() == 0 {
            return;
        }
        let line = self.shared.line_size as u64;
        let start = align_down(io.offset(), line);
        let end = align_up(io.offset() + io.size() as u64, line);

        let mut inner = self.shared.inner.lock();
        let src = io.data();
        for (&entry_offset, entry) in inner.lines.range_mut(start..end) {
            match &mut entry.state {
                LineState::Filling(fill) => fill.missed_update = true,
                LineState::Ready => {
                    let patch_start = io.offset().max(entry_offset);
                    let patch_end = (io.offset() + io.size() as u64).min(entry_offset + line);
                    let dst = (patch_start - entry_offset) as usize;
                    let from = (patch_start - io.offset()) as usize;
                    let n = (patch_end - patch_start) as usize;
                    entry.data[dst..dst + n].copy_from_slice(&src[from..from + n]);
                }
            }
        }
    }

    /// Evict every resident line. Callers quiesce the device first; a fill
    /// still in flight here is a contract violation.
    pub fn purge(&self) {
        let mut inner = self.shared.inner.lock();
        debug_assert!(inner.lines.values().all(|entry| !entry.is_filling()));
        let evicted = inner.lines.len();
        inner.lines.clear();
        inner.lru.clear();
        if evicted > 0 {
            debug!("vdev cache: purged {} lines", evicted);
        }
    }

    /// Carve out a fresh filling entry for `line_offset`, evicting the LRU
    /// front if the budget demands it. Returns false when caching is
    /// disabled, or when the budget is full and the front is pinned by its
    /// own outstanding fill.
    fn allocate(&self, inner: &mut Inner, line_offset: u64) -> bool {
        let line = self.shared.line_size;
        if self.shared.config.size_limit == 0 {
            return false;
        }
        if (inner.lines.len() + 1) * line > self.shared.config.size_limit {
            if let Some(&(_, victim)) = inner.lru.iter().next() {
                let pinned = inner
                    .lines
                    .get(&victim)
                    .map_or(false, CacheEntry::is_filling);
                if pinned {
                    return false;
                }
                inner.evict(victim);
            }
        }
        inner.tick += 1;
        let entry = CacheEntry {
            offset: line_offset,
            last_used: inner.tick,
            hits: 0,
            data: vec![0; line],
            state: LineState::Filling(Fill::default()),
        };
        inner.lru.insert(entry.lru_key());
        inner.lines.insert(line_offset, entry);
        true
    }
}

impl Shared {
    /// Device completion for a line fill.
    ///
    /// Queued delegates were issued before any conflicting write, so they
    /// are entitled to the pre-write view and are served even when
    /// `missed_update` is set; the entry is evicted right after the drain in
    /// that case, and on device error. Delegates are resumed outside the
    /// lock.
    fn fill_done(shared: &Arc<Shared>, child: ChildIo, error: Option<Error>) {
        let line_offset = child.offset();
        let failed = error.is_some();
        let fill;
        {
            let mut inner = shared.inner.lock();
            let Some(entry) = inner.lines.get_mut(&line_offset) else {
                warn!(
                    "vdev cache: fill completion for line {:#x} with no entry; \
                     was the cache purged with a fill in flight?",
                    line_offset
                );
                return;
            };
            fill = match mem::replace(&mut entry.state, LineState::Ready) {
                LineState::Filling(fill) => fill,
                LineState::Ready => {
                    warn!(
                        "vdev cache: duplicate fill completion for line {:#x}",
                        line_offset
                    );
                    return;
                }
            };
            if !failed {
                entry.data = child.into_data();
                for io in &fill.delegates {
                    let start = (io.offset() - line_offset) as usize;
                    io.data().copy_from_slice(&entry.data[start..start + io.size()]);
                    entry.hits += 1;
                }
                if !fill.delegates.is_empty() {
                    inner.touch(line_offset);
                }
            }
            if failed || fill.missed_update {
                inner.evict(line_offset);
            }
        }
        for io in &fill.delegates {
            if let Some(error) = &error {
                io.set_error(error.clone());
            }
            io.execute();
        }
    }
}
