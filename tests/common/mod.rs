// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

#![allow(dead_code)]

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;

use parking_lot::Mutex;
use vdev_cache::metrics::{DELEGATIONS, HITS, MISSES};
use vdev_cache::{ChildIo, Error, Vdev, Zio, ZioFlags, ZioPriority};

/// In-memory device. Immediate mode serves each fill inline on the
/// submitting thread; deferred mode parks fills until the test releases
/// them with `complete_all` or `fail_all`.
pub struct MockVdev {
    image: Mutex<Vec<u8>>,
    pending: Mutex<Vec<ChildIo>>,
    deferred: bool,
    reads: AtomicU64,
}

impl MockVdev {
    pub fn new(size: usize) -> Arc<Self> {
        Self::with_mode(size, false)
    }

    pub fn deferred(size: usize) -> Arc<Self> {
        Self::with_mode(size, true)
    }

    fn with_mode(size: usize, deferred: bool) -> Arc<Self> {
        let image = (0..size).map(|i| (i * 7 + 13) as u8).collect();
        Arc::new(Self {
            image: Mutex::new(image),
            pending: Mutex::new(Vec::new()),
            deferred,
            reads: AtomicU64::new(0),
        })
    }

    /// Number of fills the cache has submitted.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Fills parked by deferred mode.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Current device contents at `offset`.
    pub fn slice(&self, offset: u64, len: usize) -> Vec<u8> {
        let start = offset as usize;
        self.image.lock()[start..start + len].to_vec()
    }

    /// Apply a write to the device image, as the layer below the cache
    /// would.
    pub fn patch(&self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        self.image.lock()[start..start + data.len()].copy_from_slice(data);
    }

    /// Serve every parked fill from the current image.
    pub fn complete_all(&self) {
        let drained = mem::take(&mut *self.pending.lock());
        for child in drained {
            self.serve(child);
        }
    }

    /// Fail every parked fill with `error`.
    pub fn fail_all(&self, error: &Error) {
        let drained = mem::take(&mut *self.pending.lock());
        for child in drained {
            child.complete(Some(error.clone()));
        }
    }

    fn serve(&self, mut child: ChildIo) {
        let start = child.offset() as usize;
        let end = start + child.len();
        child.data_mut().copy_from_slice(&self.image.lock()[start..end]);
        child.complete(None);
    }
}

impl Vdev for MockVdev {
    fn submit_read(&self, child: ChildIo) {
        // every fill the cache issues is a speculative, non-cached,
        // non-retried read
        assert_eq!(child.priority(), ZioPriority::CacheFill);
        assert!(child.flags().contains(
            ZioFlags::DONT_CACHE
                | ZioFlags::DONT_PROPAGATE
                | ZioFlags::DONT_RETRY
                | ZioFlags::NO_BOOKMARK
        ));
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.deferred {
            self.pending.lock().push(child);
        } else {
            self.serve(child);
        }
    }
}

/// A read whose completion is observable through a channel: the receiver
/// yields the I/O's error slot once the cache resumes it.
pub fn read_io(offset: u64, size: usize) -> (Arc<Zio>, Receiver<Option<Error>>) {
    let io = Zio::read(offset, size);
    let (tx, rx) = channel();
    io.set_done(move |zio| {
        let _ = tx.send(zio.error());
    });
    (io, rx)
}

/// Run `f` and return the `(hits, misses, delegations)` counter deltas it
/// produced. The counters are process-global, so measurements are
/// serialized behind a lock.
pub fn with_stats(f: impl FnOnce()) -> (u64, u64, u64) {
    static LOCK: Mutex<()> = Mutex::new(());
    let _guard = LOCK.lock();
    let (hits, misses, delegations) = (HITS.get(), MISSES.get(), DELEGATIONS.get());
    f();
    (
        HITS.get() - hits,
        MISSES.get() - misses,
        DELEGATIONS.get() - delegations,
    )
}
