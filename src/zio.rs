// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Descriptor types for the I/O pipeline the cache plugs into.
//!
//! The cache sits below a block-addressable client and above a raw device.
//! Client requests arrive as [`Zio`] descriptors; device fills leave as
//! [`ChildIo`] requests through the [`Vdev`] trait. A `Zio` the cache
//! absorbs is marked *bypassed* (this layer satisfies it, the pipeline must
//! not dispatch it downstream) and later *executed* (its completion callback
//! runs, exactly once).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};

use crate::errors::Error;

bitflags! {
    /// Pipeline flags carried by every I/O.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ZioFlags: u32 {
        /// Never absorb this I/O into a cache layer.
        const DONT_CACHE = 1 << 0;
        /// Do not propagate errors to the parent I/O.
        const DONT_PROPAGATE = 1 << 1;
        /// Do not retry on device error.
        const DONT_RETRY = 1 << 2;
        /// No logical-block bookmark is attached.
        const NO_BOOKMARK = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZioType {
    Read,
    Write,
}

/// Scheduling class of a device I/O. The cache issues speculative line
/// fills only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZioPriority {
    /// Speculative read issued by the cache to populate a line.
    CacheFill,
}

type DoneFn = Box<dyn FnOnce(&Zio) + Send>;

/// A client I/O descriptor.
///
/// The buffer and error slot are interior-mutable so the cache can fill a
/// delegated read and stamp its error on whatever thread the device
/// completion runs on. Lock order is cache lock first, then the buffer.
pub struct Zio {
    kind: ZioType,
    offset: u64,
    size: usize,
    flags: ZioFlags,
    data: Mutex<Vec<u8>>,
    error: Mutex<Option<Error>>,
    bypassed: AtomicBool,
    done: Mutex<Option<DoneFn>>,
}

impl Zio {
    /// A read of `size` bytes at `offset`, with a zeroed destination buffer.
    pub fn read(offset: u64, size: usize) -> Arc<Self> {
        Self::read_with_flags(offset, size, ZioFlags::empty())
    }

    pub fn read_with_flags(offset: u64, size: usize, flags: ZioFlags) -> Arc<Self> {
        Arc::new(Self {
            kind: ZioType::Read,
            offset,
            size,
            flags,
            data: Mutex::new(vec![0; size]),
            error: Mutex::new(None),
            bypassed: AtomicBool::new(false),
            done: Mutex::new(None),
        })
    }

    /// A write of `data` at `offset`.
    pub fn write(offset: u64, data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            kind: ZioType::Write,
            offset,
            size: data.len(),
            flags: ZioFlags::empty(),
            data: Mutex::new(data),
            error: Mutex::new(None),
            bypassed: AtomicBool::new(false),
            done: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> ZioType {
        self.kind
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn flags(&self) -> ZioFlags {
        self.flags
    }

    /// The I/O buffer: destination of a read, source of a write.
    pub fn data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock()
    }

    pub fn error(&self) -> Option<Error> {
        self.error.lock().clone()
    }

    pub fn set_error(&self, error: Error) {
        *self.error.lock() = Some(error);
    }

    /// Install the completion callback run by [`Zio::execute`].
    pub fn set_done(&self, done: impl FnOnce(&Zio) + Send + 'static) {
        *self.done.lock() = Some(Box::new(done));
    }

    /// Mark this I/O satisfied by the cache layer; the pipeline must not
    /// dispatch it to the device.
    pub fn bypass(&self) {
        self.bypassed.store(true, Ordering::Release);
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Acquire)
    }

    /// Resume a previously absorbed I/O by running its completion callback.
    /// Subsequent calls are no-ops.
    pub fn execute(&self) {
        let done = self.done.lock().take();
        if let Some(done) = done {
            done(self);
        }
    }
}

type FillDoneFn = Box<dyn FnOnce(ChildIo, Option<Error>) + Send>;

/// A device read constructed by the cache to populate one line.
///
/// The child owns its buffer; the device fills it and hands it back through
/// [`ChildIo::complete`], which must be invoked exactly once, on any thread,
/// even when the read is cancelled or fails.
pub struct ChildIo {
    offset: u64,
    data: Vec<u8>,
    priority: ZioPriority,
    flags: ZioFlags,
    done: Option<FillDoneFn>,
}

impl ChildIo {
    pub(crate) fn new(
        offset: u64,
        data: Vec<u8>,
        priority: ZioPriority,
        flags: ZioFlags,
        done: FillDoneFn,
    ) -> Self {
        Self {
            offset,
            data,
            priority,
            flags,
            done: Some(done),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Scheduling class the device should queue this read under.
    pub fn priority(&self) -> ZioPriority {
        self.priority
    }

    /// Pipeline flags the device honours for this read.
    pub fn flags(&self) -> ZioFlags {
        self.flags
    }

    /// The buffer the device reads into.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Deliver the completion, passing the filled buffer back to the cache.
    pub fn complete(mut self, error: Option<Error>) {
        if let Some(done) = self.done.take() {
            done(self, error);
        }
    }
}

/// Interface to the underlying block device.
pub trait Vdev: Send + Sync {
    /// Submit an asynchronous device read without blocking. The device
    /// invokes [`ChildIo::complete`] exactly once when the read finishes.
    fn submit_read(&self, child: ChildIo);
}
