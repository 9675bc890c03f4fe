// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-device read-ahead block cache.
//!
//! Sits between a block-addressable client and a raw block device. A small
//! read is widened to an aligned, power-of-two *cache line*: the cache
//! fetches the whole line from the device, hands the requested slice to the
//! caller, and keeps the remainder to satisfy future nearby reads, turning
//! bursts of small sequential reads into one device I/O plus in-memory
//! copies.
//!
//! Concurrent readers of the same missing line coalesce onto a single
//! outstanding fill: late arrivals are *delegated*, queued on the fill's
//! completion list instead of issuing their own device read. Writes flow
//! past the cache and either patch resident lines in place or doom a line
//! whose fill they overlapped.
//!
//! The cache is volatile and strictly per-device; it prefetches on spatial
//! locality only and makes no attempt at pattern-based read-ahead.

mod cache;
mod config;
mod entry;
mod errors;
pub mod metrics;
mod zio;

pub use cache::VdevCache;
pub use config::{CacheConfig, DEFAULT_LINE_SHIFT, DEFAULT_MAX_IO_SIZE, DEFAULT_SIZE_LIMIT};
pub use errors::Error;
pub use metrics::{stat_fini, stat_init};
pub use zio::{ChildIo, Vdev, Zio, ZioFlags, ZioPriority, ZioType};
