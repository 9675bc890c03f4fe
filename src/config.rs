// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};

/// Largest client I/O the cache will absorb, in bytes.
pub const DEFAULT_MAX_IO_SIZE: usize = 16 << 10;
/// Aggregate byte budget of a cache instance.
pub const DEFAULT_SIZE_LIMIT: usize = 10 << 20;
/// log2 of the cache line size; 16 gives 64 KiB lines.
pub const DEFAULT_LINE_SHIFT: u32 = 16;

/// Read-ahead cache configuration, snapshotted per device at cache
/// construction. Only a subset of conceivable knobs is implemented, add
/// missing ones when needed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Client reads larger than this are not eligible for caching.
    pub max_io_size: usize,
    /// Aggregate byte budget. 0 disables allocation entirely: misses flow
    /// through uncached while any resident entries keep serving hits.
    pub size_limit: usize,
    /// log2 of the line size. Every device fill reads exactly
    /// `1 << line_shift` bytes at an aligned offset.
    pub line_shift: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_io_size: DEFAULT_MAX_IO_SIZE,
            size_limit: DEFAULT_SIZE_LIMIT,
            line_shift: DEFAULT_LINE_SHIFT,
        }
    }
}

impl CacheConfig {
    /// Line size in bytes.
    pub fn line_size(&self) -> usize {
        1 << self.line_shift
    }
}
