// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The cache's three counters. They are process-wide, incremented with
//! relaxed atomics by every cache instance, and never touched under the
//! cache lock.

use lazy_static::lazy_static;
use prometheus::core::{AtomicU64, GenericCounter};

lazy_static! {
    /// Reads satisfied from a resident line.
    pub static ref HITS: Box<GenericCounter<AtomicU64>> = {
        Box::new(
            GenericCounter::<AtomicU64>::new(
                "vdev_cache_hits",
                "Reads satisfied from a resident cache line",
            )
            .expect("Defining the vdev_cache_hits metric must succeed"),
        )
    };
    /// Reads that triggered a device fill.
    pub static ref MISSES: Box<GenericCounter<AtomicU64>> = {
        Box::new(
            GenericCounter::<AtomicU64>::new(
                "vdev_cache_misses",
                "Reads that triggered a device fill",
            )
            .expect("Defining the vdev_cache_misses metric must succeed"),
        )
    };
    /// Reads queued onto another read's outstanding fill.
    pub static ref DELEGATIONS: Box<GenericCounter<AtomicU64>> = {
        Box::new(
            GenericCounter::<AtomicU64>::new(
                "vdev_cache_delegations",
                "Reads queued onto another read's outstanding fill",
            )
            .expect("Defining the vdev_cache_delegations metric must succeed"),
        )
    };
}

/// Register the `vdev_cache_*` counter block with the global registry.
/// Idempotent; the counters count whether or not they are registered.
pub fn stat_init() {
    let registry = prometheus::default_registry();
    for counter in [&*HITS, &*MISSES, &*DELEGATIONS] {
        match registry.register(counter.clone()) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => {
                panic!("Registering the vdev cache metrics with the metrics registry must succeed: {e}")
            }
        }
    }
}

/// Drop the counter block from the global registry.
pub fn stat_fini() {
    let registry = prometheus::default_registry();
    for counter in [&*HITS, &*MISSES, &*DELEGATIONS] {
        let _ = registry.unregister(counter.clone());
    }
}
