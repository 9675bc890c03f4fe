// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod common;

use common::{read_io, with_stats, MockVdev};
use vdev_cache::{stat_fini, stat_init, CacheConfig, VdevCache};

const LINE: u64 = 64 * 1024;
const DEVICE: usize = 16 * LINE as usize;

#[test]
fn counters_are_registered_under_the_vdev_cache_block() {
    stat_init();
    let names: Vec<String> = prometheus::default_registry()
        .gather()
        .iter()
        .map(|family| family.get_name().to_owned())
        .collect();
    for name in ["vdev_cache_hits", "vdev_cache_misses", "vdev_cache_delegations"] {
        assert!(names.contains(&name.to_owned()), "{name} not registered");
    }
    stat_fini();
    let names: Vec<String> = prometheus::default_registry()
        .gather()
        .iter()
        .map(|family| family.get_name().to_owned())
        .collect();
    assert!(!names.contains(&"vdev_cache_misses".to_owned()));
}

#[test]
fn one_miss_then_one_hit() {
    let dev = MockVdev::new(DEVICE);
    let cache = VdevCache::new(dev.clone(), CacheConfig::default());

    let deltas = with_stats(|| {
        let (io, rx) = read_io(0, 512);
        cache.read(&io).unwrap();
        assert_eq!(rx.recv().unwrap(), None);

        let (io, rx) = read_io(512, 512);
        cache.read(&io).unwrap();
        assert_eq!(rx.recv().unwrap(), None);
        assert_eq!(dev.reads(), 1);
    });
    assert_eq!(deltas, (1, 1, 0));
}

#[test]
fn coalesced_miss_counts_one_delegation() {
    let dev = MockVdev::deferred(DEVICE);
    let cache = VdevCache::new(dev.clone(), CacheConfig::default());

    let deltas = with_stats(|| {
        let (first, rx1) = read_io(0, 512);
        let (second, rx2) = read_io(1024, 512);
        cache.read(&first).unwrap();
        cache.read(&second).unwrap();
        assert_eq!(dev.reads(), 1);

        // both are suspended until the single fill completes
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
        dev.complete_all();
        assert_eq!(rx1.recv().unwrap(), None);
        assert_eq!(rx2.recv().unwrap(), None);
        assert_eq!(*first.data(), dev.slice(0, 512));
        assert_eq!(*second.data(), dev.slice(1024, 512));
    });
    assert_eq!(deltas, (0, 1, 1));
}
