// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Cache error
///
/// The first three variants mean the request falls outside the cache's
/// policy and the caller must perform its own device I/O; cache state is
/// unchanged. `Clone` lets a single device error fan out to every delegate
/// of a failed fill.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("I/O is flagged uncacheable")]
    Uncacheable,
    #[error("I/O of {0} bytes exceeds the cacheable maximum")]
    TooLarge(usize),
    #[error("I/O crosses a cache line boundary")]
    CrossesLine,
    #[error("cache line was invalidated by a write during its fill")]
    Stale,
    #[error("no cache line available")]
    NoSpace,
    #[error("device error: {0}")]
    Device(String),
}

impl From<Error> for String {
    fn from(e: Error) -> Self {
        e.to_string()
    }
}
