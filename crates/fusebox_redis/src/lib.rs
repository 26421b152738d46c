// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(docsrs, feature(doc_cfg))]

//! Redis-backed shared state for `fusebox` circuit breakers.
//!
//! With the in-memory backend every process keeps its own tally, so a
//! collaborator failing for one instance of a service stays green for its
//! siblings. This crate stores breaker state in Redis instead: every process
//! pointed at the same server and prefix observes one shared breaker per
//! name, with the same atomicity guarantees the memory backend provides
//! in-process.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fusebox::{CircuitBreaker, Config};
//! use fusebox_redis::RedisBackend;
//!
//! let backend = Arc::new(RedisBackend::new("redis://127.0.0.1/")?);
//! let breaker = CircuitBreaker::new(
//!     Config::builder("payments-api").backend(backend).build()?,
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Storage layout
//!
//! Keys are prefixed (default `fusebox`) and versioned (`v1`): sorted sets of
//! failure and success events per breaker, a hash of scalar counters and
//! timestamps per breaker, one hash of lock tokens, and one sorted set of
//! last-used times. Multi-step updates run as server-side Lua scripts
//! (`EVALSHA` with automatic reload), and color transitions are a
//! compare-and-set on a marker field, so concurrent processes never observe
//! half-applied updates and each logical transition has exactly one winner.

mod backend;
mod keys;
mod scripts;

pub use backend::{RedisBackend, RedisBackendBuilder};
pub use keys::DEFAULT_PREFIX;
