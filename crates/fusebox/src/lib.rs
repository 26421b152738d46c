// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(docsrs, feature(doc_cfg))]

//! Traffic control for code: a circuit breaker with pluggable state storage.
//!
//! A circuit breaker wraps calls to an unreliable collaborator and keeps a
//! shared tally of their outcomes. While the collaborator behaves, calls flow
//! through (**green**). When failures breach the configured policy, the
//! breaker opens (**red**) and rejects calls without running them, giving the
//! collaborator room to recover. After a cool-off it lets a probe through
//! (**yellow**); probe outcomes decide whether the breaker closes again.
//!
//! ```text
//!            failures breach policy
//!   GREEN ----------------------------> RED
//!     ^                                  |
//!     | probes satisfy        cool-off   |
//!     |   recovery            elapses    |
//!     |                                  v
//!     +------------- YELLOW <-----------+
//!          (failed probe reopens RED)
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use fusebox::{CircuitBreaker, Config};
//!
//! let breaker = CircuitBreaker::new(Config::builder("payments-api").build()?);
//!
//! match breaker.run(|| call_payment_service()) {
//!     Ok(receipt) => println!("charged: {receipt}"),
//!     Err(error) if error.is_open() => println!("payments degraded, try later"),
//!     Err(error) => return Err(error.into()),
//! }
//! # fn call_payment_service() -> Result<String, std::io::Error> {
//! #     Ok("receipt-1".to_string())
//! # }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Shared state
//!
//! All durable state lives behind the [`backend::StateBackend`] trait, keyed
//! by breaker name. The built-in [`backend::MemoryBackend`] serves a single
//! process; the companion `fusebox_redis` crate implements the same contract
//! over Redis so every instance of a service agrees on one breaker's color.
//! Backend failures never reach protected calls: they degrade through
//! [`backend::FailSafe`] and are reported to the configured error notifier.
//!
//! # Policies
//!
//! [`TrafficControl`] decides when to open (consecutive failures or error
//! rate over a sliding window) and [`TrafficRecovery`] decides when to close
//! (a single successful probe or a run of consecutive ones). Both are closed
//! enums validated against the threshold at configuration build time.

pub mod backend;
mod breaker;
mod classifier;
pub mod clock;
mod color;
mod config;
mod defaults;
mod error;
mod failure;
mod metadata;
mod notifier;
mod strategy;
mod traffic_control;
mod traffic_recovery;

pub use breaker::CircuitBreaker;
pub use classifier::ErrorClassifier;
pub use color::{Color, ParseColorError};
pub use config::{Config, ConfigBuilder};
pub use defaults::{Defaults, configure};
pub use error::{BackendError, ConfigError, LockError, NotifierError, RunError};
pub use failure::Failure;
pub use metadata::{LockState, Metadata, ParseLockStateError};
pub use notifier::{ErrorNotifier, LogNotifier, Notifier, default_error_notifier};
pub use traffic_control::TrafficControl;
pub use traffic_recovery::TrafficRecovery;
