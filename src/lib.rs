//! # droster
//!
//! ![License](https://img.shields.io/badge/license-MIT%20%7C%20Apache--2.0-blue)
//!
//! The coordinator-side authoritative server list of a distributed storage
//! cluster: a versioned registry that tracks every enlisted server, assigns
//! each a stable identity, sequences membership-change notifications, and
//! asynchronously disseminates cluster-view updates to every member that
//! subscribes to membership notifications.
//!
//! ## Features
//! - **Stable identities**: slot index + generation ids that can never be
//!   confused across server incarnations
//! - **Versioned change log**: every membership transition commits as one
//!   atomic version bump
//! - **Background dissemination**: bounded-concurrency update RPCs with
//!   timeouts, cancellation and backlog pruning
//! - **Observability**: structured logging and prometheus metrics
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//!
//! use droster::CoordinatorServerList;
//! use droster::GrpcUpdateRpcFactory;
//! use droster::RosterConfig;
//! use droster::ServiceMask;
//! use droster::proto::ServiceType;
//!
//! # fn main() -> droster::Result<()> {
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let config = RosterConfig::new()?;
//! let factory = Arc::new(GrpcUpdateRpcFactory::new(
//!     runtime.handle().clone(),
//!     config.connection.clone(),
//! ));
//!
//! let list = CoordinatorServerList::new(config, factory)?;
//! let id = list.generate_unique_id();
//! list.add(
//!     id,
//!     "http://127.0.0.1:9090".to_string(),
//!     ServiceMask::empty()
//!         .with(ServiceType::MasterService)
//!         .with(ServiceType::MembershipService),
//!     0,
//! );
//! list.sync()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod proto;

#[doc(hidden)]
pub use self::config::*;

mod constants;
mod errors;
mod list;
mod metrics;
mod network;

pub use errors::*;
pub use list::*;
pub use network::*;

#[doc(hidden)]
pub use metrics::*;

//-----------------------------------------------------------
// Test utils
#[cfg(test)]
#[doc(hidden)]
pub mod test_utils;

//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;

#[doc(hidden)]
pub(crate) const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);
