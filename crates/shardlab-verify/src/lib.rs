//! Convergence verification for shardlab scenarios.
//!
//! - [`poller`]: bounded polling of eventually-true conditions, driven by
//!   the [`Classify`] trait
//! - [`probe`]: role, router and crash probes run inside replicas
//! - [`logs`]: separating real error lines from known-benign ones
//! - [`coordination`]: the coordination store container of a run
//! - [`scenario`]: per-run naming, config publication and the log audit
//!
//! # Example
//!
//! ```
//! use shardlab_verify::{ConvergencePoller, VerifyError};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), VerifyError> {
//! let poller = ConvergencePoller::new(Duration::from_secs(5), Duration::from_millis(100));
//! let answer = poller
//!     .poll(|| async { Ok::<_, VerifyError>(42) })
//!     .await
//!     .map_err(|e| e.into_verify_error("the answer"))?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod coordination;
pub mod error;
pub mod logs;
pub mod poller;
pub mod probe;
pub mod scenario;

pub use coordination::{CoordinationService, CONSUL_SERVICE, DEFAULT_CONSUL_IMAGE};
pub use error::{Classify, ErrorClass, Result, VerifyError};
pub use logs::{default_allowlist, BenignPattern, LogClassifier, ERROR_MARKER};
pub use poller::{ConvergencePoller, PollError, DEFAULT_POLL_INTERVAL};
pub use probe::{
    check_role, check_router_api, check_router_api_everywhere, crash_replica, observe_role,
    wait_for_role, wait_for_role_with, Role,
};
pub use scenario::{
    random_network_name, LogAudit, RunCounter, ScenarioContext, ScenarioReport,
    DEFAULT_NETWORK_PREFIX,
};
