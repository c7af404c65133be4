//! Observability helpers for session operations.
//!
//! # Feature Flags
//!
//! - Spans named `kerberos_broker.op` carry the `op` (session operation) and `stage` (call site)
//!   fields.
//! - Enable `metrics` to increment the `kerberos_broker_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use self::{metrics::*, tracing::*};

// self
use crate::_prelude::*;

/// Session operations observed by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthOp {
	/// Staging and validating a configuration.
	Configure,
	/// Acquiring a fresh ticket.
	Login,
	/// Background renewal or re-login.
	Renew,
	/// Explicit logout or rollback after a failure.
	Rollback,
	/// An authenticated run submitted through the gate.
	Run,
	/// A run under an impersonated credential.
	Delegate,
}
impl AuthOp {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			AuthOp::Configure => "configure",
			AuthOp::Login => "login",
			AuthOp::Renew => "renew",
			AuthOp::Rollback => "rollback",
			AuthOp::Run => "run",
			AuthOp::Delegate => "delegate",
		}
	}
}
impl Display for AuthOp {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller or logged by the worker.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
