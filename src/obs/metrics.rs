// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::obs::{AuthOp, OpOutcome};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_op_outcome(op: AuthOp, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"kerberos_broker_op_total",
			"op" => op.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (op, outcome);
	}
}

/// Thread-safe counters for session transitions.
#[derive(Debug, Default)]
pub struct SessionMetrics {
	login_attempts: AtomicU64,
	login_successes: AtomicU64,
	login_failures: AtomicU64,
	renewals: AtomicU64,
	rollbacks: AtomicU64,
}
impl SessionMetrics {
	/// Returns the number of calls into the login module for a fresh ticket.
	pub fn login_attempts(&self) -> u64 {
		self.login_attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of logins that produced a ticket.
	pub fn login_successes(&self) -> u64 {
		self.login_successes.load(Ordering::Relaxed)
	}

	/// Returns the number of failed or cancelled logins.
	pub fn login_failures(&self) -> u64 {
		self.login_failures.load(Ordering::Relaxed)
	}

	/// Returns the number of in-place ticket renewals.
	pub fn renewals(&self) -> u64 {
		self.renewals.load(Ordering::Relaxed)
	}

	/// Returns the number of rollbacks, explicit logouts included.
	pub fn rollbacks(&self) -> u64 {
		self.rollbacks.load(Ordering::Relaxed)
	}

	pub(crate) fn record_login(&self, outcome: OpOutcome) {
		let counter = match outcome {
			OpOutcome::Attempt => &self.login_attempts,
			OpOutcome::Success => &self.login_successes,
			OpOutcome::Failure => &self.login_failures,
		};

		counter.fetch_add(1, Ordering::Relaxed);
		record_op_outcome(AuthOp::Login, outcome);
	}

	pub(crate) fn record_renewal(&self) {
		self.renewals.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_rollback(&self) {
		self.rollbacks.fetch_add(1, Ordering::Relaxed);
	}
}
