//! Renewal timing and the single pending renewal timer.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::{runtime::Handle, sync::mpsc::WeakUnboundedSender};
// self
use crate::{_prelude::*, manager::worker::Job};

/// Shortest delay before attempting a renewal or re-login.
pub const MIN_RENEWAL_DELAY: Duration = Duration::seconds(5);
/// Grace period after expiry before reacting to a ticket that cannot be renewed.
pub const EXPIRY_GRACE: Duration = Duration::seconds(1);

/// Computes how long to wait before acting on a ticket that ends at `expires_at`.
///
/// Tickets that can be refreshed (renewable ones, or any ticket when a keytab can log in again)
/// are acted on `margin` before they expire, but never sooner than five seconds from now. Other
/// tickets are left to expire; the scheduler wakes one second afterwards to update the state.
pub fn renewal_delay(
	expires_at: OffsetDateTime,
	now: OffsetDateTime,
	refreshable: bool,
	margin: Duration,
) -> Duration {
	let remaining = expires_at - now;

	if refreshable {
		remaining.checked_sub(margin).unwrap_or(Duration::MIN).max(MIN_RENEWAL_DELAY)
	} else {
		remaining.checked_add(EXPIRY_GRACE).unwrap_or(Duration::MAX).max(EXPIRY_GRACE)
	}
}

#[derive(Debug)]
struct PendingRenewal {
	generation: u64,
	due_at: OffsetDateTime,
	cancel: CancellationToken,
}

/// Owns the at-most-one pending renewal timer.
///
/// Each armed timer carries a generation number. Arming or cancelling bumps the generation, so
/// a timer that fired just before being cancelled is recognized as stale when its job runs.
pub struct RenewalScheduler {
	queue: WeakUnboundedSender<Job>,
	runtime: Handle,
	generation: u64,
	pending: Option<PendingRenewal>,
}
impl RenewalScheduler {
	pub(crate) fn new(queue: WeakUnboundedSender<Job>, runtime: Handle) -> Self {
		Self { queue, runtime, generation: 0, pending: None }
	}

	/// Instant the pending renewal is due, if one is armed.
	pub fn due_at(&self) -> Option<OffsetDateTime> {
		self.pending.as_ref().map(|p| p.due_at)
	}

	/// Generation of the most recently armed or cancelled timer.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Returns `true` when `generation` belongs to the currently armed timer.
	pub fn is_current(&self, generation: u64) -> bool {
		self.pending.as_ref().is_some_and(|p| p.generation == generation)
	}

	/// Cancels the pending timer, if any.
	pub fn cancel(&mut self) {
		self.generation += 1;

		if let Some(pending) = self.pending.take() {
			pending.cancel.cancel();

			tracing::debug!(generation = pending.generation, "Cancelled pending Kerberos renewal.");
		}
	}

	/// Replaces any pending timer with one that enqueues `job(generation)` after `delay`.
	pub(crate) fn arm<F>(&mut self, delay: Duration, job: F)
	where
		F: 'static + Send + FnOnce(u64) -> Job,
	{
		self.cancel();

		let generation = self.generation;
		let cancel = CancellationToken::new();
		let sleep_for = StdDuration::try_from(delay).unwrap_or(StdDuration::ZERO);
		let now = OffsetDateTime::now_utc();
		let due_at = now.checked_add(delay).unwrap_or(now);
		let queue = self.queue.clone();
		let token = cancel.clone();

		self.runtime.spawn(async move {
			tokio::select! {
				_ = token.cancelled() => {},
				_ = tokio::time::sleep(sleep_for) => {
					// The queue is gone once the manager shuts down; nothing left to renew.
					if let Some(queue) = queue.upgrade() {
						let _ = queue.send(job(generation));
					}
				},
			}
		});

		tracing::debug!(
			generation,
			delay_secs = delay.whole_seconds(),
			"Scheduled Kerberos renewal."
		);

		self.pending = Some(PendingRenewal { generation, due_at, cancel });
	}

	/// Marks the pending timer as consumed once its job starts running.
	pub(crate) fn take_fired(&mut self, generation: u64) -> bool {
		if self.is_current(generation) {
			self.pending = None;

			true
		} else {
			false
		}
	}
}
impl Debug for RenewalScheduler {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RenewalScheduler")
			.field("generation", &self.generation)
			.field("pending", &self.pending)
			.finish()
	}
}
impl Drop for RenewalScheduler {
	fn drop(&mut self) {
		self.cancel();
	}
}
