//! The dedicated worker thread and its FIFO job queue.

// std
use std::{
	panic::{self, AssertUnwindSafe},
	task::{Context, Poll},
	thread::{self, JoinHandle},
};
// crates.io
use futures::FutureExt;
use tokio::{
	runtime::{Builder, Handle},
	sync::{mpsc, oneshot},
};
// self
use crate::{
	_prelude::*,
	acquire::CredentialAcquirer,
	config::Environment,
	manager::{Shared, renewal::RenewalScheduler, session::Session},
};

/// Name of the thread every session transition runs on.
pub const WORKER_THREAD_NAME: &str = "kerberos-worker";

/// Unit of work executed against the session.
pub type Job = Box<dyn FnOnce(&mut Session) + Send>;

/// Boxes a closure as a [`Job`].
pub fn job<F>(f: F) -> Job
where
	F: 'static + Send + FnOnce(&mut Session),
{
	Box::new(f)
}

/// Returns `true` when called from the worker thread.
pub fn on_worker_thread() -> bool {
	thread::current().name() == Some(WORKER_THREAD_NAME)
}

/// Future resolving to the value returned by a submitted job.
///
/// Resolves to [`Error::WorkerUnavailable`] when the worker shut down before running the job.
#[must_use = "jobs run regardless, but their result is only observed by awaiting the handle"]
pub struct JobHandle<T> {
	rx: oneshot::Receiver<T>,
}
impl<T> JobHandle<T> {
	pub(crate) fn submit<F>(queue: &mpsc::UnboundedSender<Job>, f: F) -> Self
	where
		T: 'static + Send,
		F: 'static + Send + FnOnce(&mut Session) -> T,
	{
		let (tx, rx) = oneshot::channel();
		let job = job(move |session| {
			// The submitter may have stopped waiting; the job still runs to completion.
			let _ = tx.send(f(session));
		});

		if queue.send(job).is_err() {
			tracing::debug!("Kerberos worker is gone; dropping job.");
		}

		Self { rx }
	}
}
impl<T> Debug for JobHandle<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("JobHandle(..)")
	}
}
impl<T> Future for JobHandle<T> {
	type Output = Result<T>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		self.rx.poll_unpin(cx).map(|r| r.map_err(|_| Error::WorkerUnavailable))
	}
}

pub(crate) fn spawn(
	acquirer: Arc<dyn CredentialAcquirer>,
	env: Arc<dyn Environment>,
	shared: Arc<Shared>,
) -> Result<(mpsc::UnboundedSender<Job>, JoinHandle<()>)> {
	let (tx, rx) = mpsc::unbounded_channel();
	let weak = tx.downgrade();
	let runtime = Builder::new_current_thread().enable_time().build().map_err(Error::WorkerSpawn)?;
	let handle = thread::Builder::new()
		.name(WORKER_THREAD_NAME.into())
		.spawn(move || {
			runtime.block_on(async move {
				let renewal = RenewalScheduler::new(weak, Handle::current());
				let session = Session::new(acquirer, env, shared, renewal);

				run(session, rx).await;
			})
		})
		.map_err(Error::WorkerSpawn)?;

	Ok((tx, handle))
}

async fn run(mut session: Session, mut rx: mpsc::UnboundedReceiver<Job>) {
	tracing::debug!("Kerberos worker started.");

	while let Some(job) = rx.recv().await {
		if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&mut session))) {
			let reason = payload
				.downcast_ref::<&str>()
				.copied()
				.or_else(|| payload.downcast_ref::<String>().map(String::as_str))
				.unwrap_or("unknown panic");

			tracing::error!(reason, "Kerberos worker job panicked.");
		}
	}

	// Every manager handle is gone; leave the process as we found it.
	session.rollback();

	tracing::debug!("Kerberos worker stopped.");
}
