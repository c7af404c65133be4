//! The process-wide Kerberos session and the handle used to drive it.
//!
//! [`AuthManager`] is a cheap, cloneable handle. All state-changing work is submitted as a job
//! to one dedicated worker thread, which owns the [`Session`] and runs jobs strictly in
//! submission order. Readers never queue: [`AuthManager::state`] loads the last published
//! snapshot and [`AuthManager::subscribe`] streams every subsequent one.
//!
//! Exactly one manager should exist per process because the session stages process-global
//! environment variables.

pub mod renewal;
pub mod session;
pub mod worker;

pub use renewal::{EXPIRY_GRACE, MIN_RENEWAL_DELAY, RenewalScheduler, renewal_delay};
pub use session::{Phase, Session};
pub use worker::{JobHandle, WORKER_THREAD_NAME, on_worker_thread};

// std
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
// crates.io
use tokio::sync::{mpsc, watch};
// self
use crate::{
	_prelude::*,
	acquire::{CallbackHandler, CredentialAcquirer},
	auth::AuthState,
	capture::LogCapture,
	config::{Configuration, Environment, ProcessEnvironment},
	manager::worker::Job,
	obs::SessionMetrics,
};

/// State shared between the worker and every handle.
pub(crate) struct Shared {
	pub(crate) state: ArcSwap<AuthState>,
	state_tx: watch::Sender<AuthState>,
	indicator_requested: AtomicBool,
	indicator_tx: watch::Sender<bool>,
	login_epoch: AtomicU64,
	pub(crate) metrics: SessionMetrics,
	pub(crate) capture: LogCapture,
}
impl Shared {
	fn new(capture: LogCapture) -> Self {
		Self {
			state: ArcSwap::from_pointee(AuthState::Unauthenticated),
			state_tx: watch::Sender::new(AuthState::Unauthenticated),
			indicator_requested: AtomicBool::new(false),
			indicator_tx: watch::Sender::new(false),
			login_epoch: AtomicU64::new(0),
			metrics: SessionMetrics::default(),
			capture,
		}
	}

	pub(crate) fn publish(&self, state: AuthState) {
		self.state.store(Arc::new(state.clone()));
		self.state_tx.send_if_modified(|current| {
			if *current == state {
				return false;
			}

			*current = state;

			true
		});
		self.refresh_indicator();
	}

	/// Number of gate-driven login attempts started so far.
	pub(crate) fn login_epoch(&self) -> u64 {
		self.login_epoch.load(Ordering::SeqCst)
	}

	/// Starts a gate-driven login attempt and returns its epoch.
	pub(crate) fn next_login_epoch(&self) -> u64 {
		self.login_epoch.fetch_add(1, Ordering::SeqCst) + 1
	}

	fn request_indicator(&self, show: bool) {
		self.indicator_requested.store(show, Ordering::Relaxed);
		self.refresh_indicator();
	}

	fn refresh_indicator(&self) {
		let visible =
			self.indicator_requested.load(Ordering::Relaxed) || self.state.load().is_authenticated();

		self.indicator_tx.send_if_modified(|current| {
			let changed = *current != visible;

			*current = visible;

			changed
		});
	}
}

/// Builder for [`AuthManager`].
pub struct AuthManagerBuilder {
	acquirer: Arc<dyn CredentialAcquirer>,
	env: Arc<dyn Environment>,
	capture: LogCapture,
}
impl AuthManagerBuilder {
	/// Uses `env` instead of the process environment.
	pub fn environment(mut self, env: Arc<dyn Environment>) -> Self {
		self.env = env;

		self
	}

	/// Shares an existing capture sink (for example one whose writer the login module holds).
	pub fn capture(mut self, capture: LogCapture) -> Self {
		self.capture = capture;

		self
	}

	/// Starts the worker thread and returns the first handle.
	pub fn build(self) -> Result<AuthManager> {
		let shared = Arc::new(Shared::new(self.capture));
		let (queue, _thread) = worker::spawn(self.acquirer, self.env, shared.clone())?;

		tracing::debug!("Kerberos session manager started.");

		Ok(AuthManager { inner: Arc::new(ManagerInner { queue, shared }) })
	}
}
impl Debug for AuthManagerBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthManagerBuilder").finish_non_exhaustive()
	}
}

struct ManagerInner {
	queue: mpsc::UnboundedSender<Job>,
	shared: Arc<Shared>,
}

/// Handle to the process-wide Kerberos session.
///
/// Dropping the last handle closes the job queue; the worker then rolls the session back and
/// exits.
#[derive(Clone)]
pub struct AuthManager {
	inner: Arc<ManagerInner>,
}
impl AuthManager {
	/// Starts configuring a manager backed by `acquirer`.
	pub fn builder(acquirer: Arc<dyn CredentialAcquirer>) -> AuthManagerBuilder {
		AuthManagerBuilder {
			acquirer,
			env: Arc::new(ProcessEnvironment),
			capture: LogCapture::new(),
		}
	}

	/// Queues `f` to run on the worker with exclusive access to the session.
	pub fn submit<T, F>(&self, f: F) -> JobHandle<T>
	where
		T: 'static + Send,
		F: 'static + Send + FnOnce(&mut Session) -> T,
	{
		JobHandle::submit(&self.inner.queue, f)
	}

	/// Stages and validates `cfg`. On error, call [`AuthManager::logout`] to roll back.
	pub async fn configure(&self, cfg: Configuration) -> Result<()> {
		self.submit(move |session| session.configure(&cfg)).await?
	}

	/// Configures with `cfg` and logs in, rolling back if either step fails.
	///
	/// `handler` is consulted for password logins.
	pub async fn login(
		&self,
		cfg: Configuration,
		handler: Option<Box<dyn CallbackHandler>>,
	) -> Result<Arc<AuthState>> {
		self.submit(move |session| {
			let mut handler = handler;

			session.configure_and_login(
				&cfg,
				handler.as_deref_mut().map(|h| h as &mut dyn CallbackHandler),
			)
		})
		.await?
	}

	/// Logs out and restores the environment. Safe to call while logged out.
	pub async fn logout(&self) -> Result<Arc<AuthState>> {
		self.submit(|session| {
			session.rollback();

			session.state()
		})
		.await
	}

	/// Checks whether the ticket cache holds a ticket other than the one in use.
	pub async fn ticket_cache_has_changed(&self) -> Result<bool> {
		self.submit(|session| session.ticket_cache_has_changed()).await?
	}

	/// Last published snapshot. Never queues behind the worker.
	pub fn state(&self) -> Arc<AuthState> {
		self.inner.shared.state.load_full()
	}

	/// Receives every published snapshot, starting with the current one.
	pub fn subscribe(&self) -> watch::Receiver<AuthState> {
		self.inner.shared.state_tx.subscribe()
	}

	/// Requests the status indicator; it stays visible while logged in regardless.
	pub fn set_status_indicator(&self, show: bool) {
		self.inner.shared.request_indicator(show);
	}

	/// Receives the indicator visibility.
	pub fn status_indicator(&self) -> watch::Receiver<bool> {
		self.inner.shared.indicator_tx.subscribe()
	}

	pub(crate) fn login_epoch(&self) -> u64 {
		self.inner.shared.login_epoch()
	}

	/// Session counters.
	pub fn metrics(&self) -> &SessionMetrics {
		&self.inner.shared.metrics
	}

	/// Debug capture sink.
	pub fn capture(&self) -> &LogCapture {
		&self.inner.shared.capture
	}
}
impl Debug for AuthManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthManager").field("state", &self.state()).finish()
	}
}
