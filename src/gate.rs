//! Public entry point for running work as the authenticated principal.
//!
//! Every run is a single job on the session worker: the job makes sure a ticket is held
//! (logging in from the [`ConfigProvider`] when it may do so silently) and then invokes the
//! caller's callback with the credential. Because the worker is FIFO, concurrent runs issued
//! while logged out trigger exactly one login; later jobs find the session already
//! authenticated, or receive the failure of that login if it did not succeed.

// std
use std::task::{Context, Poll};
// crates.io
use tokio_util::sync::WaitForCancellationFutureOwned;
// self
use crate::{
	_prelude::*,
	auth::{AuthState, Credential},
	config::{AuthMethod, ConfigProvider},
	error::LoginError,
	manager::{AuthManager, JobHandle, Phase, Session, on_worker_thread},
	obs::{AuthOp, OpSpan},
};

/// Failure of an authenticated run.
///
/// Authentication failures and the callback's own errors are kept apart so callers can tell
/// "could not log in" from "my operation failed".
#[derive(Debug, ThisError)]
pub enum RunError<E> {
	/// The session could not be authenticated, or the caller cancelled.
	#[error(transparent)]
	Auth(#[from] Error),
	/// The callback ran and returned an error.
	#[error("{0}")]
	Callback(E),
}
impl<E> RunError<E> {
	/// Returns the callback error, if the callback ran and failed.
	pub fn into_callback(self) -> Option<E> {
		match self {
			Self::Callback(e) => Some(e),
			Self::Auth(_) => None,
		}
	}

	/// Returns the authentication error, if authentication failed.
	pub fn auth(&self) -> Option<&Error> {
		match self {
			Self::Auth(e) => Some(e),
			Self::Callback(_) => None,
		}
	}

	/// Returns `true` when the caller cancelled the run.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Auth(Error::Cancelled))
	}
}

/// Pending authenticated run.
///
/// Resolves to [`Error::Cancelled`] as soon as its token is cancelled. Cancelling stops the
/// callback from running if authentication has not finished yet, but never interrupts a login
/// already executing on the worker.
#[must_use = "the run is queued regardless, but its result is only observed by awaiting it"]
pub struct AuthTask<T, E> {
	job: JobHandle<Result<T, RunError<E>>>,
	cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
	token: CancellationToken,
}
impl<T, E> AuthTask<T, E> {
	/// Stops waiting and, if the worker has not reached it yet, skips the callback.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Token observed by this run.
	pub fn token(&self) -> &CancellationToken {
		&self.token
	}
}
impl<T, E> Debug for AuthTask<T, E> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthTask").field("cancelled", &self.token.is_cancelled()).finish()
	}
}
impl<T, E> Future for AuthTask<T, E> {
	type Output = Result<T, RunError<E>>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();

		if this.cancelled.as_mut().poll(cx).is_ready() {
			return Poll::Ready(Err(Error::Cancelled.into()));
		}

		Pin::new(&mut this.job).poll(cx).map(|r| r.map_err(RunError::Auth).and_then(|r| r))
	}
}

/// Runs callbacks as the authenticated principal.
#[derive(Clone)]
pub struct AuthGate {
	manager: AuthManager,
	provider: Arc<dyn ConfigProvider>,
}
impl AuthGate {
	/// Creates a gate logging in with configurations from `provider`.
	pub fn new(manager: AuthManager, provider: Arc<dyn ConfigProvider>) -> Self {
		Self { manager, provider }
	}

	/// Underlying session manager.
	pub fn manager(&self) -> &AuthManager {
		&self.manager
	}

	/// Last published snapshot.
	pub fn state(&self) -> Arc<AuthState> {
		self.manager.state()
	}

	/// Loads the configuration and, when it asks for debug logging, starts capturing the login
	/// module's output at the configured level.
	///
	/// Fails when the provider has no usable configuration. No login is attempted.
	pub fn ensure_initialized(&self) -> Result<()> {
		let cfg = self.provider.load()?;

		if cfg.debug_logging() {
			self.manager.capture().start_capture(cfg.debug_level()?);
		}

		Ok(())
	}

	/// Queues `cb` to run with the session's credential, logging in first when needed.
	///
	/// Keytab and ticket-cache configurations log in silently. Password configurations never
	/// do: without an existing session the run fails with [`LoginError::NotLoggedIn`].
	pub fn run_authenticated<T, E, F>(&self, cb: F) -> AuthTask<T, E>
	where
		T: 'static + Send,
		E: 'static + Send,
		F: 'static + Send + FnOnce(&Credential) -> Result<T, E>,
	{
		self.spawn(CancellationToken::new(), move |credential| {
			cb(credential).map_err(RunError::Callback)
		})
	}

	/// Like [`AuthGate::run_authenticated`], observing a child of `cancel`.
	pub fn run_authenticated_cancellable<T, E, F>(
		&self,
		cb: F,
		cancel: &CancellationToken,
	) -> AuthTask<T, E>
	where
		T: 'static + Send,
		E: 'static + Send,
		F: 'static + Send + FnOnce(&Credential) -> Result<T, E>,
	{
		self.spawn(cancel.child_token(), move |credential| {
			cb(credential).map_err(RunError::Callback)
		})
	}

	/// Runs `cb` and blocks the calling thread until it finishes or `cancel` fires.
	///
	/// Without a token the caller waits for the run to complete. Must not be called from the
	/// session worker, which would wait on itself.
	pub fn run_authenticated_blocking<T, E, F>(
		&self,
		cb: F,
		cancel: Option<&CancellationToken>,
	) -> Result<T, RunError<E>>
	where
		T: 'static + Send,
		E: 'static + Send,
		F: 'static + Send + FnOnce(&Credential) -> Result<T, E>,
	{
		if on_worker_thread() {
			return Err(Error::illegal_state(
				"blocking Kerberos calls cannot be made from the Kerberos worker",
			)
			.into());
		}
		if cancel.is_some_and(CancellationToken::is_cancelled) {
			return Err(Error::Cancelled.into());
		}

		let task = match cancel {
			Some(cancel) => self.run_authenticated_cancellable(cb, cancel),
			None => self.run_authenticated(cb),
		};

		futures::executor::block_on(task)
	}

	/// Queues `work` behind authentication; `work` maps its own failures into [`RunError`].
	pub(crate) fn spawn<T, E, F>(&self, token: CancellationToken, work: F) -> AuthTask<T, E>
	where
		T: 'static + Send,
		E: 'static + Send,
		F: 'static + Send + FnOnce(&Credential) -> Result<T, RunError<E>>,
	{
		let provider = self.provider.clone();
		let job_token = token.clone();
		let seen = self.manager.login_epoch();

		self.manager.set_status_indicator(true);

		let job = self.manager.submit(move |session| {
			let _guard = OpSpan::new(AuthOp::Run, "gate_run").entered();

			if job_token.is_cancelled() {
				return Err(Error::Cancelled.into());
			}

			let credential = ensure_authenticated(session, provider.as_ref(), seen)?;

			if job_token.is_cancelled() {
				tracing::debug!("Authenticated run was cancelled before its callback.");

				return Err(Error::Cancelled.into());
			}

			work(credential)
		});

		AuthTask { job, cancelled: Box::pin(token.clone().cancelled_owned()), token }
	}
}
impl Debug for AuthGate {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthGate").field("manager", &self.manager).finish_non_exhaustive()
	}
}

/// Makes sure `session` holds a ticket, logging in from `provider` when allowed.
///
/// A ticket-cache session whose cache now holds a different ticket is rolled back and logged in
/// again so the run uses the ticket an operator just obtained.
///
/// `seen` is the login epoch observed when the run was queued. If a login started after that
/// has already failed, its error is returned instead of trying again.
fn ensure_authenticated<'s>(
	session: &'s mut Session,
	provider: &dyn ConfigProvider,
	seen: u64,
) -> Result<&'s Credential> {
	if session.is_authenticated() {
		let cache_based = session
			.configuration()
			.is_some_and(|cfg| cfg.auth_method() == AuthMethod::TicketCache);

		if !cache_based || !session.ticket_cache_has_changed()? {
			return session.credential().ok_or_else(|| LoginError::MissingCredential.into());
		}

		tracing::info!("Kerberos ticket cache has changed; logging in again.");

		session.rollback();
	}
	if let Some(failure) = session.failed_login_since(seen) {
		tracing::debug!("Reusing the failure of a login attempted after this run was queued.");

		return Err(Error::Shared(failure));
	}

	let cfg = provider.load()?;

	if cfg.auth_method() == AuthMethod::UserPwd {
		return Err(LoginError::NotLoggedIn.into());
	}
	// A configuration staged without a login would make the next configure fail.
	if session.phase() != Phase::LoggedOut {
		session.rollback();
	}

	session.login_for_runs(&cfg)?;

	session.credential().ok_or_else(|| LoginError::MissingCredential.into())
}
