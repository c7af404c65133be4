//! Constrained delegation (S4U2Self and S4U2Proxy) for work running on behalf of a workflow user.
//!
//! Outside a server or hub execution context the callback simply receives the session's own
//! credential. Inside one, the session principal impersonates the user that submitted the
//! workflow and the callback receives the resulting credential, which lives for that single
//! invocation only.

// self
use crate::{
	_prelude::*,
	auth::{Credential, HostName, Principal, Realm, ServiceName},
	error::DelegationError,
	gate::{AuthGate, AuthTask, RunError},
	manager::on_worker_thread,
	obs::{AuthOp, OpSpan},
};

/// Where the current piece of work is executing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
	/// A local, single-user installation.
	Standalone,
	/// A server executor running a job for `workflow_user`.
	Server {
		/// User that submitted the job.
		workflow_user: Option<String>,
		/// Realm of the server deployment, if known.
		realm: Option<Realm>,
	},
	/// A hub executor running a job created by `job_creator`.
	Hub {
		/// User that created the job.
		job_creator: Option<String>,
		/// Realm of the hub deployment, if known.
		realm: Option<Realm>,
	},
}
impl ExecutionContext {
	/// Returns `true` for server and hub executors, where work is done on behalf of someone else.
	pub fn is_executor(&self) -> bool {
		!matches!(self, Self::Standalone)
	}

	/// User on whose behalf the work runs.
	pub fn user(&self) -> Option<&str> {
		match self {
			Self::Server { workflow_user: user, .. } | Self::Hub { job_creator: user, .. } =>
				user.as_deref(),
			Self::Standalone => None,
		}
	}

	/// Realm advertised by the execution environment.
	pub fn realm(&self) -> Option<&Realm> {
		match self {
			Self::Server { realm, .. } | Self::Hub { realm, .. } => realm.as_ref(),
			Self::Standalone => None,
		}
	}

	/// Principal to impersonate: the context's user in the context's realm, falling back to the
	/// realm of `base`.
	pub fn principal_to_impersonate(&self, base: &Principal) -> Result<Principal, DelegationError> {
		let user = self.user().ok_or(DelegationError::NoWorkflowUser)?;
		let realm = self.realm().or(base.realm()).ok_or(DelegationError::MissingRealm)?;

		Ok(Principal::user(user, realm.clone())?)
	}
}

/// Reports the execution context of the calling thread.
pub trait ExecutionContextProvider
where
	Self: Send + Sync,
{
	/// Current context; `None` when the caller is not running inside any workflow.
	fn current(&self) -> Option<ExecutionContext>;
}

/// Provider that always reports a fixed context.
#[derive(Clone, Debug, Default)]
pub struct FixedContext(Option<ExecutionContext>);
impl FixedContext {
	/// Reports `context` for every call.
	pub fn new(context: Option<ExecutionContext>) -> Self {
		Self(context)
	}
}
impl ExecutionContextProvider for FixedContext {
	fn current(&self) -> Option<ExecutionContext> {
		self.0.clone()
	}
}

/// Protocol side of constrained delegation, backed by a GSS or Kerberos library.
pub trait ConstrainedDelegation
where
	Self: Send + Sync,
{
	/// S4U2Self: obtains a ticket from `user` to the service holding `base`.
	fn impersonate(&self, base: &Credential, user: &Principal) -> Result<Credential, DelegationError>;

	/// S4U2Proxy: exchanges the S4U2Self ticket for a ticket from the same user to `target`.
	fn proxy(
		&self,
		base: &Credential,
		impersonated: &Credential,
		target: &Principal,
	) -> Result<Credential, DelegationError>;
}

/// Runs callbacks as the workflow user when executing on a server or hub.
#[derive(Clone)]
pub struct DelegationExtension {
	gate: AuthGate,
	exchange: Arc<dyn ConstrainedDelegation>,
	contexts: Arc<dyn ExecutionContextProvider>,
}
impl DelegationExtension {
	/// Combines a gate with a delegation backend and a context source.
	pub fn new(
		gate: AuthGate,
		exchange: Arc<dyn ConstrainedDelegation>,
		contexts: Arc<dyn ExecutionContextProvider>,
	) -> Self {
		Self { gate, exchange, contexts }
	}

	/// Gate used for the base session.
	pub fn gate(&self) -> &AuthGate {
		&self.gate
	}

	/// Runs `cb` with an S4U2Self credential for the workflow user, or with the session
	/// credential outside an executor.
	pub fn run_with_constrained_delegation<T, E, F>(&self, cb: F) -> AuthTask<T, E>
	where
		T: 'static + Send,
		E: 'static + Send,
		F: 'static + Send + FnOnce(&Credential) -> Result<T, E>,
	{
		let context = self.executor_context();
		let exchange = self.exchange.clone();

		self.gate.spawn(CancellationToken::new(), move |base| {
			let Some(context) = context else {
				return cb(base).map_err(RunError::Callback);
			};
			let _guard = OpSpan::new(AuthOp::Delegate, "s4u2self").entered();
			let user = context.principal_to_impersonate(&base.principal).map_err(Error::from)?;

			tracing::debug!(
				%user,
				"Impersonating Kerberos principal with Kerberos constrained delegation (MS-SFU)."
			);

			let impersonated = exchange.impersonate(base, &user).map_err(Error::from)?;

			cb(&impersonated).map_err(RunError::Callback)
		})
	}

	/// Runs `cb` with a service ticket from the workflow user to `service/host`, or with the
	/// session credential outside an executor.
	pub fn run_with_impersonated_credential<T, E, F>(
		&self,
		service: ServiceName,
		host: HostName,
		cb: F,
		cancel: &CancellationToken,
	) -> AuthTask<T, E>
	where
		T: 'static + Send,
		E: 'static + Send,
		F: 'static + Send + FnOnce(&Credential) -> Result<T, E>,
	{
		let context = self.executor_context();
		let exchange = self.exchange.clone();

		self.gate.spawn(cancel.child_token(), move |base| {
			let Some(context) = context else {
				return cb(base).map_err(RunError::Callback);
			};
			let delegated = delegate(exchange.as_ref(), &context, base, &service, &host)
				.map_err(Error::from)?;

			cb(&delegated).map_err(RunError::Callback)
		})
	}

	/// Blocking form of [`DelegationExtension::run_with_impersonated_credential`].
	///
	/// Without a token the caller waits for the run to complete. Must not be called from the
	/// session worker.
	pub fn run_with_impersonated_credential_blocking<T, E, F>(
		&self,
		service: ServiceName,
		host: HostName,
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

		let token = cancel.cloned().unwrap_or_default();

		futures::executor::block_on(self.run_with_impersonated_credential(service, host, cb, &token))
	}

	/// Context captured on the submitting thread; `None` unless it is an executor.
	fn executor_context(&self) -> Option<ExecutionContext> {
		self.contexts.current().filter(ExecutionContext::is_executor)
	}
}
impl Debug for DelegationExtension {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DelegationExtension").field("gate", &self.gate).finish_non_exhaustive()
	}
}

fn delegate(
	exchange: &dyn ConstrainedDelegation,
	context: &ExecutionContext,
	base: &Credential,
	service: &ServiceName,
	host: &HostName,
) -> Result<Credential, DelegationError> {
	let _guard = OpSpan::new(AuthOp::Delegate, "s4u2proxy").entered();
	let user = context.principal_to_impersonate(&base.principal)?;
	let realm = user.realm().cloned().ok_or(DelegationError::MissingRealm)?;
	let target = Principal::service(service, host, realm);

	tracing::debug!(%user, %target, "Requesting constrained delegation service ticket.");

	let impersonated = exchange.impersonate(base, &user)?;

	exchange.proxy(base, &impersonated, &target)
}
