//! The session state machine.
//!
//! A [`Session`] owns the staged configuration, the environment backup, the synthesized krb5
//! config, the held credential, and the pending renewal. It lives on the worker thread and is
//! only reachable through jobs submitted to [`AuthManager`](crate::manager::AuthManager), which
//! is what serializes every transition.

// std
use std::fs::File;
// self
use crate::{
	_prelude::*,
	acquire::{CallbackHandler, CredentialAcquirer, LoginParameters},
	auth::{AuthState, Credential},
	capture::LogCapture,
	config::{
		AuthMethod, ConfSource, Configuration, EnvKey, Environment, EnvironmentBackup,
		Krb5ConfFile, render_krb5_conf,
	},
	error::{ConfigError, DeepConfigError, LoginError},
	manager::{
		Shared,
		renewal::{RenewalScheduler, renewal_delay},
		worker,
	},
	obs::{AuthOp, OpOutcome, OpSpan, record_op_outcome},
};

/// Where the session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
	/// Nothing is staged.
	LoggedOut,
	/// A configuration is staged and validated; no ticket is held.
	Configured,
	/// A login is running.
	LoggingIn,
	/// A ticket is held.
	LoggedIn,
	/// A background renewal is running.
	Renewing,
	/// A rollback is running.
	LoggingOut,
}

/// Worker-owned authentication state.
pub struct Session {
	acquirer: Arc<dyn CredentialAcquirer>,
	env: Arc<dyn Environment>,
	shared: Arc<Shared>,
	renewal: RenewalScheduler,
	phase: Phase,
	config: Option<Configuration>,
	backup: Option<EnvironmentBackup>,
	krb5_conf: Option<Krb5ConfFile>,
	credential: Option<Credential>,
	failed_login: Option<(u64, Arc<Error>)>,
}
impl Session {
	pub(crate) fn new(
		acquirer: Arc<dyn CredentialAcquirer>,
		env: Arc<dyn Environment>,
		shared: Arc<Shared>,
		renewal: RenewalScheduler,
	) -> Self {
		Self {
			acquirer,
			env,
			shared,
			renewal,
			phase: Phase::LoggedOut,
			config: None,
			backup: None,
			krb5_conf: None,
			credential: None,
			failed_login: None,
		}
	}

	/// Current lifecycle phase.
	pub fn phase(&self) -> Phase {
		self.phase
	}

	/// Last published snapshot.
	pub fn state(&self) -> Arc<AuthState> {
		self.shared.state.load_full()
	}

	/// Returns `true` while a ticket is held.
	pub fn is_authenticated(&self) -> bool {
		self.credential.is_some()
	}

	/// Held credential, if any.
	pub fn credential(&self) -> Option<&Credential> {
		self.credential.as_ref()
	}

	/// Staged configuration, if any.
	pub fn configuration(&self) -> Option<&Configuration> {
		self.config.as_ref()
	}

	/// Instant the pending renewal fires, if one is armed.
	pub fn renewal_due_at(&self) -> Option<OffsetDateTime> {
		self.renewal.due_at()
	}

	/// Path of the synthesized krb5.conf, while one is held.
	pub fn krb5_conf_path(&self) -> Option<&Path> {
		self.krb5_conf.as_ref().map(Krb5ConfFile::path)
	}

	/// Debug capture sink.
	pub fn capture(&self) -> &LogCapture {
		&self.shared.capture
	}

	/// Validates `cfg`, stages the Kerberos environment for it, reloads the Kerberos config, and
	/// checks the staged configuration against the keytab.
	///
	/// On error the caller must [`rollback`](Self::rollback).
	pub fn configure(&mut self, cfg: &Configuration) -> Result<()> {
		let _guard = OpSpan::new(AuthOp::Configure, "session_configure").entered();

		record_op_outcome(AuthOp::Configure, OpOutcome::Attempt);

		let result = self.configure_inner(cfg);

		record_op_outcome(
			AuthOp::Configure,
			if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure },
		);

		result
	}

	/// Logs in with the staged configuration.
	///
	/// Password logins ask `handler` first and fail with [`Error::UserCancelled`] without
	/// contacting the KDC when the user declines. On error the caller must
	/// [`rollback`](Self::rollback).
	pub fn login(&mut self, handler: Option<&mut dyn CallbackHandler>) -> Result<Arc<AuthState>> {
		let _guard = OpSpan::new(AuthOp::Login, "session_login").entered();
		let cfg = self
			.config
			.clone()
			.ok_or_else(|| Error::illegal_state("Kerberos must be configured before login"))?;

		if self.credential.is_some() {
			return Err(Error::illegal_state("Kerberos is already logged in"));
		}

		tracing::info!(config = %cfg.summary(), "Doing Kerberos login.");

		self.phase = Phase::LoggingIn;

		match self.acquire_fresh(&cfg, handler) {
			Ok(credential) => {
				self.install(credential, false);

				let state = self.state();

				tracing::info!("Logged into Kerberos as {state}.");

				Ok(state)
			},
			Err(e) => {
				self.phase = Phase::Configured;

				Err(e)
			},
		}
	}

	/// Configures and logs in, rolling back when either step fails.
	///
	/// A session that is already configured or logged in is left untouched and the call fails
	/// with [`Error::IllegalState`].
	pub fn configure_and_login(
		&mut self,
		cfg: &Configuration,
		handler: Option<&mut dyn CallbackHandler>,
	) -> Result<Arc<AuthState>> {
		self.ensure_unconfigured()?;

		let result = self.configure(cfg).and_then(|()| self.login(handler));

		if let Err(e) = &result {
			tracing::debug!(error = %e, "Kerberos login failed; rolling back.");

			self.rollback();
		}

		result
	}

	/// Returns the session to its initial state: cancels the pending renewal, releases the
	/// credential, restores the environment, deletes the synthesized krb5.conf, stops debug
	/// capture, and publishes the unauthenticated state.
	///
	/// Cleanup failures are logged, never raised. Calling it while logged out only repeats the
	/// (idempotent) environment restoration.
	pub fn rollback(&mut self) {
		let _guard = OpSpan::new(AuthOp::Rollback, "session_rollback").entered();

		self.phase = Phase::LoggingOut;
		self.renewal.cancel();

		if let Some(credential) = self.credential.take() {
			self.release(&credential);
		}

		self.config = None;

		if let Some(mut backup) = self.backup.take() {
			backup.restore();
		}
		if let Some(file) = self.krb5_conf.take()
			&& let Err(e) = file.delete()
		{
			tracing::debug!(error = %e, "Failed to delete synthesized Kerberos config file.");
		}

		self.shared.capture.stop_capture();

		if let Err(e) = self.acquirer.refresh_config() {
			tracing::debug!(error = %e, "Failed to refresh Kerberos config.");
		}

		self.shared.publish(AuthState::Unauthenticated);
		self.shared.metrics.record_rollback();
		record_op_outcome(AuthOp::Rollback, OpOutcome::Success);

		self.phase = Phase::LoggedOut;
	}

	/// Checks the ticket cache for a ticket other than the held one.
	///
	/// A check that fails to log in counts as a change. Only valid while logged in through the
	/// ticket cache.
	pub fn ticket_cache_has_changed(&self) -> Result<bool> {
		let (Some(cfg), Some(current)) = (&self.config, &self.credential) else {
			return Err(Error::illegal_state("Ticket-cache based Kerberos login required"));
		};

		if cfg.auth_method() != AuthMethod::TicketCache {
			return Err(Error::illegal_state("Ticket-cache based Kerberos login required"));
		}

		let params = LoginParameters::for_config(cfg)?;

		match self.acquirer.acquire(&params, None) {
			Ok(fresh) => {
				let changed = !fresh.same_ticket(current);

				self.release(&fresh);

				Ok(changed)
			},
			Err(e) => {
				tracing::debug!(error = %e, "Ticket cache check failed; treating the cache as changed.");

				Ok(true)
			},
		}
	}

	pub(crate) fn renew_due(&mut self, generation: u64) {
		if !self.renewal.take_fired(generation) {
			tracing::debug!(generation, "Ignoring stale Kerberos renewal.");

			return;
		}

		let _guard = OpSpan::new(AuthOp::Renew, "renewal_timer").entered();

		record_op_outcome(AuthOp::Renew, OpOutcome::Attempt);

		self.phase = Phase::Renewing;

		match self.try_renew() {
			Ok(()) => record_op_outcome(AuthOp::Renew, OpOutcome::Success),
			Err(e) => {
				record_op_outcome(AuthOp::Renew, OpOutcome::Failure);
				tracing::error!(error = %e, "Failed to fetch a new Kerberos ticket.");

				self.rollback();
			},
		}
	}

	/// Logs in on behalf of queued runs, remembering a failure so that runs submitted before the
	/// attempt receive it instead of trying again.
	pub(crate) fn login_for_runs(&mut self, cfg: &Configuration) -> Result<()> {
		let epoch = self.shared.next_login_epoch();

		match self.configure_and_login(cfg, None) {
			Ok(_) => Ok(()),
			Err(e) => {
				let failure = Arc::new(e);

				self.failed_login = Some((epoch, failure.clone()));

				Err(Error::Shared(failure))
			},
		}
	}

	/// Failure of the latest run-driven login when it started after `seen`.
	pub(crate) fn failed_login_since(&self, seen: u64) -> Option<Arc<Error>> {
		self.failed_login.as_ref().filter(|(epoch, _)| *epoch > seen).map(|(_, e)| e.clone())
	}

	fn ensure_unconfigured(&self) -> Result<()> {
		if self.credential.is_some() || self.backup.is_some() {
			return Err(Error::illegal_state("A Kerberos configuration is already active"));
		}

		Ok(())
	}

	fn configure_inner(&mut self, cfg: &Configuration) -> Result<()> {
		self.ensure_unconfigured()?;

		tracing::debug!(config = %cfg.summary(), "Configuring Kerberos.");

		cfg.validate_shallow()?;

		if cfg.debug_logging() {
			self.shared.capture.start_capture(cfg.debug_level()?);
		}

		self.stage_environment(cfg)?;
		self.config = Some(cfg.clone());
		self.acquirer.refresh_config()?;
		self.validate_deep(cfg)?;
		self.phase = Phase::Configured;

		Ok(())
	}

	fn stage_environment(&mut self, cfg: &Configuration) -> Result<()> {
		// Dropping the backup on an early return restores whatever was already changed.
		let backup = EnvironmentBackup::snapshot(self.env.clone());

		match cfg.conf_source() {
			ConfSource::Default => {},
			ConfSource::File => {
				let path = cfg.conf_file().ok_or(ConfigError::MissingConfFile)?;

				backup.clear();
				backup.set(EnvKey::Krb5Config, &path.display().to_string());
			},
			ConfSource::RealmKdc => {
				let realm = cfg.realm_id()?.ok_or(ConfigError::MissingRealm)?;
				let kdc = cfg.kdc().ok_or(ConfigError::MissingKdc)?;

				backup.clear();

				let file = Krb5ConfFile::create(&render_krb5_conf(
					&realm,
					kdc,
					cfg.is_test_configuration(),
				))?;

				backup.set(EnvKey::Krb5Config, &file.path().display().to_string());

				self.krb5_conf = Some(file);
			},
		}

		if cfg.auth_method() == AuthMethod::Keytab
			&& let Some(principal) = cfg.keytab_principal()
		{
			backup.set(EnvKey::Principal, principal);
		}

		self.backup = Some(backup);

		Ok(())
	}

	fn validate_deep(&self, cfg: &Configuration) -> Result<()> {
		if cfg.auth_method() != AuthMethod::Keytab {
			return Ok(());
		}

		let principal = cfg.keytab_principal_id()?.ok_or(ConfigError::MissingKeytabPrincipal)?;
		let keytab = cfg.keytab_file().ok_or(ConfigError::MissingKeytabFile)?;

		File::open(keytab).map_err(|source| DeepConfigError::KeytabUnreadable {
			path: keytab.to_path_buf(),
			source,
		})?;

		if !self.acquirer.keytab_contains(keytab, &principal)? {
			return Err(DeepConfigError::PrincipalNotInKeytab { principal: principal.to_string() }.into());
		}

		if cfg.conf_source() == ConfSource::RealmKdc
			&& let (Some(configured), Some(principal_realm)) = (cfg.realm(), principal.realm())
			&& configured != principal_realm.as_ref()
		{
			return Err(DeepConfigError::RealmMismatch {
				configured: configured.to_owned(),
				principal_realm: principal_realm.to_string(),
			}
			.into());
		}

		Ok(())
	}

	fn acquire_fresh(
		&self,
		cfg: &Configuration,
		handler: Option<&mut dyn CallbackHandler>,
	) -> Result<Credential> {
		self.shared.metrics.record_login(OpOutcome::Attempt);

		let result = self.acquire(cfg, handler);

		self.shared.metrics.record_login(if result.is_ok() {
			OpOutcome::Success
		} else {
			OpOutcome::Failure
		});

		result
	}

	fn acquire(
		&self,
		cfg: &Configuration,
		handler: Option<&mut dyn CallbackHandler>,
	) -> Result<Credential> {
		let params = LoginParameters::for_config(cfg)?;

		if cfg.auth_method() != AuthMethod::UserPwd {
			return Ok(self.acquirer.acquire(&params, handler)?);
		}

		let handler = handler.ok_or_else(|| {
			LoginError::rejected("password login requires an interactive prompt")
		})?;

		if !handler.prompt_user() {
			tracing::info!("Kerberos login was cancelled by the user.");

			return Err(Error::UserCancelled);
		}

		Ok(self.acquirer.acquire(&params, Some(handler))?)
	}

	fn try_renew(&mut self) -> Result<()> {
		let cfg = self
			.config
			.clone()
			.ok_or_else(|| Error::illegal_state("Kerberos renewal requires a configuration"))?;
		let credential = self.credential.clone().ok_or(LoginError::MissingCredential)?;

		if credential.renewable {
			match self.acquirer.refresh(&credential) {
				Ok(renewed) => {
					self.shared.metrics.record_renewal();
					self.install(renewed, true);

					tracing::info!("Renewed Kerberos ticket for {}.", self.state());

					return Ok(());
				},
				Err(e) => tracing::error!(
					error = %e,
					"Could not renew Kerberos ticket, trying to fetch a new ticket if possible."
				),
			}
		}

		match cfg.auth_method() {
			AuthMethod::Keytab => {
				let fresh = self.acquire_fresh(&cfg, None)?;

				self.install(fresh, false);

				tracing::info!("Fetched new Kerberos ticket for {}.", self.state());
			},
			AuthMethod::TicketCache =>
				if self.ticket_cache_has_changed()? {
					let fresh = self.acquire_fresh(&cfg, None)?;

					self.install(fresh, false);

					tracing::info!("Found new Kerberos ticket in ticket cache for {}.", self.state());
				} else {
					tracing::info!("Kerberos login expired, hence logging out.");

					self.rollback();
				},
			AuthMethod::UserPwd => {
				tracing::info!("Kerberos login expired, hence logging out.");

				self.rollback();
			},
		}

		Ok(())
	}

	/// Swaps in a credential, publishes the matching snapshot, and re-arms the renewal timer.
	fn install(&mut self, credential: Credential, renewed_in_place: bool) {
		self.renewal.cancel();
		self.failed_login = None;

		let state = AuthState::authenticated(credential.principal.clone(), credential.expires_at);

		if let Some(previous) = self.credential.replace(credential)
			&& !renewed_in_place
		{
			self.release(&previous);
		}

		self.shared.publish(state);
		self.phase = Phase::LoggedIn;
		self.schedule_renewal();
	}

	fn schedule_renewal(&mut self) {
		let (Some(credential), Some(cfg)) = (&self.credential, &self.config) else {
			return;
		};
		let refreshable = credential.renewable || cfg.auth_method() == AuthMethod::Keytab;
		let delay = renewal_delay(
			credential.expires_at,
			OffsetDateTime::now_utc(),
			refreshable,
			cfg.renewal_safety_margin(),
		);

		self.renewal
			.arm(delay, |generation| worker::job(move |session| session.renew_due(generation)));
	}

	fn release(&self, credential: &Credential) {
		if let Err(e) = self.acquirer.release(credential) {
			tracing::debug!(error = %e, "Failed to release Kerberos credential.");
		}
	}
}
impl Debug for Session {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Session")
			.field("phase", &self.phase)
			.field("config", &self.config)
			.field("credential", &self.credential)
			.field("renewal_due_at", &self.renewal.due_at())
			.finish()
	}
}
