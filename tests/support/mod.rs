//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

// std
use std::{
	collections::BTreeSet,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	thread,
	time::Duration as StdDuration,
};
// crates.io
use parking_lot::Mutex;
use tempfile::NamedTempFile;
// self
use kerberos_broker::{
	acquire::{CallbackHandler, CredentialAcquirer, LoginParameters, Password, keys},
	auth::{AuthState, Credential, Principal},
	config::{AuthMethod, ConfSource, Configuration, MemoryEnvironment},
	error::{BoxError, DeepConfigError, LoginError},
	manager::AuthManager,
	time::{Duration, OffsetDateTime},
};

/// Principal handed out when the parameters do not name one.
pub const CACHE_PRINCIPAL: &str = "user@EXAMPLE.COM";

#[derive(Debug)]
struct Script {
	lifetime: Duration,
	renewable: bool,
	acquire_failure: Option<String>,
	refresh_failure: Option<String>,
	acquire_delay: StdDuration,
	keytab_principals: Option<BTreeSet<String>>,
	cache: Option<Credential>,
	minted: u64,
}

/// Login module double with scripted behavior and call counters.
#[derive(Debug)]
pub struct MockAcquirer {
	script: Mutex<Script>,
	acquires: AtomicUsize,
	refreshes: AtomicUsize,
	releases: AtomicUsize,
	config_refreshes: AtomicUsize,
}
impl MockAcquirer {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			script: Mutex::new(Script {
				lifetime: Duration::hours(10),
				renewable: false,
				acquire_failure: None,
				refresh_failure: None,
				acquire_delay: StdDuration::ZERO,
				keytab_principals: None,
				cache: None,
				minted: 0,
			}),
			acquires: AtomicUsize::new(0),
			refreshes: AtomicUsize::new(0),
			releases: AtomicUsize::new(0),
			config_refreshes: AtomicUsize::new(0),
		})
	}

	pub fn set_lifetime(&self, lifetime: Duration) {
		self.script.lock().lifetime = lifetime;
	}

	pub fn set_renewable(&self, renewable: bool) {
		self.script.lock().renewable = renewable;
	}

	pub fn fail_acquire(&self, reason: Option<&str>) {
		self.script.lock().acquire_failure = reason.map(str::to_owned);
	}

	pub fn fail_refresh(&self, reason: Option<&str>) {
		self.script.lock().refresh_failure = reason.map(str::to_owned);
	}

	pub fn set_acquire_delay(&self, delay: StdDuration) {
		self.script.lock().acquire_delay = delay;
	}

	pub fn restrict_keytab(&self, principals: &[&str]) {
		self.script.lock().keytab_principals =
			Some(principals.iter().map(|p| (*p).to_owned()).collect());
	}

	/// Simulates an operator obtaining a fresh ticket outside the broker.
	pub fn rotate_ticket_cache(&self) {
		self.script.lock().cache = None;
	}

	pub fn acquires(&self) -> usize {
		self.acquires.load(Ordering::SeqCst)
	}

	pub fn refreshes(&self) -> usize {
		self.refreshes.load(Ordering::SeqCst)
	}

	pub fn releases(&self) -> usize {
		self.releases.load(Ordering::SeqCst)
	}

	pub fn config_refreshes(&self) -> usize {
		self.config_refreshes.load(Ordering::SeqCst)
	}

	fn mint(script: &mut Script, principal: Principal) -> Credential {
		script.minted += 1;

		let now = OffsetDateTime::now_utc();
		let builder = Credential::builder(principal)
			.ticket(format!("tgt-{}", script.minted).into_bytes())
			.issued_at(now)
			.expires_in(script.lifetime);

		let builder = if script.renewable {
			builder.renewable_until(now + Duration::days(7))
		} else {
			builder
		};

		builder.build().expect("Mock credential should build.")
	}
}
impl CredentialAcquirer for MockAcquirer {
	fn refresh_config(&self) -> Result<(), DeepConfigError> {
		self.config_refreshes.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}

	fn keytab_contains(
		&self,
		_keytab: &std::path::Path,
		principal: &Principal,
	) -> Result<bool, DeepConfigError> {
		Ok(self
			.script
			.lock()
			.keytab_principals
			.as_ref()
			.is_none_or(|known| known.contains(&principal.to_string())))
	}

	fn acquire(
		&self,
		params: &LoginParameters,
		handler: Option<&mut dyn CallbackHandler>,
	) -> Result<Credential, LoginError> {
		self.acquires.fetch_add(1, Ordering::SeqCst);

		let delay = self.script.lock().acquire_delay;

		if !delay.is_zero() {
			thread::sleep(delay);
		}

		let mut script = self.script.lock();

		if let Some(reason) = &script.acquire_failure {
			return Err(LoginError::rejected(reason.clone()));
		}

		match params.auth_method() {
			AuthMethod::TicketCache => {
				if let Some(cached) = &script.cache {
					return Ok(cached.clone());
				}

				let principal = Principal::parse(CACHE_PRINCIPAL).expect("Fixture is valid.");
				let credential = Self::mint(&mut script, principal);

				script.cache = Some(credential.clone());

				Ok(credential)
			},
			AuthMethod::Keytab => {
				let principal = params
					.get(keys::PRINCIPAL)
					.map(Principal::parse)
					.transpose()
					.map_err(LoginError::module)?
					.ok_or_else(|| LoginError::rejected("no principal"))?;

				Ok(Self::mint(&mut script, principal))
			},
			AuthMethod::UserPwd => {
				let handler = handler.ok_or_else(|| LoginError::rejected("no prompt"))?;
				let mut name = String::new();
				let mut password = Password::default();

				handler.supply(&mut name, &mut password);

				if password.expose() != "secret" {
					return Err(LoginError::rejected("Pre-authentication information was invalid"));
				}

				let principal = Principal::parse(&name).map_err(LoginError::module)?;

				Ok(Self::mint(&mut script, principal))
			},
		}
	}

	fn refresh(&self, credential: &Credential) -> Result<Credential, LoginError> {
		self.refreshes.fetch_add(1, Ordering::SeqCst);

		let mut script = self.script.lock();

		if let Some(reason) = &script.refresh_failure {
			return Err(LoginError::rejected(reason.clone()));
		}

		Ok(Self::mint(&mut script, credential.principal.clone()))
	}

	fn release(&self, _credential: &Credential) -> Result<(), BoxError> {
		self.releases.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}
}

/// Password prompt double.
#[derive(Clone, Debug)]
pub struct ScriptedHandler {
	accept: bool,
	user: String,
	password: String,
	prompts: Arc<AtomicUsize>,
}
impl ScriptedHandler {
	pub fn accepting(user: &str, password: &str) -> Self {
		Self {
			accept: true,
			user: user.into(),
			password: password.into(),
			prompts: Arc::default(),
		}
	}

	pub fn declining() -> Self {
		Self { accept: false, user: String::new(), password: String::new(), prompts: Arc::default() }
	}

	pub fn prompts(&self) -> Arc<AtomicUsize> {
		self.prompts.clone()
	}
}
impl CallbackHandler for ScriptedHandler {
	fn prompt_user(&mut self) -> bool {
		self.prompts.fetch_add(1, Ordering::SeqCst);

		self.accept
	}

	fn supply(&mut self, name: &mut String, password: &mut Password) {
		name.clone_from(&self.user);
		*password = Password::new(self.password.clone());
	}
}

pub fn manager(acquirer: &Arc<MockAcquirer>, env: &Arc<MemoryEnvironment>) -> AuthManager {
	AuthManager::builder(acquirer.clone())
		.environment(env.clone())
		.build()
		.expect("Manager should start.")
}

/// Empty file standing in for a keytab; the mock decides what it contains.
pub fn keytab_fixture() -> NamedTempFile {
	tempfile::Builder::new()
		.prefix("broker")
		.suffix(".keytab")
		.tempfile()
		.expect("Keytab fixture should be created.")
}

pub fn keytab_config(keytab: &NamedTempFile, principal: &str) -> Configuration {
	Configuration::builder()
		.conf_source(ConfSource::RealmKdc)
		.realm("EXAMPLE.COM")
		.kdc("kdc.example.com")
		.auth_method(AuthMethod::Keytab)
		.keytab(principal, keytab.path().display().to_string())
		.build()
}

pub fn ticket_cache_config() -> Configuration {
	Configuration::builder().auth_method(AuthMethod::TicketCache).build()
}

pub fn password_config() -> Configuration {
	Configuration::builder().auth_method(AuthMethod::UserPwd).build()
}

/// Waits until the published state satisfies `predicate`.
pub async fn wait_for_state<P>(manager: &AuthManager, timeout: StdDuration, predicate: P) -> AuthState
where
	P: FnMut(&AuthState) -> bool,
{
	let mut rx = manager.subscribe();

	tokio::time::timeout(timeout, rx.wait_for(predicate))
		.await
		.expect("State change should arrive in time.")
		.expect("State channel should stay open.")
		.clone()
}

pub fn prompt(handler: ScriptedHandler) -> Option<Box<dyn CallbackHandler>> {
	Some(Box::new(handler))
}
