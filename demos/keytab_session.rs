//! Demonstrates a keytab-backed session: log in through the gate, watch the published state, and
//! log out again. The login module is an in-process stand-in that mints tickets locally.

// std
use std::{
	path::Path,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use color_eyre::Result;
// self
use kerberos_broker::{
	acquire::{CallbackHandler, CredentialAcquirer, LoginParameters, keys},
	auth::{Credential, Principal},
	config::{AuthMethod, ConfSource, Configuration, MemoryEnvironment, StaticConfig},
	error::{BoxError, DeepConfigError, LoginError},
	gate::AuthGate,
	manager::AuthManager,
	time::Duration,
};

#[derive(Default)]
struct LocalKdc {
	issued: AtomicU64,
}
impl LocalKdc {
	fn mint(&self, principal: Principal) -> Result<Credential, LoginError> {
		let serial = self.issued.fetch_add(1, Ordering::Relaxed);

		Credential::builder(principal)
			.ticket(format!("demo-tgt-{serial}").into_bytes())
			.expires_in(Duration::hours(10))
			.build()
			.map_err(LoginError::module)
	}
}
impl CredentialAcquirer for LocalKdc {
	fn refresh_config(&self) -> Result<(), DeepConfigError> {
		Ok(())
	}

	fn keytab_contains(&self, _: &Path, _: &Principal) -> Result<bool, DeepConfigError> {
		Ok(true)
	}

	fn acquire(
		&self,
		params: &LoginParameters,
		_: Option<&mut dyn CallbackHandler>,
	) -> Result<Credential, LoginError> {
		let principal = params
			.get(keys::PRINCIPAL)
			.ok_or_else(|| LoginError::rejected("keytab login without a principal"))?;

		self.mint(Principal::parse(principal).map_err(LoginError::module)?)
	}

	fn refresh(&self, credential: &Credential) -> Result<Credential, LoginError> {
		self.mint(credential.principal.clone())
	}

	fn release(&self, _: &Credential) -> Result<(), BoxError> {
		Ok(())
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let keytab = tempfile::Builder::new().suffix(".keytab").tempfile()?;
	let cfg = Configuration::builder()
		.conf_source(ConfSource::RealmKdc)
		.realm("EXAMPLE.COM")
		.kdc("kdc.example.com")
		.auth_method(AuthMethod::Keytab)
		.keytab("svc@EXAMPLE.COM", keytab.path().display().to_string())
		.build();
	let manager = AuthManager::builder(Arc::new(LocalKdc::default()))
		.environment(Arc::new(MemoryEnvironment::new()))
		.build()?;
	let mut states = manager.subscribe();
	let gate = AuthGate::new(manager.clone(), Arc::new(StaticConfig::new(cfg)));
	let fingerprint = gate
		.run_authenticated(|credential| {
			Ok::<_, LoginError>(format!("{} -> {}", credential.principal, credential.ticket.fingerprint()))
		})
		.await?;

	println!("ran as {fingerprint}");

	states.changed().await?;

	println!("published: {}", *states.borrow_and_update());
	println!("logged out: {}", manager.logout().await?);

	Ok(())
}
