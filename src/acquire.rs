//! Contract with the external Kerberos login module.
//!
//! The broker never speaks the Kerberos protocol itself. It stages configuration, builds a flat
//! parameter set describing which credential source to trust, and hands both to a
//! [`CredentialAcquirer`] that performs the actual login.

// self
use crate::{
	_prelude::*,
	auth::{Credential, Principal},
	config::{AuthMethod, Configuration},
	error::{ConfigError, DeepConfigError, LoginError},
};

/// Parameter names understood by login modules.
pub mod keys {
	/// Whether the login module should emit debug output.
	pub const DEBUG: &str = "debug";
	/// Reload the Kerberos configuration before logging in.
	pub const REFRESH_KRB5_CONFIG: &str = "refreshKrb5Config";
	/// Trust the ticket cache.
	pub const USE_TICKET_CACHE: &str = "useTicketCache";
	/// Ticket cache location.
	pub const TICKET_CACHE: &str = "ticketCache";
	/// Trust a keytab.
	pub const USE_KEY_TAB: &str = "useKeyTab";
	/// Keytab location.
	pub const KEY_TAB: &str = "keyTab";
	/// Principal to log in as.
	pub const PRINCIPAL: &str = "principal";
	/// Keep the long-term key in the credential.
	pub const STORE_KEY: &str = "storeKey";
	/// Reuse a password from shared state without prompting.
	pub const USE_FIRST_PASS: &str = "useFirstPass";
	/// Try a password from shared state before prompting.
	pub const TRY_FIRST_PASS: &str = "tryFirstPass";
	/// Never prompt for input.
	pub const DO_NOT_PROMPT: &str = "doNotPrompt";
	/// Keep the password in shared state.
	pub const STORE_PASS: &str = "storePass";
}

/// Flat, string-keyed login module options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginParameters {
	auth_method: AuthMethod,
	values: BTreeMap<&'static str, String>,
}
impl LoginParameters {
	/// Builds the parameter set for `cfg.auth_method()`.
	///
	/// The ticket cache override is only forwarded for test configurations.
	pub fn for_config(cfg: &Configuration) -> Result<Self, ConfigError> {
		let mut params = Self { auth_method: cfg.auth_method(), values: BTreeMap::new() };

		params.flag(keys::DEBUG, cfg.debug_logging());
		params.flag(keys::REFRESH_KRB5_CONFIG, true);
		params.flag(keys::USE_FIRST_PASS, false);
		params.flag(keys::TRY_FIRST_PASS, false);

		match cfg.auth_method() {
			AuthMethod::Keytab => {
				let principal =
					cfg.keytab_principal_id()?.ok_or(ConfigError::MissingKeytabPrincipal)?;
				let keytab = cfg.keytab_file().ok_or(ConfigError::MissingKeytabFile)?;

				params.flag(keys::USE_TICKET_CACHE, false);
				params.flag(keys::USE_KEY_TAB, true);
				params.values.insert(keys::KEY_TAB, keytab.display().to_string());
				params.values.insert(keys::PRINCIPAL, principal.to_string());
				params.flag(keys::STORE_KEY, false);
				params.flag(keys::DO_NOT_PROMPT, true);
			},
			AuthMethod::TicketCache => {
				params.flag(keys::USE_TICKET_CACHE, true);

				if cfg.is_test_configuration()
					&& let Some(cache) = cfg.ticket_cache()
				{
					params.values.insert(keys::TICKET_CACHE, cache.display().to_string());
				}

				params.flag(keys::USE_KEY_TAB, false);
				params.flag(keys::DO_NOT_PROMPT, true);
			},
			AuthMethod::UserPwd => {
				params.flag(keys::USE_TICKET_CACHE, false);
				params.flag(keys::USE_KEY_TAB, false);
				params.flag(keys::DO_NOT_PROMPT, false);
				params.flag(keys::STORE_PASS, false);
			},
		}

		Ok(params)
	}

	/// Credential source the parameters were built for.
	pub fn auth_method(&self) -> AuthMethod {
		self.auth_method
	}

	/// Raw value of `key`.
	pub fn get(&self, key: &str) -> Option<&str> {
		self.values.get(key).map(String::as_str)
	}

	/// Returns `true` when `key` is set to `"true"`.
	pub fn is_set(&self, key: &str) -> bool {
		self.get(key) == Some("true")
	}

	/// Iterates over every option in key order.
	pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
		self.values.iter().map(|(k, v)| (*k, v.as_str()))
	}

	fn flag(&mut self, key: &'static str, value: bool) {
		self.values.insert(key, value.to_string());
	}
}

/// Password handed from the prompt to the login module; never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Password(String);
impl Password {
	/// Wraps a password.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the password. Callers must avoid logging it.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl Debug for Password {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("Password(<redacted>)")
	}
}

/// Interactive prompt used by password logins.
pub trait CallbackHandler
where
	Self: Send,
{
	/// Asks the user for credentials. Returns `false` when the user declined.
	fn prompt_user(&mut self) -> bool;

	/// Fills in the user name and password collected by [`CallbackHandler::prompt_user`].
	fn supply(&mut self, name: &mut String, password: &mut Password);
}

/// Pluggable login capability backing the session.
///
/// Every method blocks; they run on the session worker, which processes nothing else while a
/// call is outstanding.
pub trait CredentialAcquirer
where
	Self: Send + Sync,
{
	/// Reloads the Kerberos configuration from the current environment.
	///
	/// Implementations report a realm without a reachable KDC as
	/// [`DeepConfigError::KdcUnresolvable`].
	fn refresh_config(&self) -> Result<(), DeepConfigError>;

	/// Returns `true` when `keytab` holds at least one key for `principal`.
	fn keytab_contains(&self, keytab: &Path, principal: &Principal)
	-> Result<bool, DeepConfigError>;

	/// Logs in with `params`, consulting `handler` for password logins.
	fn acquire(
		&self,
		params: &LoginParameters,
		handler: Option<&mut dyn CallbackHandler>,
	) -> Result<Credential, LoginError>;

	/// Renews a renewable ticket in place.
	fn refresh(&self, credential: &Credential) -> Result<Credential, LoginError>;

	/// Releases resources held by `credential` (destroys ccache handles, logs the context out).
	fn release(&self, credential: &Credential) -> Result<(), BoxError>;
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::config::ConfSource;

	#[test]
	fn keytab_parameters_never_prompt() {
		let cfg = Configuration::builder()
			.conf_source(ConfSource::RealmKdc)
			.realm("EXAMPLE.COM")
			.kdc("kdc.example.com")
			.auth_method(AuthMethod::Keytab)
			.keytab("svc@EXAMPLE.COM", "/etc/svc.keytab")
			.debug_logging(true)
			.build();
		let params = LoginParameters::for_config(&cfg).expect("Keytab parameters should build.");

		assert_eq!(params.auth_method(), AuthMethod::Keytab);
		assert!(params.is_set(keys::DEBUG));
		assert!(params.is_set(keys::USE_KEY_TAB));
		assert!(params.is_set(keys::DO_NOT_PROMPT));
		assert!(params.is_set(keys::REFRESH_KRB5_CONFIG));
		assert!(!params.is_set(keys::USE_TICKET_CACHE));
		assert!(!params.is_set(keys::STORE_KEY));
		assert_eq!(params.get(keys::KEY_TAB), Some("/etc/svc.keytab"));
		assert_eq!(params.get(keys::PRINCIPAL), Some("svc@EXAMPLE.COM"));
		assert_eq!(params.get(keys::STORE_PASS), None);
	}

	#[test]
	fn ticket_cache_override_requires_test_configuration() {
		let base = Configuration::builder().ticket_cache("/tmp/krb5cc_test");
		let production = LoginParameters::for_config(&base.clone().build())
			.expect("Ticket cache parameters should build.");
		let test = LoginParameters::for_config(&base.test_configuration(true).build())
			.expect("Ticket cache parameters should build.");

		assert!(production.is_set(keys::USE_TICKET_CACHE));
		assert_eq!(production.get(keys::TICKET_CACHE), None);
		assert_eq!(test.get(keys::TICKET_CACHE), Some("/tmp/krb5cc_test"));
	}

	#[test]
	fn password_parameters_allow_prompting() {
		let cfg = Configuration::builder().auth_method(AuthMethod::UserPwd).build();
		let params = LoginParameters::for_config(&cfg).expect("Password parameters should build.");

		assert!(!params.is_set(keys::DO_NOT_PROMPT));
		assert!(!params.is_set(keys::USE_KEY_TAB));
		assert!(!params.is_set(keys::USE_TICKET_CACHE));
		assert_eq!(params.get(keys::STORE_PASS), Some("false"));
		assert_eq!(params.iter().count(), 8);
		assert_eq!(format!("{:?}", Password::new("hunter2")), "Password(<redacted>)");
	}
}
