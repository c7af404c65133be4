//! Consuming builder for [`Configuration`], used by settings forms and tests.

// self
use crate::{
	_prelude::*,
	config::{AuthMethod, ConfSource, Configuration, DEFAULT_RENEWAL_SAFETY_MARGIN_SECS},
};

/// Builder for [`Configuration`] values.
///
/// Every string setter trims its input and treats an empty result as "not configured", so a
/// settings form can be forwarded verbatim.
#[derive(Clone, Debug)]
pub struct ConfigurationBuilder {
	/// Source of the Kerberos client configuration.
	pub conf_source: ConfSource,
	/// krb5.conf path for the FILE source.
	pub conf_file: Option<String>,
	/// Realm for the REALM_KDC source.
	pub realm: Option<String>,
	/// KDC host for the REALM_KDC source.
	pub kdc: Option<String>,
	/// Credential source.
	pub auth_method: AuthMethod,
	/// Principal for KEYTAB login.
	pub keytab_principal: Option<String>,
	/// Keytab path for KEYTAB login.
	pub keytab_file: Option<String>,
	/// Whether Kerberos debug output is captured.
	pub debug_logging: bool,
	/// Level at which captured output is logged.
	pub debug_level: Option<String>,
	/// Lead time before expiry at which renewable or keytab tickets are refreshed.
	pub renewal_safety_margin_secs: u64,
	/// Ticket cache override (test configurations only).
	pub ticket_cache: Option<String>,
	/// Marks a configuration aimed at an embedded test KDC.
	pub test_configuration: bool,
}
impl ConfigurationBuilder {
	/// Sets the configuration source.
	pub fn conf_source(mut self, source: ConfSource) -> Self {
		self.conf_source = source;

		self
	}

	/// Sets the krb5.conf path.
	pub fn conf_file(mut self, path: impl AsRef<str>) -> Self {
		self.conf_file = clean_str(path.as_ref());

		self
	}

	/// Sets the realm.
	pub fn realm(mut self, realm: impl AsRef<str>) -> Self {
		self.realm = clean_str(realm.as_ref());

		self
	}

	/// Sets the KDC host.
	pub fn kdc(mut self, kdc: impl AsRef<str>) -> Self {
		self.kdc = clean_str(kdc.as_ref());

		self
	}

	/// Sets the credential source.
	pub fn auth_method(mut self, method: AuthMethod) -> Self {
		self.auth_method = method;

		self
	}

	/// Sets the keytab principal.
	pub fn keytab_principal(mut self, principal: impl AsRef<str>) -> Self {
		self.keytab_principal = clean_str(principal.as_ref());

		self
	}

	/// Sets the keytab path.
	pub fn keytab_file(mut self, path: impl AsRef<str>) -> Self {
		self.keytab_file = clean_str(path.as_ref());

		self
	}

	/// Sets the keytab principal and path together.
	pub fn keytab(self, principal: impl AsRef<str>, path: impl AsRef<str>) -> Self {
		self.keytab_principal(principal).keytab_file(path)
	}

	/// Enables or disables debug capture.
	pub fn debug_logging(mut self, enabled: bool) -> Self {
		self.debug_logging = enabled;

		self
	}

	/// Sets the debug level label (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`).
	pub fn debug_level(mut self, level: impl AsRef<str>) -> Self {
		self.debug_level = clean_str(level.as_ref());

		self
	}

	/// Sets the renewal safety margin in seconds.
	pub fn renewal_safety_margin_secs(mut self, secs: u64) -> Self {
		self.renewal_safety_margin_secs = secs;

		self
	}

	/// Overrides the ticket cache location.
	pub fn ticket_cache(mut self, path: impl AsRef<str>) -> Self {
		self.ticket_cache = clean_str(path.as_ref());

		self
	}

	/// Marks the configuration as targeting an embedded test KDC.
	pub fn test_configuration(mut self, enabled: bool) -> Self {
		self.test_configuration = enabled;

		self
	}

	/// Consumes the builder and produces a normalized [`Configuration`].
	pub fn build(self) -> Configuration {
		Configuration {
			conf_source: self.conf_source,
			conf_file: clean(self.conf_file).map(PathBuf::from),
			realm: clean(self.realm),
			kdc: clean(self.kdc),
			auth_method: self.auth_method,
			keytab_principal: clean(self.keytab_principal),
			keytab_file: clean(self.keytab_file).map(PathBuf::from),
			debug_logging: self.debug_logging,
			debug_level: clean(self.debug_level),
			renewal_safety_margin_secs: self.renewal_safety_margin_secs,
			ticket_cache: clean(self.ticket_cache).map(PathBuf::from),
			test_configuration: self.test_configuration,
		}
	}
}
impl Default for ConfigurationBuilder {
	fn default() -> Self {
		Self {
			conf_source: ConfSource::default(),
			conf_file: None,
			realm: None,
			kdc: None,
			auth_method: AuthMethod::default(),
			keytab_principal: None,
			keytab_file: None,
			debug_logging: false,
			debug_level: None,
			renewal_safety_margin_secs: DEFAULT_RENEWAL_SAFETY_MARGIN_SECS,
			ticket_cache: None,
			test_configuration: false,
		}
	}
}

fn clean(value: Option<String>) -> Option<String> {
	value.as_deref().and_then(clean_str)
}

fn clean_str(value: &str) -> Option<String> {
	let trimmed = value.trim();

	(!trimmed.is_empty()).then(|| trimmed.to_owned())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn blank_strings_are_absent() {
		let cfg = Configuration::builder()
			.realm("  ")
			.kdc("\t kdc.example.com \n")
			.keytab("", " /etc/svc.keytab ")
			.build();

		assert_eq!(cfg.realm(), None);
		assert_eq!(cfg.kdc(), Some("kdc.example.com"));
		assert_eq!(cfg.keytab_principal(), None);
		assert_eq!(cfg.keytab_file(), Some(Path::new("/etc/svc.keytab")));
	}

	#[test]
	fn public_fields_are_normalized_on_build() {
		let mut builder = Configuration::builder();

		builder.conf_file = Some(String::from("   "));
		builder.debug_level = Some(String::from(" debug "));

		let cfg = builder.build();

		assert_eq!(cfg.conf_file(), None);
		assert_eq!(cfg.debug_level().ok(), Some(crate::config::DebugLevel::Debug));
	}
}
