//! How the broker authenticates: where Kerberos client configuration comes from, which
//! credential source to trust, and the knobs around debugging and renewal.

pub mod builder;
pub mod env;
pub mod krb5;
pub mod source;

pub use builder::*;
pub use env::*;
pub use krb5::*;
pub use source::*;

// std
use std::fs::File;
// self
use crate::{
	_prelude::*,
	auth::{Principal, Realm},
	error::ConfigError,
};

/// Default lead time before expiry at which renewable or keytab tickets are refreshed.
pub const DEFAULT_RENEWAL_SAFETY_MARGIN_SECS: u64 = 300;

macro_rules! def_label_enum {
	($name:ident, $err:ident, $doc:literal, { $($(#[$meta:meta])* $variant:ident => $label:literal),+ $(,)? }) => {
		#[doc = $doc]
		#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub enum $name {
			$($(#[$meta])* $variant),+
		}
		impl $name {
			/// Returns the canonical upper-case label.
			pub const fn as_str(self) -> &'static str {
				match self {
					$(Self::$variant => $label),+
				}
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(self.as_str())
			}
		}
		impl FromStr for $name {
			type Err = ConfigError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				let view = s.trim();

				$(
					if view.eq_ignore_ascii_case($label) {
						return Ok(Self::$variant);
					}
				)+

				Err(ConfigError::$err { value: s.to_owned() })
			}
		}
		impl TryFrom<String> for $name {
			type Error = ConfigError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				value.parse()
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.as_str().to_owned()
			}
		}
	};
}

def_label_enum! {
	ConfSource,
	UnknownConfSource,
	"Where the Kerberos client configuration (realm to KDC mapping) comes from.",
	{
		/// Whatever the Kerberos library finds on its own (`/etc/krb5.conf`, `KRB5_CONFIG`, ...).
		#[default]
		Default => "DEFAULT",
		/// An explicit krb5.conf file.
		File => "FILE",
		/// A realm and KDC pair; the broker synthesizes a minimal config file from them.
		RealmKdc => "REALM_KDC",
	}
}

def_label_enum! {
	AuthMethod,
	UnknownAuthMethod,
	"Credential source used to obtain the ticket-granting ticket.",
	{
		/// Reuse the ticket from the operating system's ticket cache.
		#[default]
		TicketCache => "TICKET_CACHE",
		/// Log in with a user name and password obtained interactively.
		UserPwd => "USER_PWD",
		/// Log in non-interactively with a keytab.
		Keytab => "KEYTAB",
	}
}

/// Severity at which captured Kerberos debug output is logged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DebugLevel {
	/// Finest-grained output.
	Trace,
	/// Debug output.
	Debug,
	/// Informational output.
	#[default]
	Info,
	/// Warnings.
	Warn,
	/// Errors.
	Error,
}
impl DebugLevel {
	/// Returns the canonical upper-case label.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Trace => "TRACE",
			Self::Debug => "DEBUG",
			Self::Info => "INFO",
			Self::Warn => "WARN",
			Self::Error => "ERROR",
		}
	}
}
impl Display for DebugLevel {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for DebugLevel {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			"TRACE" => Ok(Self::Trace),
			"DEBUG" => Ok(Self::Debug),
			"INFO" => Ok(Self::Info),
			"WARN" | "WARNING" => Ok(Self::Warn),
			"ERROR" | "FATAL" => Ok(Self::Error),
			_ => Err(ConfigError::InvalidDebugLevel { level: s.to_owned() }),
		}
	}
}
impl From<DebugLevel> for tracing::Level {
	fn from(value: DebugLevel) -> Self {
		match value {
			DebugLevel::Trace => tracing::Level::TRACE,
			DebugLevel::Debug => tracing::Level::DEBUG,
			DebugLevel::Info => tracing::Level::INFO,
			DebugLevel::Warn => tracing::Level::WARN,
			DebugLevel::Error => tracing::Level::ERROR,
		}
	}
}

/// Immutable description of how to authenticate.
///
/// Values are produced by [`ConfigurationBuilder`] (or decoded from TOML), which normalizes every
/// string so that empty or whitespace-only input reads as absent. Nothing is validated at
/// construction time; [`Configuration::validate_shallow`] runs before any I/O and the session
/// performs the file-backed checks after staging the environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawConfiguration", into = "RawConfiguration")]
pub struct Configuration {
	pub(crate) conf_source: ConfSource,
	pub(crate) conf_file: Option<PathBuf>,
	pub(crate) realm: Option<String>,
	pub(crate) kdc: Option<String>,
	pub(crate) auth_method: AuthMethod,
	pub(crate) keytab_principal: Option<String>,
	pub(crate) keytab_file: Option<PathBuf>,
	pub(crate) debug_logging: bool,
	pub(crate) debug_level: Option<String>,
	pub(crate) renewal_safety_margin_secs: u64,
	pub(crate) ticket_cache: Option<PathBuf>,
	pub(crate) test_configuration: bool,
}
impl Configuration {
	/// Returns a builder seeded with the defaults (DEFAULT config source, TICKET_CACHE login).
	pub fn builder() -> ConfigurationBuilder {
		ConfigurationBuilder::default()
	}

	/// Decodes a configuration from TOML text, reporting the offending key path on failure.
	pub fn from_toml_str(text: &str) -> Result<Self, serde_path_to_error::Error<toml::de::Error>> {
		serde_path_to_error::deserialize(toml::Deserializer::new(text))
	}

	/// Source of the Kerberos client configuration.
	pub fn conf_source(&self) -> ConfSource {
		self.conf_source
	}

	/// Path of the krb5.conf file (FILE source).
	pub fn conf_file(&self) -> Option<&Path> {
		self.conf_file.as_deref()
	}

	/// Realm (REALM_KDC source).
	pub fn realm(&self) -> Option<&str> {
		self.realm.as_deref()
	}

	/// KDC host (REALM_KDC source).
	pub fn kdc(&self) -> Option<&str> {
		self.kdc.as_deref()
	}

	/// Credential source.
	pub fn auth_method(&self) -> AuthMethod {
		self.auth_method
	}

	/// Keytab principal (KEYTAB login).
	pub fn keytab_principal(&self) -> Option<&str> {
		self.keytab_principal.as_deref()
	}

	/// Keytab path (KEYTAB login).
	pub fn keytab_file(&self) -> Option<&Path> {
		self.keytab_file.as_deref()
	}

	/// Whether Kerberos debug output should be captured.
	pub fn debug_logging(&self) -> bool {
		self.debug_logging
	}

	/// Parsed debug level, falling back to INFO when unset.
	pub fn debug_level(&self) -> Result<DebugLevel, ConfigError> {
		self.debug_level.as_deref().map_or(Ok(DebugLevel::default()), str::parse::<DebugLevel>)
	}

	/// Lead time before expiry at which renewable or keytab tickets are refreshed.
	pub fn renewal_safety_margin(&self) -> Duration {
		Duration::seconds(i64::try_from(self.renewal_safety_margin_secs).unwrap_or(i64::MAX))
	}

	/// Ticket cache override. Only honored for test configurations.
	pub fn ticket_cache(&self) -> Option<&Path> {
		self.ticket_cache.as_deref()
	}

	/// Returns `true` for configurations built for an embedded test KDC.
	pub fn is_test_configuration(&self) -> bool {
		self.test_configuration
	}

	/// Parsed realm, when one is configured.
	pub fn realm_id(&self) -> Result<Option<Realm>, ConfigError> {
		self.realm.as_deref().map(Realm::new).transpose().map_err(ConfigError::from)
	}

	/// Parsed keytab principal, when one is configured.
	pub fn keytab_principal_id(&self) -> Result<Option<Principal>, ConfigError> {
		self.keytab_principal.as_deref().map(Principal::parse).transpose().map_err(ConfigError::from)
	}

	/// Checks the required fields for the configured source and method without touching the
	/// filesystem. Returns the first violation.
	pub fn validate_shallow(&self) -> Result<(), ConfigError> {
		match self.collect_errors().into_iter().next() {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	/// Collects every shallow error plus file-level warnings, for display next to a settings form.
	pub fn diagnose(&self) -> ConfigReport {
		let errors = self.collect_errors();
		let mut warnings = Vec::new();

		if self.conf_source == ConfSource::File
			&& let Some(path) = &self.conf_file
		{
			check_file(FileKind::Krb5Conf, path, &mut warnings);
		}
		if self.auth_method == AuthMethod::Keytab
			&& let Some(path) = &self.keytab_file
		{
			check_file(FileKind::Keytab, path, &mut warnings);
		}

		ConfigReport { errors, warnings }
	}

	/// One-line summary for logs, e.g. `cfg:DEFAULT / auth:TICKET_CACHE / debug=false`.
	pub fn summary(&self) -> String {
		let cfg = match self.conf_source {
			ConfSource::Default => String::from("cfg:DEFAULT"),
			ConfSource::File => format!("cfg:{}", display_path(self.conf_file.as_deref())),
			ConfSource::RealmKdc => format!(
				"cfg:realm={}|KDC={}",
				self.realm.as_deref().unwrap_or_default(),
				self.kdc.as_deref().unwrap_or_default()
			),
		};
		let auth = match self.auth_method {
			AuthMethod::TicketCache => String::from("auth:TICKET_CACHE"),
			AuthMethod::Keytab => format!(
				"auth:keytab={}|principal={}",
				display_path(self.keytab_file.as_deref()),
				self.keytab_principal.as_deref().unwrap_or_default()
			),
			AuthMethod::UserPwd => String::from("auth:USER_PWD"),
		};

		format!("{cfg} / {auth} / debug={}", self.debug_logging)
	}

	fn collect_errors(&self) -> Vec<ConfigError> {
		let mut errors = Vec::new();

		match self.conf_source {
			ConfSource::Default => {},
			ConfSource::File =>
				if self.conf_file.is_none() {
					errors.push(ConfigError::MissingConfFile);
				},
			ConfSource::RealmKdc => {
				match self.realm_id() {
					Ok(Some(_)) => {},
					Ok(None) => errors.push(ConfigError::MissingRealm),
					Err(e) => errors.push(e),
				}

				if self.kdc.is_none() {
					errors.push(ConfigError::MissingKdc);
				}
			},
		}

		if self.auth_method == AuthMethod::Keytab {
			match self.keytab_principal_id() {
				Ok(Some(_)) => {},
				Ok(None) => errors.push(ConfigError::MissingKeytabPrincipal),
				Err(e) => errors.push(e),
			}

			if self.keytab_file.is_none() {
				errors.push(ConfigError::MissingKeytabFile);
			}
		}
		if let Err(e) = self.debug_level() {
			errors.push(e);
		}

		errors
	}
}
impl Default for Configuration {
	fn default() -> Self {
		Self::builder().build()
	}
}

/// Outcome of [`Configuration::diagnose`].
#[derive(Debug, Default)]
pub struct ConfigReport {
	/// Blocking problems; the configuration cannot be used.
	pub errors: Vec<ConfigError>,
	/// Non-blocking problems with referenced files.
	pub warnings: Vec<ConfigWarning>,
}
impl ConfigReport {
	/// Returns `true` when no errors were found.
	pub fn is_ok(&self) -> bool {
		self.errors.is_empty()
	}
}

/// File referenced by a configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
	/// krb5.conf for the FILE source.
	Krb5Conf,
	/// Keytab for KEYTAB login.
	Keytab,
}
impl FileKind {
	const fn label(self) -> &'static str {
		match self {
			Self::Krb5Conf => "Kerberos config file",
			Self::Keytab => "Keytab file",
		}
	}
}

/// Non-blocking problem with a file referenced by the configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigWarning {
	/// The file does not exist.
	Missing {
		/// Which file.
		kind: FileKind,
		/// Configured path.
		path: PathBuf,
	},
	/// The path exists but is a directory or another non-file entry.
	NotAFile {
		/// Which file.
		kind: FileKind,
		/// Configured path.
		path: PathBuf,
	},
	/// The file exists but cannot be opened.
	Unreadable {
		/// Which file.
		kind: FileKind,
		/// Configured path.
		path: PathBuf,
	},
}
impl Display for ConfigWarning {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Missing { kind, path } =>
				write!(f, "{} {} does not exist.", kind.label(), path.display()),
			Self::NotAFile { kind, path } =>
				write!(f, "{} {} must be a file.", kind.label(), path.display()),
			Self::Unreadable { kind, path } =>
				write!(f, "{} {} cannot be read.", kind.label(), path.display()),
		}
	}
}

#[derive(Serialize, Deserialize)]
#[serde(default)]
struct RawConfiguration {
	conf_source: ConfSource,
	conf_file: Option<String>,
	realm: Option<String>,
	kdc: Option<String>,
	auth_method: AuthMethod,
	keytab_principal: Option<String>,
	keytab_file: Option<String>,
	debug: bool,
	debug_level: Option<String>,
	renewal_safety_margin_secs: u64,
	ticket_cache: Option<String>,
	test_configuration: bool,
}
impl Default for RawConfiguration {
	fn default() -> Self {
		Configuration::default().into()
	}
}
impl From<RawConfiguration> for Configuration {
	fn from(raw: RawConfiguration) -> Self {
		let mut builder = Configuration::builder()
			.conf_source(raw.conf_source)
			.auth_method(raw.auth_method)
			.debug_logging(raw.debug)
			.renewal_safety_margin_secs(raw.renewal_safety_margin_secs)
			.test_configuration(raw.test_configuration);

		builder.conf_file = raw.conf_file;
		builder.realm = raw.realm;
		builder.kdc = raw.kdc;
		builder.keytab_principal = raw.keytab_principal;
		builder.keytab_file = raw.keytab_file;
		builder.debug_level = raw.debug_level;
		builder.ticket_cache = raw.ticket_cache;

		builder.build()
	}
}
impl From<Configuration> for RawConfiguration {
	fn from(cfg: Configuration) -> Self {
		let path = |p: Option<PathBuf>| p.map(|p| p.to_string_lossy().into_owned());

		Self {
			conf_source: cfg.conf_source,
			conf_file: path(cfg.conf_file),
			realm: cfg.realm,
			kdc: cfg.kdc,
			auth_method: cfg.auth_method,
			keytab_principal: cfg.keytab_principal,
			keytab_file: path(cfg.keytab_file),
			debug: cfg.debug_logging,
			debug_level: cfg.debug_level,
			renewal_safety_margin_secs: cfg.renewal_safety_margin_secs,
			ticket_cache: path(cfg.ticket_cache),
			test_configuration: cfg.test_configuration,
		}
	}
}

fn check_file(kind: FileKind, path: &Path, warnings: &mut Vec<ConfigWarning>) {
	let path_buf = path.to_path_buf();

	if !path.exists() {
		warnings.push(ConfigWarning::Missing { kind, path: path_buf });
	} else if !path.is_file() {
		warnings.push(ConfigWarning::NotAFile { kind, path: path_buf });
	} else if File::open(path).is_err() {
		warnings.push(ConfigWarning::Unreadable { kind, path: path_buf });
	}
}

fn display_path(path: Option<&Path>) -> String {
	path.map(|p| p.display().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn enums_parse_case_insensitively() {
		assert_eq!("realm_kdc".parse::<ConfSource>().ok(), Some(ConfSource::RealmKdc));
		assert_eq!(" Keytab ".parse::<AuthMethod>().ok(), Some(AuthMethod::Keytab));
		assert_eq!("warning".parse::<DebugLevel>().ok(), Some(DebugLevel::Warn));
		assert!(matches!(
			"LDAP".parse::<AuthMethod>(),
			Err(ConfigError::UnknownAuthMethod { value }) if value == "LDAP"
		));
	}

	#[test]
	fn defaults_validate_and_summarize() {
		let cfg = Configuration::default();

		assert_eq!(cfg.conf_source(), ConfSource::Default);
		assert_eq!(cfg.auth_method(), AuthMethod::TicketCache);
		assert_eq!(cfg.renewal_safety_margin(), Duration::seconds(300));
		assert!(cfg.validate_shallow().is_ok());
		assert_eq!(cfg.summary(), "cfg:DEFAULT / auth:TICKET_CACHE / debug=false");
	}

	#[test]
	fn shallow_validation_reports_first_violation() {
		let missing_kdc = Configuration::builder()
			.conf_source(ConfSource::RealmKdc)
			.realm("EXAMPLE.COM")
			.kdc("   ")
			.build();

		assert!(matches!(missing_kdc.validate_shallow(), Err(ConfigError::MissingKdc)));

		let keytab = Configuration::builder()
			.conf_source(ConfSource::File)
			.conf_file("/etc/krb5.conf")
			.auth_method(AuthMethod::Keytab)
			.keytab_file("/etc/svc.keytab")
			.build();

		assert!(matches!(keytab.validate_shallow(), Err(ConfigError::MissingKeytabPrincipal)));

		let level = Configuration::builder().debug_level("LOUD").build();

		assert!(matches!(
			level.validate_shallow(),
			Err(ConfigError::InvalidDebugLevel { level }) if level == "LOUD"
		));

		let file = Configuration::builder().conf_source(ConfSource::File).build();

		assert!(matches!(file.validate_shallow(), Err(ConfigError::MissingConfFile)));
	}

	#[test]
	fn diagnose_collects_errors_and_file_warnings() {
		let dir = tempfile::tempdir().expect("Temp dir should be created.");
		let report = Configuration::builder()
			.conf_source(ConfSource::File)
			.conf_file(dir.path().join("missing.conf").to_string_lossy())
			.auth_method(AuthMethod::Keytab)
			.keytab(" ", dir.path().to_string_lossy())
			.build()
			.diagnose();

		assert!(!report.is_ok());
		assert!(matches!(report.errors.as_slice(), [ConfigError::MissingKeytabPrincipal]));
		assert!(matches!(
			report.warnings.as_slice(),
			[
				ConfigWarning::Missing { kind: FileKind::Krb5Conf, .. },
				ConfigWarning::NotAFile { kind: FileKind::Keytab, .. }
			]
		));
		assert!(report.warnings[0].to_string().ends_with("does not exist."));
	}

	#[test]
	fn summary_covers_every_source_and_method() {
		let realm_kdc = Configuration::builder()
			.conf_source(ConfSource::RealmKdc)
			.realm("EXAMPLE.COM")
			.kdc("kdc.example.com")
			.auth_method(AuthMethod::Keytab)
			.keytab("svc@EXAMPLE.COM", "/etc/svc.keytab")
			.debug_logging(true)
			.build();

		assert_eq!(
			realm_kdc.summary(),
			"cfg:realm=EXAMPLE.COM|KDC=kdc.example.com / \
			 auth:keytab=/etc/svc.keytab|principal=svc@EXAMPLE.COM / debug=true"
		);

		let file = Configuration::builder()
			.conf_source(ConfSource::File)
			.conf_file("/etc/krb5.conf")
			.auth_method(AuthMethod::UserPwd)
			.build();

		assert_eq!(file.summary(), "cfg:/etc/krb5.conf / auth:USER_PWD / debug=false");
	}

	#[test]
	fn toml_decoding_normalizes_and_reports_paths() {
		let cfg = Configuration::from_toml_str(
			r#"
conf_source = "realm_kdc"
realm = "EXAMPLE.COM"
kdc = "kdc.example.com"
auth_method = "KEYTAB"
keytab_principal = "svc@EXAMPLE.COM"
keytab_file = "/etc/svc.keytab"
debug_level = "  "
renewal_safety_margin_secs = 60
"#,
		)
		.expect("Configuration should decode.");

		assert_eq!(cfg.conf_source(), ConfSource::RealmKdc);
		assert_eq!(cfg.auth_method(), AuthMethod::Keytab);
		assert_eq!(cfg.debug_level().ok(), Some(DebugLevel::Info));
		assert_eq!(cfg.renewal_safety_margin(), Duration::minutes(1));
		assert!(cfg.validate_shallow().is_ok());

		let err = Configuration::from_toml_str("auth_method = \"LDAP\"")
			.expect_err("Unknown auth method should be rejected.");

		assert_eq!(err.path().to_string(), "auth_method");
	}
}
