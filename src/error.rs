//! Broker-level error types shared across configuration, login, renewal, and delegation.

// self
use crate::_prelude::*;

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error used for failures coming out of external collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Configuration is incomplete or malformed; raised before any I/O.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Configuration failed validation against files, the KDC, or the loaded krb5 config.
	#[error(transparent)]
	DeepConfig(#[from] DeepConfigError),
	/// The login module refused or failed the authentication.
	#[error(transparent)]
	Login(#[from] LoginError),
	/// Constrained delegation could not produce an impersonated credential.
	#[error(transparent)]
	Delegation(#[from] DelegationError),

	/// The user declined the interactive password prompt.
	#[error("Kerberos login was cancelled by the user.")]
	UserCancelled,
	/// The caller stopped waiting for the result.
	#[error("Operation was cancelled.")]
	Cancelled,
	/// An operation was invoked in a session state that does not allow it.
	#[error("Illegal session state: {reason}.")]
	IllegalState {
		/// Description of the violated precondition.
		reason: String,
	},
	/// The worker thread is gone, so no further operation can be scheduled.
	#[error("Kerberos worker is not running.")]
	WorkerUnavailable,
	/// The worker thread or its runtime could not be started.
	#[error("Failed to start the Kerberos worker.")]
	WorkerSpawn(#[source] std::io::Error),
	/// A login attempted on behalf of several queued runs failed; each of them receives it.
	#[error(transparent)]
	Shared(Arc<Error>),
}
impl Error {
	/// Shorthand for [`Error::IllegalState`].
	pub fn illegal_state(reason: impl Into<String>) -> Self {
		Self::IllegalState { reason: reason.into() }
	}

	/// Returns `true` for failures produced by authentication rather than by the caller.
	pub fn is_auth_failure(&self) -> bool {
		matches!(
			self.root(),
			Self::Config(_) | Self::DeepConfig(_) | Self::Login(_) | Self::UserCancelled
		)
	}

	/// The underlying failure, looking through [`Error::Shared`].
	pub fn root(&self) -> &Error {
		match self {
			Self::Shared(inner) => inner.root(),
			other => other,
		}
	}
}

/// Shallow configuration failures. These never involve file or network access.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// FILE config source without a path.
	#[error("Kerberos config file must be specified.")]
	MissingConfFile,
	/// REALM_KDC config source without a realm.
	#[error("Realm must be specified.")]
	MissingRealm,
	/// REALM_KDC config source without a KDC.
	#[error("KDC must be specified.")]
	MissingKdc,
	/// KEYTAB authentication without a principal.
	#[error("Keytab principal must be specified.")]
	MissingKeytabPrincipal,
	/// KEYTAB authentication without a keytab path.
	#[error("Keytab file must be specified.")]
	MissingKeytabFile,
	/// Debug log level is not one of the recognized levels.
	#[error("Debug log level '{level}' is not a valid log level.")]
	InvalidDebugLevel {
		/// Level string as supplied.
		level: String,
	},
	/// A principal or realm could not be parsed.
	#[error("Invalid Kerberos identifier: {0}")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Unknown configuration source label.
	#[error("'{value}' is not a valid way to configure Kerberos (must be one of DEFAULT, FILE or REALM_KDC).")]
	UnknownConfSource {
		/// Label as supplied.
		value: String,
	},
	/// Unknown authentication method label.
	#[error("'{value}' is not a valid Kerberos authentication method (must be one of TICKET_CACHE, USER_PWD or KEYTAB).")]
	UnknownAuthMethod {
		/// Label as supplied.
		value: String,
	},
	/// TOML configuration could not be decoded.
	#[error("Configuration file {path} is malformed.")]
	Parse {
		/// File the configuration was read from.
		path: PathBuf,
		/// Structured decoding failure including the offending key path.
		#[source]
		source: serde_path_to_error::Error<toml::de::Error>,
	},
	/// Configuration file could not be read.
	#[error("Configuration file {path} could not be read.")]
	Io {
		/// File the configuration was read from.
		path: PathBuf,
		/// Underlying I/O failure.
		#[source]
		source: std::io::Error,
	},
}

/// Validation failures that surface only after touching files, the krb5 config, or the KDC.
///
/// Whoever sees one of these must roll the session back.
#[derive(Debug, ThisError)]
pub enum DeepConfigError {
	/// Keytab file is missing or cannot be read.
	#[error("Keytab file {path} cannot be read.")]
	KeytabUnreadable {
		/// Keytab path.
		path: PathBuf,
		/// Underlying I/O failure.
		#[source]
		source: std::io::Error,
	},
	/// Keytab holds no keys for the configured principal.
	#[error("Keytab file does not contain any keys for principal '{principal}'.")]
	PrincipalNotInKeytab {
		/// Principal that was looked up.
		principal: String,
	},
	/// Realm of the keytab principal differs from the configured realm.
	#[error("The configured realm '{configured}' does not match realm {principal_realm} from keytab principal.")]
	RealmMismatch {
		/// Realm from the configuration.
		configured: String,
		/// Realm parsed from the keytab principal.
		principal_realm: String,
	},
	/// No KDC could be found for the realm.
	#[error("No KDC could be resolved for realm '{realm}'.")]
	KdcUnresolvable {
		/// Realm that was resolved.
		realm: String,
	},
	/// The synthesized krb5 config could not be written.
	#[error("Failed to write the synthesized Kerberos config file.")]
	Krb5Conf(#[source] std::io::Error),
	/// The login module failed to reload the Kerberos config.
	#[error("Failed to refresh Kerberos config.")]
	Refresh(#[source] BoxError),
}

/// Authentication failures reported by the login module or the gate.
#[derive(Debug, ThisError)]
pub enum LoginError {
	/// Password authentication needs a prior interactive login.
	#[error("Not logged into Kerberos. Please login first.")]
	NotLoggedIn,
	/// The KDC or login module rejected the credentials.
	#[error("Kerberos login failed: {reason}.")]
	Rejected {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// The login module failed for another reason (network, malformed cache, ...).
	#[error("Kerberos login module failed.")]
	Module {
		/// Underlying failure.
		#[source]
		source: BoxError,
	},
	/// The operation needs a credential but the session holds none.
	#[error("No Kerberos credential is held by the session.")]
	MissingCredential,
}
impl LoginError {
	/// Wraps an arbitrary login-module failure.
	pub fn module(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Module { source: Box::new(src) }
	}

	/// Shorthand for [`LoginError::Rejected`].
	pub fn rejected(reason: impl Into<String>) -> Self {
		Self::Rejected { reason: reason.into() }
	}
}

/// Constrained delegation failures.
#[derive(Debug, ThisError)]
pub enum DelegationError {
	/// The execution context does not name a user to impersonate.
	#[error("Could not determine workflow user to impersonate: workflow must be running on Hub or Server.")]
	NoWorkflowUser,
	/// Neither the execution context nor the base principal names a realm.
	#[error("Could not determine the realm of the user to impersonate.")]
	MissingRealm,
	/// The workflow user does not form a valid principal.
	#[error("Invalid principal for constrained delegation: {0}")]
	InvalidIdentity(#[from] crate::auth::IdentifierError),
	/// The S4U2Self/S4U2Proxy exchange failed.
	#[error("Constrained delegation exchange failed.")]
	Exchange {
		/// Underlying protocol failure.
		#[source]
		source: BoxError,
	},
}
impl DelegationError {
	/// Wraps a protocol-library failure.
	pub fn exchange(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Exchange { source: Box::new(src) }
	}
}
