//! Strongly typed Kerberos identifiers (realms, service names, principals).

// self
use crate::_prelude::*;

/// Declares a validated, string-backed identifier; `$kind` names it in errors and `Debug` output.
macro_rules! identifier {
	($(#[$meta:meta])* $name:ident => $kind:literal) => {
		$(#[$meta])*
		#[derive(Clone, PartialEq, Eq, Hash)]
		pub struct $name(String);
		impl $name {
			/// Validates and wraps `value`.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, "{}({})", $kind, self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 255;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} cannot be empty.")]
	Empty {
		/// Kind of identifier (realm, service, host, principal).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (realm, service, host, principal).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (realm, service, host, principal).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
	/// The identifier contains a character reserved by the principal syntax.
	#[error("{kind} contains the reserved character '{found}'.")]
	Reserved {
		/// Kind of identifier (realm, service, host, principal).
		kind: &'static str,
		/// Offending character.
		found: char,
	},
}

identifier! {
	/// Kerberos realm, the administrative domain of a set of principals.
	Realm => "Realm"
}
identifier! {
	/// Service component of a service principal (`HTTP`, `hive`, ...).
	ServiceName => "Service"
}
identifier! {
	/// Fully qualified host component of a service principal.
	HostName => "Host"
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}
	if let Some(found) = view.chars().find(|c| matches!(c, '@' | '/')) {
		return Err(IdentifierError::Reserved { kind, found });
	}

	Ok(())
}

/// Kerberos principal of the form `primary[/instance][@REALM]`.
///
/// The realm is optional because keytab principals are often configured without one, in which
/// case the login module falls back to the default realm of the loaded krb5 config.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal {
	name: String,
	realm: Option<Realm>,
}
impl Principal {
	/// Parses a principal string.
	pub fn parse(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
		const KIND: &str = "Principal";

		let view = value.as_ref();

		if view.is_empty() {
			return Err(IdentifierError::Empty { kind: KIND });
		}
		if view.chars().any(char::is_whitespace) {
			return Err(IdentifierError::ContainsWhitespace { kind: KIND });
		}
		if view.len() > IDENTIFIER_MAX_LEN {
			return Err(IdentifierError::TooLong { kind: KIND, max: IDENTIFIER_MAX_LEN });
		}

		let (name, realm) = match view.rsplit_once('@') {
			Some((name, realm)) => (name, Some(Realm::new(realm)?)),
			None => (view, None),
		};

		if name.is_empty() || name.split('/').any(str::is_empty) {
			return Err(IdentifierError::Empty { kind: KIND });
		}
		if name.contains('@') {
			return Err(IdentifierError::Reserved { kind: KIND, found: '@' });
		}

		Ok(Self { name: name.to_owned(), realm })
	}

	/// Builds a user principal `user@REALM`.
	pub fn user(user: impl AsRef<str>, realm: Realm) -> Result<Self, IdentifierError> {
		let user = user.as_ref();

		validate_view("User", user)?;

		Ok(Self { name: user.to_owned(), realm: Some(realm) })
	}

	/// Builds a service principal `service/host@REALM`.
	pub fn service(service: &ServiceName, host: &HostName, realm: Realm) -> Self {
		Self { name: format!("{service}/{host}"), realm: Some(realm) }
	}

	/// Name part without the realm (`primary[/instance]`).
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Primary component (the part before any `/instance`).
	pub fn primary(&self) -> &str {
		self.name.split('/').next().unwrap_or(&self.name)
	}

	/// Realm, when the principal carries one.
	pub fn realm(&self) -> Option<&Realm> {
		self.realm.as_ref()
	}

	/// Returns a copy with the realm filled in when it was missing.
	pub fn with_default_realm(mut self, realm: &Realm) -> Self {
		if self.realm.is_none() {
			self.realm = Some(realm.clone());
		}

		self
	}
}
impl Debug for Principal {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Principal({self})")
	}
}
impl Display for Principal {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match &self.realm {
			Some(realm) => write!(f, "{}@{realm}", self.name),
			None => f.write_str(&self.name),
		}
	}
}
impl FromStr for Principal {
	type Err = IdentifierError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}
impl TryFrom<String> for Principal {
	type Error = IdentifierError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}
impl From<Principal> for String {
	fn from(value: Principal) -> Self {
		value.to_string()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn principal_parses_user_and_service_forms() {
		let user = Principal::parse("alice@EXAMPLE.COM").expect("User principal should parse.");

		assert_eq!(user.name(), "alice");
		assert_eq!(user.realm().map(|r| r.as_ref()), Some("EXAMPLE.COM"));
		assert_eq!(user.to_string(), "alice@EXAMPLE.COM");

		let service =
			Principal::parse("HTTP/web.example.com@EXAMPLE.COM").expect("SPN should parse.");

		assert_eq!(service.primary(), "HTTP");
		assert_eq!(service.name(), "HTTP/web.example.com");

		let bare = Principal::parse("bob").expect("Realm-less principal should parse.");

		assert!(bare.realm().is_none());

		let realm = Realm::new("CORP.LOCAL").expect("Realm fixture should be valid.");

		assert_eq!(bare.with_default_realm(&realm).to_string(), "bob@CORP.LOCAL");
	}

	#[test]
	fn principal_rejects_malformed_values() {
		assert!(Principal::parse("").is_err());
		assert!(Principal::parse("al ice@EXAMPLE.COM").is_err());
		assert!(Principal::parse("@EXAMPLE.COM").is_err());
		assert!(Principal::parse("alice@").is_err());
		assert!(Principal::parse("HTTP/@EXAMPLE.COM").is_err());
		assert!(Principal::parse("a@b@EXAMPLE.COM").is_err());
	}

	#[test]
	fn service_principal_is_assembled_from_parts() {
		let service = ServiceName::new("hive").expect("Service fixture should be valid.");
		let host = HostName::new("db.example.com").expect("Host fixture should be valid.");
		let realm = Realm::new("EXAMPLE.COM").expect("Realm fixture should be valid.");

		assert_eq!(
			Principal::service(&service, &host, realm).to_string(),
			"hive/db.example.com@EXAMPLE.COM"
		);
		assert!(ServiceName::new("hive/x").is_err());
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let principal: Principal = toml::Value::String("svc@EXAMPLE.COM".into())
			.try_into()
			.expect("Principal should deserialize from a string.");

		assert_eq!(principal.to_string(), "svc@EXAMPLE.COM");

		let invalid: Result<Principal, _> = toml::Value::String("with space".into()).try_into();

		assert!(invalid.is_err());
	}
}
