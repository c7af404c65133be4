//! Process-global Kerberos knobs and the backup/restore discipline around them.

// std
use std::env;
// self
use crate::_prelude::*;

/// Environment variables the broker stages while a configuration is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnvKey {
	/// Path of the krb5.conf the Kerberos library should load.
	Krb5Config,
	/// Default realm override.
	Realm,
	/// KDC override.
	Kdc,
	/// Principal hint for keytab logins.
	Principal,
}
impl EnvKey {
	/// Every key the broker touches.
	pub const ALL: [EnvKey; 4] = [Self::Krb5Config, Self::Realm, Self::Kdc, Self::Principal];

	/// Variable name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Krb5Config => "KRB5_CONFIG",
			Self::Realm => "KRB5_REALM",
			Self::Kdc => "KRB5_KDC",
			Self::Principal => "KRB5_PRINCIPAL",
		}
	}
}
impl Display for EnvKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Read/write access to the Kerberos environment.
pub trait Environment
where
	Self: Send + Sync,
{
	/// Current value of `key`.
	fn get(&self, key: EnvKey) -> Option<String>;

	/// Sets `key` to `value`.
	fn set(&self, key: EnvKey, value: &str);

	/// Removes `key`.
	fn remove(&self, key: EnvKey);
}

/// The real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnvironment;
impl Environment for ProcessEnvironment {
	fn get(&self, key: EnvKey) -> Option<String> {
		env::var(key.as_str()).ok()
	}

	fn set(&self, key: EnvKey, value: &str) {
		// SAFETY: only the session worker writes these variables, and the broker assumes a single
		// session per process.
		unsafe { env::set_var(key.as_str(), value) }
	}

	fn remove(&self, key: EnvKey) {
		// SAFETY: see `set`.
		unsafe { env::remove_var(key.as_str()) }
	}
}

/// Isolated in-memory environment for tests and embedders that feed the login module directly.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
	values: RwLock<BTreeMap<EnvKey, String>>,
}
impl MemoryEnvironment {
	/// Creates an empty environment.
	pub fn new() -> Self {
		Self::default()
	}

	/// Seeds a value.
	pub fn with(self, key: EnvKey, value: impl Into<String>) -> Self {
		self.values.write().insert(key, value.into());

		self
	}

	/// Copies out every value currently set.
	pub fn snapshot(&self) -> BTreeMap<EnvKey, String> {
		self.values.read().clone()
	}
}
impl Environment for MemoryEnvironment {
	fn get(&self, key: EnvKey) -> Option<String> {
		self.values.read().get(&key).cloned()
	}

	fn set(&self, key: EnvKey, value: &str) {
		self.values.write().insert(key, value.to_owned());
	}

	fn remove(&self, key: EnvKey) {
		self.values.write().remove(&key);
	}
}

/// Values of every [`EnvKey`] captured before the broker touched them.
///
/// Restoring puts each key back exactly as it was, removing keys that were absent. The backup
/// restores itself when dropped, so a session torn down on any path leaves the environment as
/// it found it.
pub struct EnvironmentBackup {
	env: Arc<dyn Environment>,
	saved: Vec<(EnvKey, Option<String>)>,
	restored: bool,
}
impl EnvironmentBackup {
	/// Records the current value of every key.
	pub fn snapshot(env: Arc<dyn Environment>) -> Self {
		let saved = EnvKey::ALL.iter().map(|&key| (key, env.get(key))).collect();

		Self { env, saved, restored: false }
	}

	/// Removes every key so a configuration starts from a clean slate.
	pub fn clear(&self) {
		for key in EnvKey::ALL {
			self.env.remove(key);
		}
	}

	/// Sets a key on the backed-up environment.
	pub fn set(&self, key: EnvKey, value: &str) {
		self.env.set(key, value);
	}

	/// Puts every key back. Calling it again is a no-op.
	pub fn restore(&mut self) {
		if self.restored {
			return;
		}

		for (key, value) in &self.saved {
			match value {
				Some(value) => self.env.set(*key, value),
				None => self.env.remove(*key),
			}
		}

		self.restored = true;

		tracing::debug!("Restored Kerberos environment.");
	}
}
impl Debug for EnvironmentBackup {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EnvironmentBackup")
			.field("saved", &self.saved)
			.field("restored", &self.restored)
			.finish()
	}
}
impl Drop for EnvironmentBackup {
	fn drop(&mut self) {
		self.restore();
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn restore_puts_back_present_and_absent_keys() {
		let env = Arc::new(MemoryEnvironment::new().with(EnvKey::Krb5Config, "/etc/krb5.conf"));
		let mut backup = EnvironmentBackup::snapshot(env.clone());

		backup.clear();
		backup.set(EnvKey::Krb5Config, "/tmp/krb123.conf");
		backup.set(EnvKey::Principal, "svc@EXAMPLE.COM");

		assert_eq!(env.get(EnvKey::Principal).as_deref(), Some("svc@EXAMPLE.COM"));

		backup.restore();

		assert_eq!(env.get(EnvKey::Krb5Config).as_deref(), Some("/etc/krb5.conf"));
		assert_eq!(env.get(EnvKey::Principal), None);

		// A second restore must not clobber changes made after the first one.
		env.set(EnvKey::Realm, "LATER.COM");
		backup.restore();

		assert_eq!(env.get(EnvKey::Realm).as_deref(), Some("LATER.COM"));
	}

	#[test]
	fn drop_restores_the_environment() {
		let env = Arc::new(MemoryEnvironment::new().with(EnvKey::Kdc, "kdc.example.com"));

		{
			let backup = EnvironmentBackup::snapshot(env.clone());

			backup.clear();

			assert!(env.snapshot().is_empty());
		}

		assert_eq!(env.get(EnvKey::Kdc).as_deref(), Some("kdc.example.com"));
	}
}
