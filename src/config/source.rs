//! Where the active [`Configuration`] is loaded from.

// std
use std::{fs, io::Write};
// self
use crate::{_prelude::*, config::Configuration, error::ConfigError};

/// Supplies the configuration an authenticated run should use.
///
/// The gate loads the configuration each time it has to log in, so providers backed by mutable
/// storage pick up changes without restarting the session.
pub trait ConfigProvider
where
	Self: Send + Sync,
{
	/// Returns the current configuration.
	fn load(&self) -> Result<Configuration, ConfigError>;
}

/// In-memory configuration that can be swapped at runtime.
#[derive(Debug, Default)]
pub struct StaticConfig {
	inner: RwLock<Configuration>,
}
impl StaticConfig {
	/// Wraps a configuration.
	pub fn new(cfg: Configuration) -> Self {
		Self { inner: RwLock::new(cfg) }
	}

	/// Replaces the configuration used by subsequent logins.
	pub fn replace(&self, cfg: Configuration) -> Configuration {
		std::mem::replace(&mut *self.inner.write(), cfg)
	}
}
impl ConfigProvider for StaticConfig {
	fn load(&self) -> Result<Configuration, ConfigError> {
		Ok(self.inner.read().clone())
	}
}

/// TOML file re-read on every load.
#[derive(Clone, Debug)]
pub struct FileConfig {
	path: PathBuf,
}
impl FileConfig {
	/// Points at a TOML file; the file does not need to exist yet.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Location of the file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Writes `cfg` to the file, replacing it atomically.
	pub fn store(&self, cfg: &Configuration) -> Result<(), ConfigError> {
		let io_err = |source| ConfigError::Io { path: self.path.clone(), source };
		let text = toml::to_string_pretty(cfg)
			.map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
		let parent =
			self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));

		fs::create_dir_all(parent).map_err(io_err)?;

		let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;

		tmp.write_all(text.as_bytes()).map_err(io_err)?;
		tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

		tracing::debug!(path = %self.path.display(), "Stored Kerberos configuration.");

		Ok(())
	}
}
impl ConfigProvider for FileConfig {
	fn load(&self) -> Result<Configuration, ConfigError> {
		let text = fs::read_to_string(&self.path)
			.map_err(|source| ConfigError::Io { path: self.path.clone(), source })?;

		Configuration::from_toml_str(&text)
			.map_err(|source| ConfigError::Parse { path: self.path.clone(), source })
	}
}
