//! Synthesized krb5.conf for the REALM_KDC configuration source.

// std
use std::io::Write;
// crates.io
use tempfile::TempPath;
// self
use crate::{_prelude::*, auth::Realm, error::DeepConfigError};

/// Renders the minimal krb5.conf that maps `realm` to `kdc`.
///
/// DNS lookups are disabled so the realm is resolved only through the given KDC, and the KDC
/// timeout is kept short because a login blocks every other session operation while it waits.
/// Test configurations also force TCP, which embedded test KDCs require.
pub fn render_krb5_conf(realm: &Realm, kdc: &str, test_configuration: bool) -> String {
	let mut out = String::from("[libdefaults]\n");

	out.push_str(&format!("\tdefault_realm = {realm}\n"));

	if test_configuration {
		out.push_str("\tudp_preference_limit = 1\n");
	}

	out.push_str("\tdns_lookup_kdc = false\n");
	out.push_str("\tdns_lookup_realm = false\n\n");
	out.push_str("[realms]\n");
	out.push_str(&format!("\t{realm} = {{\n"));
	out.push_str(&format!("\t\tkdc = {kdc}\n"));
	out.push_str("\t\tmax_retries = 2\n");
	out.push_str("\t\tkdc_timeout = 5000\n");
	out.push_str("\t}\n");

	out
}

/// A synthesized krb5.conf on disk. The file is deleted when the value is dropped.
#[derive(Debug)]
pub struct Krb5ConfFile {
	path: TempPath,
}
impl Krb5ConfFile {
	/// Writes `contents` to a fresh `krb*.conf` temp file.
	pub fn create(contents: &str) -> Result<Self, DeepConfigError> {
		let mut file = tempfile::Builder::new()
			.prefix("krb")
			.suffix(".conf")
			.tempfile()
			.map_err(DeepConfigError::Krb5Conf)?;

		file.write_all(contents.as_bytes()).map_err(DeepConfigError::Krb5Conf)?;
		file.flush().map_err(DeepConfigError::Krb5Conf)?;

		Ok(Self { path: file.into_temp_path() })
	}

	/// Location of the file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Deletes the file now, reporting failures instead of swallowing them.
	pub fn delete(self) -> std::io::Result<()> {
		self.path.close()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn rendering_includes_realm_and_kdc_block() {
		let realm = Realm::new("EXAMPLE.COM").expect("Realm fixture should be valid.");
		let conf = render_krb5_conf(&realm, "kdc.example.com:88", false);

		assert!(conf.starts_with("[libdefaults]\n\tdefault_realm = EXAMPLE.COM\n"));
		assert!(conf.contains("dns_lookup_kdc = false"));
		assert!(conf.contains("[realms]\n\tEXAMPLE.COM = {\n\t\tkdc = kdc.example.com:88\n"));
		assert!(conf.contains("kdc_timeout = 5000"));
		assert!(!conf.contains("udp_preference_limit"));
		assert!(render_krb5_conf(&realm, "kdc", true).contains("udp_preference_limit = 1"));
	}

	#[test]
	fn temp_file_is_removed_on_delete_and_drop() {
		let file = Krb5ConfFile::create("[libdefaults]\n").expect("Temp file should be written.");
		let path = file.path().to_path_buf();
		let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_owned();

		assert!(name.starts_with("krb") && name.ends_with(".conf"));
		assert_eq!(
			std::fs::read_to_string(&path).expect("Temp file should be readable."),
			"[libdefaults]\n"
		);

		file.delete().expect("Temp file should be deleted.");

		assert!(!path.exists());

		let dropped = Krb5ConfFile::create("x").expect("Temp file should be written.");
		let path = dropped.path().to_path_buf();

		drop(dropped);

		assert!(!path.exists());
	}
}
