//! Capture of the login module's diagnostic output.
//!
//! Kerberos libraries print their debug traces as plain text. [`LogCapture`] hands out a
//! [`CaptureWriter`] the login module can write into; complete lines are kept in memory for
//! display and re-emitted as `tracing` events at the configured [`DebugLevel`].

// std
use std::io;
// self
use crate::{_prelude::*, config::DebugLevel};

const CHUNK: usize = 4 * 1024;
const MAX_PENDING: usize = 1000 * CHUNK;

/// Shared capture sink. Clones refer to the same buffer.
#[derive(Clone, Debug, Default)]
pub struct LogCapture {
	inner: Arc<Mutex<CaptureState>>,
}
impl LogCapture {
	/// Creates a closed sink.
	pub fn new() -> Self {
		Self::default()
	}

	/// Clears previously captured lines and starts accepting output, logged at `level`.
	pub fn start_capture(&self, level: DebugLevel) {
		let mut state = self.inner.lock();

		state.lines.clear();
		state.pending.clear();
		state.level = level;
		state.open = true;
	}

	/// Forwards any buffered complete lines and stops accepting output.
	pub fn stop_capture(&self) {
		let mut state = self.inner.lock();

		state.drain_lines();
		state.open = false;
	}

	/// Returns `true` while output is accepted.
	pub fn is_capturing(&self) -> bool {
		self.inner.lock().open
	}

	/// Lines captured since the last start or clear.
	pub fn captured_lines(&self) -> Vec<String> {
		self.inner.lock().lines.clone()
	}

	/// Drops every captured line.
	pub fn clear_captured_lines(&self) {
		self.inner.lock().lines.clear();
	}

	/// Returns a writer feeding this sink.
	pub fn writer(&self) -> CaptureWriter {
		CaptureWriter { inner: self.inner.clone() }
	}
}

/// [`io::Write`] end of a [`LogCapture`].
///
/// Writes are accepted silently while capture is stopped. Text without a line break is buffered
/// up to 4 MiB; a longer run is emitted in 4 MiB lines.
#[derive(Clone, Debug)]
pub struct CaptureWriter {
	inner: Arc<Mutex<CaptureState>>,
}
impl io::Write for CaptureWriter {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let mut state = self.inner.lock();

		if state.open {
			state.push(buf);
		}

		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		self.inner.lock().drain_lines();

		Ok(())
	}
}

#[derive(Debug, Default)]
struct CaptureState {
	open: bool,
	level: DebugLevel,
	pending: Vec<u8>,
	lines: Vec<String>,
}
impl CaptureState {
	fn push(&mut self, mut buf: &[u8]) {
		while !buf.is_empty() {
			let room = MAX_PENDING.saturating_sub(self.pending.len());
			let (head, rest) = buf.split_at(buf.len().min(room));

			if self.pending.len() + head.len() > self.pending.capacity() {
				let wanted = (self.pending.len() + head.len()).div_ceil(CHUNK) * CHUNK;

				self.pending.reserve_exact(wanted.min(MAX_PENDING) - self.pending.len());
			}

			self.pending.extend_from_slice(head);
			self.drain_lines();

			// A full buffer without a line break is emitted as is so later output still flows.
			if self.pending.len() >= MAX_PENDING {
				let raw = std::mem::take(&mut self.pending);

				self.emit(String::from_utf8_lossy(&raw).into_owned());
			}

			buf = rest;
		}
	}

	fn drain_lines(&mut self) {
		while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
			let raw: Vec<u8> = self.pending.drain(..=pos).collect();
			let text = String::from_utf8_lossy(&raw[..pos]);
			let line = text.strip_suffix('\r').unwrap_or(&text).to_owned();

			self.emit(line);
		}
	}

	fn emit(&mut self, line: String) {
		forward(self.level, &line);
		self.lines.push(line);
	}
}

fn forward(level: DebugLevel, line: &str) {
	const TARGET: &str = "kerberos_broker::krb5";

	match level {
		DebugLevel::Trace => tracing::trace!(target: TARGET, "{line}"),
		DebugLevel::Debug => tracing::debug!(target: TARGET, "{line}"),
		DebugLevel::Info => tracing::info!(target: TARGET, "{line}"),
		DebugLevel::Warn => tracing::warn!(target: TARGET, "{line}"),
		DebugLevel::Error => tracing::error!(target: TARGET, "{line}"),
	}
}
