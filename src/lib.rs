//! Process-wide Kerberos session broker: acquire a TGT from a keytab, a ticket cache, or an
//! interactive password prompt, keep it renewed on a single serialized worker, and run callers'
//! work as the authenticated principal (optionally impersonating a workflow user through
//! constrained delegation).

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod acquire;
pub mod auth;
pub mod capture;
pub mod config;
pub mod delegation;
pub mod error;
pub mod gate;
pub mod manager;
pub mod obs;

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		path::{Path, PathBuf},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use arc_swap::ArcSwap;
	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use tokio_util::sync::CancellationToken;

	pub use crate::error::{BoxError, Error, Result};
}

pub use time;
pub use tokio_util::sync::CancellationToken;
#[cfg(test)] use color_eyre as _;
