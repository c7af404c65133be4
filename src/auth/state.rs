//! Immutable authentication snapshot published by the session worker.

// self
use crate::{_prelude::*, auth::Principal};

/// Snapshot of "are we logged in, as whom, until when".
///
/// Values are never mutated; the worker swaps in a fresh snapshot after every login, renewal,
/// logout, or rollback so concurrent readers always observe a consistent pair of principal and
/// expiry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuthState {
	/// No ticket is held.
	#[default]
	Unauthenticated,
	/// A ticket for `principal` is held until `valid_until`.
	Authenticated {
		/// Logged-in principal.
		principal: Principal,
		/// End time of the held ticket.
		valid_until: OffsetDateTime,
	},
}
impl AuthState {
	/// Creates an authenticated snapshot.
	pub fn authenticated(principal: Principal, valid_until: OffsetDateTime) -> Self {
		Self::Authenticated { principal, valid_until }
	}

	/// Returns `true` when a ticket is held.
	pub fn is_authenticated(&self) -> bool {
		matches!(self, Self::Authenticated { .. })
	}

	/// Logged-in principal, if any.
	pub fn principal(&self) -> Option<&Principal> {
		match self {
			Self::Authenticated { principal, .. } => Some(principal),
			Self::Unauthenticated => None,
		}
	}

	/// Ticket end time, if any.
	pub fn valid_until(&self) -> Option<OffsetDateTime> {
		match self {
			Self::Authenticated { valid_until, .. } => Some(*valid_until),
			Self::Unauthenticated => None,
		}
	}
}
impl Display for AuthState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Authenticated { principal, valid_until } =>
				write!(f, "{principal} (ticket expires {valid_until})"),
			Self::Unauthenticated => f.write_str("Not authenticated"),
		}
	}
}
