//! Credential handles produced by the login module and owned by the session worker.

// std
use std::any::Any;
// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::Principal};

/// Lifecycle status of a credential at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
	/// The ticket start time lies in the future.
	Pending,
	/// The ticket is currently valid.
	Active,
	/// The ticket end time has passed.
	Expired,
}

/// Errors produced by [`CredentialBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CredentialBuilderError {
	/// No ticket bytes were provided.
	#[error("Ticket is required.")]
	MissingTicket,
	/// No expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Encoded ticket material; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Ticket(Arc<[u8]>);
impl Ticket {
	/// Wraps raw ticket bytes.
	pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
		Self(Arc::from(bytes.into()))
	}

	/// Returns the raw ticket bytes. Callers must avoid logging them.
	pub fn expose(&self) -> &[u8] {
		&self.0
	}

	/// Hex SHA-256 digest of the ticket, safe to log and compare.
	pub fn fingerprint(&self) -> String {
		Sha256::digest(self.expose()).iter().map(|b| format!("{b:02x}")).collect()
	}
}
impl Debug for Ticket {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("Ticket").field(&"<redacted>").finish()
	}
}

/// Opaque security context attached by the login module (a GSS credential, a ccache handle, ...).
pub type SubjectContext = Arc<dyn Any + Send + Sync>;

/// A logged-in identity plus its ticket.
///
/// Callbacks run "as" this credential: they receive a reference to it and can reach the
/// implementation-specific context through [`Credential::context`].
#[derive(Clone)]
pub struct Credential {
	/// Principal the ticket was issued to.
	pub principal: Principal,
	/// Ticket material.
	pub ticket: Ticket,
	/// Ticket start time.
	pub issued_at: OffsetDateTime,
	/// Ticket end time.
	pub expires_at: OffsetDateTime,
	/// Latest instant the ticket can be renewed to, when renewable.
	pub renew_until: Option<OffsetDateTime>,
	/// Whether the ticket can be refreshed in place.
	pub renewable: bool,
	context: Option<SubjectContext>,
}
impl Credential {
	/// Returns a builder for the given principal.
	pub fn builder(principal: Principal) -> CredentialBuilder {
		CredentialBuilder::new(principal)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> CredentialStatus {
		if instant < self.issued_at {
			return CredentialStatus::Pending;
		}
		if instant >= self.expires_at {
			return CredentialStatus::Expired;
		}

		CredentialStatus::Active
	}

	/// Convenience helper that checks the status using the current UTC instant.
	pub fn status(&self) -> CredentialStatus {
		self.status_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` if the ticket has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), CredentialStatus::Expired)
	}

	/// Returns `true` when both credentials carry the same ticket for the same principal.
	pub fn same_ticket(&self, other: &Credential) -> bool {
		self.principal == other.principal
			&& self.expires_at == other.expires_at
			&& self.ticket == other.ticket
	}

	/// Downcasts the attached security context.
	pub fn context<T>(&self) -> Option<&T>
	where
		T: 'static + Send + Sync,
	{
		self.context.as_deref().and_then(|ctx| ctx.downcast_ref::<T>())
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("principal", &self.principal)
			.field("ticket", &self.ticket)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("renew_until", &self.renew_until)
			.field("renewable", &self.renewable)
			.field("context_set", &self.context.is_some())
			.finish()
	}
}

/// Builder for [`Credential`].
#[derive(Clone)]
pub struct CredentialBuilder {
	principal: Principal,
	ticket: Option<Ticket>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	renew_until: Option<OffsetDateTime>,
	renewable: bool,
	context: Option<SubjectContext>,
}
impl CredentialBuilder {
	fn new(principal: Principal) -> Self {
		Self {
			principal,
			ticket: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
			renew_until: None,
			renewable: false,
			context: None,
		}
	}

	/// Provides the ticket bytes.
	pub fn ticket(mut self, bytes: impl Into<Vec<u8>>) -> Self {
		self.ticket = Some(Ticket::new(bytes));

		self
	}

	/// Sets the ticket start time.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute end time.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the lifetime relative to the start time.
	pub fn expires_in(mut self, lifetime: Duration) -> Self {
		self.expires_in = Some(lifetime);

		self
	}

	/// Marks the ticket renewable up to the given instant.
	pub fn renewable_until(mut self, instant: OffsetDateTime) -> Self {
		self.renewable = true;
		self.renew_until = Some(instant);

		self
	}

	/// Overrides the renewable flag.
	pub fn renewable(mut self, renewable: bool) -> Self {
		self.renewable = renewable;

		self
	}

	/// Attaches an implementation-specific security context.
	pub fn context<T>(mut self, context: T) -> Self
	where
		T: 'static + Send + Sync,
	{
		self.context = Some(Arc::new(context));

		self
	}

	/// Consumes the builder and produces a [`Credential`].
	pub fn build(self) -> Result<Credential, CredentialBuilderError> {
		let ticket = self.ticket.ok_or(CredentialBuilderError::MissingTicket)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(CredentialBuilderError::MissingExpiry),
		};

		Ok(Credential {
			principal: self.principal,
			ticket,
			issued_at,
			expires_at,
			renew_until: self.renew_until,
			renewable: self.renewable,
			context: self.context,
		})
	}
}
