//! Kerberos identities, the published authentication snapshot, and credential handles.

pub mod credential;
pub mod principal;
pub mod state;

pub use credential::*;
pub use principal::*;
pub use state::*;
