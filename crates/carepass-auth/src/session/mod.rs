//! Session issuance.
//!
//! - [`SessionIssuer`] - access/refresh token pairs, rotation and revocation

pub mod issuer;

pub use issuer::{ClientInfo, IssuedSession, SessionIssuer};
