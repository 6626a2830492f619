//! Context extractors.
//!
//! Pull structured data out of untyped request parts so checks can read it:
//! - [`jwt::claims`]: claims from a bearer token (decoded, never verified)
//! - [`body::decode`]: JSON or multipart-form request bodies
//!
//! Extractors never fail the exchange. Anything they cannot decode is logged
//! and becomes `None`, which checks see as `null`.

pub mod body;
pub mod jwt;

pub use body::MAX_BODY_BYTES;
pub use jwt::Claims;
