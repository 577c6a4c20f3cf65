//! cfgvault download tokens
//!
//! Signed, expiring tokens binding a download to one artifact
//! [`Fingerprint`](cfgvault_artifact::Fingerprint).
//!
//! - MAC: keyed BLAKE3 over the encoded claims
//! - Keys: derived from an operator secret or generated randomly
//! - Rotation: current key plus the previous one for a grace period
//!
//! # Example
//!
//! ```rust,ignore
//! let tokens = TokenService::new(SigningKey::from_secret(secret));
//! let token = tokens.issue(fingerprint, Duration::from_secs(600))?;
//! assert_eq!(tokens.verify(&token.encode())?, fingerprint);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod key;
mod service;
mod token;

pub use error::TokenError;
pub use key::{KeyRing, SigningKey};
pub use service::{spawn_rotation, TokenService, DEFAULT_MAX_TTL};
pub use token::{DownloadToken, TOKEN_FORMAT_VERSION, TOKEN_LEN};
