//! Login helpers.
//!
//! Routers since 6.43 accept `/login =name= =password=` directly. Older ones
//! answer with a hex challenge in `=ret=` and expect
//! `=response=00<md5(0x00 ‖ password ‖ challenge)>` back.

use md5::{Digest, Md5};

use crate::error::{RouterError, Result};

/// Prefix of the legacy response value.
pub const RESPONSE_PREFIX: &str = "00";

/// Compute the legacy login response for a hex challenge.
///
/// # Example
///
/// ```
/// use routeros_client::auth::legacy_response;
///
/// let response = legacy_response("secret", "ec8a6d8bf64d0e3d7b4dd6f7c0e7a0a3").unwrap();
/// assert_eq!(response, "00ad65e7d217828a70566fac6943efb6ee");
/// ```
pub fn legacy_response(password: &str, challenge_hex: &str) -> Result<String> {
    let challenge = hex::decode(challenge_hex.trim())
        .map_err(|e| RouterError::Auth(format!("malformed challenge: {}", e)))?;

    let mut hasher = Md5::new();
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    hasher.update(&challenge);

    Ok(format!("{}{}", RESPONSE_PREFIX, hex::encode(hasher.finalize())))
}

/// True if a `!trap` message means the credentials were rejected.
///
/// No legacy fallback is attempted for these.
pub fn is_invalid_credentials(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("invalid user name or password")
        || message.contains("invalid username or password")
        || message.contains("cannot log in")
}

/// True if a `!fatal` message means the session lost its login.
pub fn is_not_logged_in(message: &str) -> bool {
    message.to_ascii_lowercase().contains("not logged in")
}
