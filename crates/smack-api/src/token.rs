use anyhow::Result;
use chrono::{Duration, Utc};
use rand::RngCore;

use smack_db::Database;

/// Sessions live for a week; expired rows fail validation and are swept
/// lazily.
const SESSION_TTL_DAYS: i64 = 7;

/// Mints a short opaque bearer token: 32 random bytes, hex-encoded.
/// Nothing about the user is recoverable from the token itself.
pub fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Mints and persists a session token for the user.
pub fn create_session(db: &Database, user_id: &str) -> Result<String> {
    let token = mint_token();
    db.create_session(&token, user_id, Utc::now() + Duration::days(SESSION_TTL_DAYS))?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_64_hex_chars_and_unique() {
        let a = mint_token();
        let b = mint_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
