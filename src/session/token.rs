use rand::RngExt as _;

/// Relay tokens are 8 characters of uppercase ASCII letters and digits.
pub const TOKEN_LEN: usize = 8;
const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a fresh, human-typeable relay token.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.random_range(0..TOKEN_CHARSET.len());
            TOKEN_CHARSET[idx] as char
        })
        .collect()
}

/// Shortest token accepted at lookup. Generated tokens are always
/// [`TOKEN_LEN`] long; shorter ones only exist when minted by hand.
pub const MIN_LOOKUP_LEN: usize = 4;

/// Check that a token has exactly the generated shape.
pub fn is_valid_token(token: &str) -> bool {
    token.len() == TOKEN_LEN && is_token_charset(token)
}

/// Check the format of an inbound token before it is used as a lookup key.
pub fn is_lookup_token(token: &str) -> bool {
    (MIN_LOOKUP_LEN..=TOKEN_LEN).contains(&token.len()) && is_token_charset(token)
}

fn is_token_charset(token: &str) -> bool {
    token
        .bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_well_formed() {
        for _ in 0..200 {
            let token = generate_token();
            assert!(is_valid_token(&token), "bad token: {token}");
        }
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(!is_valid_token("ABC123"));
        assert!(!is_valid_token("ABCDEFGH1"));
        assert!(!is_valid_token(""));
    }

    #[test]
    fn rejects_lowercase_and_symbols() {
        assert!(!is_valid_token("abcd1234"));
        assert!(!is_valid_token("ABCD-123"));
        assert!(!is_valid_token("ABCD 123"));
    }

    #[test]
    fn rejects_non_ascii() {
        assert!(!is_valid_token("ÄBCD123"));
    }

    #[test]
    fn lookup_accepts_hand_minted_short_tokens() {
        assert!(is_lookup_token("TEST123"));
        assert!(is_lookup_token("ABCD1234"));
        assert!(!is_lookup_token("ABC"));
        assert!(!is_lookup_token("TEST1234X"));
        assert!(!is_lookup_token("test123"));
    }

    #[test]
    fn accepts_digits_only() {
        assert!(is_valid_token("12345678"));
    }
}
