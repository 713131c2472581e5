use hubfleet_common::Secret;
use rand::rngs::OsRng;
use rand::RngCore;

/// Tenant-facing login secret: 12 random bytes, 24 hex characters.
pub const LOGIN_SECRET_BYTES: usize = 12;
/// Internal service credential: 24 random bytes, 48 hex characters.
pub const INTERNAL_SECRET_BYTES: usize = 24;

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn login_secret() -> Secret<String> {
    Secret::new(random_hex(LOGIN_SECRET_BYTES))
}

pub fn internal_secret() -> Secret<String> {
    Secret::new(random_hex(INTERNAL_SECRET_BYTES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_length_lowercase_hex() {
        let login = login_secret();
        let internal = internal_secret();
        assert_eq!(login.expose().len(), 24);
        assert_eq!(internal.expose().len(), 48);
        for s in [login.expose(), internal.expose()] {
            assert!(s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        }
    }

    #[test]
    fn values_differ_between_calls() {
        assert_ne!(login_secret().expose(), login_secret().expose());
    }
}
