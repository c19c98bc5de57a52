use rand::Rng;

const BASE62_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generates a random identifier of `length` base62 characters
pub fn base62_identifier(length: usize) -> String {
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| BASE62_ALPHABET[rng.gen_range(0..BASE62_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn honor_requested_length() {
        assert_eq!(base62_identifier(22).len(), 22);
        assert!(base62_identifier(0).is_empty());
    }

    #[test]
    fn only_use_alphanumerics() {
        assert!(base62_identifier(256)
            .chars()
            .all(|c| c.is_ascii_alphanumeric()));
    }
}
