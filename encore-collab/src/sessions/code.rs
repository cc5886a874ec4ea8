use rand::{thread_rng, Rng};

/// Join codes use uppercase letters and digits, no ambiguity filtering
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LENGTH: usize = 8;

/// A uniformly random candidate code. Uniqueness is the caller's job.
pub fn random_code(alphabet: &[u8], length: usize) -> String {
    let mut rng = thread_rng();

    (0..length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_use_the_session_alphabet() {
        for _ in 0..100 {
            let code = random_code(CODE_ALPHABET, CODE_LENGTH);

            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }
}
