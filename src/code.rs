//! Human-friendly transfer codes
//!
//! A code is 32 random bits rendered as three words from the BIP-39 English
//! list, e.g. `river-tonight-absorb`. It only names a transfer; it carries
//! no secret.

use bip39::Language;
use rand::RngCore;

/// Number of words in a transfer code
pub const CODE_WORDS: usize = 3;

const BITS_PER_WORD: u32 = 11;

/// Generate a new random transfer code
pub fn generate() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    encode(bytes)
}

/// Render four bytes as a transfer code
pub fn encode(bytes: [u8; 4]) -> String {
    let words = Language::English.word_list();
    let value = u32::from_be_bytes(bytes) as u64;
    let mask = (1u64 << BITS_PER_WORD) - 1;

    (0..CODE_WORDS)
        .map(|i| {
            let shift = BITS_PER_WORD as usize * (CODE_WORDS - 1 - i);
            words[((value >> shift) & mask) as usize]
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Normalise user-typed codes for comparison
pub fn normalize(code: &str) -> String {
    code.trim()
        .to_lowercase()
        .split(|c: char| c == '-' || c == ' ' || c == '_')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
