use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub fn sha256_string(data: &str) -> String {
    sha256_bytes(data.as_bytes())
}

/// Content digest in `sha256:<hex>` form
pub fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", sha256_bytes(data))
}

/// The hex part of a digest, without the algorithm prefix
pub fn hex_part(digest: &str) -> &str {
    digest.split_once(':').map(|(_, hex)| hex).unwrap_or(digest)
}

pub fn is_valid_digest(digest: &str) -> bool {
    static DIGEST: OnceLock<Regex> = OnceLock::new();
    DIGEST
        .get_or_init(|| Regex::new(r"^sha256:[a-f0-9]{64}$|^sha512:[a-f0-9]{128}$").expect("static regex"))
        .is_match(digest)
}
