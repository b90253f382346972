/// bcrypt work factor for stored password hashes.
pub const HASH_COST: u32 = 12;

pub fn hash(plaintext: &str) -> anyhow::Result<String> {
    Ok(bcrypt::hash(plaintext, HASH_COST)?)
}

/// Returns false for a mismatch and for a stored hash bcrypt cannot parse.
pub fn verify(plaintext: &str, stored_hash: &str) -> bool {
    bcrypt::verify(plaintext, stored_hash).unwrap_or(false)
}
