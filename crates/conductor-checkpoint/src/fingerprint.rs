use sha2::{Digest, Sha256};

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 32;

/// Trim the request and collapse every run of internal whitespace to a single space.
pub fn normalize_request(request: &str) -> String {
    request.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic checkpoint key for a (skill, request, machine) triple.
///
/// First 32 hex characters of SHA-256 over
/// `skill_id \0 normalized_request \0 machine_id`.
pub fn fingerprint(skill_id: &str, request: &str, machine_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(skill_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_request(request).as_bytes());
    hasher.update([0u8]);
    hasher.update(machine_id.as_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Whether a string has the shape of a fingerprint (safe to use as a file name).
pub fn is_valid_fingerprint(candidate: &str) -> bool {
    candidate.len() == FINGERPRINT_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Identity of this machine, from the host name.
pub fn machine_id() -> String {
    sysinfo::System::host_name()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}
