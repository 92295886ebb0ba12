use sha2::{Digest, Sha256};

/// Error returned when reassembled content cannot be produced.
#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    #[error("total chunk length overflows usize")]
    LengthOverflow,

    #[error("cannot allocate {0} bytes for reassembly")]
    Allocation(usize),
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Returns `true` when `expected` is empty or matches the digest of `data`.
///
/// Comparison is case-insensitive so clients may send upper-case hex.
pub fn verify_checksum(data: &[u8], expected: &str) -> bool {
    expected.is_empty() || checksum_bytes(data).eq_ignore_ascii_case(expected)
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Concatenates `chunks` in slice order into one buffer.
///
/// The buffer is reserved up front with `try_reserve_exact` so an
/// allocation failure surfaces as an error instead of aborting the process.
pub fn reassemble(chunks: &[Vec<u8>]) -> Result<Vec<u8>, ReassemblyError> {
    let total = chunks
        .iter()
        .try_fold(0usize, |acc, c| acc.checked_add(c.len()))
        .ok_or(ReassemblyError::LengthOverflow)?;

    let mut buf = Vec::new();
    buf.try_reserve_exact(total)
        .map_err(|_| ReassemblyError::Allocation(total))?;
    for chunk in chunks {
        buf.extend_from_slice(chunk);
    }
    Ok(buf)
}
