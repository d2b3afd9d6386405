//! The indexer's keys, all under the `i/` prefix.

fn key(backend: &str, kind: &str, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(3 + backend.len() + kind.len() + suffix.len());
    key.extend_from_slice(b"i/");
    key.extend_from_slice(backend.as_bytes());
    key.push(b'/');
    key.extend_from_slice(kind.as_bytes());
    key.extend_from_slice(suffix);
    key
}

/// The amount of completed sections, `u64`.
pub(crate) fn section_count_key(backend: &str) -> Vec<u8> {
    key(backend, "count", &[])
}

/// The canonical hash of the last block of a completed section.
pub(crate) fn section_head_key(backend: &str, section: u64) -> Vec<u8> {
    key(backend, "head/", &section.to_be_bytes())
}

/// A section's union bloom.
pub(crate) fn bloom_section_key(section: u64) -> Vec<u8> {
    key("bloom", "section/", &section.to_be_bytes())
}
