//! Lightweight, category-tagged trace events. Compiled out entirely unless
//! the `debug-logs` feature is enabled, so release builds never pay for it.
//! Events never carry plaintext or raw key material, only counters and
//! hex-prefixed identifiers, matching the teacher's `replay_cache.rs`
//! logging discipline.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Session,
    Ratchet,
    Ordering,
    Group,
}

impl Category {
    fn tag(&self) -> &'static str {
        match self {
            Category::Session => "session",
            Category::Ratchet => "ratchet",
            Category::Ordering => "ordering",
            Category::Group => "group",
        }
    }
}

/// Hex-encode the first few bytes of an identifier for safe logging.
pub fn short_id(bytes: &[u8]) -> String {
    let n = bytes.len().min(8);
    let mut out = String::with_capacity(n * 2);
    for b in &bytes[..n] {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(feature = "debug-logs")]
pub fn event(category: Category, message: &str) {
    log::debug!(target: "hybrid_ratchet_core", "[{}] {}", category.tag(), message);
}

#[cfg(not(feature = "debug-logs"))]
#[inline(always)]
pub fn event(_category: Category, _message: &str) {}
