//! Deterministic request fingerprints used as cache keys.
//!
//! The digest covers the semantically relevant request fields: the ordered
//! messages, the system prompt, and the provider/model pair. It is a
//! non-cryptographic SipHash; cache keys are derived from the host's own
//! request structures, so adversarial collisions are out of the threat
//! model. Every field is length-prefixed before hashing so adjacent fields
//! can never alias each other.

use std::hash::{DefaultHasher, Hash, Hasher};

/// Compute the cache fingerprint for one request.
///
/// `messages` is the ordered `(role, content)` sequence. Two requests get
/// the same fingerprint exactly when every covered field matches.
pub fn request_fingerprint<'a, I>(
    messages: I,
    system_prompt: &str,
    provider: &str,
    model: &str,
) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut hasher = DefaultHasher::new();
    let mut total_len: usize = 0;

    for field in [provider, model, system_prompt] {
        hash_field(&mut hasher, field);
        total_len += field.len();
    }
    for (role, content) in messages {
        hash_field(&mut hasher, role);
        hash_field(&mut hasher, content);
        total_len += role.len() + content.len();
    }

    format!("{:016x}-{:x}", hasher.finish(), total_len)
}

fn hash_field(hasher: &mut DefaultHasher, field: &str) {
    field.len().hash(hasher);
    field.hash(hasher);
}
