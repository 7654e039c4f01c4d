//! Text encoders for schema vectorisation.
//!
//! The embedding model is an opaque dependency of the schema index: anything
//! that turns a descriptor's text into a fixed-dimension unit vector works.
//! The default is a deterministic feature-hashing encoder (no model files,
//! no network, stable across processes) which keeps semantic search usable
//! offline. Deployments with a real sentence encoder implement [`Encoder`]
//! over it and hand it to the index.

use memstrata_core::l2_normalize;

/// Turns text into a fixed-dimension unit-norm embedding.
pub trait Encoder: Send + Sync {
    fn dimension(&self) -> usize;

    /// Encode to a vector of `dimension()` floats with unit L2 norm.
    fn encode(&self, text: &str) -> Vec<f32>;
}

/// Signed token feature hashing into a fixed number of buckets.
///
/// Tokens are lowercased alphanumeric runs; each token adds ±1 to the bucket
/// chosen by its FNV-1a hash, with the sign taken from the hash's top bit.
/// Shared tokens between two texts therefore contribute positively to their
/// cosine similarity, unrelated tokens mostly cancel.
pub struct HashingEncoder {
    dim: usize,
}

impl HashingEncoder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for HashingEncoder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Encoder for HashingEncoder {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokens(text) {
            let hash = fnv1a(token);
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
}

/// FNV-1a over the lowercased token.
fn fnv1a(token: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in token.bytes() {
        hash ^= byte.to_ascii_lowercase() as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn encoding_is_deterministic_and_unit_norm() {
        let encoder = HashingEncoder::default();
        let a = encoder.encode("name height type:dataframe");
        let b = encoder.encode("name height type:dataframe");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_tokens_raise_similarity() {
        let encoder = HashingEncoder::default();
        let schema = encoder.encode("building height type:dataframe source:analytics");
        let near = encoder.encode("building height");
        let far = encoder.encode("orbit telemetry frequency");
        assert!(cosine(&schema, &near) > cosine(&schema, &far));
    }

    #[test]
    fn case_is_ignored() {
        let encoder = HashingEncoder::default();
        assert_eq!(encoder.encode("Height"), encoder.encode("height"));
    }
}
