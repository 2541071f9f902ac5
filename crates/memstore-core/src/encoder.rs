//! Feature-hashing text encoder.
//!
//! Turns arbitrary text into a fixed-dimension, L2-normalized vector without
//! any model files. Tokens are hashed into buckets with 64-bit FNV-1a, which
//! is stable across processes and platforms, so a record embedded today
//! matches a query embedded next month.
//!
//! # Tokenization
//!
//! A token is a maximal run of alphanumeric characters, lowercased. Scripts
//! that do not separate words with spaces (Chinese, Japanese, Korean) would
//! otherwise collapse a whole sentence into one token, so every run of two
//! or more CJK characters also yields its overlapping character bigrams.
//!
//! ```text
//! "Deploy 主题偏好!"  →  ["deploy", "主题偏好", "主题", "题偏", "偏好"]
//! ```
//!
//! # Example
//!
//! ```rust
//! use memstore_core::encoder::{Embedder, HashingEncoder};
//!
//! let enc = HashingEncoder::new(256);
//! let v = enc.embed("user prefers the dark theme");
//! let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
//! assert!((norm - 1.0).abs() < 1e-5);
//! ```

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
/// Alternate offset basis for the sign hash, independent of the bucket hash.
const SIGN_OFFSET_BASIS: u64 = 0x84222325_cbf29ce4;

// ─────────────────────────────────────────────────────────────────────────────
// Embedder trait
// ─────────────────────────────────────────────────────────────────────────────

/// Anything that can turn text into a fixed-length vector.
///
/// Implementations must be deterministic: the same text always produces the
/// same vector, otherwise stored embeddings drift away from query embeddings.
pub trait Embedder {
    /// Length of every vector returned by [`embed`][Embedder::embed].
    fn dim(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HashingEncoder
// ─────────────────────────────────────────────────────────────────────────────

/// Term-frequency feature hashing into `dim` buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingEncoder {
    dim: usize,
    signed: bool,
}

impl HashingEncoder {
    pub fn new(dim: usize) -> Self {
        Self { dim, signed: false }
    }

    /// Enable sign hashing: each token adds `±1` instead of `+1`, which lets
    /// bucket collisions cancel instead of always inflating similarity.
    ///
    /// Vectors produced with and without sign hashing are not comparable, so
    /// a store must be written and queried with the same setting.
    pub fn with_sign_hashing(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }
}

impl Embedder for HashingEncoder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        if self.dim == 0 {
            return vec;
        }
        for token in tokenize(text) {
            let idx = (fnv1a(token.as_bytes(), FNV_OFFSET_BASIS) % self.dim as u64) as usize;
            let sign = if self.signed && fnv1a(token.as_bytes(), SIGN_OFFSET_BASIS) >> 63 == 1 {
                -1.0
            } else {
                1.0
            };
            vec[idx] += sign;
        }
        normalize(&mut vec);
        vec
    }
}

/// Encode `text` into a `dim`-length vector with the default encoder.
pub fn encode(text: &str, dim: usize) -> Vec<f32> {
    HashingEncoder::new(dim).embed(text)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ─────────────────────────────────────────────────────────────────────────────

/// Split `text` into lowercase word tokens plus CJK bigrams.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut run: Vec<char> = Vec::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            run.extend(ch.to_lowercase());
        } else if !run.is_empty() {
            push_run(&mut tokens, &run);
            run.clear();
        }
    }
    if !run.is_empty() {
        push_run(&mut tokens, &run);
    }
    tokens
}

fn push_run(tokens: &mut Vec<String>, run: &[char]) {
    tokens.push(run.iter().collect());
    for segment in run.split(|c| !is_cjk(*c)) {
        if segment.len() < 2 {
            continue;
        }
        for pair in segment.windows(2) {
            tokens.push(pair.iter().collect());
        }
    }
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32,
        0x3040..=0x30FF      // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0xAC00..=0xD7AF    // Hangul syllables
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
        | 0x20000..=0x2EBEF) // CJK Extensions B–F
}

// ─────────────────────────────────────────────────────────────────────────────
// Hashing and normalization helpers
// ─────────────────────────────────────────────────────────────────────────────

/// 64-bit FNV-1a over `bytes`, starting from `basis`.
fn fnv1a(bytes: &[u8], basis: u64) -> u64 {
    let mut hash = basis;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Scale `vec` to unit L2 norm. Zero vectors are left untouched.
fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use memstore_index::cosine_similarity;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    // ── fnv1a ────────────────────────────────────────────────────────────────

    #[test]
    fn fnv1a_matches_reference_values() {
        assert_eq!(fnv1a(b"", FNV_OFFSET_BASIS), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a", FNV_OFFSET_BASIS), 0xaf63dc4c8601ec8c);
    }

    // ── tokenize ─────────────────────────────────────────────────────────────

    #[test]
    fn tokenize_splits_on_punctuation_and_lowercases() {
        assert_eq!(
            tokenize("Deploy, to PROD-now!"),
            vec!["deploy", "to", "prod", "now"]
        );
    }

    #[test]
    fn tokenize_emits_cjk_bigrams() {
        assert_eq!(tokenize("主题偏好"), vec!["主题偏好", "主题", "题偏", "偏好"]);
    }

    #[test]
    fn tokenize_single_cjk_char_has_no_bigrams() {
        assert_eq!(tokenize("a 好 b"), vec!["a", "好", "b"]);
    }

    #[test]
    fn tokenize_empty_and_punctuation_only() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  ,,;!? \n").is_empty());
    }

    // ── encode ───────────────────────────────────────────────────────────────

    #[test]
    fn encode_is_deterministic() {
        let a = encode("the robot parked by the door", 256);
        let b = encode("the robot parked by the door", 256);
        let a_bits: Vec<u32> = a.iter().map(|f| f.to_bits()).collect();
        let b_bits: Vec<u32> = b.iter().map(|f| f.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn encode_has_unit_norm() {
        for text in ["x", "hello world", "用户偏好暗色主题", "a a a b"] {
            let v = encode(text, 256);
            assert_eq!(v.len(), 256);
            assert!((norm(&v) - 1.0).abs() < 1e-5, "norm of {text:?}");
        }
    }

    #[test]
    fn encode_tokenless_text_is_zero_vector() {
        let v = encode(" -- ", 64);
        assert_eq!(v.len(), 64);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn encode_zero_dim_is_empty() {
        assert!(encode("anything", 0).is_empty());
    }

    #[test]
    fn encode_ignores_case() {
        assert_eq!(encode("Dark Theme", 128), encode("dark theme", 128));
    }

    #[test]
    fn shared_cjk_phrases_are_similar() {
        let query = encode("主题偏好", 256);
        let profile = encode("用户偏好暗色主题", 256);
        let deploy = encode("明天部署到生产", 256);
        let sim_profile = cosine_similarity(&query, &profile);
        let sim_deploy = cosine_similarity(&query, &deploy);
        assert!(sim_profile > sim_deploy);
    }

    // ── HashingEncoder ───────────────────────────────────────────────────────

    #[test]
    fn signed_encoder_is_normalized_and_deterministic() {
        let enc = HashingEncoder::new(32).with_sign_hashing(true);
        let a = enc.embed("alpha beta gamma delta epsilon");
        let b = enc.embed("alpha beta gamma delta epsilon");
        assert_eq!(a, b);
        assert!((norm(&a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn embedder_reports_dimension() {
        let enc = HashingEncoder::new(48);
        assert_eq!(enc.dim(), 48);
        assert_eq!(enc.embed("x").len(), 48);
    }
}
