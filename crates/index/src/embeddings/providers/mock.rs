//! Deterministic offline embedding provider.

use crate::embeddings::provider::EmbeddingProvider;
use aide_core::AppResult;

/// Hashes identifier trigrams into a fixed-size unit vector.
///
/// Not semantic, but stable and content-dependent: texts that share
/// identifiers land close together, which is enough for tests and offline use.
#[derive(Debug)]
pub struct MockProvider {
    dimensions: usize,
}

impl MockProvider {
    pub const DEFAULT_DIMENSIONS: usize = 384;

    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in tokens(text) {
            // Whole token carries more weight than any one trigram.
            vector[self.bucket(token.as_bytes())] += 2.0;

            let padded: Vec<u8> = format!(" {} ", token).into_bytes();
            for window in padded.windows(3) {
                vector[self.bucket(window)] += 1.0;
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn bucket(&self, bytes: &[u8]) -> usize {
        // FNV-1a
        let hash = bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |acc, &b| {
            (acc ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        });
        (hash % self.dimensions as u64) as usize
    }
}

/// Lowercased alphanumeric runs of two or more characters, with
/// `camelCase` and `snake_case` identifiers split into words.
fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    let flush = |current: &mut String, out: &mut Vec<String>| {
        if current.chars().count() >= 2 {
            out.push(current.to_lowercase());
        }
        current.clear();
    };

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && prev_lower {
                flush(&mut current, &mut out);
            }
            prev_lower = ch.is_lowercase() || ch.is_numeric();
            current.push(ch);
        } else {
            flush(&mut current, &mut out);
            prev_lower = false;
        }
    }
    flush(&mut current, &mut out);
    out
}

#[async_trait::async_trait]
impl EmbeddingProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "trigram-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cosine_similarity;

    #[test]
    fn test_tokens_split_identifiers() {
        assert_eq!(
            tokens("parseHttpRequest(raw_body) x"),
            vec!["parse", "http", "request", "raw", "body"]
        );
    }

    #[tokio::test]
    async fn test_embedding_is_unit_length_and_deterministic() {
        let provider = MockProvider::new(128);
        let a = provider.embed("fn handle_request()").await.unwrap();
        let b = provider.embed("fn handle_request()").await.unwrap();

        assert_eq!(a.len(), 128);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher() {
        let provider = MockProvider::new(MockProvider::DEFAULT_DIMENSIONS);
        let texts = vec![
            "terminal output buffer".to_string(),
            "buffer terminal output stream".to_string(),
            "markdown guide for contributors".to_string(),
        ];
        let vectors = provider.embed_batch(&texts).await.unwrap();

        let related = cosine_similarity(&vectors[0], &vectors[1]);
        let unrelated = cosine_similarity(&vectors[0], &vectors[2]);
        assert!(related > unrelated);
    }

    #[tokio::test]
    async fn test_empty_text_yields_zero_vector() {
        let provider = MockProvider::new(16);
        let v = provider.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
