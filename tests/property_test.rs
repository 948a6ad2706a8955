//! Property tests over the text-processing and scoring primitives.

use proptest::prelude::*;
use rag_index::change::content_similarity;
use rag_index::config::Bm25Config;
use rag_index::embedding::{l2_normalize, normalize_text, Embedder, HashEmbedder};
use rag_index::search::bm25::{tokenize, Bm25Index, Bm25Variant};

proptest! {
    #[test]
    fn normalization_is_idempotent(text in ".{0,400}") {
        let once = normalize_text(&text);
        let twice = normalize_text(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalized_text_has_no_runs_or_trailing_space(text in ".{0,400}") {
        let normalized = normalize_text(&text);
        prop_assert!(!normalized.contains("  "));
        prop_assert!(!normalized.ends_with(' '));
        prop_assert!(!normalized.contains('\n'));
    }

    #[test]
    fn embeddings_are_unit_norm_and_deterministic(text in ".{1,400}") {
        let embedder = HashEmbedder::new(128);
        let a = embedder.embed_batch(&[text.clone()]).unwrap();
        let b = embedder.embed_batch(&[text.clone()]).unwrap();
        prop_assert_eq!(&a, &b);

        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        prop_assert!((norm - 1.0).abs() < 1e-4);
        prop_assert_eq!(a[0].len(), 128);
    }

    #[test]
    fn l2_normalize_always_yields_unit_vectors(values in prop::collection::vec(-100.0f32..100.0, 1..64)) {
        let mut vector = values;
        l2_normalize(&mut vector);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        prop_assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn similarity_is_bounded_and_reflexive(a in ".{0,200}", b in ".{0,200}") {
        let s = content_similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&s));
        prop_assert_eq!(content_similarity(&a, &a), 1.0);
    }

    #[test]
    fn tokenizer_emits_nonempty_word_tokens(text in ".{0,400}") {
        for token in tokenize(&text) {
            prop_assert!(!token.is_empty());
            prop_assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }

    #[test]
    fn bm25_add_then_remove_restores_empty_results(
        docs in prop::collection::vec("[a-z]{2,8}( [a-z]{2,8}){0,6}", 1..8),
    ) {
        let mut index = Bm25Index::new(Bm25Config::default(), Bm25Variant::Okapi);
        for (i, doc) in docs.iter().enumerate() {
            index.add(&format!("doc{i}"), doc);
        }
        for i in 0..docs.len() {
            index.remove(&format!("doc{i}"));
        }
        prop_assert!(index.is_empty());
        for doc in &docs {
            if let Some(term) = doc.split(' ').next() {
                prop_assert!(index.query(term, 10).is_empty());
            }
        }
    }

    #[test]
    fn bm25_scores_are_finite_and_positive(
        query in "[a-z]{2,8}",
        body in "[a-z]{2,8}( [a-z]{2,8}){0,10}",
    ) {
        let mut index = Bm25Index::new(Bm25Config::default(), Bm25Variant::Plus);
        index.add("doc", &body);
        for hit in index.query(&query, 10) {
            prop_assert!(hit.score.is_finite());
            prop_assert!(hit.score > 0.0);
        }
    }
}
