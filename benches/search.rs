//! Search benchmarks: BM25 scoring and hybrid fusion over a synthetic corpus.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rag_index::config::{Bm25Config, SearchConfig};
use rag_index::embedding::{Embedder, HashEmbedder};
use rag_index::search::bm25::{Bm25Index, Bm25Variant};
use rag_index::search::{ProjectWeighting, SearchEngine, SearchRequest};
use rag_index::store::{Payload, ScoredPoint};

fn corpus(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            format!(
                "def handler_{i}(request):\n    value = parse_input(request, {i})\n    return respond(value)\n"
            )
        })
        .collect()
}

fn bench_bm25(c: &mut Criterion) {
    let docs = corpus(2000);
    let mut index = Bm25Index::new(Bm25Config::default(), Bm25Variant::Okapi);
    for (i, doc) in docs.iter().enumerate() {
        index.add(&format!("u{i}"), doc);
    }

    c.bench_function("bm25_query_2k_docs", |b| {
        b.iter(|| black_box(index.query("parse input request", 10)))
    });

    c.bench_function("bm25_add_document", |b| {
        let mut i = 0usize;
        b.iter(|| {
            index.add(&format!("new{i}"), &docs[i % docs.len()]);
            i += 1;
        })
    });
}

fn bench_embedding(c: &mut Criterion) {
    let embedder = HashEmbedder::new(256);
    let docs = corpus(64);

    c.bench_function("hash_embed_batch_64", |b| {
        b.iter(|| black_box(embedder.embed_batch(&docs).unwrap()))
    });
}

fn bench_fusion(c: &mut Criterion) {
    let engine = SearchEngine::new(SearchConfig::default());
    let semantic: Vec<ScoredPoint> = (0..100)
        .map(|i| ScoredPoint {
            id: format!("u{i}"),
            score: 1.0 - i as f32 / 100.0,
            payload: Payload {
                project: "bench".to_string(),
                content: format!("def handler_{i}(request): ..."),
                lifecycle_state: "ACTIVE".to_string(),
                ..Default::default()
            },
        })
        .collect();

    let request = SearchRequest::new("handler request");
    c.bench_function("rank_100_candidates", |b| {
        b.iter(|| {
            black_box(engine.rank(
                &request,
                semantic.clone(),
                Vec::new(),
                &ProjectWeighting::default(),
                0,
            ))
        })
    });
}

criterion_group!(benches, bench_bm25, bench_embedding, bench_fusion);
criterion_main!(benches);
