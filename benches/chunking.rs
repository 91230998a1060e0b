use criterion::{Criterion, criterion_group, criterion_main};
use docs_rag::ingest::{BoundaryPolicy, ChunkingConfig, chunk_text, normalize_text};
use std::hint::black_box;

fn sample_document() -> String {
    let paragraph = "Retrieval quality depends on chunks that keep related sentences together. \
        Each chunk repeats a little of its predecessor so that facts spanning a cut \
        are still found.\nShort lines like this one\nare joined back into prose.";
    (0..200)
        .map(|i| format!("Section {i}\n\n{paragraph}"))
        .collect::<Vec<_>>()
        .join("\n\n\n")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let content = normalize_text(&sample_document());

    for boundary in [BoundaryPolicy::Paragraph, BoundaryPolicy::Fixed] {
        let config = ChunkingConfig {
            boundary,
            ..ChunkingConfig::default()
        };
        c.bench_function(&format!("chunking_{boundary:?}"), |b| {
            b.iter(|| chunk_text(black_box(&content), black_box(&config)));
        });
    }

    let raw = sample_document();
    c.bench_function("normalize", |b| b.iter(|| normalize_text(black_box(&raw))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
