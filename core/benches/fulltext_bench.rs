use criterion::{criterion_group, criterion_main, Criterion};
use lexicon_core::{DocRef, FullTextIndex, IndexEngine};

const WORDS: &[&str] = &[
    "river", "stone", "bright", "harbor", "lantern", "meadow", "quiet", "signal", "timber", "velvet",
    "window", "orchard", "copper", "falcon", "garden", "island", "journey", "kettle", "marble", "needle",
];

fn corpus(n: usize) -> Vec<(String, DocRef)> {
    (0..n)
        .map(|i| {
            let text: Vec<&str> = (0..12).map(|k| WORDS[(i * 7 + k * 3) % WORDS.len()]).collect();
            (text.join(" "), DocRef::new(0, i as u32))
        })
        .collect()
}

fn bench_fulltext(c: &mut Criterion) {
    let docs = corpus(5_000);
    c.bench_function("fulltext_build_1", |b| {
        b.iter(|| {
            let mut idx = FullTextIndex::new();
            idx.build_from_documents(&docs, 1);
            idx
        })
    });
    c.bench_function("fulltext_build_auto", |b| {
        b.iter(|| {
            let mut idx = FullTextIndex::new();
            idx.build_from_documents(&docs, 0);
            idx
        })
    });

    let mut idx = FullTextIndex::new();
    idx.build_from_documents(&docs, 0);
    c.bench_function("fulltext_search_exact", |b| b.iter(|| idx.search("lantern meadow", 20)));
    c.bench_function("fulltext_search_substring", |b| b.iter(|| idx.search("arb", 20)));
}

fn bench_engine(c: &mut Criterion) {
    let mut engine = IndexEngine::new();
    for i in 0..20_000 {
        engine.add_word(&format!("{}{}", WORDS[i % WORDS.len()], i), "bench");
    }
    engine.build_index();
    c.bench_function("engine_prefix", |b| b.iter(|| engine.prefix_search("lan", 50)));
    c.bench_function("engine_fuzzy", |b| b.iter(|| engine.fuzzy_search("meadow12", 10)));
}

criterion_group!(benches, bench_fulltext, bench_engine);
criterion_main!(benches);
