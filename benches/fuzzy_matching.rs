use criterion::{black_box, criterion_group, criterion_main, Criterion};

use abridge::matching::FuzzyMatcher;

fn book_text(sentences: usize) -> String {
    (0..sentences)
        .map(|i| {
            format!(
                "Sentence {i} of the benchmark corpus mentions subject {} on day {}. ",
                i * 13 % 997,
                i % 365
            )
        })
        .collect()
}

fn benchmark_locate(c: &mut Criterion) {
    let matcher = FuzzyMatcher::default();
    let book = book_text(10_000);
    let query: String = book
        .chars()
        .skip(book.chars().count() / 2)
        .take(1200)
        .collect();

    c.bench_function("locate_paragraph_in_book", |b| {
        b.iter(|| matcher.find(black_box(&query), black_box(&book)))
    });

    let short_query = "Sentence 5000 of the benchmark corpus";
    c.bench_function("locate_short_phrase_in_book", |b| {
        b.iter(|| matcher.find(black_box(short_query), black_box(&book)))
    });
}

criterion_group!(benches, benchmark_locate);
criterion_main!(benches);
