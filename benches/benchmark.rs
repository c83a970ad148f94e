use cluster_eval::clustering::kmeans::{kmeans, KMeansParams};
use cluster_eval::evaluator::aggregator::{ScoreAccumulator, Scores};
use cluster_eval::evaluator::labels::LabelUnit;
use cluster_eval::evaluator::scoring::BatchScores;
use cluster_eval::{AverageFunction, EvaluationType, VectorizerKind, VectorizerParams};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const WORDS: [&str; 24] = [
    "market", "stock", "price", "bank", "rate", "inflation", "goal", "match", "league", "coach", "season", "player",
    "vote", "party", "minister", "election", "law", "court", "storm", "rain", "wind", "forecast", "flood", "heat",
];

fn synthetic_texts(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let topic = i % 4;
            (0..12)
                .map(|j| WORDS[topic * 6 + (i * 7 + j * 3) % 6])
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn synthetic_units(n: usize, classes: usize) -> Vec<LabelUnit> {
    (0..n)
        .map(|i| LabelUnit {
            truth: (0..classes).filter(|c| (i + c) % 3 == 0).collect(),
            predicted: (0..classes).filter(|c| (i * 5 + c) % 4 == 0).collect(),
        })
        .collect()
}

fn vectorize_and_cluster_benchmark(c: &mut Criterion) {
    let texts = synthetic_texts(2_000);

    c.bench_function("tfidf_fit_transform", |b| {
        b.iter(|| {
            let mut vectorizer = VectorizerParams::new(VectorizerKind::TfIdf).build();
            black_box(vectorizer.fit_transform(&texts))
        });
    });

    let mut vectorizer = VectorizerParams::new(VectorizerKind::TfIdf).build();
    let vectors = vectorizer.fit_transform(&texts);
    let dim = vectorizer.vocabulary().len();
    let params = KMeansParams {
        num_clusters: 10,
        max_iterations: 50,
        tolerance: 1e-4,
        seed: 42,
    };
    c.bench_function("kmeans_2000_docs_10_clusters", |b| {
        b.iter(|| black_box(kmeans(&vectors, dim, &params)));
    });
}

fn scoring_benchmark(c: &mut Criterion) {
    let units = synthetic_units(20_000, 10);

    c.bench_function("score_full_memory", |b| {
        b.iter(|| {
            let batch = BatchScores::from_units(10, &units);
            black_box(Scores::exact(batch, EvaluationType::Multilabel, AverageFunction::Macro))
        });
    });

    c.bench_function("score_incremental_500", |b| {
        b.iter(|| {
            let mut acc = ScoreAccumulator::new(10, EvaluationType::Multilabel, AverageFunction::Macro);
            for chunk in units.chunks(500) {
                acc.fold(&BatchScores::from_units(10, chunk)).unwrap();
            }
            black_box(acc.finish())
        });
    });
}

criterion_group!(benches, vectorize_and_cluster_benchmark, scoring_benchmark);
criterion_main!(benches);
