use criterion::{criterion_group, criterion_main, Criterion};
use k1l1_core::{
    rank_words, select_initial_pair, select_next_opponent, ExclusionSet, SelectionConfig, Word,
    WordId,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn mk_word(index: u32) -> Word {
    Word {
        id: WordId(i64::from(index) + 1),
        text: format!("bench-word-{index}"),
        wins: index % 37,
        losses: index % 23,
        times_shown: index % 41,
    }
}

fn selection_benchmark(c: &mut Criterion) {
    let words = (0..5_000).map(mk_word).collect::<Vec<_>>();
    let config = SelectionConfig::default();

    c.bench_function("initial_pair_5000", |b| {
        let mut rng = StdRng::seed_from_u64(17);
        b.iter(|| select_initial_pair(&words, &config, &mut rng));
    });

    c.bench_function("next_opponent_5000", |b| {
        let mut rng = StdRng::seed_from_u64(29);
        b.iter(|| {
            let mut excluded = ExclusionSet::new();
            select_next_opponent(&words, WordId(4_000), WordId(12), &mut excluded, &config, &mut rng)
                .map(|word| word.id)
        });
    });

    c.bench_function("rankings_5000", |b| {
        b.iter(|| rank_words(&words));
    });
}

criterion_group!(benches, selection_benchmark);
criterion_main!(benches);
