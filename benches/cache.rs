use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use safeswitch::{BoundedEpisodeCache, EpisodeId, EpisodeRecord, EpisodeSampler, Transition};
use std::hint::black_box;

fn filled(episodes: usize, length: usize) -> BoundedEpisodeCache {
    let Some(t0) = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).single() else {
        return BoundedEpisodeCache::new();
    };
    let mut cache = BoundedEpisodeCache::new();
    for seq in 0..episodes {
        let step = Transition {
            observation: vec![0.0; 8],
            action: vec![0.0; 2],
            ..Transition::default()
        };
        cache.insert(
            EpisodeId::new(t0, seq as u64, length),
            EpisodeRecord::new(vec![step; length + 1]),
        );
    }
    cache
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("episode_cache");
    for &episodes in &[10usize, 100usize, 1_000usize] {
        let cache = filled(episodes, 100);

        group.bench_with_input(BenchmarkId::new("evict_half", episodes), &episodes, |b, &n| {
            b.iter(|| {
                let mut c = cache.clone();
                let removed = c.evict_to_capacity(black_box(n * 50));
                black_box(removed);
            })
        });

        group.bench_with_input(BenchmarkId::new("sample", episodes), &episodes, |b, &_n| {
            let mut sampler = EpisodeSampler::new(3, 16, 50);
            b.iter(|| black_box(sampler.sample(&cache)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cache);
criterion_main!(benches);
