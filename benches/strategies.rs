//! Access strategy benchmarks

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use discolour::host::{LayerId, PixelType};
use discolour::{CanvasState, Engine, FailurePolicy, NullProgress, StrategyKind};

fn generate_canvas(size: u32, tile_size: u32) -> (CanvasState, LayerId) {
    let data: Vec<u8> = (0..size * size * 4).map(|i| (i * 31 % 251) as u8).collect();
    let mut state = CanvasState::with_tile_size(size, size, tile_size);
    let id = state
        .push_raw_layer("Background", PixelType::Rgba, size, size, &data)
        .unwrap_or_else(|e| panic!("bench canvas: {e}"));
    (state, id)
}

fn benchmark_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("Discolour Strategies");
    group.sample_size(20);

    for size in [64u32, 256, 512].iter() {
        for kind in StrategyKind::ALL {
            let engine = Engine::new(kind, FailurePolicy::Rollback);
            group.bench_with_input(BenchmarkId::new(kind.name(), size), size, |b, &size| {
                b.iter_batched(
                    || generate_canvas(size, 64),
                    |(mut state, id)| black_box(engine.discolour(&mut state, id, &mut NullProgress).is_ok()),
                    BatchSize::LargeInput,
                )
            });
        }
    }

    group.finish();
}

fn benchmark_tile_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("Tile Size Impact");
    let engine = Engine::new(StrategyKind::TileNative, FailurePolicy::Rollback);

    for tile in [16u32, 64, 256].iter() {
        group.bench_with_input(BenchmarkId::new("tile", tile), tile, |b, &tile| {
            b.iter_batched(
                || generate_canvas(512, tile),
                |(mut state, id)| black_box(engine.discolour(&mut state, id, &mut NullProgress).is_ok()),
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn benchmark_in_place(c: &mut Criterion) {
    let engine = Engine::default();
    c.bench_function("in_place_256", |b| {
        b.iter_batched(
            || generate_canvas(256, 64),
            |(mut state, id)| black_box(engine.discolour_in_place(&mut state, id, &mut NullProgress).is_ok()),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, benchmark_strategies, benchmark_tile_size, benchmark_in_place);
criterion_main!(benches);
