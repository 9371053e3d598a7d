//! Criterion benchmarks for the syncbn kernels on the selected provider.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use syncbn_common::{GradOutputs, NcsShape, NormParams};
use syncbn_kernels::KernelManager;

const SHAPES: [(usize, usize, usize); 4] =
    [(8, 16, 64), (16, 64, 256), (32, 64, 1024), (4, 256, 3136)];

fn activations(len: usize) -> Vec<f32> {
    (0..len).map(|i| ((i % 97) as f32 / 97.0) * 4.0 - 2.0).collect()
}

fn label(shape: &NcsShape) -> String {
    format!("{}x{}x{}", shape.n, shape.c, shape.s)
}

fn bench_stats(c: &mut Criterion) {
    let manager = KernelManager::new();
    let kernel = manager.select_best().expect("Should have a kernel");
    let mut group = c.benchmark_group("stats");

    for (n, ch, s) in SHAPES {
        let shape = NcsShape::new(n, ch, s);
        let x = activations(n * ch * s);
        let mut sum = vec![0.0f32; ch];
        let mut sqsum = vec![0.0f32; ch];
        group.throughput(Throughput::Elements(x.len() as u64));
        let id = BenchmarkId::new(kernel.name(), label(&shape));
        group.bench_with_input(id, &shape, |bench, shape| {
            bench.iter(|| {
                kernel
                    .stats(shape, black_box(&x), black_box(&mut sum), black_box(&mut sqsum))
                    .unwrap();
            });
        });
    }
    group.finish();
}

fn bench_forward(c: &mut Criterion) {
    let manager = KernelManager::new();
    let kernel = manager.select_best().expect("Should have a kernel");
    let mut group = c.benchmark_group("forward");

    for (n, ch, s) in SHAPES {
        let shape = NcsShape::new(n, ch, s);
        let x = activations(n * ch * s);
        let gamma = vec![1.0f32; ch];
        let beta = vec![0.0f32; ch];
        let mean = vec![0.1f32; ch];
        let var = vec![1.3f32; ch];
        let mut z = vec![0.0f32; x.len()];
        group.throughput(Throughput::Elements(x.len() as u64));
        let id = BenchmarkId::new(kernel.name(), label(&shape));
        group.bench_with_input(id, &shape, |bench, shape| {
            bench.iter(|| {
                let params = NormParams::new(&gamma, &beta, &mean, &var);
                kernel.forward(shape, black_box(&x), params, 1e-5, black_box(&mut z)).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_backward(c: &mut Criterion) {
    let manager = KernelManager::new();
    let kernel = manager.select_best().expect("Should have a kernel");
    let mut group = c.benchmark_group("backward");

    for (n, ch, s) in SHAPES {
        let shape = NcsShape::new(n, ch, s);
        let x = activations(n * ch * s);
        let dz: Vec<f32> = x.iter().rev().copied().collect();
        let gamma = vec![1.0f32; ch];
        let beta = vec![0.0f32; ch];
        let mean = vec![0.1f32; ch];
        let var = vec![1.3f32; ch];
        let mut sum_dz = vec![0.0f32; ch];
        let mut sum_dz_xhat = vec![0.0f32; ch];
        let mut dx = vec![0.0f32; x.len()];
        let mut dweight = vec![0.0f32; ch];
        let mut dbias = vec![0.0f32; ch];
        group.throughput(Throughput::Elements(x.len() as u64));

        let id = BenchmarkId::new("reduce", label(&shape));
        group.bench_with_input(id, &shape, |bench, shape| {
            bench.iter(|| {
                kernel
                    .backward_reduce(
                        shape,
                        black_box(&dz),
                        black_box(&x),
                        &mean,
                        &var,
                        1e-5,
                        &mut sum_dz,
                        &mut sum_dz_xhat,
                    )
                    .unwrap();
            });
        });

        let id = BenchmarkId::new("elementwise", label(&shape));
        group.bench_with_input(id, &shape, |bench, shape| {
            bench.iter(|| {
                kernel
                    .backward(
                        shape,
                        black_box(&dz),
                        black_box(&x),
                        NormParams::new(&gamma, &beta, &mean, &var),
                        &sum_dz,
                        &sum_dz_xhat,
                        1e-5,
                        GradOutputs::new(&mut dx, &mut dweight, &mut dbias),
                    )
                    .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stats, bench_forward, bench_backward);
criterion_main!(benches);
