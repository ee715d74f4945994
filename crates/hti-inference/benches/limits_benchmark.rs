use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hti_core::PointEvaluator;
use hti_inference::{CountingData, CountingExperiment, ScanConfig, Strategy, extract_limits, scan};
use std::hint::black_box;

fn asymptotic_experiment() -> (CountingExperiment, CountingData) {
    let strategy = Strategy::from_codes(2, 3, 0).unwrap();
    let exp = CountingExperiment::new(vec![2.0, 4.0, 2.0], vec![10.0, 12.0, 8.0], strategy)
        .unwrap()
        .with_poi_bounds(0.0, 5.0)
        .unwrap();
    (exp, CountingData::new(vec![11.0, 12.0, 7.0]))
}

fn bench_point(c: &mut Criterion) {
    let (exp, data) = asymptotic_experiment();
    let mut group = c.benchmark_group("counting_asymptotic_point");
    for mu in [0.0f64, 0.5, 1.0, 2.0] {
        group.bench_with_input(BenchmarkId::new("3bin", mu), &mu, |b, &m| {
            b.iter(|| black_box(exp.evaluate(m, black_box(&data))).unwrap())
        });
    }
    group.finish();
}

fn bench_scans(c: &mut Criterion) {
    let (exp, data) = asymptotic_experiment();
    let fixed = ScanConfig::fixed(101, 0.0, 5.0);
    let auto = ScanConfig::automatic();

    c.bench_function("scan_fixed_101", |b| {
        b.iter(|| black_box(scan(&exp, black_box(&data), &fixed, None)).unwrap())
    });
    c.bench_function("scan_automatic", |b| {
        b.iter(|| black_box(scan(&exp, black_box(&data), &auto, None)).unwrap())
    });
}

fn bench_extract(c: &mut Criterion) {
    let (exp, data) = asymptotic_experiment();
    let result = scan(&exp, &data, &ScanConfig::fixed(1001, 0.0, 5.0), None).unwrap();

    c.bench_function("extract_limits_two_sided_1001", |b| {
        b.iter(|| black_box(extract_limits(black_box(&result), 0.95, true)).unwrap())
    });
}

fn bench_toys(c: &mut Criterion) {
    let strategy = Strategy::from_codes(0, 3, 500).unwrap();
    let exp = CountingExperiment::new(vec![5.0], vec![5.0], strategy)
        .unwrap()
        .with_distributions(false);
    let data = CountingData::new(vec![6.0]);

    c.bench_function("counting_frequentist_point_500_toys", |b| {
        b.iter(|| black_box(exp.evaluate(1.0, black_box(&data))).unwrap())
    });
}

criterion_group!(benches, bench_point, bench_scans, bench_extract, bench_toys);
criterion_main!(benches);
