use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use protomock::routing::{RouteTable, SourceTree};
use protomock::IncomingRequest;

const SCRIPT: &str = "({ status: 200 })";

/// `count` resources, each with a collection and an item route.
fn build_table(count: usize) -> RouteTable {
    let mut tree = SourceTree::new();
    for i in 0..count {
        tree.insert(&format!("http/api/v1/resource{i}/GET.js"), SCRIPT);
        tree.insert(&format!("http/api/v1/resource{i}/__id/GET.js"), SCRIPT);
        tree.insert(&format!("http/api/v1/resource{i}/__id/PUT.js"), SCRIPT);
        tree.insert(&format!("grpc/bench/v1/Service{i}/Call.js"), SCRIPT);
    }
    RouteTable::build(&tree).unwrap()
}

fn bench_http_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("http_resolution");

    for count in [10, 100, 1000] {
        let table = build_table(count);
        let last = count - 1;
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("static", count), &table, |b, table| {
            let path = format!("/api/v1/resource{last}");
            b.iter(|| black_box(table.resolve_http(black_box("GET"), black_box(&path))))
        });

        group.bench_with_input(BenchmarkId::new("dynamic", count), &table, |b, table| {
            let path = format!("/api/v1/resource{last}/4711");
            b.iter(|| black_box(table.resolve_http(black_box("PUT"), black_box(&path))))
        });

        group.bench_with_input(BenchmarkId::new("miss", count), &table, |b, table| {
            b.iter(|| black_box(table.resolve_http(black_box("GET"), black_box("/api/v2/none"))))
        });
    }

    group.finish();
}

fn bench_rpc_resolution(c: &mut Criterion) {
    let table = build_table(1000);
    let request = IncomingRequest::rpc("bench.v1.Service999", "Call");

    c.bench_function("rpc_resolution", |b| {
        b.iter(|| black_box(table.resolve(black_box(&request))))
    });
}

fn bench_table_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_build");
    group.sample_size(10);

    for count in [10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(build_table(count)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_http_resolution,
    bench_rpc_resolution,
    bench_table_build
);
criterion_main!(benches);
