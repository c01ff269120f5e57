/*!
Performance benchmarks for the keepsake save path.
Covers compression, full save/load cycles and repair of damaged documents.
*/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use keepsake_core::{
    CompressionEngine, FieldRule, LoadOptions, MemoryStore, SaveOptions, SaveStore, Schema,
    StateValidator,
};
use serde_json::{json, Value};

fn schema() -> Schema {
    Schema::new(
        "1.0.0",
        vec![
            FieldRule::number("jade").required().min(0.0),
            FieldRule::number("spiritCrystals").required().min(0.0),
            FieldRule::integer("qi.level").required().range(1.0, 100.0).default_value(json!(1)),
            FieldRule::number("qi.current").required().min(0.0),
            FieldRule::array("log").optional(),
        ],
    )
    .expect("benchmark schema is valid")
}

// Helper function to generate a state document of roughly `size_kb` kilobytes
fn generate_state(size_kb: usize) -> Value {
    let entries: Vec<Value> = (0..size_kb * 12)
        .map(|i| {
            json!({
                "day": i,
                "event": format!("Meditated beneath the waterfall for {} hours", i % 12),
                "gain": (i % 7) as f64 * 0.5
            })
        })
        .collect();
    json!({
        "jade": 1_250,
        "spiritCrystals": 48.5,
        "qi": {"level": 37, "current": 15_020.75},
        "log": entries
    })
}

fn benchmark_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let engine = CompressionEngine::with_defaults();

    for size_kb in [1, 10, 100].iter() {
        let text = serde_json::to_string(&generate_state(*size_kb)).unwrap();
        group.throughput(Throughput::Bytes(text.len() as u64));

        group.bench_with_input(BenchmarkId::new("compress", format!("{size_kb}KB")), &text, |b, text| {
            b.iter(|| black_box(engine.compress(black_box(text))));
        });

        let compressed = engine.compress(&text);
        group.bench_with_input(
            BenchmarkId::new("decompress", format!("{size_kb}KB")),
            &compressed,
            |b, compressed| {
                b.iter(|| black_box(engine.decompress(black_box(compressed))));
            },
        );
    }

    group.finish();
}

fn benchmark_save_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_load");

    for size_kb in [1, 10, 100].iter() {
        let state = generate_state(*size_kb);
        let store = SaveStore::new(MemoryStore::new(), schema());

        group.bench_with_input(BenchmarkId::new("save", format!("{size_kb}KB")), &state, |b, state| {
            b.iter(|| {
                store
                    .save(black_box("bench"), black_box(state), SaveOptions::default())
                    .unwrap()
            });
        });

        store.save("bench", &state, SaveOptions::default()).unwrap();
        group.bench_function(BenchmarkId::new("load", format!("{size_kb}KB")), |b| {
            b.iter(|| black_box(store.load(black_box("bench"), LoadOptions::default()).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_repair(c: &mut Criterion) {
    let validator = StateValidator::new(schema());
    let mut damaged = generate_state(10);
    damaged["jade"] = json!(-5);
    damaged["spiritCrystals"] = json!("NaN");
    damaged["qi"]["level"] = json!(900);

    c.bench_function("validate_10KB", |b| {
        b.iter(|| black_box(validator.validate(black_box(&damaged))));
    });
    c.bench_function("repair_10KB", |b| {
        b.iter(|| black_box(validator.repair_data(black_box(&damaged))));
    });
}

criterion_group!(benches, benchmark_compression, benchmark_save_load, benchmark_repair);
criterion_main!(benches);
