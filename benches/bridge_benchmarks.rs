/// Script bridge benchmarks
///
/// Native function calls, calls through handles, and argument marshaling.

use std::hint::black_box;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use script_bridge::{Args, Environment, WireValue};

fn environment() -> Environment {
    Environment::with_module_root(std::env::temp_dir()).unwrap()
}

// ============================================================================
// Native function calls
// ============================================================================

fn bench_native_call(c: &mut Criterion) {
    let env = environment();
    env.register_function("add", 2, |_scope, args| {
        Ok(WireValue::Double(args.number(0)? + args.number(1)?))
    })
    .unwrap();
    let args = Args::new(vec![3.0.into(), 4.0.into()]);

    let mut group = c.benchmark_group("native_call");
    group.bench_function("from_host", |b| {
        b.iter(|| black_box(env.call_function("add", &args, |r| r.to_owned()).unwrap()))
    });
    group.bench_function("from_script_loop", |b| {
        b.iter(|| black_box(env.eval("var s = 0; for (var i = 0; i < 100; i++) { s = add(s, i); } s").unwrap()))
    });
    group.finish();
}

// ============================================================================
// Handle calls
// ============================================================================

fn bench_handle_call(c: &mut Criterion) {
    let env = environment();
    let handle = env
        .eval("(function (x) { return x * 2 + 1; })")
        .unwrap()
        .as_handle()
        .unwrap();
    let args = Args::new(vec![WireValue::Int(100)]);

    c.bench_function("call_handle", |b| {
        b.iter(|| black_box(env.call_handle(handle, &args, |r| r.to_owned()).unwrap()))
    });
}

// ============================================================================
// Argument marshaling
// ============================================================================

fn bench_marshaling(c: &mut Criterion) {
    let env = environment();
    env.register_code_function("function (v) { return v; }", "echo").unwrap();

    let mut group = c.benchmark_group("marshaling");
    for size in [16usize, 1024, 64 * 1024] {
        let text = WireValue::LString("x".repeat(size));
        let bytes = WireValue::Buffer(vec![7u8; size]);
        let list = WireValue::Array(format!("[{}]", vec!["1"; size / 2].join(",")));

        for (kind, value) in [("string", text), ("buffer", bytes), ("array", list)] {
            let args = Args::new(vec![value]);
            group.bench_with_input(BenchmarkId::new(kind, size), &args, |b, args| {
                b.iter(|| black_box(env.call_function("echo", args, |r| r.len()).unwrap()))
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_native_call, bench_handle_call, bench_marshaling);
criterion_main!(benches);
