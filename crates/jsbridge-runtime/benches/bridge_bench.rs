//! Benchmarks for the call and property bridges
//!
//! Run with: cargo bench -p jsbridge-runtime

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use jsbridge_runtime::{Bindings, Context, Identity, init_default};
use serde_json::{Value, json};

fn bridge_benchmarks(c: &mut Criterion) {
    init_default().unwrap();
    let bindings = Arc::new(Bindings::new());
    let ctx = Context::new(bindings.clone()).unwrap();

    bindings
        .define_function(&ctx, Identity::GLOBAL, "noop", |_, _| Ok(Value::Null))
        .unwrap();
    bindings
        .define_function(&ctx, Identity::GLOBAL, "echo", |_, args| Ok(Value::Array(args)))
        .unwrap();
    bindings
        .define_property(&ctx, Identity::GLOBAL, "setting", json!({"level": 3}))
        .unwrap();

    c.bench_function("eval_json", |b| {
        b.iter(|| ctx.eval_json(black_box("1 + 1")).unwrap())
    });

    c.bench_function("host_call_noop_x100", |b| {
        b.iter(|| ctx.eval(black_box("for (let i = 0; i < 100; i++) noop()")).unwrap())
    });

    c.bench_function("host_call_echo_x100", |b| {
        b.iter(|| {
            ctx.eval(black_box(
                "for (let i = 0; i < 100; i++) echo(i, 'text', { nested: [i] })",
            ))
            .unwrap()
        })
    });

    c.bench_function("property_get_x100", |b| {
        b.iter(|| ctx.eval(black_box("for (let i = 0; i < 100; i++) setting.level")).unwrap())
    });
}

criterion_group!(benches, bridge_benchmarks);
criterion_main!(benches);
