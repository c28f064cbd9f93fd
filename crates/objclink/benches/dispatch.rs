// Dispatch benchmarks for objclink
//
// These benchmarks measure the cost of a message send through the client
// against the in-process runtime: selector interning, raw sends, coerced
// sends with boxed arguments, and message list building.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use objclink::{Client, SimRuntime, Value};
use std::sync::Arc;

fn clients() -> (Client, Client) {
    let rt = Arc::new(SimRuntime::new());
    (Client::coercing(rt.clone()), Client::raw(rt))
}

/// Benchmark selector registration of an already interned name.
fn bench_selector_interning(c: &mut Criterion) {
    let (client, _) = clients();
    client.selector("objectAtIndex:");

    c.bench_function("selector_interned", |b| {
        b.iter(|| client.selector(black_box("objectAtIndex:")));
    });
}

/// Benchmark a zero-argument send with and without coercion.
fn bench_count(c: &mut Criterion) {
    let (coerced, raw) = clients();
    let array = unsafe { coerced.send_pointer("NSMutableArray", "array", &[]) }.unwrap();

    let mut group = c.benchmark_group("count");
    group.bench_function("raw", |b| {
        b.iter(|| unsafe { raw.send(black_box(array), "count", &[]) }.unwrap());
    });
    group.bench_function("coerced", |b| {
        b.iter(|| unsafe { coerced.send_int(black_box(array), "count", &[]) }.unwrap());
    });
    group.finish();
}

/// Benchmark index lookups on arrays of different sizes.
///
/// The result is an `NSString`, so the coerced path also reads it back.
fn bench_object_at_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_at_index");

    for len in [1usize, 16, 256] {
        let (coerced, _) = clients();
        let array = unsafe { coerced.send_proxy("NSMutableArray", "array", &[]) }.unwrap();
        for i in 0..len {
            unsafe { array.send("addObject:", &[format!("item {i}").into()]) }.unwrap();
        }
        let last = Value::from(len - 1);
        group.bench_with_input(BenchmarkId::from_parameter(len), &last, |b, last| {
            b.iter(|| unsafe { array.send("objectAtIndex:", std::slice::from_ref(last)) }.unwrap());
        });
    }

    group.finish();
}

/// Benchmark boxing a number for an object slot.
fn bench_boxed_argument(c: &mut Criterion) {
    let (coerced, _) = clients();
    let array = unsafe { coerced.send_proxy("NSMutableArray", "array", &[]) }.unwrap();
    unsafe { array.send("addObject:", &[Value::Int(1)]) }.unwrap();

    c.bench_function("contains_boxed_int", |b| {
        b.iter(|| {
            unsafe { array.send_bool("containsObject:", &[Value::Int(black_box(1))]) }.unwrap()
        });
    });
}

/// Benchmark splitting a flat list into messages.
fn bench_build_message_chain(c: &mut Criterion) {
    let (client, _) = clients();
    let parts: Vec<Value> = (0..32)
        .flat_map(|_| ["NSArray".into(), "array".into(), Value::Null])
        .collect();

    c.bench_function("build_message_chain_32", |b| {
        b.iter(|| client.build_message_chain(black_box(parts.clone())).unwrap());
    });
}

criterion_group!(
    benches,
    bench_selector_interning,
    bench_count,
    bench_object_at_index,
    bench_boxed_argument,
    bench_build_message_chain
);
criterion_main!(benches);
