//! Benchmarks for branch solving and unflattening.
//!
//! - Opaque predicate that needs Z3 (does not fold locally)
//! - Flattened state machine resolved through path interpretation
//! - Dead code elimination after solving

extern crate dotflow;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use dotflow::prelude::*;
use std::hint::black_box;

/// `if (((x * x) ^ 0x5a5a) ^ 0x5a5a == x * x)` guarding the real code.
fn opaque_predicate() -> MethodBody {
    MethodBodyBuilder::new(1, 0, false)
        .build_with(|m| {
            m.block(0, |b| {
                b.ldarg(0)
                    .ldarg(0)
                    .op(Opcode::Mul)
                    .ldc_i4(0x5a5a)
                    .op(Opcode::Xor)
                    .ldc_i4(0x5a5a)
                    .op(Opcode::Xor)
                    .ldarg(0)
                    .ldarg(0)
                    .op(Opcode::Mul)
                    .branch(Opcode::Beq, 1, 2)
            });
            m.block(1, |b| b.ret());
            m.block(2, |b| b.ldc_i4(0).pop().ret());
        })
        .unwrap()
}

/// A dispatcher looping over `states` cases, each advancing the state by one.
fn state_machine(states: usize) -> MethodBody {
    MethodBodyBuilder::new(0, 1, false)
        .build_with(|m| {
            let cases: Vec<usize> = (0..states).map(|i| i + 2).collect();
            m.block(0, |b| b.ldc_i4(0).stloc(0).jump(1));
            m.block(1, |b| b.ldloc(0).switch(&cases, states + 2));
            for (state, &label) in cases.iter().enumerate() {
                let next = i32::try_from(state + 1).unwrap();
                m.block(label, |b| b.ldc_i4(next).stloc(0).jump(1));
            }
            m.block(states + 2, |b| b.ret());
        })
        .unwrap()
}

/// Benchmark deciding one opaque predicate with Z3.
fn bench_opaque_predicate(c: &mut Criterion) {
    let config = DeobfuscationConfig::minimal();
    let token = CancellationToken::new();
    let deobfuscator = ControlFlowDeobfuscator::new(&config, &token);

    c.bench_function("solve_opaque_predicate", |b| {
        b.iter_batched(
            opaque_predicate,
            |mut body| {
                let stats = deobfuscator.deobfuscate(&mut body).unwrap();
                black_box(stats)
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark unrolling a flattened method with 16 states.
fn bench_state_machine(c: &mut Criterion) {
    let config = DeobfuscationConfig::default();
    let token = CancellationToken::new();
    let deobfuscator = MethodDeobfuscator::new(&config, &token);

    c.bench_function("unflatten_16_states", |b| {
        b.iter_batched(
            || state_machine(16),
            |mut body| black_box(deobfuscator.run(&mut body)),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark dead code elimination on an unrolled method.
fn bench_dead_code(c: &mut Criterion) {
    let config = DeobfuscationConfig::default().with_dead_code(DeadCodeMode::Annotate);
    let token = CancellationToken::new();
    let mut body = state_machine(16);
    ControlFlowDeobfuscator::new(&config, &token)
        .deobfuscate(&mut body)
        .unwrap();

    c.bench_function("dead_code_16_states", |b| {
        b.iter(|| {
            let dead = eliminate_dead_code(black_box(&mut body), &config).unwrap();
            black_box(dead)
        });
    });
}

criterion_group!(
    benches,
    bench_opaque_predicate,
    bench_state_machine,
    bench_dead_code
);
criterion_main!(benches);
