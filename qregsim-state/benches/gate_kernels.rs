use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use qregsim_gates::{HADAMARD, PAULI_X, PAULI_Z};
use qregsim_state::{EngineConfig, QubitEngine};

fn bench_single_qubit(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_qubit_gate");

    for num_qubits in [10usize, 14, 18] {
        group.bench_with_input(
            BenchmarkId::new("generic", num_qubits),
            &num_qubits,
            |b, &n| {
                let mut engine =
                    QubitEngine::with_config(n, 0, EngineConfig::default().with_seed(1)).unwrap();
                b.iter(|| {
                    engine.mtrx(black_box(&HADAMARD), black_box(0)).unwrap();
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("diagonal", num_qubits),
            &num_qubits,
            |b, &n| {
                let mut engine =
                    QubitEngine::with_config(n, 0, EngineConfig::default().with_seed(1)).unwrap();
                b.iter(|| {
                    engine.mtrx(black_box(&PAULI_Z), black_box(0)).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_controlled(c: &mut Criterion) {
    let mut group = c.benchmark_group("controlled_gate");

    for num_qubits in [10usize, 14, 18] {
        group.bench_with_input(
            BenchmarkId::new("cnot", num_qubits),
            &num_qubits,
            |b, &n| {
                let mut engine =
                    QubitEngine::with_config(n, 0, EngineConfig::default().with_seed(1)).unwrap();
                engine.mtrx(&HADAMARD, 0).unwrap();
                b.iter(|| {
                    engine
                        .mc_mtrx(black_box(&[0]), black_box(&PAULI_X), black_box(1))
                        .unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_prob(c: &mut Criterion) {
    let mut group = c.benchmark_group("probability");

    for num_qubits in [10usize, 14, 18] {
        group.bench_with_input(BenchmarkId::new("prob", num_qubits), &num_qubits, |b, &n| {
            let mut engine =
                QubitEngine::with_config(n, 0, EngineConfig::default().with_seed(1)).unwrap();
            for q in 0..n {
                engine.mtrx(&HADAMARD, q).unwrap();
            }
            b.iter(|| engine.prob(black_box(n / 2)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_qubit, bench_controlled, bench_prob);
criterion_main!(benches);
