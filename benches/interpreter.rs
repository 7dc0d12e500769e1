mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use stepwise::{Interpreter, build_call_tree};

fn bench_interpreter(c: &mut Criterion) {
    for (label, source) in common::workloads() {
        c.bench_function(&format!("interpreter_run_{label}"), |b| {
            let mut interpreter = Interpreter::new();
            interpreter.parse(&source).expect("parse");
            b.iter(|| {
                let states = interpreter.run();
                black_box(states);
            })
        });

        c.bench_function(&format!("interpreter_parse_run_{label}"), |b| {
            b.iter(|| {
                let states = stepwise::execute(black_box(&source)).expect("execute");
                black_box(states);
            })
        });

        let states = stepwise::execute(&source).expect("execute");
        c.bench_function(&format!("call_tree_{label}"), |b| {
            b.iter(|| {
                let tree = build_call_tree(black_box(&states));
                black_box(tree);
            })
        });
    }
}

criterion_group!(benches, bench_interpreter);
criterion_main!(benches);
