mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use stepwise::{build_cfg, lexer, mark_executed_cfg_nodes, parse_ast, parser};

fn bench_frontend(c: &mut Criterion) {
    for (label, source) in common::workloads() {
        c.bench_function(&format!("frontend_tokenize_{label}"), |b| {
            b.iter(|| {
                let out = lexer::tokenize(black_box(&source)).expect("tokenize");
                black_box(out);
            })
        });

        c.bench_function(&format!("frontend_parse_{label}"), |b| {
            b.iter(|| {
                let out = parser::parse(black_box(&source)).expect("parse");
                black_box(out);
            })
        });

        c.bench_function(&format!("frontend_ast_view_{label}"), |b| {
            b.iter(|| {
                let out = parse_ast(black_box(&source)).expect("parse");
                black_box(out);
            })
        });

        c.bench_function(&format!("frontend_cfg_{label}"), |b| {
            b.iter(|| {
                let out = build_cfg(black_box(&source)).expect("cfg");
                black_box(out);
            })
        });

        let graph = build_cfg(&source).expect("cfg");
        let states = stepwise::execute(&source).expect("execute");
        c.bench_function(&format!("frontend_cfg_marking_{label}"), |b| {
            b.iter(|| {
                let out = mark_executed_cfg_nodes(black_box(&graph), black_box(&states));
                black_box(out);
            })
        });
    }
}

criterion_group!(benches, bench_frontend);
criterion_main!(benches);
