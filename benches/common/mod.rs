#![allow(dead_code)]
use std::path::Path;

use test_support::load_cases;

/// `(name, source)` for every fixture flagged for benchmarking.
pub fn workloads() -> Vec<(String, String)> {
    let cases = load_cases(Path::new("tests/programs")).expect("load fixtures");
    cases
        .into_iter()
        .filter(|case| case.spec.bench.enabled)
        .map(|case| {
            let source = case.source().expect("read fixture source");
            (case.name, source)
        })
        .collect()
}
