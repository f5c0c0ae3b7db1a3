use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use faer_core::Parallelism;
use robust_spsolve::{CscMatrix, RobustSolver, SolverOptions};

fn solver_options(verbose: bool) -> SolverOptions {
    SolverOptions {
        verbose,
        ..SolverOptions::default()
    }
}

/// `n x n` tridiagonal with `row_exp(i)` orders of magnitude on row `i`.
fn banded(n: usize, row_exp: impl Fn(usize) -> i32) -> CscMatrix {
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for col in 0..n {
        for row in col.saturating_sub(1)..(col + 2).min(n) {
            let v = if row == col { 4.0 } else { -1.0 };
            rows.push(row);
            cols.push(col);
            values.push(v * 10f64.powi(row_exp(row)));
        }
    }
    CscMatrix::from_triplets(n, n, &rows, &cols, &values).unwrap()
}

fn run_bench(c: &mut Criterion, name: &str, a: CscMatrix) {
    let mut solver = RobustSolver::new(Parallelism::None);
    let rhs = vec![1.0; a.nrows()];
    let mut x = vec![0.0; a.nrows()];
    let opts_verbose = solver_options(true);
    let opts_quiet = solver_options(false);
    let mut first = true;
    c.bench_function(name, |b| {
        b.iter(|| {
            let opts = if first {
                first = false;
                &opts_verbose
            } else {
                &opts_quiet
            };
            solver.solve(a.as_ref(), &rhs, &mut x, opts, None).unwrap();
            black_box(&x);
        });
    });
}

fn bench_tridiagonal_small(c: &mut Criterion) {
    run_bench(c, "tridiagonal_100", banded(100, |_| 0));
}

fn bench_tridiagonal_large(c: &mut Criterion) {
    run_bench(c, "tridiagonal_10000", banded(10_000, |_| 0));
}

fn bench_ill_scaled(c: &mut Criterion) {
    run_bench(
        c,
        "ill_scaled_2000",
        banded(2_000, |row| (row % 17) as i32 - 8),
    );
}

fn bench_empty_rows(c: &mut Criterion) {
    // Every tenth row keeps only a stored zero diagonal.
    let n = 2_000;
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for col in 0..n {
        for row in col.saturating_sub(1)..(col + 2).min(n) {
            let empty = row % 10 == 0;
            if empty && row != col {
                continue;
            }
            if col % 10 == 0 && row != col {
                continue;
            }
            rows.push(row);
            cols.push(col);
            values.push(match (row == col, empty) {
                (true, true) => 0.0,
                (true, false) => 4.0,
                _ => -1.0,
            });
        }
    }
    let a = CscMatrix::from_triplets(n, n, &rows, &cols, &values).unwrap();
    run_bench(c, "empty_rows_2000", a);
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_millis(1000));
    targets =
        bench_tridiagonal_small,
        bench_tridiagonal_large,
        bench_ill_scaled,
        bench_empty_rows
}
criterion_main!(benches);
