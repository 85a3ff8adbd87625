use ridge_nnls_bench::{
    BenchmarkSolver, Bounds, DesignMatrix, LbfgsSolver, LinearOperator, ObjectiveParams,
    RidgeObjective, SimulatedDataset, SolveStatus, TrfOptions, TrfSolver, lsq_linear,
    ridge_augmented, ridge_target,
};

fn objective_for(dataset: SimulatedDataset, reg: f64) -> (RidgeObjective, ObjectiveParams) {
    let (_, data) = dataset.get_data().unwrap();
    let mut objective = RidgeObjective::new(reg).unwrap();
    objective.set_data(data).unwrap();
    let params = objective.to_params().unwrap();
    (objective, params)
}

fn run_and_score(
    solver: &mut dyn BenchmarkSolver,
    objective: &RidgeObjective,
    n_iter: usize,
) -> (f64, Vec<f64>) {
    solver.run(n_iter).unwrap();
    let w = solver.result().unwrap().to_vec();
    (objective.compute(&w).unwrap(), w)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn lbfgs_on_default_benchmark_problem() {
    let (objective, params) = objective_for(SimulatedDataset::new(100, 1000, false), 1.0);
    let mut solver = LbfgsSolver::new();
    solver.set_objective(&params);

    let (f1, w1) = run_and_score(&mut solver, &objective, 1);
    let (f50, w50) = run_and_score(&mut solver, &objective, 50);
    assert_eq!(w1.len(), 1000);
    assert_eq!(w50.len(), 1000);
    assert!(f1.is_finite() && f50.is_finite());
    assert!(f50 <= f1, "{f50} > {f1}");
    assert!(w50.iter().all(|&v| v >= -1e-6));

    let zero = objective.compute(&vec![0.0; 1000]).unwrap();
    assert!(f1 < zero);
}

#[test]
fn solvers_agree_on_the_optimum() {
    let (objective, params) = objective_for(SimulatedDataset::new(30, 20, false), 1.0);

    let mut lbfgs = LbfgsSolver::new();
    lbfgs.set_objective(&params);
    let (f_lbfgs, w_lbfgs) = run_and_score(&mut lbfgs, &objective, 500);

    let mut trf = TrfSolver::new();
    trf.set_objective(&params);
    let (f_trf, w_trf) = run_and_score(&mut trf, &objective, 60);

    assert!(
        (f_lbfgs - f_trf).abs() <= 1e-6 * f_trf.max(1.0),
        "{f_lbfgs} vs {f_trf}"
    );
    for (a, b) in w_lbfgs.iter().zip(&w_trf) {
        assert!((a - b).abs() <= 1e-3, "{a} vs {b}");
    }
    assert!(w_lbfgs.iter().chain(&w_trf).all(|&v| v >= -1e-12));
}

#[test]
fn objective_does_not_increase_with_budget() {
    let (objective, params) = objective_for(SimulatedDataset::new(40, 25, false), 1.0);
    let mut solvers: Vec<Box<dyn BenchmarkSolver>> =
        vec![Box::new(LbfgsSolver::new()), Box::new(TrfSolver::new())];
    for solver in solvers.iter_mut() {
        solver.set_objective(&params);
        let mut previous = f64::INFINITY;
        for n_iter in 1..10 {
            let (value, _) = run_and_score(solver.as_mut(), &objective, n_iter);
            assert!(
                value <= previous + 1e-10 * previous.abs().min(1e300),
                "{} at {n_iter}: {value} > {previous}",
                solver.name()
            );
            previous = value;
        }
    }
}

#[test]
fn same_budget_reproduces_the_result() {
    let (objective, params) = objective_for(SimulatedDataset::default(), 1.0);
    let mut solver = TrfSolver::new();
    solver.set_objective(&params);
    let (a, wa) = run_and_score(&mut solver, &objective, 5);
    let (b, wb) = run_and_score(&mut solver, &objective, 5);
    assert_eq!(a, b);
    assert_eq!(wa, wb);
}

#[test]
fn sparse_design_solves_with_both_solvers() {
    let (objective, params) = objective_for(SimulatedDataset::new(60, 80, true), 1.0);
    assert!(params.data.x.is_sparse());
    let zero = objective.compute(&vec![0.0; 80]).unwrap();

    let mut solvers: Vec<Box<dyn BenchmarkSolver>> =
        vec![Box::new(LbfgsSolver::new()), Box::new(TrfSolver::new())];
    for solver in solvers.iter_mut() {
        solver.set_objective(&params);
        let (value, w) = run_and_score(solver.as_mut(), &objective, 20);
        assert_eq!(w.len(), 80);
        assert!(value.is_finite() && value < zero, "{}: {value}", solver.name());
    }
}

#[test]
fn augmented_operator_matches_dense_stack() {
    let (_, data) = SimulatedDataset::new(9, 5, true).get_data().unwrap();
    let reg: f64 = 2.5;
    let op = ridge_augmented(data.x.as_ref(), reg);
    assert_eq!(op.nrows(), 14);
    assert_eq!(op.ncols(), 5);

    let dense = data.x.to_dense();
    let b = [0.3, -1.0, 2.0, 0.0, 0.7];
    let forward = op.matvec(&b);
    for i in 0..9 {
        let expected: f64 = (0..5).map(|j| dense.read(i, j) * b[j]).sum();
        assert!((forward[i] - expected).abs() <= 1e-12);
    }
    for j in 0..5 {
        assert!((forward[9 + j] - reg.sqrt() * b[j]).abs() <= 1e-12);
    }

    let v: Vec<f64> = (0..14).map(|i| (i as f64 * 0.37).sin()).collect();
    let lhs = dot(&forward, &v);
    let rhs = dot(&b, &op.rmatvec(&v));
    assert!((lhs - rhs).abs() <= 1e-10 * lhs.abs().max(1.0));
}

#[test]
fn lsq_linear_on_augmented_system_minimizes_ridge_loss() {
    let (objective, params) = objective_for(SimulatedDataset::new(20, 12, false), 0.5);
    let op = ridge_augmented(params.data.x.as_ref(), params.reg);
    let target = ridge_target(&params.data.y, 12);
    let options = TrfOptions {
        tol: 1e-12,
        ..TrfOptions::default()
    };
    let result = lsq_linear(&op, &target, &Bounds::nonnegative(12), &options, None).unwrap();
    assert!(matches!(
        result.stats.status,
        SolveStatus::ConvergedOptimality
            | SolveStatus::ConvergedCost
            | SolveStatus::UnconstrainedOptimum
            | SolveStatus::NoProgress
    ));
    // Augmented cost equals the ridge objective.
    let value = objective.compute(&result.x).unwrap();
    assert!((value - result.stats.cost).abs() <= 1e-9 * value.max(1.0));

    let mut lbfgs = LbfgsSolver::new();
    lbfgs.set_objective(&params);
    let (reference, _) = run_and_score(&mut lbfgs, &objective, 500);
    assert!(value <= reference + 1e-6 * reference.max(1.0));
}

#[test]
fn dense_matrix_built_from_rows_drives_the_solvers() {
    // x >= 0 pins the second coefficient at zero.
    let x = DesignMatrix::from_row_major(3, 2, &[1.0, 1.0, 0.0, 1.0, 1.0, 0.0]).unwrap();
    let data = ridge_nnls_bench::ProblemData {
        x: std::sync::Arc::new(x),
        y: std::sync::Arc::from(vec![2.0, -3.0, 2.0]),
    };
    let mut objective = RidgeObjective::new(0.0).unwrap();
    objective.set_data(data).unwrap();
    let params = objective.to_params().unwrap();

    let mut trf = TrfSolver::new();
    trf.set_objective(&params);
    let (value, w) = run_and_score(&mut trf, &objective, 30);
    assert!(w[1].abs() <= 1e-6, "{w:?}");
    assert!(w[0] > 0.0);
    let mut lbfgs = LbfgsSolver::new();
    lbfgs.set_objective(&params);
    let (reference, _) = run_and_score(&mut lbfgs, &objective, 100);
    assert!((value - reference).abs() <= 1e-6 * reference.max(1.0));
}
