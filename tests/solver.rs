use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use approx::assert_relative_eq;
use burn::backend::{Autodiff, NdArray};
use burn::optim::{AdamConfig, Optimizer};
use burn::tensor::backend::Backend;

use pinn_solve::callbacks::{Action, Callback, Checkpoint, EarlyStopping, TrainingState};
use pinn_solve::generator::Predefined;
use pinn_solve::monitor::Monitor1D;
use pinn_solve::checkpoint::load_approximators;
use pinn_solve::conditions::{Condition, Ivp, NoCondition};
use pinn_solve::diff::diff;
use pinn_solve::error::BoxError;
use pinn_solve::jet::Jet;
use pinn_solve::model::{Fcnn, FcnnConfig};
use pinn_solve::solver::{Solution, Solver, SolverConfig, Status};
use pinn_solve::{Error, Phase};

type B = Autodiff<NdArray<f32>>;
type Net = Fcnn<B>;

fn net(outputs: usize) -> Net {
    FcnnConfig::new(1, outputs)
        .with_hidden_units(vec![16, 16])
        .init(&Default::default())
}

fn growth(u: &[Jet<B>], t: &[Jet<B>]) -> Result<Vec<Jet<B>>, Error> {
    Ok(vec![diff(&u[0], &t[0], 1)? - u[0].clone()])
}

fn growth_solver(config: SolverConfig) -> Solver<B, Net, impl Optimizer<Vec<Net>, B>> {
    Solver::builder(growth, vec![net(1)], AdamConfig::new().init())
        .condition(Ivp::new(0.0, 1.0))
        .domain(vec![(0.0, 1.0)])
        .config(config)
        .build(&Default::default())
        .unwrap()
}

fn quick() -> SolverConfig {
    SolverConfig::new()
        .with_diff_order(1)
        .with_points_per_dim(16)
        .with_learning_rate(1e-2)
}

#[test]
fn exponential_growth_converges() {
    B::seed(7);
    let mut solver = growth_solver(quick().with_points_per_dim(32).with_learning_rate(5e-3));
    assert_eq!(solver.fit(1500, &mut []).unwrap(), Status::Complete);

    let losses = solver.history().loss(Phase::Train);
    let early: f32 = losses[..100].iter().sum::<f32>() / 100.0;
    let late: f32 = losses[losses.len() - 100..].iter().sum::<f32>() / 100.0;
    assert!(late < early, "loss did not decrease: {early} -> {late}");

    let ts: Vec<f32> = (0..=10).map(|i| i as f32 / 10.0).collect();
    let u = solver
        .get_solution(true)
        .unwrap()
        .evaluate_vec(&[ts.clone()])
        .unwrap();
    for (t, value) in ts.iter().zip(&u[0]) {
        assert!(
            (value - t.exp()).abs() < 0.05,
            "u({t}) = {value}, expected {}",
            t.exp()
        );
    }
    assert_relative_eq!(u[0][0], 1.0);
}

#[test]
fn two_functions_with_one_scalar_approximator_fail_to_build() {
    let result = Solver::builder(
        |u: &[Jet<B>], _: &[Jet<B>]| Ok(vec![u[0].clone() - u[1].clone()]),
        vec![net(1)],
        AdamConfig::new().init(),
    )
    .condition(NoCondition)
    .condition(NoCondition)
    .domain(vec![(0.0, 1.0)])
    .build(&Default::default());
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn shared_approximator_solves_a_system() {
    // u' = v, v' = -u
    let mut solver = Solver::builder(
        |u: &[Jet<B>], t: &[Jet<B>]| {
            Ok(vec![
                diff(&u[0], &t[0], 1)? - u[1].clone(),
                diff(&u[1], &t[0], 1)? + u[0].clone(),
            ])
        },
        vec![net(2)],
        AdamConfig::new().init(),
    )
    .condition(Ivp::new(0.0, 0.0))
    .condition(Ivp::new(0.0, 1.0))
    .domain(vec![(0.0, 1.0)])
    .config(quick())
    .build(&Default::default())
    .unwrap();
    solver.fit(5, &mut []).unwrap();

    let u = solver
        .get_solution(false)
        .unwrap()
        .evaluate_vec(&[vec![0.0, 0.5]])
        .unwrap();
    assert_eq!(u.len(), 2);
    assert_eq!(u[0][0], 0.0);
    assert_eq!(u[1][0], 1.0);
}

#[test]
fn non_finite_loss_halts_without_touching_parameters() {
    let poisoned = Rc::new(Cell::new(false));
    let flag = poisoned.clone();
    let mut solver = Solver::builder(
        move |u: &[Jet<B>], t: &[Jet<B>]| {
            let residual = diff(&u[0], &t[0], 1)? - u[0].clone();
            Ok(vec![if flag.get() { residual * f32::NAN } else { residual }])
        },
        vec![net(1)],
        AdamConfig::new().init(),
    )
    .condition(Ivp::new(0.0, 1.0))
    .domain(vec![(0.0, 1.0)])
    .config(quick())
    .build(&Default::default())
    .unwrap();

    solver.fit(3, &mut []).unwrap();
    let probe = vec![vec![0.1, 0.5, 0.9]];
    let before = solver.get_solution(false).unwrap().evaluate_vec(&probe).unwrap();

    poisoned.set(true);
    match solver.fit(5, &mut []) {
        Err(Error::Divergence { epoch, phase, loss }) => {
            assert_eq!(epoch, 4);
            assert_eq!(phase, Phase::Train);
            assert!(loss.is_nan());
        }
        other => panic!("expected divergence, got {other:?}"),
    }
    assert_eq!(solver.epoch(), 3);
    assert_eq!(solver.history().loss(Phase::Train).len(), 3);

    let after = solver.get_solution(false).unwrap().evaluate_vec(&probe).unwrap();
    assert_eq!(before, after);
}

struct Cadence {
    every: usize,
    seen: Vec<(usize, bool)>,
}

impl Callback<B, Net> for Cadence {
    fn every(&self) -> usize {
        self.every
    }

    fn on_epoch(&mut self, state: &TrainingState<'_, B, Net>) -> Result<Option<Action>, BoxError> {
        self.seen.push((state.epoch(), state.is_final_epoch()));
        Ok(None)
    }
}

#[test]
fn callbacks_run_every_k_epochs_and_on_the_last_one() {
    let mut solver = growth_solver(quick());
    let mut cadence = Cadence {
        every: 3,
        seen: Vec::new(),
    };
    solver.fit(10, &mut [&mut cadence]).unwrap();
    assert_eq!(
        cadence.seen,
        vec![(3, false), (6, false), (9, false), (10, true)]
    );

    cadence.seen.clear();
    solver.fit(2, &mut [&mut cadence]).unwrap();
    assert_eq!(cadence.seen, vec![(12, true)]);
}

#[test]
fn stop_request_finishes_the_epoch_then_halts() {
    let mut solver = growth_solver(quick());
    let mut stopper = |state: &TrainingState<'_, B, Net>| -> Result<Option<Action>, BoxError> {
        Ok((state.epoch() == 4).then_some(Action::StopEarly))
    };
    let mut later = Cadence {
        every: 1,
        seen: Vec::new(),
    };
    let status = solver.fit(10, &mut [&mut stopper, &mut later]).unwrap();
    assert_eq!(status, Status::StoppedByObserver);
    assert_eq!(solver.epoch(), 4);
    assert_eq!(later.seen.last(), Some(&(4, false)));
    assert_eq!(solver.history().loss(Phase::Valid).len(), 4);
}

#[test]
fn early_stopping_ends_a_stalled_run() {
    let mut solver = growth_solver(quick().with_learning_rate(1e-9));
    let mut stopper = EarlyStopping::new(3).with_min_delta(1.0);
    let status = solver.fit(50, &mut [&mut stopper]).unwrap();
    assert_eq!(status, Status::StoppedByObserver);
    assert_eq!(solver.epoch(), 4);
}

#[test]
fn callback_failures_propagate() {
    let mut solver = growth_solver(quick());
    let mut failing = |_: &TrainingState<'_, B, Net>| -> Result<Option<Action>, BoxError> {
        Err("monitor crashed".into())
    };
    let result = solver.fit(5, &mut [&mut failing]);
    assert!(matches!(result, Err(Error::Callback(_))));
    assert_eq!(solver.epoch(), 1);
}

#[test]
fn checkpoint_resumes_training_from_saved_parameters() {
    let device = Default::default();
    let path = std::env::temp_dir().join(format!("pinn_solve_resume_{}.mpk", std::process::id()));
    let mut solver = growth_solver(quick());
    let mut checkpoint = Checkpoint::new(&path, 5);
    solver.fit(5, &mut [&mut checkpoint]).unwrap();

    let probe = vec![vec![0.2, 0.4, 0.8]];
    let trained = solver.get_solution(false).unwrap().evaluate_vec(&probe).unwrap();

    let loaded = load_approximators(vec![net(1)], &path, &device).unwrap();
    let mut resumed = Solver::builder(growth, loaded, AdamConfig::new().init())
        .condition(Ivp::new(0.0, 1.0))
        .domain(vec![(0.0, 1.0)])
        .config(quick().with_learning_rate(1e-4))
        .build(&device)
        .unwrap();
    assert!(matches!(resumed.get_solution(false), Err(Error::NotFitted)));
    assert_eq!(resumed.approximators().len(), 1);

    resumed.fit(1, &mut []).unwrap();
    let continued = resumed.get_solution(false).unwrap().evaluate_vec(&probe).unwrap();
    for (a, b) in trained[0].iter().zip(&continued[0]) {
        assert!((a - b).abs() < 0.05, "resumed run drifted: {a} vs {b}");
    }

    let reloaded = load_approximators(vec![net(1)], &path, &device).unwrap();
    let solution = Solution::from_parts(
        reloaded,
        vec![Arc::new(Ivp::new(0.0, 1.0)) as Arc<dyn Condition<B>>],
        1,
        &device,
    )
    .unwrap();
    assert_eq!(solution.evaluate_vec(&probe).unwrap(), trained);
    std::fs::remove_file(&path).ok();
}

#[test]
fn best_solution_comes_from_the_lowest_validation_loss() {
    let scale = Rc::new(Cell::new(1.0f32));
    let factor = scale.clone();
    let mut solver = Solver::builder(
        move |u: &[Jet<B>], t: &[Jet<B>]| {
            Ok(vec![(diff(&u[0], &t[0], 1)? - u[0].clone()) * factor.get()])
        },
        vec![net(1)],
        AdamConfig::new().init(),
    )
    .condition(Ivp::new(0.0, 1.0))
    .domain(vec![(0.0, 1.0)])
    .config(quick())
    .build(&Default::default())
    .unwrap();

    let probe = vec![vec![0.25, 0.5, 1.0]];
    let mut snapshots = Vec::new();
    let mut record = |state: &TrainingState<'_, B, Net>| -> Result<Option<Action>, BoxError> {
        snapshots.push(state.solution().evaluate_vec(&probe)?);
        if state.epoch() == 2 {
            // 以降のエポックでは損失が桁違いに大きくなる
            scale.set(1000.0);
        }
        Ok(None)
    };
    solver.fit(6, &mut [&mut record]).unwrap();

    let valid = solver.history().loss(Phase::Valid);
    let (best_epoch, best_loss) = valid
        .iter()
        .copied()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap();
    assert!(best_epoch < 2);
    assert_eq!(solver.best_valid_loss(), Some(best_loss));

    let best = solver.get_solution(true).unwrap().evaluate_vec(&probe).unwrap();
    let current = solver.get_solution(false).unwrap().evaluate_vec(&probe).unwrap();
    assert_eq!(best, snapshots[best_epoch]);
    assert_eq!(current, snapshots[5]);
    assert_ne!(best, current);
}

#[test]
fn metrics_do_not_change_the_trained_parameters() {
    let initial = net(1);
    let mut plain = growth_solver_with(initial.clone(), None);
    let mut measured = growth_solver_with(initial, Some("mean_square"));
    plain.fit(5, &mut []).unwrap();
    measured.fit(5, &mut []).unwrap();

    assert_eq!(
        measured.history().metric(Phase::Train, "mean_square").map(<[f32]>::len),
        Some(5)
    );
    assert_eq!(plain.history().loss(Phase::Train), measured.history().loss(Phase::Train));
    let probe = vec![vec![0.1, 0.6, 0.9]];
    assert_eq!(
        plain.get_solution(false).unwrap().evaluate_vec(&probe).unwrap(),
        measured.get_solution(false).unwrap().evaluate_vec(&probe).unwrap()
    );
}

fn growth_solver_with(
    initial: Net,
    metric: Option<&str>,
) -> Solver<B, Net, impl Optimizer<Vec<Net>, B>> {
    let mut builder = Solver::builder(growth, vec![initial], AdamConfig::new().init())
        .condition(Ivp::new(0.0, 1.0))
        .domain(vec![(0.0, 1.0)])
        .config(quick());
    if let Some(name) = metric {
        builder = builder.metric(name, |u: &[Jet<B>], _: &[Jet<B>]| {
            Ok(u[0].value().powf_scalar(2.0).mean())
        });
    }
    builder.build(&Default::default()).unwrap()
}

#[test]
fn non_finite_validation_loss_is_reported_as_validation_divergence() {
    // 検証点 t = 2 でのみ 1 / (t - 2) が発散する
    let mut solver = Solver::builder(
        |u: &[Jet<B>], t: &[Jet<B>]| {
            let residual = diff(&u[0], &t[0], 1)? - u[0].clone();
            Ok(vec![residual * (t[0].clone() - 2.0).recip()])
        },
        vec![net(1)],
        AdamConfig::new().init(),
    )
    .condition(Ivp::new(0.0, 1.0))
    .domain(vec![(0.0, 1.0)])
    .valid_generator(Predefined::new(vec![vec![2.0]]).unwrap())
    .config(quick())
    .build(&Default::default())
    .unwrap();

    match solver.fit(3, &mut []) {
        Err(Error::Divergence { epoch, phase, loss }) => {
            assert_eq!(epoch, 1);
            assert_eq!(phase, Phase::Valid);
            assert!(!loss.is_finite());
        }
        other => panic!("expected divergence, got {other:?}"),
    }
    assert_eq!(solver.history().loss(Phase::Train).len(), 1);
    assert!(solver.history().loss(Phase::Valid).is_empty());
    assert_eq!(solver.best_valid_loss(), None);
}

#[test]
fn one_dimensional_monitor_fails_on_a_two_variable_problem() {
    let plane = FcnnConfig::new(2, 1)
        .with_hidden_units(vec![8])
        .init::<B>(&Default::default());
    let mut solver = Solver::builder(
        |u: &[Jet<B>], x: &[Jet<B>]| Ok(vec![diff(&u[0], &x[0], 1)? + diff(&u[0], &x[1], 1)?]),
        vec![plane],
        AdamConfig::new().init(),
    )
    .condition(NoCondition)
    .domain(vec![(0.0, 1.0), (0.0, 1.0)])
    .config(quick().with_points_per_dim(4))
    .build(&Default::default())
    .unwrap();

    let path = std::env::temp_dir().join(format!("pinn_solve_monitor_2d_{}.png", std::process::id()));
    let mut monitor = Monitor1D::new(&path, 1, 0.0, 1.0, 10);
    let result = solver.fit(3, &mut [&mut monitor]);
    assert!(matches!(result, Err(Error::Callback(_))));
    assert_eq!(solver.epoch(), 1);
    assert!(!path.exists());
}
