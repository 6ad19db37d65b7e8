use std::path::Path;
use std::time::Instant;

use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::optim::AdamConfig;
use burn::tensor::backend::Backend;

use crate::callbacks::{Callback, ProgressLogger};
use crate::checkpoint::{load_approximators, save_approximators};
use crate::cli::TrainArgs;
use crate::model::Fcnn;
use crate::monitor::{LossPlotter, Monitor1D, plot_loss_history};
use crate::solver::{Solver, SolverConfig, Status};
use crate::{LOSS_GRAPH_FILENAME, SOLUTION_GRAPH_FILENAME};

type MyBackend = Autodiff<NdArray<f32>>;

/// `train`サブコマンドを実行します。
pub fn run(args: &TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();
    let problem = args.problem;
    let model_file = problem.model_file();

    let config = match &args.config {
        Some(path) => SolverConfig::load(path)
            .map_err(|e| format!("設定ファイル '{}' を読み込めません: {e}", path.display()))?,
        None => problem.solver_config(),
    };
    MyBackend::seed(config.seed);

    // --- 近似器とソルバーの準備 ---
    let template = vec![problem.network().init::<MyBackend>(&device)];
    let approximators = if args.resume {
        println!("保存済みモデルを '{}' から読み込み、学習を再開します", model_file);
        load_approximators(template, &model_file, &device)?
    } else {
        template
    };
    let mut solver = Solver::builder(problem.equations::<MyBackend>(), approximators, AdamConfig::new().init())
        .conditions(problem.conditions::<MyBackend>(&device)?)
        .domain(problem.domain())
        .config(config.clone())
        .build(&device)?;

    let epochs = args.epochs.unwrap_or_else(|| problem.default_epochs());
    let mut logger = ProgressLogger::new(args.log_every);
    let mut plotter = LossPlotter::new(LOSS_GRAPH_FILENAME, args.log_every.max(1) * 10);
    let mut monitor = (problem.n_vars() == 1).then(|| {
        let (t_min, t_max) = problem.domain()[0];
        Monitor1D::new(SOLUTION_GRAPH_FILENAME, args.log_every.max(1) * 10, t_min, t_max, 200)
            .with_reference(move |t| problem.exact(&[t]))
    });
    let mut callbacks: Vec<&mut dyn Callback<MyBackend, Fcnn<MyBackend>>> = Vec::new();
    callbacks.push(&mut logger);
    callbacks.push(&mut plotter);
    if let Some(monitor) = monitor.as_mut() {
        callbacks.push(monitor);
    }

    println!(
        "学習を開始します ({}) - バックエンド: NdArray (CPU)",
        problem.name()
    );
    let training_start = Instant::now();
    let status = solver.fit(epochs, &mut callbacks)?;
    let training_duration = training_start.elapsed();
    match status {
        Status::Complete => println!("学習が完了しました。"),
        Status::StoppedByObserver => println!("コールバックの要求により学習を早期終了しました。"),
    }
    println!("=> 学習時間: {:.2?}", training_duration);

    // --- 結果の保存と描画 ---
    plot_loss_history(solver.history(), Path::new(LOSS_GRAPH_FILENAME))?;
    println!("=> 損失グラフを '{}' に保存しました。", LOSS_GRAPH_FILENAME);

    let solution = solver.get_solution(true)?;
    let grid = problem.grid(if problem.n_vars() == 1 { 200 } else { 50 });
    let predicted = solution.evaluate_vec(&grid)?;
    println!(
        "=> 厳密解との最大誤差: {:.3e}",
        problem.max_error(&grid, &predicted[0])
    );

    println!("学習済みモデルを保存中...");
    save_approximators(solution.approximators(), &model_file)?;
    config.save(format!("{}_config.json", problem.name()))?;
    println!("=> モデルを '{}' に保存しました。", model_file);

    Ok(())
}
