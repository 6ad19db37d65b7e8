use std::path::Path;
use std::time::Instant;

use burn::backend::NdArray;

use crate::SOLUTION_GRAPH_FILENAME;
use crate::checkpoint::load_approximators;
use crate::cli::InferArgs;
use crate::monitor::plot_curves;
use crate::solver::Solution;

type MyBackend = NdArray<f32>;

/// `infer`サブコマンドを実行します。
pub fn run(args: &InferArgs) -> Result<(), Box<dyn std::error::Error>> {
    let device = Default::default();
    let problem = args.problem;
    let model_file = problem.model_file();

    if !Path::new(&model_file).exists() {
        return Err(format!(
            "モデルファイル '{}' が見つかりません。\n最初に 'train --problem {}' でモデルを学習・保存してください。",
            model_file,
            problem.name()
        )
        .into());
    }

    println!("\n推論を実行します ({}) - バックエンド: NdArray (CPU)", problem.name());
    let inference_start = Instant::now();

    println!("保存済みモデルを '{}' からロード中...", model_file);
    let template = vec![problem.network().init::<MyBackend>(&device)];
    let approximators = load_approximators(template, &model_file, &device)?;
    let solution = Solution::from_parts(
        approximators,
        problem.conditions::<MyBackend>(&device)?,
        problem.n_vars(),
        &device,
    )?;

    let grid = problem.grid(args.points);
    let predicted = solution.evaluate_vec(&grid)?;
    let inference_duration = inference_start.elapsed();

    let n_points = grid.first().map_or(0, Vec::len);
    println!(
        "推論が完了しました。入力点数: {} ({} 変数 × {} 点の格子)",
        n_points,
        problem.n_vars(),
        args.points.max(2)
    );
    println!("=> 推論時間: {:.2?}", inference_duration);
    println!(
        "=> 厳密解との最大誤差: {:.3e}",
        problem.max_error(&grid, &predicted[0])
    );

    if problem.n_vars() == 1 {
        let exact: Vec<f32> = grid[0].iter().map(|&t| problem.exact(&[t])).collect();
        let curves = vec![
            ("u".to_string(), predicted[0].clone()),
            ("exact".to_string(), exact),
        ];
        plot_curves(
            Path::new(SOLUTION_GRAPH_FILENAME),
            problem.name(),
            &grid[0],
            &curves,
        )?;
        println!("=> 解のグラフを '{}' に保存しました。", SOLUTION_GRAPH_FILENAME);
    }

    Ok(())
}
