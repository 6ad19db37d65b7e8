//! # 物理情報ニューラルネットワーク (PINN) ライブラリ
//!
//! `burn` フレームワークを使用して、常微分方程式・偏微分方程式を満たすように
//! ニューラルネットワークを学習させるための部品を提供します。
//!
//! - [`generator`]: コロケーション点の生成と合成
//! - [`conditions`]: 初期条件・境界条件を厳密に満たす出力変換
//! - [`diff`]: 残差を組み立てるための微分演算子
//! - [`solver`]: 学習ループ、履歴、学習済みの解
//! - [`callbacks`], [`monitor`]: 学習中の観測と早期終了
//!
//! ```no_run
//! use burn::backend::{Autodiff, NdArray};
//! use burn::optim::AdamConfig;
//! use pinn_solve::conditions::Ivp;
//! use pinn_solve::diff::diff;
//! use pinn_solve::model::FcnnConfig;
//! use pinn_solve::solver::Solver;
//!
//! type B = Autodiff<NdArray<f32>>;
//!
//! let device = Default::default();
//! let net = FcnnConfig::new(1, 1).init::<B>(&device);
//! let mut solver = Solver::builder(
//!     |u: &[pinn_solve::jet::Jet<B>], t: &[pinn_solve::jet::Jet<B>]| {
//!         Ok(vec![diff(&u[0], &t[0], 1)? - u[0].clone()])
//!     },
//!     vec![net],
//!     AdamConfig::new().init(),
//! )
//! .condition(Ivp::new(0.0, 1.0))
//! .domain(vec![(0.0, 1.0)])
//! .build(&device)
//! .unwrap();
//! solver.fit(500, &mut []).unwrap();
//! let u = solver.get_solution(true).unwrap().evaluate_vec(&[vec![0.5]]).unwrap();
//! println!("u(0.5) = {}", u[0][0]);
//! ```

pub mod callbacks;
pub mod checkpoint;
pub mod cli;
pub mod conditions;
pub mod diff;
pub mod error;
pub mod generator;
pub mod inference;
pub mod jet;
pub mod model;
pub mod monitor;
pub mod pinn;
pub mod problems;
pub mod solver;
pub mod training;

pub use error::{Error, Phase};

/// 損失グラフを保存するファイル名
pub const LOSS_GRAPH_FILENAME: &str = "loss_graph.png";

/// 1 変数の問題で解のグラフを保存するファイル名
pub const SOLUTION_GRAPH_FILENAME: &str = "solution.png";
