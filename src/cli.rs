use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::problems::Problem;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Physics-informed neural network solver built on Burn", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（train または infer）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 近似器を学習し、結果をファイルに保存します
    Train(TrainArgs),
    /// 保存された近似器を使い、推論を実行します
    Infer(InferArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// 解く問題
    #[arg(long, value_enum)]
    pub problem: Problem,

    /// 学習エポック数（省略時は問題ごとの既定値）
    #[arg(long)]
    pub epochs: Option<usize>,

    /// ソルバー設定の JSON ファイル
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 進捗を表示する間隔（エポック数）
    #[arg(long, default_value_t = 100)]
    pub log_every: usize,

    /// 保存済みのモデルから学習を再開します
    #[arg(long)]
    pub resume: bool,
}

#[derive(Args, Debug)]
pub struct InferArgs {
    /// 解く問題
    #[arg(long, value_enum)]
    pub problem: Problem,

    /// 変数ごとの評価点数
    #[arg(long, default_value_t = 50)]
    pub points: usize,
}
