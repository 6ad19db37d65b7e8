//! # 物理情報ニューラルネットワーク (PINN) ソルバー
//!
//! `clap` クレートを利用して、コマンドラインから`train`（学習）と`infer`（推論）の
//! 機能を個別に実行できます。
//!
//! ## 使い方
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train --problem advection
//! ```
//!
//! ### 推論
//! ```bash
//! cargo run --release -- infer --problem advection
//! ```

use clap::Parser;
use pinn_solve::cli::{Cli, Commands};
use pinn_solve::{inference, training};

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、`train`または`infer`の処理に振り分けます。
fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Train(args) => training::run(args),
        Commands::Infer(args) => inference::run(args),
    };
    if let Err(e) = result {
        eprintln!("エラー: {e}");
        std::process::exit(1);
    }
}
