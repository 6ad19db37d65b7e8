//! 学習オーケストレーションで発生するエラーの定義。

use std::error::Error as StdError;
use std::fmt;

use burn::record::RecorderError;

/// コールバックなど、利用者のコードが返すエラー。
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// 損失を計算したフェーズ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Train,
    Valid,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Valid => write!(f, "valid"),
        }
    }
}

/// このクレートのエラー。
///
/// 設定の誤りは構築時に `Configuration` として即座に返され、
/// 学習中に設定エラーが出ることはありません。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 構築時に検出された設定の誤り。
    #[error("設定エラー: {0}")]
    Configuration(String),

    /// 損失が有限値でなくなった。
    #[error("学習が発散しました ({phase}, エポック {epoch}): 損失 = {loss}")]
    Divergence { epoch: usize, phase: Phase, loss: f32 },

    /// 微分履歴を持たない値に対する `diff` の呼び出しなど。
    #[error("微分できません: {0}")]
    Differentiation(String),

    /// 利用者のコールバックが失敗した。
    #[error("コールバックが失敗しました: {0}")]
    Callback(#[source] BoxError),

    /// まだ 1 エポックも学習していない。
    #[error("解はまだ利用できません。先に fit を実行してください")]
    NotFitted,

    #[error("入力が不正です: {0}")]
    InvalidInput(String),

    /// 近似器の保存・読み込みの失敗。
    #[error("モデルの保存・読み込みに失敗しました: {0}")]
    Record(#[from] RecorderError),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn differentiation(msg: impl Into<String>) -> Self {
        Self::Differentiation(msg.into())
    }
}
