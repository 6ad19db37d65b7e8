//! # コールバック
//!
//! 学習ループは各エポックの終わりに、登録されたコールバックへ読み取り専用の
//! [`TrainingState`] を渡します。コールバックは [`Action::StopEarly`] を返して
//! 学習を止められますが、パラメータを書き換えることはできません。

use std::path::PathBuf;
use std::sync::Arc;

use burn::tensor::backend::Backend;

use crate::checkpoint::save_approximators;
use crate::conditions::Condition;
use crate::error::{BoxError, Phase};
use crate::model::Approximator;
use crate::solver::{History, Solution};

/// コールバックが学習ループに要求できる操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// このエポックのコールバックをすべて呼んだ後で学習を止める。
    StopEarly,
}

/// コールバックに渡す、その時点の学習状態。
pub struct TrainingState<'a, B: Backend, M> {
    pub(crate) epoch: usize,
    pub(crate) final_epoch: usize,
    pub(crate) history: &'a History,
    pub(crate) approximators: &'a [M],
    pub(crate) conditions: &'a [Arc<dyn Condition<B>>],
    pub(crate) n_vars: usize,
    pub(crate) device: &'a B::Device,
}

impl<B: Backend, M: Approximator<B>> TrainingState<'_, B, M> {
    /// 終えたエポック数（1 始まり）。
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// 現在の `fit` 呼び出しの最終エポックかどうか。
    pub fn is_final_epoch(&self) -> bool {
        self.epoch == self.final_epoch
    }

    pub fn history(&self) -> &History {
        self.history
    }

    pub fn approximators(&self) -> &[M] {
        self.approximators
    }

    /// 現在の近似器による解のスナップショット。
    pub fn solution(&self) -> Solution<B, M> {
        Solution::assemble(
            self.approximators.to_vec(),
            self.conditions.to_vec(),
            self.n_vars,
            self.device.clone(),
        )
    }
}

/// 学習ループから呼ばれるコールバック。
pub trait Callback<B: Backend, M> {
    /// 呼び出し間隔（エポック数）。0 は 1 とみなします。
    fn every(&self) -> usize {
        1
    }

    /// エラーを返すと学習ループは [`crate::error::Error::Callback`] で止まります。
    fn on_epoch(&mut self, state: &TrainingState<'_, B, M>) -> Result<Option<Action>, BoxError>;
}

impl<B, M, F> Callback<B, M> for F
where
    B: Backend,
    F: FnMut(&TrainingState<'_, B, M>) -> Result<Option<Action>, BoxError>,
{
    fn on_epoch(&mut self, state: &TrainingState<'_, B, M>) -> Result<Option<Action>, BoxError> {
        self(state)
    }
}

/// 損失をコンソールに表示します。
#[derive(Debug, Clone)]
pub struct ProgressLogger {
    every: usize,
}

impl ProgressLogger {
    pub fn new(every: usize) -> Self {
        Self { every }
    }
}

impl<B: Backend, M: Approximator<B>> Callback<B, M> for ProgressLogger {
    fn every(&self) -> usize {
        self.every
    }

    fn on_epoch(&mut self, state: &TrainingState<'_, B, M>) -> Result<Option<Action>, BoxError> {
        let history = state.history();
        let train = history.last_loss(Phase::Train).unwrap_or(f32::NAN);
        let valid = history.last_loss(Phase::Valid).unwrap_or(f32::NAN);
        let mut line = format!(
            "[Epoch {}] Train Loss: {:.6}, Valid Loss: {:.6}",
            state.epoch(),
            train,
            valid
        );
        for name in history.metric_names() {
            if let Some(value) = history.metric(Phase::Valid, name).and_then(|v| v.last()) {
                line.push_str(&format!(", {name}: {value:.6}"));
            }
        }
        println!("{line}");
        Ok(None)
    }
}

/// 検証損失が `patience` エポック改善しなければ学習を止めます。
///
/// 直前の最良値より `min_delta` 以上小さくなったときだけ改善とみなします。
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f32,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            min_delta: 0.0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f32) -> Self {
        self.min_delta = min_delta;
        self
    }
}

impl<B: Backend, M: Approximator<B>> Callback<B, M> for EarlyStopping {
    fn on_epoch(&mut self, state: &TrainingState<'_, B, M>) -> Result<Option<Action>, BoxError> {
        let mut best = f32::INFINITY;
        let mut best_epoch = 0;
        for (i, &loss) in state.history().loss(Phase::Valid).iter().enumerate() {
            if loss < best - self.min_delta {
                best = loss;
                best_epoch = i + 1;
            }
        }
        if state.epoch() - best_epoch >= self.patience {
            Ok(Some(Action::StopEarly))
        } else {
            Ok(None)
        }
    }
}

/// 損失が目標値以下になったら学習を止めます。
#[derive(Debug, Clone)]
pub struct StopOnLoss {
    phase: Phase,
    target: f32,
}

impl StopOnLoss {
    pub fn new(phase: Phase, target: f32) -> Self {
        Self { phase, target }
    }
}

impl<B: Backend, M: Approximator<B>> Callback<B, M> for StopOnLoss {
    fn on_epoch(&mut self, state: &TrainingState<'_, B, M>) -> Result<Option<Action>, BoxError> {
        match state.history().last_loss(self.phase) {
            Some(loss) if loss <= self.target => Ok(Some(Action::StopEarly)),
            _ => Ok(None),
        }
    }
}

/// 近似器を定期的にファイルへ保存します。
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
    every: usize,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>, every: usize) -> Self {
        Self {
            path: path.into(),
            every,
        }
    }
}

impl<B: Backend, M: Approximator<B>> Callback<B, M> for Checkpoint {
    fn every(&self) -> usize {
        self.every
    }

    fn on_epoch(&mut self, state: &TrainingState<'_, B, M>) -> Result<Option<Action>, BoxError> {
        save_approximators(state.approximators(), &self.path)?;
        Ok(None)
    }
}
