//! # ソルバー
//!
//! 点の生成 → 条件付き評価 → 残差 → 損失 → オプティマイザのステップ → 検証 →
//! コールバック、を 1 エポックとして繰り返す制御ループです。
//!
//! 近似器のパラメータを更新するのはオプティマイザのステップだけで、
//! コールバックには読み取り専用の [`TrainingState`] しか渡しません。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::Tensor;
use burn::tensor::backend::{AutodiffBackend, Backend};

use crate::callbacks::{Action, Callback, TrainingState};
use crate::conditions::Condition;
use crate::error::{Error, Phase};
use crate::generator::{Generator, domain_generator};
use crate::jet::Jet;
use crate::model::Approximator;
use crate::pinn::{
    Criterion, check_approximators, evaluate_functions, residual_loss, scalar, seed_coordinates,
    tensor_to_vec,
};

/// 方程式系。未知関数の値（条件適用後）と座標を受け取り、方程式ごとの残差を返します。
pub type Equations<B> = Box<dyn Fn(&[Jet<B>], &[Jet<B>]) -> Result<Vec<Jet<B>>, Error>>;

/// 補助指標。損失と同じ引数から 1 要素のテンソルを返します。勾配には寄与しません。
pub type Metric<B> = Box<dyn Fn(&[Jet<B>], &[Jet<B>]) -> Result<Tensor<B, 1>, Error>>;

/// 学習の設定。
#[derive(Config, Debug)]
pub struct SolverConfig {
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// 座標ジェットが追跡する微分の階数。方程式に現れる最高階以上にします。
    #[config(default = 2)]
    pub diff_order: usize,
    #[config(default = "Criterion::MeanSquared")]
    pub criterion: Criterion,
    /// 領域から既定の生成器を作るときの 1 次元あたりの点数。
    #[config(default = 32)]
    pub points_per_dim: usize,
    #[config(default = 42)]
    pub seed: u64,
}

/// `fit` の終了理由。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 指定したエポック数をすべて実行した。
    Complete,

    /// コールバックが早期終了を要求した。
    StoppedByObserver,
}

/// エポックごとの損失と補助指標の記録。追記のみ。
#[derive(Debug, Clone, Default)]
pub struct History {
    train_loss: Vec<f32>,
    valid_loss: Vec<f32>,
    metrics: BTreeMap<(Phase, String), Vec<f32>>,
}

impl History {
    pub fn loss(&self, phase: Phase) -> &[f32] {
        match phase {
            Phase::Train => &self.train_loss,
            Phase::Valid => &self.valid_loss,
        }
    }

    pub fn last_loss(&self, phase: Phase) -> Option<f32> {
        self.loss(phase).last().copied()
    }

    pub fn metric(&self, phase: Phase, name: &str) -> Option<&[f32]> {
        self.metrics
            .get(&(phase, name.to_string()))
            .map(Vec::as_slice)
    }

    /// 記録されている補助指標の名前。
    pub fn metric_names(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self.metrics.keys().map(|(_, n)| n.as_str()).collect();
        names.into_iter().collect()
    }

    /// 学習ステップを終えたエポック数。
    pub fn len(&self) -> usize {
        self.train_loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train_loss.is_empty()
    }

    pub(crate) fn push_loss(&mut self, phase: Phase, value: f32) {
        match phase {
            Phase::Train => self.train_loss.push(value),
            Phase::Valid => self.valid_loss.push(value),
        }
    }

    pub(crate) fn push_metric(&mut self, phase: Phase, name: &str, value: f32) {
        self.metrics
            .entry((phase, name.to_string()))
            .or_default()
            .push(value);
    }
}

/// 学習した近似器と条件の組。任意の点で未知関数を評価できます。
pub struct Solution<B: Backend, M> {
    approximators: Vec<M>,
    conditions: Vec<Arc<dyn Condition<B>>>,
    n_vars: usize,
    device: B::Device,
}

impl<B: Backend, M: Approximator<B>> Solution<B, M> {
    pub(crate) fn assemble(
        approximators: Vec<M>,
        conditions: Vec<Arc<dyn Condition<B>>>,
        n_vars: usize,
        device: B::Device,
    ) -> Self {
        Self {
            approximators,
            conditions,
            n_vars,
            device,
        }
    }

    /// 保存しておいた近似器などから解を組み立てます。
    pub fn from_parts(
        approximators: Vec<M>,
        conditions: Vec<Arc<dyn Condition<B>>>,
        n_vars: usize,
        device: &B::Device,
    ) -> Result<Self, Error> {
        check_approximators(&approximators, &conditions, n_vars)?;
        Ok(Self::assemble(approximators, conditions, n_vars, device.clone()))
    }

    pub fn n_functions(&self) -> usize {
        self.conditions.len()
    }

    pub fn approximators(&self) -> &[M] {
        &self.approximators
    }

    /// 座標（各 `[点数, 1]`）で全未知関数を評価します。
    pub fn evaluate(&self, coords: &[Tensor<B, 2>]) -> Result<Vec<Tensor<B, 2>>, Error> {
        if coords.len() != self.n_vars {
            return Err(Error::InvalidInput(format!(
                "座標が {} 個渡されましたが、独立変数は {} 個です",
                coords.len(),
                self.n_vars
            )));
        }
        let n = coords[0].dims()[0];
        if n == 0 || coords.iter().any(|c| c.dims() != [n, 1]) {
            return Err(Error::InvalidInput(
                "座標はすべて同じ点数の [点数, 1] テンソルでなければなりません".to_string(),
            ));
        }
        let jets: Vec<Jet<B>> = coords.iter().cloned().map(Jet::constant).collect();
        Ok(evaluate_functions(&self.approximators, &self.conditions, &jets)
            .into_iter()
            .map(|u| u.value())
            .collect())
    }

    /// 座標を変数ごとの配列で渡し、関数ごとの配列を受け取ります。
    pub fn evaluate_vec(&self, coords: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, Error> {
        let tensors: Vec<Tensor<B, 2>> = coords
            .iter()
            .map(|c| Tensor::<B, 1>::from_floats(c.as_slice(), &self.device).reshape([c.len(), 1]))
            .collect();
        if coords.iter().any(|c| c.is_empty()) {
            return Err(Error::InvalidInput("座標が空です".to_string()));
        }
        self.evaluate(&tensors)?
            .into_iter()
            .map(tensor_to_vec)
            .collect()
    }
}

/// PINN の学習ループ。
pub struct Solver<B, M, O>
where
    B: AutodiffBackend,
    M: Approximator<B> + AutodiffModule<B>,
    O: Optimizer<Vec<M>, B>,
{
    equations: Equations<B>,
    approximators: Vec<M>,
    conditions: Vec<Arc<dyn Condition<B>>>,
    optimizer: O,
    train_generator: Box<dyn Generator>,
    valid_generator: Box<dyn Generator>,
    metrics: Vec<(String, Metric<B>)>,
    config: SolverConfig,
    device: B::Device,
    n_vars: usize,
    n_equations: usize,
    epoch: usize,
    history: History,
    best: Option<(f32, Vec<M>)>,
}

/// [`Solver`] の組み立て。設定の誤りは [`SolverBuilder::build`] がすべて検出します。
pub struct SolverBuilder<B, M, O>
where
    B: AutodiffBackend,
{
    equations: Equations<B>,
    approximators: Vec<M>,
    optimizer: O,
    conditions: Vec<Arc<dyn Condition<B>>>,
    domain: Option<Vec<(f32, f32)>>,
    train_generator: Option<Box<dyn Generator>>,
    valid_generator: Option<Box<dyn Generator>>,
    metrics: Vec<(String, Metric<B>)>,
    config: SolverConfig,
}

impl<B, M, O> Solver<B, M, O>
where
    B: AutodiffBackend,
    M: Approximator<B> + AutodiffModule<B>,
    O: Optimizer<Vec<M>, B>,
{
    /// 方程式系、近似器、オプティマイザからソルバーの組み立てを始めます。
    ///
    /// 近似器は未知関数ごとに 1 つ、または全関数で共有する 1 つを渡します。
    /// 学習済みの近似器を渡せば、その続きから学習します。
    pub fn builder(
        equations: impl Fn(&[Jet<B>], &[Jet<B>]) -> Result<Vec<Jet<B>>, Error> + 'static,
        approximators: Vec<M>,
        optimizer: O,
    ) -> SolverBuilder<B, M, O> {
        SolverBuilder {
            equations: Box::new(equations),
            approximators,
            optimizer,
            conditions: Vec::new(),
            domain: None,
            train_generator: None,
            valid_generator: None,
            metrics: Vec::new(),
            config: SolverConfig::new(),
        }
    }

    /// 最大 `max_epochs` エポック学習します。
    ///
    /// 各コールバックは `every()` エポックごとと、この呼び出しの最終エポックで
    /// 登録順に呼ばれます。いずれかが [`Action::StopEarly`] を返すと、
    /// そのエポックのコールバックをすべて呼んだ後で停止します。
    ///
    /// 繰り返し呼び出すと、エポック数と履歴は前回の続きになります。
    pub fn fit(
        &mut self,
        max_epochs: usize,
        callbacks: &mut [&mut dyn Callback<B, M>],
    ) -> Result<Status, Error> {
        let final_epoch = self.epoch + max_epochs;
        while self.epoch < final_epoch {
            self.train_step()?;
            self.validate_step()?;

            let state = TrainingState {
                epoch: self.epoch,
                final_epoch,
                history: &self.history,
                approximators: &self.approximators,
                conditions: &self.conditions,
                n_vars: self.n_vars,
                device: &self.device,
            };
            let mut stop = false;
            for callback in callbacks.iter_mut() {
                let every = callback.every().max(1);
                if self.epoch % every != 0 && self.epoch != final_epoch {
                    continue;
                }
                if let Some(Action::StopEarly) = callback.on_epoch(&state).map_err(Error::Callback)? {
                    stop = true;
                }
            }
            if stop {
                return Ok(Status::StoppedByObserver);
            }
        }
        Ok(Status::Complete)
    }

    fn train_step(&mut self) -> Result<(), Error> {
        let epoch = self.epoch + 1;
        let batch = self.train_generator.generate();
        let coords = seed_coordinates::<B>(&batch, self.config.diff_order, &self.device);
        let functions = evaluate_functions(&self.approximators, &self.conditions, &coords);
        let residuals = self.residuals(&functions, &coords)?;
        let loss = residual_loss(residuals, self.config.criterion)?;
        let value = scalar(loss.clone());
        if !value.is_finite() {
            return Err(Error::Divergence {
                epoch,
                phase: Phase::Train,
                loss: value,
            });
        }
        self.record_metrics(Phase::Train, &functions, &coords)?;

        let grads = loss.backward();
        let approximators = std::mem::take(&mut self.approximators);
        let grads = GradientsParams::from_grads(grads, &approximators);
        self.approximators = self
            .optimizer
            .step(self.config.learning_rate, approximators, grads);

        self.history.push_loss(Phase::Train, value);
        self.epoch = epoch;
        Ok(())
    }

    fn validate_step(&mut self) -> Result<(), Error> {
        let approximators: Vec<M> = self
            .approximators
            .iter()
            .map(|net| net.clone().no_grad())
            .collect();
        let batch = self.valid_generator.generate();
        let coords = seed_coordinates::<B>(&batch, self.config.diff_order, &self.device);
        let functions = evaluate_functions(&approximators, &self.conditions, &coords);
        let residuals = self.residuals(&functions, &coords)?;
        let value = scalar(residual_loss(residuals, self.config.criterion)?);
        if !value.is_finite() {
            return Err(Error::Divergence {
                epoch: self.epoch,
                phase: Phase::Valid,
                loss: value,
            });
        }
        self.record_metrics(Phase::Valid, &functions, &coords)?;
        self.history.push_loss(Phase::Valid, value);

        if self.best.as_ref().is_none_or(|(best, _)| value < *best) {
            self.best = Some((value, self.approximators.clone()));
        }
        Ok(())
    }

    fn residuals(&self, functions: &[Jet<B>], coords: &[Jet<B>]) -> Result<Vec<Jet<B>>, Error> {
        let residuals = (self.equations)(functions, coords)?;
        if residuals.len() != self.n_equations {
            return Err(Error::InvalidInput(format!(
                "方程式の数が変わりました（{} → {}）",
                self.n_equations,
                residuals.len()
            )));
        }
        Ok(residuals)
    }

    fn record_metrics(
        &mut self,
        phase: Phase,
        functions: &[Jet<B>],
        coords: &[Jet<B>],
    ) -> Result<(), Error> {
        for (name, metric) in &self.metrics {
            let value = scalar(metric(functions, coords)?);
            self.history.push_metric(phase, name, value);
        }
        Ok(())
    }

    /// 現在の（`best` なら検証損失が最小だった）近似器による解。
    pub fn get_solution(&self, best: bool) -> Result<Solution<B, M>, Error> {
        if self.epoch == 0 {
            return Err(Error::NotFitted);
        }
        let approximators = match (&self.best, best) {
            (Some((_, nets)), true) => nets.clone(),
            _ => self.approximators.clone(),
        };
        Ok(Solution::assemble(
            approximators,
            self.conditions.clone(),
            self.n_vars,
            self.device.clone(),
        ))
    }

    /// 学習を終えたエポック数。
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// これまでの最小の検証損失。
    pub fn best_valid_loss(&self) -> Option<f32> {
        self.best.as_ref().map(|(loss, _)| *loss)
    }

    pub fn approximators(&self) -> &[M] {
        &self.approximators
    }

    /// 近似器を取り出します。別のソルバーに渡せば転移学習になります。
    pub fn into_approximators(self) -> Vec<M> {
        self.approximators
    }

    pub fn conditions(&self) -> &[Arc<dyn Condition<B>>] {
        &self.conditions
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }
}

impl<B, M, O> SolverBuilder<B, M, O>
where
    B: AutodiffBackend,
    M: Approximator<B> + AutodiffModule<B>,
    O: Optimizer<Vec<M>, B>,
{
    /// 未知関数を 1 つ追加します。追加した順が関数の並びです。
    pub fn condition(mut self, condition: impl Condition<B> + 'static) -> Self {
        self.conditions.push(Arc::new(condition));
        self
    }

    pub fn conditions(mut self, conditions: Vec<Arc<dyn Condition<B>>>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    /// 独立変数ごとの範囲。生成器を指定しなければ、ここから既定の生成器を作ります。
    pub fn domain(mut self, bounds: Vec<(f32, f32)>) -> Self {
        self.domain = Some(bounds);
        self
    }

    pub fn train_generator(mut self, generator: impl Generator + 'static) -> Self {
        self.train_generator = Some(Box::new(generator));
        self
    }

    pub fn valid_generator(mut self, generator: impl Generator + 'static) -> Self {
        self.valid_generator = Some(Box::new(generator));
        self
    }

    /// 補助指標を登録します。学習・検証の両方で記録されます。
    pub fn metric(
        mut self,
        name: impl Into<String>,
        metric: impl Fn(&[Jet<B>], &[Jet<B>]) -> Result<Tensor<B, 1>, Error> + 'static,
    ) -> Self {
        self.metrics.push((name.into(), Box::new(metric)));
        self
    }

    pub fn config(mut self, config: SolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self, device: &B::Device) -> Result<Solver<B, M, O>, Error> {
        let config = self.config;
        if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
            return Err(Error::config(format!(
                "学習率 {} は正の有限値でなければなりません",
                config.learning_rate
            )));
        }
        if config.diff_order == 0 {
            return Err(Error::config("微分の階数は 1 以上でなければなりません"));
        }

        let default_generator = |noisy: bool, seed: u64| match &self.domain {
            Some(bounds) => domain_generator(bounds, config.points_per_dim, noisy, seed),
            None => Err(Error::config(
                "生成器を指定しない場合は領域の境界 (domain) が必要です",
            )),
        };
        let train_generator = match self.train_generator {
            Some(generator) => generator,
            None => default_generator(true, config.seed)?,
        };
        let mut valid_generator = match self.valid_generator {
            Some(generator) => generator,
            None => default_generator(false, config.seed.wrapping_add(1))?,
        };
        let n_vars = train_generator.dim();
        if valid_generator.dim() != n_vars {
            return Err(Error::config(format!(
                "学習用 ({n_vars} 次元) と検証用 ({} 次元) の生成器の次元が異なります",
                valid_generator.dim()
            )));
        }
        if let Some(bounds) = &self.domain {
            if bounds.len() != n_vars {
                return Err(Error::config(format!(
                    "領域は {} 次元ですが、生成器は {n_vars} 次元です",
                    bounds.len()
                )));
            }
        }
        check_approximators(&self.approximators, &self.conditions, n_vars)?;

        // 方程式の数を確定させるため、検証用の点で 1 度評価する
        let probe: Vec<M> = self
            .approximators
            .iter()
            .map(|net| net.clone().no_grad())
            .collect();
        let batch = valid_generator.generate();
        let coords = seed_coordinates::<B>(&batch, config.diff_order, device);
        let functions = evaluate_functions(&probe, &self.conditions, &coords);
        let n_equations = (self.equations)(&functions, &coords)?.len();
        if n_equations == 0 {
            return Err(Error::config("方程式が残差を 1 つも返しませんでした"));
        }

        Ok(Solver {
            equations: self.equations,
            approximators: self.approximators,
            conditions: self.conditions,
            optimizer: self.optimizer,
            train_generator,
            valid_generator,
            metrics: self.metrics,
            config,
            device: device.clone(),
            n_vars,
            n_equations,
            epoch: 0,
            history: History::default(),
            best: None,
        })
    }
}
