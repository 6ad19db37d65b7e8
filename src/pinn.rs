//! 方程式の残差の評価と損失の集約。

use std::sync::Arc;

use burn::nn::loss::{MseLoss, Reduction};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;
use crate::error::Error;
use crate::generator::PointBatch;
use crate::jet::Jet;
use crate::model::Approximator;

/// 残差 1 本をスカラーの損失にまとめる方法。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    /// 残差の二乗平均。
    #[default]
    MeanSquared,
    /// 残差の絶対値の平均。
    MeanAbsolute,
}

impl Criterion {
    pub fn reduce<B: Backend>(&self, residual: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            Self::MeanSquared => {
                let target = residual.zeros_like();
                MseLoss::new().forward(residual, target, Reduction::Mean)
            }
            Self::MeanAbsolute => residual.abs().mean(),
        }
    }
}

/// 点のバッチから、`order` 階までの微分履歴を持つ座標ジェットを作ります。
pub fn seed_coordinates<B: Backend>(
    batch: &PointBatch,
    order: usize,
    device: &B::Device,
) -> Vec<Jet<B>> {
    let n_vars = batch.dim();
    batch
        .to_tensors::<B>(device)
        .into_iter()
        .enumerate()
        .map(|(var, column)| Jet::variable(column, var, n_vars, order))
        .collect()
}

/// 近似器 1 つを全関数で共有するかどうか。
fn is_shared<B: Backend, M>(nets: &[M], conditions: &[Arc<dyn Condition<B>>]) -> bool {
    nets.len() == 1 && conditions.len() > 1
}

/// 近似器の数と入出力の幅が条件と合っているかを検査します。
///
/// 近似器は関数ごとに 1 つ（出力幅 1）か、全関数で共有する 1 つ
/// （出力幅 = 関数の数、各列が 1 関数）のどちらかです。
pub fn check_approximators<B: Backend, M: Approximator<B>>(
    nets: &[M],
    conditions: &[Arc<dyn Condition<B>>],
    n_vars: usize,
) -> Result<(), Error> {
    if conditions.is_empty() {
        return Err(Error::config("未知関数が 1 つもありません"));
    }
    if nets.is_empty() {
        return Err(Error::config("近似器が 1 つもありません"));
    }
    for (i, condition) in conditions.iter().enumerate() {
        if condition.required_vars() > n_vars {
            return Err(Error::config(format!(
                "関数 {i} の条件は {} 個の独立変数を必要としますが、領域は {n_vars} 次元です",
                condition.required_vars()
            )));
        }
    }

    if is_shared(nets, conditions) {
        let net = &nets[0];
        if net.n_outputs() != conditions.len() {
            return Err(Error::config(format!(
                "{} 個の関数に対して近似器が 1 つしかありません（共有するには出力幅が {} 必要ですが {} です）",
                conditions.len(),
                conditions.len(),
                net.n_outputs()
            )));
        }
        if conditions.iter().any(|c| c.input_width(n_vars) != n_vars) {
            return Err(Error::config(
                "入力を変換する条件（周期条件など）は近似器の共有と併用できません",
            ));
        }
        if net.n_inputs() != n_vars {
            return Err(Error::config(format!(
                "近似器の入力幅 {} が独立変数の数 {n_vars} と一致しません",
                net.n_inputs()
            )));
        }
        return Ok(());
    }

    if nets.len() != conditions.len() {
        return Err(Error::config(format!(
            "近似器の数 {} が未知関数の数 {} と一致しません",
            nets.len(),
            conditions.len()
        )));
    }
    for (i, (net, condition)) in nets.iter().zip(conditions).enumerate() {
        if net.n_outputs() != 1 {
            return Err(Error::config(format!(
                "関数 {i} の近似器の出力幅は 1 でなければなりません（{}）",
                net.n_outputs()
            )));
        }
        let width = condition.input_width(n_vars);
        if net.n_inputs() != width {
            return Err(Error::config(format!(
                "関数 {i} の近似器の入力幅 {} が条件の要求する {width} と一致しません",
                net.n_inputs()
            )));
        }
    }
    Ok(())
}

/// 各未知関数を条件付きで評価します。
///
/// 事前に [`check_approximators`] を通した組み合わせに対して呼び出してください。
pub fn evaluate_functions<B: Backend, M: Approximator<B>>(
    nets: &[M],
    conditions: &[Arc<dyn Condition<B>>],
    coords: &[Jet<B>],
) -> Vec<Jet<B>> {
    if is_shared(nets, conditions) {
        let raw = nets[0].evaluate(Jet::cat(coords.to_vec(), 1));
        return conditions
            .iter()
            .enumerate()
            .map(|(j, condition)| condition.enforce(raw.clone().column(j), coords))
            .collect();
    }
    nets.iter()
        .zip(conditions)
        .map(|(net, condition)| {
            let input = Jet::cat(condition.input_features(coords), 1);
            condition.enforce(net.evaluate(input), coords)
        })
        .collect()
}

/// 方程式ごとの残差を損失にまとめ、和を返します。
pub fn residual_loss<B: Backend>(
    residuals: Vec<Jet<B>>,
    criterion: Criterion,
) -> Result<Tensor<B, 1>, Error> {
    let mut losses = residuals.into_iter().map(|r| criterion.reduce(r.value()));
    let first = losses
        .next()
        .ok_or_else(|| Error::config("方程式が残差を 1 つも返しませんでした"))?;
    Ok(losses.fold(first, |acc, loss| acc + loss))
}

/// 1 要素のテンソルを `f32` として取り出します。
pub fn scalar<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> f32 {
    tensor.into_scalar().elem::<f32>()
}

/// `[n, 1]` のテンソルを `Vec<f32>` にします。
pub fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<f32>, Error> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::InvalidInput(format!("{e:?}")))
}
