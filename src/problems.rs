//! CLI から選べる問題。どれも厳密解が分かっているので、学習結果の誤差を測れます。

use std::f32::consts::PI;
use std::sync::Arc;

use burn::tensor::backend::Backend;
use clap::ValueEnum;

use crate::conditions::{Condition, DirichletBvp2d, Ibvp1d, Ivp};
use crate::diff::{diff, laplacian};
use crate::error::Error;
use crate::jet::Jet;
use crate::model::FcnnConfig;
use crate::solver::{Equations, SolverConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Problem {
    /// u' = u, u(0) = 1  (t ∈ [0, 1])
    Exponential,
    /// u'' + u = 0, u(0) = 0, u'(0) = 1  (t ∈ [0, 2π])
    Oscillator,
    /// u_t + u_x = 0, u(0, x) = sin(πx), x ∈ [-1, 1] で周期境界
    Advection,
    /// u_xx + u_yy = 0 on [0, 1]², y = 0 で sin(πx)、他の辺で 0
    Laplace,
}

fn exponential<B: Backend>(u: &[Jet<B>], x: &[Jet<B>]) -> Result<Vec<Jet<B>>, Error> {
    Ok(vec![diff(&u[0], &x[0], 1)? - u[0].clone()])
}

fn oscillator<B: Backend>(u: &[Jet<B>], x: &[Jet<B>]) -> Result<Vec<Jet<B>>, Error> {
    Ok(vec![diff(&u[0], &x[0], 2)? + u[0].clone()])
}

fn advection<B: Backend>(u: &[Jet<B>], x: &[Jet<B>]) -> Result<Vec<Jet<B>>, Error> {
    Ok(vec![diff(&u[0], &x[0], 1)? + diff(&u[0], &x[1], 1)?])
}

fn laplace<B: Backend>(u: &[Jet<B>], x: &[Jet<B>]) -> Result<Vec<Jet<B>>, Error> {
    Ok(vec![laplacian(&u[0], x)?])
}

fn zero<B: Backend>(s: &Jet<B>) -> Jet<B> {
    s.clone() * 0.0
}

fn sin_pi<B: Backend>(s: &Jet<B>) -> Jet<B> {
    (s.clone() * PI).sin()
}

impl Problem {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exponential => "exponential",
            Self::Oscillator => "oscillator",
            Self::Advection => "advection",
            Self::Laplace => "laplace",
        }
    }

    /// 独立変数ごとの範囲。
    pub fn domain(&self) -> Vec<(f32, f32)> {
        match self {
            Self::Exponential => vec![(0.0, 1.0)],
            Self::Oscillator => vec![(0.0, 2.0 * PI)],
            Self::Advection => vec![(0.0, 1.0), (-1.0, 1.0)],
            Self::Laplace => vec![(0.0, 1.0), (0.0, 1.0)],
        }
    }

    pub fn n_vars(&self) -> usize {
        self.domain().len()
    }

    /// 既定のネットワーク構成。周期条件のある問題は入力が 1 つ増えます。
    pub fn network(&self) -> FcnnConfig {
        match self {
            Self::Advection => FcnnConfig::new(3, 1),
            _ => FcnnConfig::new(self.n_vars(), 1),
        }
    }

    pub fn solver_config(&self) -> SolverConfig {
        match self {
            Self::Exponential => SolverConfig::new().with_diff_order(1).with_points_per_dim(64),
            Self::Oscillator => SolverConfig::new().with_points_per_dim(128),
            Self::Advection => SolverConfig::new().with_diff_order(1).with_points_per_dim(24),
            Self::Laplace => SolverConfig::new().with_points_per_dim(24),
        }
    }

    pub fn default_epochs(&self) -> usize {
        match self {
            Self::Exponential => 1000,
            Self::Oscillator => 3000,
            Self::Advection | Self::Laplace => 2000,
        }
    }

    pub fn conditions<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<Vec<Arc<dyn Condition<B>>>, Error> {
        let condition: Arc<dyn Condition<B>> = match self {
            Self::Exponential => Arc::new(Ivp::new(0.0, 1.0)),
            Self::Oscillator => Arc::new(Ivp::with_derivative(0.0, 0.0, 1.0)),
            Self::Advection => Arc::new(
                Ibvp1d::builder(0.0, (-1.0, 1.0), sin_pi::<B>)
                    .periodic()
                    .build(device)?,
            ),
            Self::Laplace => Arc::new(
                DirichletBvp2d::builder((0.0, 1.0), (0.0, 1.0))
                    .x_min(zero::<B>)
                    .x_max(zero::<B>)
                    .y_min(sin_pi::<B>)
                    .y_max(zero::<B>)
                    .build(device)?,
            ),
        };
        Ok(vec![condition])
    }

    pub fn equations<B: Backend>(&self) -> Equations<B> {
        match self {
            Self::Exponential => Box::new(exponential::<B>),
            Self::Oscillator => Box::new(oscillator::<B>),
            Self::Advection => Box::new(advection::<B>),
            Self::Laplace => Box::new(laplace::<B>),
        }
    }

    /// 厳密解の値。
    pub fn exact(&self, point: &[f32]) -> f32 {
        match self {
            Self::Exponential => point[0].exp(),
            Self::Oscillator => point[0].sin(),
            Self::Advection => (PI * (point[1] - point[0])).sin(),
            Self::Laplace => {
                let (x, y) = (point[0], point[1]);
                (PI * x).sin() * (PI * (1.0 - y)).sinh() / PI.sinh()
            }
        }
    }

    /// 変数ごとに `n` 点の等間隔格子（列ごと）。
    pub fn grid(&self, n: usize) -> Vec<Vec<f32>> {
        let n = n.max(2);
        let axes: Vec<Vec<f32>> = self
            .domain()
            .into_iter()
            .map(|(lo, hi)| (0..n).map(|i| lo + (hi - lo) * i as f32 / (n - 1) as f32).collect())
            .collect();
        let mut columns: Vec<Vec<f32>> = vec![Vec::new(); axes.len()];
        let total = n.pow(axes.len() as u32);
        for k in 0..total {
            let mut rest = k;
            for (var, axis) in axes.iter().enumerate().rev() {
                columns[var].push(axis[rest % n]);
                rest /= n;
            }
        }
        columns
    }

    /// 格子 `grid`（列ごと）での予測値 `predicted` と厳密解との最大誤差。
    pub fn max_error(&self, grid: &[Vec<f32>], predicted: &[f32]) -> f32 {
        let mut point = vec![0.0; grid.len()];
        predicted
            .iter()
            .enumerate()
            .map(|(i, &u)| {
                for (var, column) in grid.iter().enumerate() {
                    point[var] = column[i];
                }
                (u - self.exact(&point)).abs()
            })
            .fold(0.0, f32::max)
    }

    /// 保存するモデルのファイル名。
    pub fn model_file(&self) -> String {
        format!("{}_model.mpk", self.name())
    }
}
