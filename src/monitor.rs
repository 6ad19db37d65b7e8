//! # 学習のモニター
//!
//! 損失の推移と 1 次元の解の形を PNG に描くコールバック。描画は `plotters` が行います。

use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use plotters::prelude::*;

use crate::callbacks::{Action, Callback, TrainingState};
use crate::error::{BoxError, Phase};
use crate::model::Approximator;
use crate::solver::History;

const PALETTE: [RGBColor; 6] = [RED, BLUE, GREEN, MAGENTA, CYAN, BLACK];

/// 学習・検証損失の推移を対数目盛りで PNG に描きます。
pub fn plot_loss_history(history: &History, path: &Path) -> Result<(), Box<dyn StdError>> {
    let train = history.loss(Phase::Train);
    let valid = history.loss(Phase::Valid);
    let logs: Vec<f32> = train
        .iter()
        .chain(valid)
        .filter(|v| v.is_finite() && **v > 0.0)
        .map(|v| v.log10())
        .collect();
    if logs.is_empty() {
        return Ok(());
    }
    let max_log_loss = logs.iter().copied().fold(f32::MIN, f32::max) + 0.1;
    let min_log_loss = logs.iter().copied().fold(f32::MAX, f32::min) - 0.5;

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(1..train.len().max(2), min_log_loss..max_log_loss)?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Epochs")
        .draw()?;
    for (label, losses, color) in [("Train Loss", train, RED), ("Valid Loss", valid, BLUE)] {
        chart
            .draw_series(LineSeries::new(
                losses
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite() && **v > 0.0)
                    .map(|(i, v)| (i + 1, v.log10())),
                &color,
            ))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// 横軸を共有する複数の曲線を PNG に描きます。
pub fn plot_curves(
    path: &Path,
    caption: &str,
    xs: &[f32],
    curves: &[(String, Vec<f32>)],
) -> Result<(), Box<dyn StdError>> {
    let (Some(&x_min), Some(&x_max)) = (xs.first(), xs.last()) else {
        return Ok(());
    };
    let values = curves.iter().flat_map(|(_, ys)| ys).copied();
    let (y_min, y_max) = values.fold((f32::MAX, f32::MIN), |(lo, hi), y| (lo.min(y), hi.max(y)));
    if !(y_min.is_finite() && y_max.is_finite() && y_min <= y_max) {
        return Ok(());
    }
    let margin = ((y_max - y_min) * 0.1).max(1e-3);

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, (y_min - margin)..(y_max + margin))?;
    chart.configure_mesh().draw()?;
    for ((label, ys), color) in curves.iter().zip(PALETTE.iter().cycle()) {
        let color = *color;
        chart
            .draw_series(LineSeries::new(
                xs.iter().copied().zip(ys.iter().copied()),
                &color,
            ))?
            .label(label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// 損失の推移を定期的に描き直すコールバック。
#[derive(Debug, Clone)]
pub struct LossPlotter {
    path: PathBuf,
    every: usize,
}

impl LossPlotter {
    pub fn new(path: impl Into<PathBuf>, every: usize) -> Self {
        Self {
            path: path.into(),
            every,
        }
    }
}

impl<B: Backend, M: Approximator<B>> Callback<B, M> for LossPlotter {
    fn every(&self) -> usize {
        self.every
    }

    fn on_epoch(&mut self, state: &TrainingState<'_, B, M>) -> Result<Option<Action>, BoxError> {
        plot_loss_history(state.history(), &self.path).map_err(|e| e.to_string())?;
        Ok(None)
    }
}

/// 1 変数の問題で、現在の解（と与えられれば厳密解）を描くコールバック。
pub struct Monitor1D {
    path: PathBuf,
    every: usize,
    ts: Vec<f32>,
    reference: Option<Box<dyn Fn(f32) -> f32>>,
}

impl Monitor1D {
    /// `[t_min, t_max]` を `n_points` 点で描きます。
    pub fn new(path: impl Into<PathBuf>, every: usize, t_min: f32, t_max: f32, n_points: usize) -> Self {
        let n = n_points.max(2);
        let ts = (0..n)
            .map(|i| t_min + (t_max - t_min) * i as f32 / (n - 1) as f32)
            .collect();
        Self {
            path: path.into(),
            every,
            ts,
            reference: None,
        }
    }

    /// 比較用の厳密解を重ねて描きます。
    pub fn with_reference(mut self, reference: impl Fn(f32) -> f32 + 'static) -> Self {
        self.reference = Some(Box::new(reference));
        self
    }
}

impl<B: Backend, M: Approximator<B>> Callback<B, M> for Monitor1D {
    fn every(&self) -> usize {
        self.every
    }

    fn on_epoch(&mut self, state: &TrainingState<'_, B, M>) -> Result<Option<Action>, BoxError> {
        let values = state.solution().evaluate_vec(&[self.ts.clone()])?;
        let mut curves: Vec<(String, Vec<f32>)> = values
            .into_iter()
            .enumerate()
            .map(|(i, ys)| (format!("u{i}"), ys))
            .collect();
        if let Some(reference) = &self.reference {
            curves.push(("exact".to_string(), self.ts.iter().map(|&t| reference(t)).collect()));
        }
        let caption = format!("Epoch {}", state.epoch());
        plot_curves(&self.path, &caption, &self.ts, &curves).map_err(|e| e.to_string())?;
        Ok(None)
    }
}
