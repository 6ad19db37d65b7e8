//! # コロケーション点の生成
//!
//! 残差を評価する点のバッチを作る生成器と、その合成（連結・直積）を提供します。
//! 各生成器は自分専用のシード付き乱数源を持つため、生成器どうしで乱数状態を
//! 共有することはありません。
//!
//! ```
//! use pinn_solve::generator::{Generator, Generator1D, Sampling};
//!
//! let t = Generator1D::new(16, 0.0, 1.0, Sampling::EquallySpaced).unwrap();
//! let x = Generator1D::new(8, -1.0, 1.0, Sampling::Uniform).unwrap().with_seed(7);
//! let mut tx = t.cross(x);
//! let batch = tx.generate();
//! assert_eq!(batch.dim(), 2);
//! assert_eq!(batch.len(), 128);
//! ```

use std::f32::consts::PI;

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::Error;

/// 点のバッチ。独立変数ごとに 1 列を持ち、全列の長さは等しい。
#[derive(Debug, Clone, PartialEq)]
pub struct PointBatch {
    columns: Vec<Vec<f32>>,
}

impl PointBatch {
    /// 列ベクトルからバッチを作ります。列の長さが揃っていなければエラーです。
    pub fn from_columns(columns: Vec<Vec<f32>>) -> Result<Self, Error> {
        let Some(first) = columns.first() else {
            return Err(Error::config("点のバッチには少なくとも 1 つの変数が必要です"));
        };
        let len = first.len();
        if let Some(bad) = columns.iter().position(|c| c.len() != len) {
            return Err(Error::config(format!(
                "列 {bad} の長さ {} が列 0 の長さ {len} と一致しません",
                columns[bad].len()
            )));
        }
        Ok(Self { columns })
    }

    pub fn dim(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `var` 番目の変数の列。
    ///
    /// # Panics
    ///
    /// `var >= self.dim()` のときパニックします。
    pub fn column(&self, var: usize) -> &[f32] {
        &self.columns[var]
    }

    pub fn columns(&self) -> &[Vec<f32>] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Vec<f32>> {
        self.columns
    }

    /// `i` 番目の点の座標。
    ///
    /// # Panics
    ///
    /// `i >= self.len()` のときパニックします。
    pub fn point(&self, i: usize) -> Vec<f32> {
        self.columns.iter().map(|c| c[i]).collect()
    }

    /// 各列を形状 `[len, 1]` のテンソルに変換します。
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> Vec<Tensor<B, 2>> {
        let n = self.len();
        self.columns
            .iter()
            .map(|c| Tensor::<B, 1>::from_floats(c.as_slice(), device).reshape([n, 1]))
            .collect()
    }

    fn append(&mut self, other: PointBatch) {
        for (mine, theirs) in self.columns.iter_mut().zip(other.columns) {
            mine.extend(theirs);
        }
    }

    /// `self` の各点を外側の軸として、`other` の全点と組み合わせます。
    fn cross(&self, other: &PointBatch) -> PointBatch {
        let (n1, n2) = (self.len(), other.len());
        let mut columns = Vec::with_capacity(self.dim() + other.dim());
        for c in &self.columns {
            columns.push(c.iter().flat_map(|&v| std::iter::repeat_n(v, n2)).collect());
        }
        for c in &other.columns {
            let mut repeated = Vec::with_capacity(n1 * n2);
            for _ in 0..n1 {
                repeated.extend_from_slice(c);
            }
            columns.push(repeated);
        }
        PointBatch { columns }
    }

    fn zip(mut self, other: PointBatch) -> PointBatch {
        self.columns.extend(other.columns);
        self
    }

    fn select(&self, indices: &[usize]) -> PointBatch {
        let columns = self
            .columns
            .iter()
            .map(|c| indices.iter().map(|&i| c[i]).collect())
            .collect();
        PointBatch { columns }
    }
}

/// 点のバッチを生成するもの。
///
/// `generate` が返す点の数は常に `size()` と等しく、値だけが呼び出しごとに
/// 変わりえます。
pub trait Generator {
    /// 独立変数の数。
    fn dim(&self) -> usize;

    /// 1 回の生成で返す点の数。
    fn size(&self) -> usize;

    fn generate(&mut self) -> PointBatch;

    /// 2 つの生成器の出力をサンプル軸方向に連結します（次元が等しい場合のみ）。
    fn concat<G: Generator>(self, other: G) -> Result<Concat<Self, G>, Error>
    where
        Self: Sized,
    {
        Concat::new(self, other)
    }

    /// 直積。次元は足し合わされ、点の数は掛け合わされます。
    fn cross<G: Generator>(self, other: G) -> Cross<Self, G>
    where
        Self: Sized,
    {
        Cross { outer: self, inner: other }
    }

    /// 同じ点数の生成器を添字ごとに並べ、次元を足し合わせます。
    fn zip<G: Generator>(self, other: G) -> Result<Zip<Self, G>, Error>
    where
        Self: Sized,
    {
        Zip::new(self, other)
    }

    fn boxed(self) -> Box<dyn Generator>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn generate(&mut self) -> PointBatch {
        (**self).generate()
    }
}

/// 1 次元の点の取り方。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    /// 区間内の一様乱数。
    Uniform,
    /// 両端を含む等間隔の格子。
    EquallySpaced,
    /// 等間隔の格子にガウスノイズを加えたもの。`None` は既定の標準偏差。
    EquallySpacedNoisy { noise_std: Option<f32> },
    /// `10^t` の等比数列。区間の端は 10 の指数として解釈されます。
    LogSpaced,
    LogSpacedNoisy { noise_std: Option<f32> },
    /// 第 1 種チェビシェフ節点。
    Chebyshev1,
    /// 第 2 種チェビシェフ節点（両端を含む）。
    Chebyshev2,
}

fn linspace(start: f32, end: f32, n: usize) -> Vec<f32> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f32;
    (0..n)
        .map(|i| if i == n - 1 { end } else { start + step * i as f32 })
        .collect()
}

fn check_interval(size: usize, min: f32, max: f32) -> Result<(), Error> {
    if size == 0 {
        return Err(Error::config("生成する点の数は 1 以上でなければなりません"));
    }
    if !(min < max) {
        return Err(Error::config(format!(
            "区間の下端 {min} は上端 {max} より小さくなければなりません"
        )));
    }
    Ok(())
}

fn check_noise(noise_std: Option<f32>) -> Result<(), Error> {
    match noise_std {
        Some(std) if !(std >= 0.0) || !std.is_finite() => Err(Error::config(format!(
            "ノイズの標準偏差は 0 以上の有限値でなければなりません: {std}"
        ))),
        _ => Ok(()),
    }
}

fn perturb(values: &[f32], std: f32, rng: &mut StdRng) -> Vec<f32> {
    if std == 0.0 {
        return values.to_vec();
    }
    values
        .iter()
        .map(|&v| {
            let z: f32 = rng.sample(StandardNormal);
            v + std * z
        })
        .collect()
}

/// 1 次元区間上の生成器。
#[derive(Debug, Clone)]
pub struct Generator1D {
    size: usize,
    t_min: f32,
    t_max: f32,
    sampling: Sampling,
    examples: Vec<f32>,
    noise_std: f32,
    rng: StdRng,
}

impl Generator1D {
    pub fn new(size: usize, t_min: f32, t_max: f32, sampling: Sampling) -> Result<Self, Error> {
        check_interval(size, t_min, t_max)?;
        let default_std = (t_max - t_min) / size as f32 / 4.0;
        let (examples, noise_std) = match sampling {
            Sampling::Uniform => (Vec::new(), 0.0),
            Sampling::EquallySpaced => (linspace(t_min, t_max, size), 0.0),
            Sampling::EquallySpacedNoisy { noise_std } => {
                check_noise(noise_std)?;
                (linspace(t_min, t_max, size), noise_std.unwrap_or(default_std))
            }
            Sampling::LogSpaced => (log_space(t_min, t_max, size), 0.0),
            Sampling::LogSpacedNoisy { noise_std } => {
                check_noise(noise_std)?;
                (log_space(t_min, t_max, size), noise_std.unwrap_or(default_std))
            }
            Sampling::Chebyshev1 => (chebyshev_first(t_min, t_max, size), 0.0),
            Sampling::Chebyshev2 => (chebyshev_second(t_min, t_max, size), 0.0),
        };
        Ok(Self {
            size,
            t_min,
            t_max,
            sampling,
            examples,
            noise_std,
            rng: StdRng::from_os_rng(),
        })
    }

    /// 乱数源をシードで初期化し直します。
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn sampling(&self) -> Sampling {
        self.sampling
    }

    /// 実際に使われるノイズの標準偏差。
    pub fn noise_std(&self) -> f32 {
        self.noise_std
    }
}

fn log_space(exp_min: f32, exp_max: f32, n: usize) -> Vec<f32> {
    linspace(exp_min, exp_max, n)
        .into_iter()
        .map(|e| 10f32.powf(e))
        .collect()
}

fn chebyshev_first(min: f32, max: f32, n: usize) -> Vec<f32> {
    let (mid, half) = ((min + max) / 2.0, (max - min) / 2.0);
    (0..n)
        .map(|k| mid - half * ((2 * k + 1) as f32 * PI / (2 * n) as f32).cos())
        .collect()
}

fn chebyshev_second(min: f32, max: f32, n: usize) -> Vec<f32> {
    if n == 1 {
        return vec![(min + max) / 2.0];
    }
    let (mid, half) = ((min + max) / 2.0, (max - min) / 2.0);
    (0..n)
        .map(|k| match k {
            0 => min,
            k if k == n - 1 => max,
            k => mid - half * (k as f32 * PI / (n - 1) as f32).cos(),
        })
        .collect()
}

impl Generator for Generator1D {
    fn dim(&self) -> usize {
        1
    }

    fn size(&self) -> usize {
        self.size
    }

    fn generate(&mut self) -> PointBatch {
        let column = match self.sampling {
            Sampling::Uniform => {
                let span = self.t_max - self.t_min;
                (0..self.size)
                    .map(|_| self.t_min + span * self.rng.random::<f32>())
                    .collect()
            }
            _ => perturb(&self.examples, self.noise_std, &mut self.rng),
        };
        PointBatch {
            columns: vec![column],
        }
    }
}

/// 長方形領域上の格子生成器。x が外側、y が内側の軸です。
#[derive(Debug, Clone)]
pub struct Generator2D {
    grid: (usize, usize),
    min: (f32, f32),
    max: (f32, f32),
    sampling: Sampling,
    examples: Option<PointBatch>,
    noise_std: (f32, f32),
    rng: StdRng,
}

impl Generator2D {
    /// `Uniform`、`EquallySpaced`、`EquallySpacedNoisy` に対応します。
    /// ノイズの標準偏差は両軸に同じ値が使われ、`None` なら軸ごとに
    /// `幅 / 点数 / 4` です。
    pub fn new(
        grid: (usize, usize),
        min: (f32, f32),
        max: (f32, f32),
        sampling: Sampling,
    ) -> Result<Self, Error> {
        let (nx, ny) = grid;
        check_interval(nx, min.0, max.0)?;
        check_interval(ny, min.1, max.1)?;
        let default_std = (
            (max.0 - min.0) / nx as f32 / 4.0,
            (max.1 - min.1) / ny as f32 / 4.0,
        );
        let mesh = || {
            let xs = PointBatch {
                columns: vec![linspace(min.0, max.0, nx)],
            };
            let ys = PointBatch {
                columns: vec![linspace(min.1, max.1, ny)],
            };
            xs.cross(&ys)
        };
        let (examples, noise_std) = match sampling {
            Sampling::Uniform => (None, (0.0, 0.0)),
            Sampling::EquallySpaced => (Some(mesh()), (0.0, 0.0)),
            Sampling::EquallySpacedNoisy { noise_std } => {
                check_noise(noise_std)?;
                let std = noise_std.map_or(default_std, |s| (s, s));
                (Some(mesh()), std)
            }
            other => {
                return Err(Error::config(format!(
                    "2 次元の生成器は {other:?} に対応していません"
                )));
            }
        };
        Ok(Self {
            grid,
            min,
            max,
            sampling,
            examples,
            noise_std,
            rng: StdRng::from_os_rng(),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl Generator for Generator2D {
    fn dim(&self) -> usize {
        2
    }

    fn size(&self) -> usize {
        self.grid.0 * self.grid.1
    }

    fn generate(&mut self) -> PointBatch {
        match &self.examples {
            Some(mesh) => PointBatch {
                columns: vec![
                    perturb(mesh.column(0), self.noise_std.0, &mut self.rng),
                    perturb(mesh.column(1), self.noise_std.1, &mut self.rng),
                ],
            },
            None => {
                debug_assert_eq!(self.sampling, Sampling::Uniform);
                let n = self.size();
                let mut axis = |lo: f32, hi: f32| -> Vec<f32> {
                    (0..n)
                        .map(|_| lo + (hi - lo) * self.rng.random::<f32>())
                        .collect()
                };
                let xs = axis(self.min.0, self.max.0);
                let ys = axis(self.min.1, self.max.1);
                PointBatch {
                    columns: vec![xs, ys],
                }
            }
        }
    }
}

/// 連結 (`+`)。
#[derive(Debug, Clone)]
pub struct Concat<A, B> {
    first: A,
    second: B,
}

impl<A: Generator, B: Generator> Concat<A, B> {
    pub fn new(first: A, second: B) -> Result<Self, Error> {
        if first.dim() != second.dim() {
            return Err(Error::config(format!(
                "次元の異なる生成器は連結できません ({} と {})",
                first.dim(),
                second.dim()
            )));
        }
        Ok(Self { first, second })
    }
}

impl<A: Generator, B: Generator> Generator for Concat<A, B> {
    fn dim(&self) -> usize {
        self.first.dim()
    }

    fn size(&self) -> usize {
        self.first.size() + self.second.size()
    }

    fn generate(&mut self) -> PointBatch {
        let mut batch = self.first.generate();
        batch.append(self.second.generate());
        batch
    }
}

/// 直積 (`*`)。
#[derive(Debug, Clone)]
pub struct Cross<A, B> {
    outer: A,
    inner: B,
}

impl<A: Generator, B: Generator> Generator for Cross<A, B> {
    fn dim(&self) -> usize {
        self.outer.dim() + self.inner.dim()
    }

    fn size(&self) -> usize {
        self.outer.size() * self.inner.size()
    }

    fn generate(&mut self) -> PointBatch {
        let outer = self.outer.generate();
        outer.cross(&self.inner.generate())
    }
}

#[derive(Debug, Clone)]
pub struct Zip<A, B> {
    left: A,
    right: B,
}

impl<A: Generator, B: Generator> Zip<A, B> {
    pub fn new(left: A, right: B) -> Result<Self, Error> {
        if left.size() != right.size() {
            return Err(Error::config(format!(
                "点数の異なる生成器は並べられません ({} と {})",
                left.size(),
                right.size()
            )));
        }
        Ok(Self { left, right })
    }
}

impl<A: Generator, B: Generator> Generator for Zip<A, B> {
    fn dim(&self) -> usize {
        self.left.dim() + self.right.dim()
    }

    fn size(&self) -> usize {
        self.left.size()
    }

    fn generate(&mut self) -> PointBatch {
        self.left.generate().zip(self.right.generate())
    }
}

/// 最初に生成したバッチを覚えておき、以後はそれを返し続けます。
#[derive(Debug, Clone)]
pub struct Static<G> {
    inner: G,
    cached: Option<PointBatch>,
}

impl<G: Generator> Static<G> {
    pub fn new(inner: G) -> Self {
        Self { inner, cached: None }
    }
}

impl<G: Generator> Generator for Static<G> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn generate(&mut self) -> PointBatch {
        self.cached
            .get_or_insert_with(|| self.inner.generate())
            .clone()
    }
}

/// 利用者が与えた固定の点。
#[derive(Debug, Clone)]
pub struct Predefined {
    batch: PointBatch,
}

impl Predefined {
    pub fn new(columns: Vec<Vec<f32>>) -> Result<Self, Error> {
        let batch = PointBatch::from_columns(columns)?;
        if batch.is_empty() {
            return Err(Error::config("固定点の集合が空です"));
        }
        Ok(Self { batch })
    }
}

impl Generator for Predefined {
    fn dim(&self) -> usize {
        self.batch.dim()
    }

    fn size(&self) -> usize {
        self.batch.len()
    }

    fn generate(&mut self) -> PointBatch {
        self.batch.clone()
    }
}

/// 1 つの座標に施す変換。
pub type CoordinateMap = Box<dyn Fn(f32) -> f32>;

/// 座標ごとの変換を施す生成器。
pub struct Transform<G> {
    inner: G,
    maps: Vec<CoordinateMap>,
}

impl<G: Generator> Transform<G> {
    /// `maps` は変数ごとに 1 つ必要です。
    pub fn new(inner: G, maps: Vec<CoordinateMap>) -> Result<Self, Error> {
        if maps.len() != inner.dim() {
            return Err(Error::config(format!(
                "変換の数 {} が生成器の次元 {} と一致しません",
                maps.len(),
                inner.dim()
            )));
        }
        Ok(Self { inner, maps })
    }
}

impl<G: Generator> Generator for Transform<G> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn generate(&mut self) -> PointBatch {
        let columns = self
            .inner
            .generate()
            .into_columns()
            .into_iter()
            .zip(&self.maps)
            .map(|(column, f)| column.into_iter().map(f).collect())
            .collect();
        PointBatch { columns }
    }
}

/// 別の生成器の出力から `size` 点を復元抽出します。
#[derive(Debug, Clone)]
pub struct Resample<G> {
    inner: G,
    size: usize,
    rng: StdRng,
}

impl<G: Generator> Resample<G> {
    pub fn new(inner: G, size: usize) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::config("抽出する点の数は 1 以上でなければなりません"));
        }
        Ok(Self {
            inner,
            size,
            rng: StdRng::from_os_rng(),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl<G: Generator> Generator for Resample<G> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn generate(&mut self) -> PointBatch {
        let pool = self.inner.generate();
        let indices: Vec<usize> = (0..self.size)
            .map(|_| self.rng.random_range(0..pool.len()))
            .collect();
        pool.select(&indices)
    }
}

/// 領域の境界から既定の生成器を作ります。
///
/// 学習用はノイズ付き等間隔格子、検証用はノイズなしの等間隔格子です。
/// 3 変数以上では 1 次元生成器の直積になります。
pub fn domain_generator(
    bounds: &[(f32, f32)],
    points_per_dim: usize,
    noisy: bool,
    seed: u64,
) -> Result<Box<dyn Generator>, Error> {
    let sampling = if noisy {
        Sampling::EquallySpacedNoisy { noise_std: None }
    } else {
        Sampling::EquallySpaced
    };
    match bounds {
        [] => Err(Error::config("領域の境界が指定されていません")),
        [(lo, hi)] => Ok(Generator1D::new(points_per_dim, *lo, *hi, sampling)?
            .with_seed(seed)
            .boxed()),
        [x, y] => Ok(Generator2D::new(
            (points_per_dim, points_per_dim),
            (x.0, y.0),
            (x.1, y.1),
            sampling,
        )?
        .with_seed(seed)
        .boxed()),
        [first, rest @ ..] => {
            let mut product =
                Generator1D::new(points_per_dim, first.0, first.1, sampling)?
                    .with_seed(seed)
                    .boxed();
            for (i, (lo, hi)) in rest.iter().enumerate() {
                let axis = Generator1D::new(points_per_dim, *lo, *hi, sampling)?
                    .with_seed(seed.wrapping_add(i as u64 + 1));
                product = product.cross(axis).boxed();
            }
            Ok(product)
        }
    }
}
