//! # 初期条件・境界条件
//!
//! ネットワークの生の出力 `N` を、条件を恒等的に満たす関数に変換します。
//! 変換はどれも `u = A + D·N` の形をしていて、`D` は条件を課す場所でちょうど 0 に、
//! `A` は課す値に一致するため、パラメータがどんな値でも条件は厳密に成り立ちます。

use std::f32::consts::PI;
use std::sync::Arc;

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

use crate::error::Error;
use crate::jet::Jet;

/// 境界上の値を座標 1 つの関数として与えるもの。
pub type BoundaryFn<B> = Arc<dyn Fn(&Jet<B>) -> Jet<B>>;

/// 未知関数 1 つに課す条件。
pub trait Condition<B: Backend> {
    /// 生の出力 `raw` を条件を満たす値に変換します。
    fn enforce(&self, raw: Jet<B>, coords: &[Jet<B>]) -> Jet<B>;

    /// ネットワークに入力する特徴量。既定では座標そのもの。
    fn input_features(&self, coords: &[Jet<B>]) -> Vec<Jet<B>> {
        coords.to_vec()
    }

    /// `n_vars` 個の座標に対する入力特徴量の数。
    fn input_width(&self, n_vars: usize) -> usize {
        n_vars
    }

    /// この条件が参照する座標の数。
    fn required_vars(&self) -> usize;
}

/// 1 - e^{-(t - t0)}
fn ramp<B: Backend>(t: &Jet<B>, t0: f32) -> Jet<B> {
    1.0 - (-(t.clone() - t0)).exp()
}

fn check_range(name: &str, (lo, hi): (f32, f32)) -> Result<(), Error> {
    if lo < hi {
        Ok(())
    } else {
        Err(Error::config(format!(
            "{name} の範囲 ({lo}, {hi}) は下端が上端より小さくなければなりません"
        )))
    }
}

fn scalar_at<B: Backend>(f: &BoundaryFn<B>, at: f32, device: &B::Device) -> f32 {
    let point = Tensor::<B, 1>::from_floats([at], device).reshape([1, 1]);
    f(&Jet::constant(point)).value().into_scalar().elem::<f32>()
}

/// 境界値の食い違いとして許す相対誤差。f32 の丸め誤差程度に抑えます。
const CONSISTENCY_TOLERANCE: f32 = 1e-6;

fn check_consistent(what: &str, a: f32, b: f32) -> Result<(), Error> {
    let scale = 1f32.max(a.abs()).max(b.abs());
    if (a - b).abs() <= CONSISTENCY_TOLERANCE * scale {
        Ok(())
    } else {
        Err(Error::config(format!(
            "{what} で境界値が一致しません ({a} と {b})。この組み合わせでは条件を厳密に課せません"
        )))
    }
}

/// 座標 `var` を `(cos 2πx̃, sin 2πx̃)` に置き換えた特徴量。
fn periodic_features<B: Backend>(
    coords: &[Jet<B>],
    var: usize,
    (min, max): (f32, f32),
) -> Vec<Jet<B>> {
    let mut features = Vec::with_capacity(coords.len() + 1);
    for (i, c) in coords.iter().enumerate() {
        if i == var {
            let phase = (c.clone() - min) * (2.0 * PI / (max - min));
            features.push(phase.clone().cos());
            features.push(phase.sin());
        } else {
            features.push(c.clone());
        }
    }
    features
}

/// 条件なし。ネットワークの出力をそのまま使います。
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCondition;

impl<B: Backend> Condition<B> for NoCondition {
    fn enforce(&self, raw: Jet<B>, _coords: &[Jet<B>]) -> Jet<B> {
        raw
    }

    fn required_vars(&self) -> usize {
        0
    }
}

/// 常微分方程式の初期条件 `u(t0) = u0`（と任意で `u'(t0) = u0'`）。
#[derive(Debug, Clone, Copy)]
pub struct Ivp {
    var: usize,
    t0: f32,
    u0: f32,
    u0_prime: Option<f32>,
}

impl Ivp {
    pub fn new(t0: f32, u0: f32) -> Self {
        Self {
            var: 0,
            t0,
            u0,
            u0_prime: None,
        }
    }

    /// 初期値に加えて初期の傾きも固定します。
    pub fn with_derivative(t0: f32, u0: f32, u0_prime: f32) -> Self {
        Self {
            u0_prime: Some(u0_prime),
            ..Self::new(t0, u0)
        }
    }

    /// 時間として扱う座標の添字（既定は 0）。
    pub fn on_variable(mut self, var: usize) -> Self {
        self.var = var;
        self
    }
}

impl<B: Backend> Condition<B> for Ivp {
    fn enforce(&self, raw: Jet<B>, coords: &[Jet<B>]) -> Jet<B> {
        let t = &coords[self.var];
        match self.u0_prime {
            None => self.u0 + ramp(t, self.t0) * raw,
            Some(slope) => {
                let dt = t.clone() - self.t0;
                self.u0 + dt * slope + ramp(t, self.t0).square() * raw
            }
        }
    }

    fn required_vars(&self) -> usize {
        self.var + 1
    }
}

/// 区間の両端で値を固定する境界条件 `u(t0) = u0`, `u(t1) = u1`。
#[derive(Debug, Clone, Copy)]
pub struct DirichletBvp {
    var: usize,
    t0: f32,
    u0: f32,
    t1: f32,
    u1: f32,
}

impl DirichletBvp {
    pub fn new(t0: f32, u0: f32, t1: f32, u1: f32) -> Result<Self, Error> {
        if t0 == t1 || !t0.is_finite() || !t1.is_finite() {
            return Err(Error::config(format!(
                "境界の位置 {t0} と {t1} は異なる有限値でなければなりません"
            )));
        }
        Ok(Self {
            var: 0,
            t0,
            u0,
            t1,
            u1,
        })
    }

    pub fn on_variable(mut self, var: usize) -> Self {
        self.var = var;
        self
    }
}

impl<B: Backend> Condition<B> for DirichletBvp {
    fn enforce(&self, raw: Jet<B>, coords: &[Jet<B>]) -> Jet<B> {
        let s = (coords[self.var].clone() - self.t0) / (self.t1 - self.t0);
        let left = 1.0 - s.clone();
        let vanishing = 1.0 - (left.clone() * s.clone()).exp();
        left * self.u0 + s * self.u1 + vanishing * raw
    }

    fn required_vars(&self) -> usize {
        self.var + 1
    }
}

enum Edges<B: Backend> {
    X {
        min: BoundaryFn<B>,
        max: BoundaryFn<B>,
    },
    Y {
        min: BoundaryFn<B>,
        max: BoundaryFn<B>,
    },
    All {
        x_min: BoundaryFn<B>,
        x_max: BoundaryFn<B>,
        y_min: BoundaryFn<B>,
        y_max: BoundaryFn<B>,
        /// y 方向の境界値を x の両端で評価した値 `[g0(x_min), g0(x_max), g1(x_min), g1(x_max)]`。
        corners: [f32; 4],
    },
}

/// 長方形領域 `(x, y)` の辺で値を固定する境界条件。
///
/// 対応する組み合わせは x の両辺、y の両辺、4 辺すべてのいずれかです。
pub struct DirichletBvp2d<B: Backend> {
    x_range: (f32, f32),
    y_range: (f32, f32),
    edges: Edges<B>,
}

/// [`DirichletBvp2d`] の組み立て。
pub struct DirichletBvp2dBuilder<B: Backend> {
    x_range: (f32, f32),
    y_range: (f32, f32),
    x_min: Option<BoundaryFn<B>>,
    x_max: Option<BoundaryFn<B>>,
    y_min: Option<BoundaryFn<B>>,
    y_max: Option<BoundaryFn<B>>,
}

impl<B: Backend> DirichletBvp2d<B> {
    pub fn builder(x_range: (f32, f32), y_range: (f32, f32)) -> DirichletBvp2dBuilder<B> {
        DirichletBvp2dBuilder {
            x_range,
            y_range,
            x_min: None,
            x_max: None,
            y_min: None,
            y_max: None,
        }
    }
}

impl<B: Backend> DirichletBvp2dBuilder<B> {
    /// `x = x_min` 上の値 `f(y)`。
    pub fn x_min(mut self, f: impl Fn(&Jet<B>) -> Jet<B> + 'static) -> Self {
        self.x_min = Some(Arc::new(f));
        self
    }

    /// `x = x_max` 上の値 `f(y)`。
    pub fn x_max(mut self, f: impl Fn(&Jet<B>) -> Jet<B> + 'static) -> Self {
        self.x_max = Some(Arc::new(f));
        self
    }

    /// `y = y_min` 上の値 `g(x)`。
    pub fn y_min(mut self, g: impl Fn(&Jet<B>) -> Jet<B> + 'static) -> Self {
        self.y_min = Some(Arc::new(g));
        self
    }

    /// `y = y_max` 上の値 `g(x)`。
    pub fn y_max(mut self, g: impl Fn(&Jet<B>) -> Jet<B> + 'static) -> Self {
        self.y_max = Some(Arc::new(g));
        self
    }

    /// 辺の組み合わせと角での整合性を検査して条件を作ります。
    pub fn build(self, device: &B::Device) -> Result<DirichletBvp2d<B>, Error> {
        check_range("x", self.x_range)?;
        check_range("y", self.y_range)?;
        let (x0, x1) = self.x_range;
        let (y0, y1) = self.y_range;
        let edges = match (self.x_min, self.x_max, self.y_min, self.y_max) {
            (Some(min), Some(max), None, None) => Edges::X { min, max },
            (None, None, Some(min), Some(max)) => Edges::Y { min, max },
            (Some(x_min), Some(x_max), Some(y_min), Some(y_max)) => {
                let corners = [
                    scalar_at(&y_min, x0, device),
                    scalar_at(&y_min, x1, device),
                    scalar_at(&y_max, x0, device),
                    scalar_at(&y_max, x1, device),
                ];
                check_consistent("角 (x_min, y_min)", scalar_at(&x_min, y0, device), corners[0])?;
                check_consistent("角 (x_max, y_min)", scalar_at(&x_max, y0, device), corners[1])?;
                check_consistent("角 (x_min, y_max)", scalar_at(&x_min, y1, device), corners[2])?;
                check_consistent("角 (x_max, y_max)", scalar_at(&x_max, y1, device), corners[3])?;
                Edges::All {
                    x_min,
                    x_max,
                    y_min,
                    y_max,
                    corners,
                }
            }
            (a, b, c, d) => {
                let given: Vec<&str> = [
                    (a.is_some(), "x_min"),
                    (b.is_some(), "x_max"),
                    (c.is_some(), "y_min"),
                    (d.is_some(), "y_max"),
                ]
                .into_iter()
                .filter_map(|(set, name)| set.then_some(name))
                .collect();
                return Err(Error::config(format!(
                    "辺の組み合わせ {given:?} には対応していません（x の両辺、y の両辺、4 辺すべてのいずれか）"
                )));
            }
        };
        Ok(DirichletBvp2d {
            x_range: self.x_range,
            y_range: self.y_range,
            edges,
        })
    }
}

impl<B: Backend> Condition<B> for DirichletBvp2d<B> {
    fn enforce(&self, raw: Jet<B>, coords: &[Jet<B>]) -> Jet<B> {
        let (x, y) = (&coords[0], &coords[1]);
        let (x0, x1) = self.x_range;
        let (y0, y1) = self.y_range;
        let xs = (x.clone() - x0) / (x1 - x0);
        let ys = (y.clone() - y0) / (y1 - y0);
        let bump_x = xs.clone() * (1.0 - xs.clone());
        let bump_y = ys.clone() * (1.0 - ys.clone());
        match &self.edges {
            Edges::X { min, max } => {
                (1.0 - xs.clone()) * min(y) + xs * max(y) + bump_x * raw
            }
            Edges::Y { min, max } => {
                (1.0 - ys.clone()) * min(x) + ys * max(x) + bump_y * raw
            }
            Edges::All {
                x_min,
                x_max,
                y_min,
                y_max,
                corners: [g0_left, g0_right, g1_left, g1_right],
            } => {
                let left = 1.0 - xs.clone();
                let blend = |a: f32, b: f32| left.clone() * a + xs.clone() * b;
                let a = left.clone() * x_min(y)
                    + xs.clone() * x_max(y)
                    + (1.0 - ys.clone()) * (y_min(x) - blend(*g0_left, *g0_right))
                    + ys.clone() * (y_max(x) - blend(*g1_left, *g1_right));
                a + bump_x * bump_y * raw
            }
        }
    }

    fn required_vars(&self) -> usize {
        2
    }
}

enum XBoundary<B: Backend> {
    Free,
    Dirichlet {
        left: BoundaryFn<B>,
        right: BoundaryFn<B>,
        /// 初期分布の両端の値 `[u(t_min, x_min), u(t_min, x_max)]`
        ends: [f32; 2],
    },
    Periodic,
}

/// 座標 `(t, x)` 上の 1 次元初期値境界値問題の条件。
///
/// 初期分布 `u(t_min, x)` に加え、x の境界は「なし」「両端で値を固定」「周期」の
/// いずれかです。
pub struct Ibvp1d<B: Backend> {
    t_min: f32,
    x_range: (f32, f32),
    initial: BoundaryFn<B>,
    boundary: XBoundary<B>,
}

pub struct Ibvp1dBuilder<B: Backend> {
    t_min: f32,
    x_range: (f32, f32),
    initial: BoundaryFn<B>,
    x_min: Option<BoundaryFn<B>>,
    x_max: Option<BoundaryFn<B>>,
    periodic: bool,
}

impl<B: Backend> Ibvp1d<B> {
    /// `initial` は初期分布 `u(t_min, x)`。
    pub fn builder(
        t_min: f32,
        x_range: (f32, f32),
        initial: impl Fn(&Jet<B>) -> Jet<B> + 'static,
    ) -> Ibvp1dBuilder<B> {
        Ibvp1dBuilder {
            t_min,
            x_range,
            initial: Arc::new(initial),
            x_min: None,
            x_max: None,
            periodic: false,
        }
    }
}

impl<B: Backend> Ibvp1dBuilder<B> {
    /// `x = x_min` 上の値 `g0(t)`。
    pub fn x_min(mut self, g: impl Fn(&Jet<B>) -> Jet<B> + 'static) -> Self {
        self.x_min = Some(Arc::new(g));
        self
    }

    /// `x = x_max` 上の値 `g1(t)`。
    pub fn x_max(mut self, g: impl Fn(&Jet<B>) -> Jet<B> + 'static) -> Self {
        self.x_max = Some(Arc::new(g));
        self
    }

    /// x 方向を周期境界にします。
    pub fn periodic(mut self) -> Self {
        self.periodic = true;
        self
    }

    pub fn build(self, device: &B::Device) -> Result<Ibvp1d<B>, Error> {
        check_range("x", self.x_range)?;
        let (x0, x1) = self.x_range;
        let u_left = scalar_at(&self.initial, x0, device);
        let u_right = scalar_at(&self.initial, x1, device);
        let boundary = match (self.x_min, self.x_max, self.periodic) {
            (None, None, false) => XBoundary::Free,
            (None, None, true) => {
                check_consistent("周期境界の両端", u_left, u_right)?;
                XBoundary::Periodic
            }
            (Some(left), Some(right), false) => {
                let g0 = scalar_at(&left, self.t_min, device);
                let g1 = scalar_at(&right, self.t_min, device);
                check_consistent("(t_min, x_min)", u_left, g0)?;
                check_consistent("(t_min, x_max)", u_right, g1)?;
                XBoundary::Dirichlet {
                    left,
                    right,
                    ends: [u_left, u_right],
                }
            }
            (_, _, true) => {
                return Err(Error::config(
                    "周期境界と境界値の固定は同時に指定できません",
                ));
            }
            _ => {
                return Err(Error::config(
                    "x の境界値は両端とも指定してください（片側だけの固定には対応していません）",
                ));
            }
        };
        Ok(Ibvp1d {
            t_min: self.t_min,
            x_range: self.x_range,
            initial: self.initial,
            boundary,
        })
    }
}

impl<B: Backend> Condition<B> for Ibvp1d<B> {
    fn enforce(&self, raw: Jet<B>, coords: &[Jet<B>]) -> Jet<B> {
        let (t, x) = (&coords[0], &coords[1]);
        let u0 = (self.initial)(x);
        match &self.boundary {
            XBoundary::Free | XBoundary::Periodic => u0 + ramp(t, self.t_min) * raw,
            XBoundary::Dirichlet {
                left,
                right,
                ends: [left0, right0],
            } => {
                // 初期分布の端の値を差し引くので、側面では g0, g1 がそのまま現れる
                let (x0, x1) = self.x_range;
                let xs = (x.clone() - x0) / (x1 - x0);
                let bump = xs.clone() * (1.0 - xs.clone());
                u0 + xs.clone() * (right(t) - *right0)
                    + (1.0 - xs) * (left(t) - *left0)
                    + bump * ramp(t, self.t_min) * raw
            }
        }
    }

    fn input_features(&self, coords: &[Jet<B>]) -> Vec<Jet<B>> {
        match self.boundary {
            XBoundary::Periodic => periodic_features(coords, 1, self.x_range),
            _ => coords.to_vec(),
        }
    }

    fn input_width(&self, n_vars: usize) -> usize {
        match self.boundary {
            XBoundary::Periodic => n_vars + 1,
            _ => n_vars,
        }
    }

    fn required_vars(&self) -> usize {
        2
    }
}

/// 座標 `var` について周期 `max - min` の周期性を課します。
///
/// 座標を `(cos 2πx̃, sin 2πx̃)` に置き換えてネットワークに渡すため、
/// 値とすべての微分が両端で一致します。
#[derive(Debug, Clone, Copy)]
pub struct Periodic {
    var: usize,
    min: f32,
    max: f32,
}

impl Periodic {
    pub fn new(var: usize, min: f32, max: f32) -> Result<Self, Error> {
        check_range("周期", (min, max))?;
        Ok(Self { var, min, max })
    }
}

impl<B: Backend> Condition<B> for Periodic {
    fn enforce(&self, raw: Jet<B>, _coords: &[Jet<B>]) -> Jet<B> {
        raw
    }

    fn input_features(&self, coords: &[Jet<B>]) -> Vec<Jet<B>> {
        periodic_features(coords, self.var, (self.min, self.max))
    }

    fn input_width(&self, n_vars: usize) -> usize {
        n_vars + 1
    }

    fn required_vars(&self) -> usize {
        self.var + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use burn::backend::NdArray;

    use crate::diff::diff;
    use crate::model::{Approximator, FcnnConfig};

    type TestBackend = NdArray<f32>;
    type J = Jet<TestBackend>;

    fn column(values: &[f32]) -> Tensor<TestBackend, 2> {
        let device = Default::default();
        Tensor::<TestBackend, 1>::from_floats(values, &device).reshape([values.len(), 1])
    }

    fn to_vec(t: Tensor<TestBackend, 2>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    fn coords(columns: &[&[f32]], order: usize) -> Vec<J> {
        columns
            .iter()
            .enumerate()
            .map(|(i, c)| Jet::variable(column(c), i, columns.len(), order))
            .collect()
    }

    fn constrained(condition: &dyn Condition<TestBackend>, coords: &[J]) -> J {
        let device = Default::default();
        let n_vars = coords.len();
        let net = FcnnConfig::new(condition.input_width(n_vars), 1).init(&device);
        let input = Jet::cat(condition.input_features(coords), 1);
        condition.enforce(net.evaluate(input), coords)
    }

    #[test]
    fn ivp_holds_for_every_initialization() {
        let condition = Ivp::new(0.0, 1.5);
        for _ in 0..5 {
            let c = coords(&[&[0.0, 0.5, 1.0]], 1);
            let u = to_vec(constrained(&condition, &c).value());
            assert_eq!(u[0], 1.5);
        }
    }

    #[test]
    fn ivp_with_derivative_fixes_slope() {
        let condition = Ivp::with_derivative(0.5, -1.0, 2.0);
        let c = coords(&[&[0.5, 1.0]], 1);
        let u = constrained(&condition, &c);
        let du = diff(&u, &c[0], 1).unwrap();
        assert_relative_eq!(to_vec(u.value())[0], -1.0);
        assert_relative_eq!(to_vec(du.value())[0], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn ivp_on_second_variable() {
        let condition = Ivp::new(1.0, 3.0).on_variable(1);
        let c = coords(&[&[0.2, 0.7], &[1.0, 1.0]], 1);
        let u = to_vec(constrained(&condition, &c).value());
        assert_eq!(u, vec![3.0, 3.0]);
        assert_eq!(<Ivp as Condition<TestBackend>>::required_vars(&condition), 2);
    }

    #[test]
    fn dirichlet_bvp_holds_at_both_ends() {
        let condition = DirichletBvp::new(0.0, 1.0, 2.0, -3.0).unwrap();
        let c = coords(&[&[0.0, 1.0, 2.0]], 2);
        let u = to_vec(constrained(&condition, &c).value());
        assert_relative_eq!(u[0], 1.0);
        assert_relative_eq!(u[2], -3.0);
        assert!(DirichletBvp::new(1.0, 0.0, 1.0, 0.0).is_err());
    }

    fn box_condition(device: &<TestBackend as Backend>::Device) -> DirichletBvp2d<TestBackend> {
        DirichletBvp2d::builder((0.0, 1.0), (0.0, 2.0))
            .x_min(|y: &J| y.clone() * 0.5)
            .x_max(|y: &J| y.clone() * 0.5 + 1.0)
            .y_min(|x: &J| x.clone())
            .y_max(|x: &J| x.clone() + 1.0)
            .build(device)
            .unwrap()
    }

    #[test]
    fn box_condition_matches_every_edge() {
        let device = Default::default();
        let condition = box_condition(&device);
        let xs = [0.0, 1.0, 0.3, 0.8];
        let ys = [0.7, 1.4, 0.0, 2.0];
        let c = coords(&[&xs, &ys], 2);
        let u = to_vec(constrained(&condition, &c).value());
        assert_relative_eq!(u[0], 0.35, epsilon = 1e-6);
        assert_relative_eq!(u[1], 1.7, epsilon = 1e-6);
        assert_relative_eq!(u[2], 0.3, epsilon = 1e-6);
        assert_relative_eq!(u[3], 1.8, epsilon = 1e-6);
    }

    #[test]
    fn box_condition_rejects_inconsistent_corners() {
        let device = Default::default();
        let result = DirichletBvp2d::<TestBackend>::builder((0.0, 1.0), (0.0, 1.0))
            .x_min(|y: &J| y.clone() * 0.0)
            .x_max(|y: &J| y.clone() * 0.0)
            .y_min(|x: &J| x.clone() * 0.0 + 1.0)
            .y_max(|x: &J| x.clone() * 0.0)
            .build(&device);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn unsupported_edge_combinations_are_rejected() {
        let device = Default::default();
        let result = DirichletBvp2d::<TestBackend>::builder((0.0, 1.0), (0.0, 1.0))
            .x_min(|y: &J| y.clone())
            .y_min(|x: &J| x.clone())
            .build(&device);
        assert!(matches!(result, Err(Error::Configuration(_))));

        let three = DirichletBvp2d::<TestBackend>::builder((0.0, 1.0), (0.0, 1.0))
            .x_min(|y: &J| y.clone())
            .x_max(|y: &J| y.clone())
            .y_min(|x: &J| x.clone())
            .build(&device);
        assert!(matches!(three, Err(Error::Configuration(_))));
    }

    #[test]
    fn two_sided_condition_in_x() {
        let device = Default::default();
        let condition = DirichletBvp2d::<TestBackend>::builder((-1.0, 1.0), (0.0, 1.0))
            .x_min(|y: &J| y.clone() * 2.0)
            .x_max(|y: &J| y.clone() * 0.0 - 1.0)
            .build(&device)
            .unwrap();
        let c = coords(&[&[-1.0, 1.0], &[0.25, 0.75]], 2);
        let u = to_vec(constrained(&condition, &c).value());
        assert_relative_eq!(u[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(u[1], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn ibvp_dirichlet_holds_initially_and_on_sides() {
        let device = Default::default();
        let condition = Ibvp1d::builder(0.0, (0.0, 1.0), |x: &J| (x.clone() * PI).sin())
            .x_min(|t: &J| t.clone() * 0.0)
            .x_max(|t: &J| t.clone() * 0.0)
            .build(&device)
            .unwrap();
        let ts = [0.0, 0.0, 0.4, 0.9];
        let xs = [0.5, 0.25, 0.0, 1.0];
        let c = coords(&[&ts, &xs], 2);
        let u = to_vec(constrained(&condition, &c).value());
        assert_relative_eq!(u[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(u[1], (0.25 * PI).sin(), epsilon = 1e-6);
        assert_relative_eq!(u[2], 0.0, epsilon = 1e-6);
        assert_relative_eq!(u[3], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn ibvp_rejects_one_sided_and_mixed_boundaries() {
        let device = Default::default();
        let one_side = Ibvp1d::<TestBackend>::builder(0.0, (0.0, 1.0), |x: &J| x.clone())
            .x_min(|t: &J| t.clone() * 0.0)
            .build(&device);
        assert!(matches!(one_side, Err(Error::Configuration(_))));

        let mixed = Ibvp1d::<TestBackend>::builder(0.0, (0.0, 1.0), |x: &J| x.clone() * 0.0)
            .x_min(|t: &J| t.clone() * 0.0)
            .x_max(|t: &J| t.clone() * 0.0)
            .periodic()
            .build(&device);
        assert!(matches!(mixed, Err(Error::Configuration(_))));

        let not_periodic = Ibvp1d::<TestBackend>::builder(0.0, (0.0, 1.0), |x: &J| x.clone())
            .periodic()
            .build(&device);
        assert!(matches!(not_periodic, Err(Error::Configuration(_))));
    }

    #[test]
    fn ibvp_rejects_initial_profile_off_by_more_than_rounding() {
        let device = Default::default();
        let result = Ibvp1d::<TestBackend>::builder(0.0, (0.0, 1.0), |x: &J| x.clone() * 0.0 + 9e-5)
            .x_min(|t: &J| t.clone() * 0.0)
            .x_max(|t: &J| t.clone() * 0.0 + 9e-5)
            .build(&device);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn ibvp_sides_are_exact_when_profile_differs_by_rounding() {
        let device = Default::default();
        let condition = Ibvp1d::builder(0.0, (0.0, 1.0), |x: &J| x.clone() * 0.0 + 5e-7)
            .x_min(|t: &J| t.clone() * 0.0)
            .x_max(|t: &J| t.clone() * 0.0 + 5e-7)
            .build(&device)
            .unwrap();
        let c = coords(&[&[0.5, 0.9, 0.5], &[0.0, 0.0, 1.0]], 2);
        let u = to_vec(constrained(&condition, &c).value());
        assert_eq!(u[0], 0.0);
        assert_eq!(u[1], 0.0);
        assert_relative_eq!(u[2], 5e-7, epsilon = 1e-9);
    }

    #[test]
    fn box_condition_rejects_corner_mismatch_beyond_rounding() {
        let device = Default::default();
        let result = DirichletBvp2d::<TestBackend>::builder((0.0, 1.0), (0.0, 1.0))
            .x_min(|y: &J| y.clone() * 0.0)
            .x_max(|y: &J| y.clone() * 0.0)
            .y_min(|x: &J| x.clone() * 0.0 + 5e-5)
            .y_max(|x: &J| x.clone() * 0.0)
            .build(&device);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn periodic_inputs_agree_at_both_ends() {
        let condition = Periodic::new(1, -1.0, 1.0).unwrap();
        let c = coords(&[&[0.3, 0.3], &[-1.0, 1.0]], 1);
        let u = to_vec(constrained(&condition, &c).value());
        assert_relative_eq!(u[0], u[1], epsilon = 1e-5);
        assert_eq!(<Periodic as Condition<TestBackend>>::input_width(&condition, 2), 3);
    }

    #[test]
    fn periodic_ibvp_keeps_initial_profile() {
        let device = Default::default();
        let condition = Ibvp1d::builder(0.0, (-1.0, 1.0), |x: &J| (x.clone() * PI).sin())
            .periodic()
            .build(&device)
            .unwrap();
        let c = coords(&[&[0.0, 0.5, 0.5], &[0.5, -1.0, 1.0]], 1);
        let u = to_vec(constrained(&condition, &c).value());
        assert_relative_eq!(u[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(u[1], u[2], epsilon = 1e-5);
    }
}
