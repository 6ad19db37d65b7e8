//! # 微分履歴を持つ値（テイラージェット）
//!
//! 点のバッチ上の関数値と、その独立変数に関する偏微分を、指定した階数までの
//! 多変数テイラー係数としてまとめて持ち運びます。係数はすべて `burn` のテンソルなので、
//! 自動微分バックエンドの上で計算すれば、入力に関する微分を含む損失からでも
//! `backward()` でネットワークのパラメータ勾配が得られます。
//!
//! 係数 `c_α` は偏微分 `∂^α u` を `α!` で割ったものです。
//!
//! 座標から作ったジェット（[`Jet::variable`]）だけが微分の起点になり、
//! テンソルから直接作ったジェット（[`Jet::constant`]）は微分履歴を持ちません。

use std::collections::HashMap;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

/// 多重指数の集合。全次数の昇順に並べるので、低い階数の集合は
/// 高い階数の集合の先頭部分と一致します。
#[derive(Debug)]
struct Basis {
    n_vars: usize,
    order: usize,
    indices: Vec<Vec<usize>>,
    lookup: HashMap<Vec<usize>, usize>,
    /// `products[i]` は `α_i = β + γ` となる `(β, γ)` の添字の組。
    products: Vec<Vec<(usize, usize)>>,
}

impl Basis {
    fn new(n_vars: usize, order: usize) -> Self {
        let indices: Vec<Vec<usize>> = (0..=order)
            .flat_map(|degree| with_degree(n_vars, degree))
            .collect();
        let lookup: HashMap<Vec<usize>, usize> = indices
            .iter()
            .enumerate()
            .map(|(i, alpha)| (alpha.clone(), i))
            .collect();
        let products = indices
            .iter()
            .map(|alpha| {
                indices
                    .iter()
                    .enumerate()
                    .filter(|(_, beta)| beta.iter().zip(alpha).all(|(b, a)| b <= a))
                    .map(|(j, beta)| {
                        let gamma: Vec<usize> =
                            alpha.iter().zip(beta).map(|(a, b)| a - b).collect();
                        (j, lookup[&gamma])
                    })
                    .collect()
            })
            .collect();
        Self {
            n_vars,
            order,
            indices,
            lookup,
            products,
        }
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

fn with_degree(n_vars: usize, degree: usize) -> Vec<Vec<usize>> {
    if n_vars == 1 {
        return vec![vec![degree]];
    }
    let mut out = Vec::new();
    for first in (0..=degree).rev() {
        for mut rest in with_degree(n_vars - 1, degree - first) {
            rest.insert(0, first);
            out.push(rest);
        }
    }
    out
}

fn factorial(n: usize) -> f32 {
    (1..=n).map(|k| k as f32).product()
}

/// 関数値とその偏微分（テイラー係数）の組。
#[derive(Debug, Clone)]
pub struct Jet<B: Backend> {
    coeffs: Vec<Tensor<B, 2>>,
    basis: Option<Arc<Basis>>,
    seed: Option<usize>,
}

impl<B: Backend> Jet<B> {
    /// 微分履歴を持たない値。
    pub fn constant(value: Tensor<B, 2>) -> Self {
        Self {
            coeffs: vec![value],
            basis: None,
            seed: None,
        }
    }

    /// `n_vars` 個ある独立変数のうち `var` 番目の座標として、`order` 階までの
    /// 微分を追跡するジェットを作ります。
    ///
    /// # Panics
    ///
    /// `var >= n_vars` のときパニックします。
    pub fn variable(value: Tensor<B, 2>, var: usize, n_vars: usize, order: usize) -> Self {
        assert!(
            var < n_vars,
            "変数の添字 {var} が変数の数 {n_vars} を超えています"
        );
        let basis = Arc::new(Basis::new(n_vars, order));
        let mut unit = vec![0; n_vars];
        unit[var] = 1;
        let unit_index = basis.lookup.get(&unit).copied();
        let coeffs = (0..basis.len())
            .map(|i| match i {
                0 => value.clone(),
                i if Some(i) == unit_index => value.ones_like(),
                _ => value.zeros_like(),
            })
            .collect();
        Self {
            coeffs,
            basis: Some(basis),
            seed: Some(var),
        }
    }

    /// 関数値そのもの。
    pub fn value(&self) -> Tensor<B, 2> {
        self.coeffs[0].clone()
    }

    pub fn dims(&self) -> [usize; 2] {
        self.coeffs[0].dims()
    }

    /// 微分履歴を持つかどうか。
    pub fn is_tracked(&self) -> bool {
        self.basis.is_some()
    }

    /// 追跡している微分の最高階数。定数は 0。
    pub fn order(&self) -> usize {
        self.basis.as_ref().map_or(0, |b| b.order)
    }

    pub fn n_vars(&self) -> Option<usize> {
        self.basis.as_ref().map(|b| b.n_vars)
    }

    /// 座標ジェットなら、その変数の添字。
    pub fn variable_index(&self) -> Option<usize> {
        self.seed
    }

    /// 多重指数 `α` に対する偏微分 `∂^α u`。追跡していなければ `None`。
    pub fn derivative(&self, multi_index: &[usize]) -> Option<Tensor<B, 2>> {
        let basis = self.basis.as_ref()?;
        let i = *basis.lookup.get(multi_index)?;
        let scale: f32 = multi_index.iter().map(|&a| factorial(a)).product();
        Some(self.coeffs[i].clone().mul_scalar(scale))
    }

    /// `var` 方向の 1 階偏微分。追跡階数が 1 つ下がります。
    pub(crate) fn shift(&self, var: usize) -> Option<Self> {
        let basis = self.basis.as_ref()?;
        if basis.order == 0 || var >= basis.n_vars {
            return None;
        }
        let lower = Arc::new(Basis::new(basis.n_vars, basis.order - 1));
        let coeffs = lower
            .indices
            .iter()
            .map(|alpha| {
                let mut raised = alpha.clone();
                raised[var] += 1;
                let c = self.coeffs[basis.lookup[&raised]].clone();
                match alpha[var] {
                    0 => c,
                    a => c.mul_scalar((a + 1) as f32),
                }
            })
            .collect();
        Some(Self {
            coeffs,
            basis: Some(lower),
            seed: None,
        })
    }

    fn derived(coeffs: Vec<Tensor<B, 2>>, basis: Option<Arc<Basis>>) -> Self {
        Self {
            coeffs,
            basis,
            seed: None,
        }
    }

    fn map_coeffs(self, f: impl Fn(Tensor<B, 2>) -> Tensor<B, 2>) -> Self {
        let coeffs = self.coeffs.into_iter().map(f).collect();
        Self::derived(coeffs, self.basis)
    }

    fn map_value(mut self, f: impl FnOnce(Tensor<B, 2>) -> Tensor<B, 2>) -> Self {
        let value = self.coeffs[0].clone();
        self.coeffs[0] = f(value);
        Self::derived(self.coeffs, self.basis)
    }

    /// 定数を `basis` の上のジェットとして表し直します（高階の係数は 0）。
    fn lift(self, basis: &Arc<Basis>) -> Self {
        if self.is_tracked() {
            return self.truncate(basis);
        }
        let value = self.coeffs[0].clone();
        let coeffs = (0..basis.len())
            .map(|i| if i == 0 { value.clone() } else { value.zeros_like() })
            .collect();
        Self::derived(coeffs, Some(basis.clone()))
    }

    fn truncate(mut self, basis: &Arc<Basis>) -> Self {
        if let Some(own) = &self.basis {
            assert_eq!(
                own.n_vars, basis.n_vars,
                "独立変数の数が異なるジェットは組み合わせられません"
            );
            if own.order == basis.order {
                return self;
            }
        }
        self.coeffs.truncate(basis.len());
        Self {
            coeffs: self.coeffs,
            basis: Some(basis.clone()),
            seed: self.seed,
        }
    }

    fn align(self, other: Self) -> (Self, Self, Arc<Basis>) {
        let basis = match (&self.basis, &other.basis) {
            (Some(a), Some(b)) if a.order <= b.order => a.clone(),
            (Some(_), Some(b)) => b.clone(),
            (Some(a), None) => a.clone(),
            (None, Some(b)) => b.clone(),
            (None, None) => unreachable!("align は追跡中のジェットにだけ使う"),
        };
        (self.lift(&basis), other.lift(&basis), basis)
    }

    fn add_jet(self, rhs: Self) -> Self {
        match (self.is_tracked(), rhs.is_tracked()) {
            (_, false) => {
                let r = rhs.value();
                self.map_value(|v| v + r)
            }
            (false, true) => {
                let l = self.value();
                rhs.map_value(|v| l + v)
            }
            (true, true) => {
                let (a, b, basis) = self.align(rhs);
                let coeffs = a
                    .coeffs
                    .into_iter()
                    .zip(b.coeffs)
                    .map(|(x, y)| x + y)
                    .collect();
                Self::derived(coeffs, Some(basis))
            }
        }
    }

    fn mul_jet(self, rhs: Self) -> Self {
        match (self.is_tracked(), rhs.is_tracked()) {
            (false, false) => Self::constant(self.value() * rhs.value()),
            (true, false) => {
                let r = rhs.value();
                self.map_coeffs(|c| c * r.clone())
            }
            (false, true) => {
                let l = self.value();
                rhs.map_coeffs(|c| l.clone() * c)
            }
            (true, true) => {
                let (a, b, basis) = self.align(rhs);
                let coeffs = basis
                    .products
                    .iter()
                    .map(|pairs| {
                        pairs
                            .iter()
                            .map(|&(j, k)| a.coeffs[j].clone() * b.coeffs[k].clone())
                            .reduce(|acc, term| acc + term)
                            .unwrap_or_else(|| a.coeffs[0].zeros_like())
                    })
                    .collect();
                Self::derived(coeffs, Some(basis))
            }
        }
    }

    /// 1 変数関数 `φ` との合成。`derivs[k]` は `φ^(k)(u)` で、追跡階数 + 1 個必要です。
    fn compose(self, derivs: Vec<Tensor<B, 2>>) -> Self {
        let Some(basis) = self.basis.clone() else {
            return Self::constant(derivs[0].clone());
        };
        let mut h = self;
        h.coeffs[0] = h.coeffs[0].zeros_like();
        h.seed = None;

        let mut result = Self::constant(derivs[0].clone()).lift(&basis);
        let mut power = h.clone();
        for (k, d) in derivs.into_iter().enumerate().skip(1) {
            let term = power.clone().mul_jet(Self::constant(d.div_scalar(factorial(k))));
            result = result.add_jet(term);
            if k < basis.order {
                power = power.mul_jet(h.clone());
            }
        }
        result
    }

    pub fn add_scalar(self, rhs: f32) -> Self {
        self.map_value(|v| v.add_scalar(rhs))
    }

    pub fn sub_scalar(self, rhs: f32) -> Self {
        self.add_scalar(-rhs)
    }

    pub fn mul_scalar(self, rhs: f32) -> Self {
        self.map_coeffs(|c| c.mul_scalar(rhs))
    }

    pub fn div_scalar(self, rhs: f32) -> Self {
        self.map_coeffs(|c| c.div_scalar(rhs))
    }

    pub fn exp(self) -> Self {
        let e = self.value().exp();
        let derivs = vec![e; self.order() + 1];
        self.compose(derivs)
    }

    pub fn tanh(self) -> Self {
        let t = self.value().tanh();
        let derivs = tanh_derivative_polynomials(self.order())
            .iter()
            .map(|p| eval_polynomial(p, &t))
            .collect();
        self.compose(derivs)
    }

    pub fn sin(self) -> Self {
        let (s, c) = (self.value().sin(), self.value().cos());
        let cycle = [s.clone(), c.clone(), s.neg(), c.neg()];
        let derivs = (0..=self.order()).map(|k| cycle[k % 4].clone()).collect();
        self.compose(derivs)
    }

    pub fn cos(self) -> Self {
        let (s, c) = (self.value().sin(), self.value().cos());
        let cycle = [c.clone(), s.clone().neg(), c.neg(), s];
        let derivs = (0..=self.order()).map(|k| cycle[k % 4].clone()).collect();
        self.compose(derivs)
    }

    /// 逆数 `1/u`。
    pub fn recip(self) -> Self {
        let r = self.value().recip();
        let mut derivs = Vec::with_capacity(self.order() + 1);
        let mut power = r.clone();
        for k in 0..=self.order() {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            derivs.push(power.clone().mul_scalar(sign * factorial(k)));
            power = power * r.clone();
        }
        self.compose(derivs)
    }

    /// 非負整数乗 `u^n`。
    pub fn powi(self, n: usize) -> Self {
        let a = self.value();
        let derivs = (0..=self.order())
            .map(|k| {
                if k > n {
                    return a.zeros_like();
                }
                let falling: f32 = ((n - k + 1)..=n).map(|m| m as f32).product();
                int_power(&a, n - k).mul_scalar(falling)
            })
            .collect();
        self.compose(derivs)
    }

    pub fn square(self) -> Self {
        self.clone().mul_jet(self)
    }

    /// 各係数に右から行列を掛けます（線形層）。
    pub fn matmul(self, weight: Tensor<B, 2>) -> Self {
        self.map_coeffs(|c| c.matmul(weight.clone()))
    }

    /// 列 `j` だけを取り出します。
    ///
    /// # Panics
    ///
    /// `j` が値の列数以上のときパニックします。
    pub fn column(self, j: usize) -> Self {
        self.map_coeffs(|c| {
            let rows = c.dims()[0];
            c.slice([0..rows, j..j + 1])
        })
    }

    /// ジェットを `dim` 方向に連結します。追跡階数は最も低いものに揃えられます。
    pub fn cat(jets: Vec<Self>, dim: usize) -> Self {
        let basis = jets
            .iter()
            .filter_map(|j| j.basis.clone())
            .min_by_key(|b| b.order);
        match basis {
            None => Self::constant(Tensor::cat(jets.iter().map(Jet::value).collect(), dim)),
            Some(basis) => {
                let aligned: Vec<Self> = jets.into_iter().map(|j| j.lift(&basis)).collect();
                let coeffs = (0..basis.len())
                    .map(|i| Tensor::cat(aligned.iter().map(|j| j.coeffs[i].clone()).collect(), dim))
                    .collect();
                Self::derived(coeffs, Some(basis))
            }
        }
    }
}

fn int_power<B: Backend>(a: &Tensor<B, 2>, n: usize) -> Tensor<B, 2> {
    (0..n).fold(a.ones_like(), |acc, _| acc * a.clone())
}

/// `d^k/dx^k tanh(x)` を `t = tanh(x)` の多項式として表した係数列（k = 0..=order）。
fn tanh_derivative_polynomials(order: usize) -> Vec<Vec<f32>> {
    let mut polys = vec![vec![0.0, 1.0]];
    for _ in 0..order {
        let p = &polys[polys.len() - 1];
        let dp: Vec<f32> = p
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, c)| c * i as f32)
            .collect();
        // (1 - t^2) p'(t)
        let mut next = vec![0.0; dp.len() + 2];
        for (i, c) in dp.iter().enumerate() {
            next[i] += c;
            next[i + 2] -= c;
        }
        polys.push(next);
    }
    polys
}

fn eval_polynomial<B: Backend>(coeffs: &[f32], t: &Tensor<B, 2>) -> Tensor<B, 2> {
    let mut rev = coeffs.iter().rev();
    let leading = rev.next().copied().unwrap_or(0.0);
    rev.fold(t.zeros_like().add_scalar(leading), |acc, &c| {
        (acc * t.clone()).add_scalar(c)
    })
}

impl<B: Backend> Add for Jet<B> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.add_jet(rhs)
    }
}

impl<B: Backend> Sub for Jet<B> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.add_jet(rhs.neg())
    }
}

impl<B: Backend> Mul for Jet<B> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        self.mul_jet(rhs)
    }
}

impl<B: Backend> Div for Jet<B> {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        self.mul_jet(rhs.recip())
    }
}

impl<B: Backend> Neg for Jet<B> {
    type Output = Self;

    fn neg(self) -> Self {
        self.map_coeffs(|c| c.neg())
    }
}

impl<B: Backend> Add<f32> for Jet<B> {
    type Output = Self;

    fn add(self, rhs: f32) -> Self {
        self.add_scalar(rhs)
    }
}

impl<B: Backend> Sub<f32> for Jet<B> {
    type Output = Self;

    fn sub(self, rhs: f32) -> Self {
        self.sub_scalar(rhs)
    }
}

impl<B: Backend> Mul<f32> for Jet<B> {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        self.mul_scalar(rhs)
    }
}

impl<B: Backend> Div<f32> for Jet<B> {
    type Output = Self;

    fn div(self, rhs: f32) -> Self {
        self.div_scalar(rhs)
    }
}

impl<B: Backend> Add<Jet<B>> for f32 {
    type Output = Jet<B>;

    fn add(self, rhs: Jet<B>) -> Jet<B> {
        rhs.add_scalar(self)
    }
}

impl<B: Backend> Sub<Jet<B>> for f32 {
    type Output = Jet<B>;

    fn sub(self, rhs: Jet<B>) -> Jet<B> {
        rhs.neg().add_scalar(self)
    }
}

impl<B: Backend> Mul<Jet<B>> for f32 {
    type Output = Jet<B>;

    fn mul(self, rhs: Jet<B>) -> Jet<B> {
        rhs.mul_scalar(self)
    }
}
