//! # 微分演算子
//!
//! 方程式の残差を組み立てるための `diff` と、それを使った勾配・ラプラシアン。
//!
//! ```
//! use burn::backend::NdArray;
//! use burn::tensor::Tensor;
//! use pinn_solve::diff::diff;
//! use pinn_solve::jet::Jet;
//!
//! let device = Default::default();
//! let values = Tensor::<NdArray, 1>::from_floats([0.0, 1.0], &device).reshape([2, 1]);
//! let t = Jet::variable(values, 0, 1, 2);
//! let u = t.clone().sin();
//! let u_tt = diff(&u, &t, 2).unwrap();
//! assert_eq!(u_tt.dims(), [2, 1]);
//! ```

use burn::tensor::backend::Backend;

use crate::error::Error;
use crate::jet::Jet;

/// `output` を独立変数 `variable` で `order` 階偏微分します。
///
/// `variable` はソルバーが作った座標ジェットでなければならず、`output` はその座標から
/// 計算された値でなければなりません。入れ子にすれば混合偏微分になります。
///
/// # Errors
///
/// 次の場合は [`Error::Differentiation`] を返します。
///
/// - `order` が 0
/// - `variable` が座標ではない
/// - `output` が微分履歴を持たない（テンソルから作り直した値など）
/// - 追跡している階数を超える微分を要求した
pub fn diff<B: Backend>(output: &Jet<B>, variable: &Jet<B>, order: usize) -> Result<Jet<B>, Error> {
    let Some(var) = variable.variable_index() else {
        return Err(Error::differentiation(
            "微分する変数にはソルバーが渡した座標を指定してください",
        ));
    };
    if order == 0 {
        return Err(Error::differentiation("微分の階数は 1 以上でなければなりません"));
    }
    if !output.is_tracked() {
        return Err(Error::differentiation(
            "微分履歴を持たない値です。座標から計算した値をそのまま渡してください",
        ));
    }
    if output.n_vars() != variable.n_vars() {
        return Err(Error::differentiation(
            "値と変数が異なる点のバッチから作られています",
        ));
    }
    if output.order() < order {
        return Err(Error::differentiation(format!(
            "{order} 階の微分を要求しましたが、追跡しているのは {} 階までです",
            output.order()
        )));
    }

    let mut derivative = output.clone();
    for _ in 0..order {
        derivative = derivative
            .shift(var)
            .ok_or_else(|| Error::differentiation("微分履歴が途中で失われました"))?;
    }
    Ok(derivative)
}

/// 各座標に関する 1 階偏微分を並べたもの。
pub fn gradient<B: Backend>(output: &Jet<B>, coords: &[Jet<B>]) -> Result<Vec<Jet<B>>, Error> {
    coords.iter().map(|x| diff(output, x, 1)).collect()
}

/// 全座標に関する 2 階偏微分の和。
pub fn laplacian<B: Backend>(output: &Jet<B>, coords: &[Jet<B>]) -> Result<Jet<B>, Error> {
    let mut terms = coords.iter().map(|x| diff(output, x, 2));
    let first = terms
        .next()
        .ok_or_else(|| Error::differentiation("座標が 1 つもありません"))??;
    terms.try_fold(first, |acc, term| Ok(acc + term?))
}
