use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::Backend;

use crate::jet::Jet;

/// 学習対象となる、パラメータを持つ微分可能な関数。
///
/// 入力は `[点数, n_inputs]`、出力は `[点数, n_outputs]` のジェットです。
/// パラメータを更新するのはオプティマイザのステップだけです。
pub trait Approximator<B: Backend>: Module<B> {
    fn n_inputs(&self) -> usize;

    fn n_outputs(&self) -> usize;

    /// 入力ジェットに対して順伝播を実行します。入力の微分履歴は出力に引き継がれます。
    fn evaluate(&self, input: Jet<B>) -> Jet<B>;
}

/// 全結合ネットワークの設定。
#[derive(Config, Debug)]
pub struct FcnnConfig {
    pub n_input_units: usize,
    pub n_output_units: usize,
    /// 隠れ層ごとのユニット数。
    #[config(default = "vec![32, 32]")]
    pub hidden_units: Vec<usize>,
}

impl FcnnConfig {
    /// 新しいネットワークを初期化します。
    pub fn init<B: Backend>(&self, device: &B::Device) -> Fcnn<B> {
        let mut widths = Vec::with_capacity(self.hidden_units.len() + 2);
        widths.push(self.n_input_units);
        widths.extend(&self.hidden_units);
        widths.push(self.n_output_units);
        let linears = widths
            .windows(2)
            .map(|w| LinearConfig::new(w[0], w[1]).init(device))
            .collect();
        Fcnn { linears }
    }
}

/// PINNの本体となる多層パーセプトロン（MLP）。
///
/// 座標を入力とし、その点における未知関数の値を予測します。隠れ層の活性化関数は tanh です。
#[derive(Module, Debug)]
pub struct Fcnn<B: Backend> {
    linears: Vec<Linear<B>>,
}

fn linear_jet<B: Backend>(linear: &Linear<B>, x: Jet<B>) -> Jet<B> {
    let y = x.matmul(linear.weight.val());
    match &linear.bias {
        Some(bias) => y + Jet::constant(bias.val().unsqueeze()),
        None => y,
    }
}

impl<B: Backend> Approximator<B> for Fcnn<B> {
    fn n_inputs(&self) -> usize {
        self.linears.first().map_or(0, |l| l.weight.val().dims()[0])
    }

    fn n_outputs(&self) -> usize {
        self.linears.last().map_or(0, |l| l.weight.val().dims()[1])
    }

    fn evaluate(&self, input: Jet<B>) -> Jet<B> {
        let last = self.linears.len().saturating_sub(1);
        let mut x = input;
        for (i, linear) in self.linears.iter().enumerate() {
            x = linear_jet(linear, x);
            if i < last {
                x = x.tanh();
            }
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use burn::tensor::Tensor;

    type TestBackend = NdArray<f32>;

    #[test]
    fn widths_follow_config() {
        let device = Default::default();
        let net = FcnnConfig::new(2, 3)
            .with_hidden_units(vec![8, 4, 5])
            .init::<TestBackend>(&device);
        assert_eq!(net.n_inputs(), 2);
        assert_eq!(net.n_outputs(), 3);
        assert_eq!(net.linears.len(), 4);
    }

    #[test]
    fn jet_evaluation_matches_plain_forward() {
        let device = Default::default();
        let net = FcnnConfig::new(2, 1).init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 2>::from_floats([[0.1, 0.2], [0.5, -0.3]], &device);

        let mut plain = input.clone();
        for (i, linear) in net.linears.iter().enumerate() {
            plain = linear.forward(plain);
            if i + 1 < net.linears.len() {
                plain = plain.tanh();
            }
        }

        let jet = net.evaluate(Jet::constant(input));
        let expected = plain.into_data().to_vec::<f32>().unwrap();
        let got = jet.value().into_data().to_vec::<f32>().unwrap();
        for (g, e) in got.iter().zip(expected) {
            assert_relative_eq!(*g, e, epsilon = 1e-6);
        }
    }
}
