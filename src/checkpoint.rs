//! 近似器の保存と読み込み。
//!
//! 読み込んだ近似器を新しいソルバーに渡せば、パラメータを初期化し直さずに
//! 学習を再開できます。

use std::path::Path;

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;

use crate::error::Error;

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// 近似器の列を 1 つのファイルに保存します。
pub fn save_approximators<B: Backend, M: Module<B>>(
    approximators: &[M],
    path: impl AsRef<Path>,
) -> Result<(), Error> {
    approximators
        .to_vec()
        .save_file(path.as_ref().to_path_buf(), &recorder())?;
    Ok(())
}

/// 同じ構造の近似器 `template` にパラメータを読み込みます。
pub fn load_approximators<B: Backend, M: Module<B>>(
    template: Vec<M>,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<Vec<M>, Error> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::InvalidInput(format!(
            "モデルファイル '{}' が見つかりません",
            path.display()
        )));
    }
    Ok(template.load_file(path.to_path_buf(), &recorder(), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use burn::backend::NdArray;
    use burn::tensor::Tensor;

    use crate::jet::Jet;
    use crate::model::{Approximator, FcnnConfig};

    type TestBackend = NdArray<f32>;

    #[test]
    fn round_trip_preserves_outputs() {
        let device = Default::default();
        let path = std::env::temp_dir().join(format!("pinn_solve_ckpt_{}.mpk", std::process::id()));
        let config = FcnnConfig::new(1, 1).with_hidden_units(vec![4]);
        let trained = vec![config.init::<TestBackend>(&device)];
        save_approximators(&trained, &path).unwrap();

        let loaded =
            load_approximators(vec![config.init::<TestBackend>(&device)], &path, &device).unwrap();
        let input = Tensor::<TestBackend, 2>::from_floats([[0.25], [0.75]], &device);
        let expected = trained[0].evaluate(Jet::constant(input.clone())).value();
        let got = loaded[0].evaluate(Jet::constant(input)).value();
        assert_eq!(
            got.into_data().to_vec::<f32>().unwrap(),
            expected.into_data().to_vec::<f32>().unwrap()
        );
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_reported() {
        let device = Default::default();
        let template = vec![FcnnConfig::new(1, 1).init::<TestBackend>(&device)];
        let result = load_approximators(template, "does/not/exist.mpk", &device);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
