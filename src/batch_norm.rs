use ndarray::{Array1, Axis};

use crate::error::{ConversionError, Result};
use crate::model::{Kernel, LayerWeights};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormParams {
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
    pub mean: Array1<f32>,
    pub variance: Array1<f32>,
    pub epsilon: f32,
}

pub fn absorb_batch_norm(weights: &LayerWeights, bn: &BatchNormParams) -> Result<LayerWeights> {
    let num_outputs = weights.num_outputs();

    for (name, len) in [
        ("gamma", bn.gamma.len()),
        ("beta", bn.beta.len()),
        ("mean", bn.mean.len()),
        ("variance", bn.variance.len()),
    ] {
        if len != num_outputs {
            return Err(ConversionError::InvalidShape(format!(
                "batch normalization {} has {} entries, layer has {} outputs",
                name, len, num_outputs
            )));
        }
    }

    if weights.bias.len() != num_outputs {
        return Err(ConversionError::InvalidShape(format!(
            "bias has {} entries, layer has {} outputs",
            weights.bias.len(),
            num_outputs
        )));
    }

    let scale = &bn.gamma / &bn.variance.mapv(|var| (var + bn.epsilon).sqrt());

    let kernel = match &weights.kernel {
        Kernel::Dense(w) => Kernel::Dense(w * &scale),
        Kernel::Convolution(w) => {
            let mut folded = w.clone();
            for (mut out_channel, factor) in folded.axis_iter_mut(Axis(0)).zip(scale.iter()) {
                out_channel *= *factor;
            }
            Kernel::Convolution(folded)
        }
    };

    let bias = (&weights.bias - &bn.mean) * &scale + &bn.beta;

    Ok(LayerWeights { kernel, bias })
}
