use log::info;
use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, Axis, IxDyn};

use crate::connectivity::{self, Window};
use crate::error::{ConversionError, Result};
use crate::model::{ActivationKind, CanonicalLayer, Kernel, LayerKind, ParsedModel};
use crate::params::DataFormat;
use crate::shape::{BorderMode, FeatureMapGeometry};
use crate::util::argmax;

pub trait AnalogModel {
    fn predict(&self, x: ArrayViewD<f32>) -> Result<Array2<f32>>;

    fn outputs_probabilities(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalResult {
    pub loss: Option<f32>,
    pub accuracy: f32,
}

pub fn evaluate(
    model: &impl AnalogModel,
    x_test: ArrayViewD<f32>,
    y_test: ArrayView2<f32>,
) -> Result<EvalResult> {
    let predictions = model.predict(x_test)?;

    if predictions.dim() != y_test.dim() {
        return Err(ConversionError::InvalidShape(format!(
            "predictions have shape {:?}, labels {:?}",
            predictions.shape(),
            y_test.shape()
        )));
    }

    let num_samples = predictions.nrows();
    let correct = predictions
        .outer_iter()
        .zip(y_test.outer_iter())
        .filter(|(guess, truth)| argmax(guess.view()) == argmax(truth.view()))
        .count();

    let accuracy = if num_samples == 0 {
        0.0
    } else {
        correct as f32 / num_samples as f32
    };

    let loss = if model.outputs_probabilities() && num_samples > 0 {
        let total: f32 = predictions
            .iter()
            .zip(y_test.iter())
            .map(|(p, y)| -y * p.max(1e-7).ln())
            .sum();
        Some(total / num_samples as f32)
    } else {
        None
    };

    info!("analog accuracy: {:.2}% on {} samples", accuracy * 100.0, num_samples);

    Ok(EvalResult { loss, accuracy })
}

pub struct ReferenceModel<'a> {
    model: &'a ParsedModel,
    data_format: DataFormat,
    flip_kernel: bool,
}

struct FeatureMap {
    values: Vec<f32>,
    geometry: FeatureMapGeometry,
}

impl<'a> ReferenceModel<'a> {
    pub fn new(model: &'a ParsedModel, data_format: DataFormat, flip_kernel: bool) -> Self {
        Self {
            model,
            data_format,
            flip_kernel,
        }
    }

    fn forward_sample(&self, sample: ArrayViewD<f32>) -> Result<Vec<f32>> {
        let input_shape = self.model.non_batch_input_shape();

        if sample.shape() != input_shape {
            return Err(ConversionError::InvalidShape(format!(
                "sample has shape {:?}, model expects {:?}",
                sample.shape(),
                input_shape
            )));
        }

        let mut map = FeatureMap {
            values: to_channels_first(sample, self.data_format),
            geometry: FeatureMapGeometry::from_shape(input_shape, self.data_format)?,
        };
        let mut pending_flatten: Option<FeatureMapGeometry> = None;

        for layer in &self.model.layers {
            map = match layer.kind {
                LayerKind::Dense => {
                    let input = match pending_flatten.take() {
                        Some(geometry) => {
                            let remap = connectivity::flatten_remap(&geometry, self.data_format);
                            remap.iter().map(|idx| map.values[*idx]).collect()
                        }
                        None => map.values,
                    };
                    self.dense(layer, input)?
                }
                LayerKind::Convolution2D => self.convolution(layer, &map)?,
                LayerKind::MaxPooling2D | LayerKind::AveragePooling2D => pool(layer, &map)?,
                LayerKind::ZeroPadding2D => zero_pad(layer, &map)?,
                LayerKind::Flatten => {
                    if pending_flatten.is_some() {
                        return Err(ConversionError::UnconsumedFlattenRecord(vec![
                            layer.label.clone()
                        ]));
                    }
                    pending_flatten = Some(map.geometry);
                    let size = map.geometry.size();
                    FeatureMap {
                        values: map.values,
                        geometry: FeatureMapGeometry {
                            channels: size,
                            height: 1,
                            width: 1,
                        },
                    }
                }
                LayerKind::Activation => map,
            };

            apply_activation(layer.activation, &mut map.values);
        }

        Ok(map.values)
    }

    fn dense(&self, layer: &CanonicalLayer, input: Vec<f32>) -> Result<FeatureMap> {
        let weights = layer
            .weights
            .as_ref()
            .ok_or_else(|| ConversionError::MissingWeights(layer.label.clone()))?;

        let Kernel::Dense(w) = &weights.kernel else {
            return Err(ConversionError::InvalidShape(format!(
                "{} needs a dense kernel",
                layer.label
            )));
        };

        if input.len() != w.nrows() {
            return Err(ConversionError::InvalidShape(format!(
                "{} expects {} inputs, got {}",
                layer.label,
                w.nrows(),
                input.len()
            )));
        }

        let output = Array1::from_vec(input).dot(w) + &weights.bias;

        Ok(FeatureMap {
            geometry: FeatureMapGeometry {
                channels: output.len(),
                height: 1,
                width: 1,
            },
            values: output.to_vec(),
        })
    }

    fn convolution(&self, layer: &CanonicalLayer, map: &FeatureMap) -> Result<FeatureMap> {
        let weights = layer
            .weights
            .as_ref()
            .ok_or_else(|| ConversionError::MissingWeights(layer.label.clone()))?;

        let Kernel::Convolution(kernel) = &weights.kernel else {
            return Err(ConversionError::InvalidShape(format!(
                "{} needs a convolution kernel",
                layer.label
            )));
        };

        let window = layer_window(layer, map.geometry)?;
        let (out_channels, in_channels, _, _) = kernel.dim();
        let output = window.output_geometry(out_channels);
        let mut values = vec![0.0; output.size()];

        for out_channel in 0..out_channels {
            for out_row in 0..output.height {
                for out_col in 0..output.width {
                    let mut acc = weights.bias[out_channel];

                    for in_channel in 0..in_channels {
                        for (k_row, k_col, in_row, in_col) in
                            window.receptive_field(out_row, out_col)
                        {
                            let weight = connectivity::kernel_tap(
                                kernel,
                                out_channel,
                                in_channel,
                                k_row,
                                k_col,
                                self.flip_kernel,
                            );
                            let input_idx = map.geometry.index(in_channel, in_row, in_col);
                            acc += weight * map.values[input_idx];
                        }
                    }

                    values[output.index(out_channel, out_row, out_col)] = acc;
                }
            }
        }

        Ok(FeatureMap {
            values,
            geometry: output,
        })
    }
}

impl AnalogModel for ReferenceModel<'_> {
    fn predict(&self, x: ArrayViewD<f32>) -> Result<Array2<f32>> {
        let num_outputs = self.model.output_shape().iter().product();
        let num_samples = x.len_of(Axis(0));
        let mut predictions = Array2::zeros((num_samples, num_outputs));

        for (sample, mut row) in x.outer_iter().zip(predictions.outer_iter_mut()) {
            let output = self.forward_sample(sample)?;
            if output.len() != num_outputs {
                return Err(ConversionError::InvalidShape(format!(
                    "network produced {} outputs, expected {}",
                    output.len(),
                    num_outputs
                )));
            }
            row.assign(&Array1::from_vec(output));
        }

        Ok(predictions)
    }

    fn outputs_probabilities(&self) -> bool {
        self.model
            .layers
            .last()
            .map_or(false, |layer| layer.activation == Some(ActivationKind::Softmax))
    }
}

pub fn to_channels_first(sample: ArrayViewD<f32>, data_format: DataFormat) -> Vec<f32> {
    if data_format == DataFormat::ChannelsLast && sample.ndim() == 3 {
        sample.permuted_axes(IxDyn(&[2, 0, 1])).iter().copied().collect()
    } else {
        sample.iter().copied().collect()
    }
}

fn layer_window(layer: &CanonicalLayer, input: FeatureMapGeometry) -> Result<Window> {
    let kernel = layer.kernel_size.ok_or_else(|| {
        ConversionError::InvalidShape(format!("{} has no kernel size", layer.label))
    })?;
    let stride = layer.strides.unwrap_or([1, 1]);
    let mode = layer.border_mode.unwrap_or(BorderMode::Valid);

    Window::new(input, kernel, stride, [mode.padding(kernel[0]), mode.padding(kernel[1])])
}

fn pool(layer: &CanonicalLayer, map: &FeatureMap) -> Result<FeatureMap> {
    let window = layer_window(layer, map.geometry)?;
    let output = window.output_geometry(map.geometry.channels);
    let taps = (window.kernel[0] * window.kernel[1]) as f32;
    let mut values = vec![0.0; output.size()];

    for channel in 0..output.channels {
        for out_row in 0..output.height {
            for out_col in 0..output.width {
                let inputs = window
                    .receptive_field(out_row, out_col)
                    .map(|(_, _, in_row, in_col)| {
                        map.values[map.geometry.index(channel, in_row, in_col)]
                    });

                let pooled = if layer.kind == LayerKind::MaxPooling2D {
                    inputs.fold(f32::NEG_INFINITY, f32::max)
                } else {
                    inputs.sum::<f32>() / taps
                };
                values[output.index(channel, out_row, out_col)] = pooled;
            }
        }
    }

    Ok(FeatureMap {
        values,
        geometry: output,
    })
}

fn zero_pad(layer: &CanonicalLayer, map: &FeatureMap) -> Result<FeatureMap> {
    let [[top, bottom], [left, right]] = layer.padding.ok_or_else(|| {
        ConversionError::UnsupportedPadding(format!("{} has no padding", layer.label))
    })?;

    let input = map.geometry;
    let output = FeatureMapGeometry {
        channels: input.channels,
        height: input.height + top + bottom,
        width: input.width + left + right,
    };
    let mut values = vec![0.0; output.size()];

    for channel in 0..input.channels {
        for row in 0..input.height {
            for col in 0..input.width {
                values[output.index(channel, row + top, col + left)] =
                    map.values[input.index(channel, row, col)];
            }
        }
    }

    Ok(FeatureMap {
        values,
        geometry: output,
    })
}

fn apply_activation(activation: Option<ActivationKind>, values: &mut [f32]) {
    match activation {
        Some(ActivationKind::Relu) => values.iter_mut().for_each(|v| *v = v.max(0.0)),
        Some(ActivationKind::Softmax) => {
            let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut total = 0.0;
            for v in values.iter_mut() {
                *v = (*v - max).exp();
                total += *v;
            }
            values.iter_mut().for_each(|v| *v /= total);
        }
        Some(ActivationKind::Linear) | None => {}
    }
}
