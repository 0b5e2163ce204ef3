use std::fs;
use std::path::Path;

use log::{debug, info};
use ndarray::{Array1, Array2, Array4};
use serde::{Deserialize, Serialize};

use crate::batch_norm::{self, BatchNormParams};
use crate::error::{ConversionError, Result};
use crate::model::{
    non_batch, ActivationKind, CanonicalLayer, Kernel, LayerKind, LayerWeights, ParsedModel,
};
use crate::params::DataFormat;
use crate::shape::{self, BorderMode, FeatureMapGeometry};
use crate::types::{shape_size, HashMap, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolMethod {
    #[serde(rename = "MAX")]
    Max,
    #[serde(rename = "AVE")]
    Average,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeLayer {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    pub pool: Option<PoolMethod>,
    pub activation: Option<ActivationKind>,
    pub kernel_size: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub pad: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub stride: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub border_mode: Option<BorderMode>,
    pub padding: Option<[[usize; 2]; 2]>,
    pub epsilon: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub shape: Shape,
    pub data: Vec<f32>,
}

pub trait NativeNet {
    fn input_shape(&self) -> Shape;

    fn layers(&self) -> &[NativeLayer];

    fn output_shape(&self, layer_name: &str) -> Option<Shape>;

    fn blobs(&self, layer_name: &str) -> Option<&[Blob]>;

    fn data_format(&self) -> DataFormat {
        DataFormat::ChannelsFirst
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonNet {
    pub input_shape: Shape,
    pub data_format: DataFormat,
    pub layers: Vec<NativeLayer>,
    pub output_shapes: HashMap<String, Shape>,
    pub params: HashMap<String, Vec<Blob>>,
}

impl JsonNet {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

impl NativeNet for JsonNet {
    fn input_shape(&self) -> Shape {
        self.input_shape.clone()
    }

    fn layers(&self) -> &[NativeLayer] {
        &self.layers
    }

    fn output_shape(&self, layer_name: &str) -> Option<Shape> {
        self.output_shapes.get(layer_name).cloned()
    }

    fn blobs(&self, layer_name: &str) -> Option<&[Blob]> {
        self.params.get(layer_name).map(|blobs| blobs.as_slice())
    }

    fn data_format(&self) -> DataFormat {
        self.data_format
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NativeRole {
    Skip,
    BatchNorm,
    Layer(LayerKind),
}

fn classify(layer: &NativeLayer) -> Result<NativeRole> {
    let role = match layer.layer_type.as_str() {
        "Data" | "Input" | "InputLayer" => NativeRole::Skip,
        "BatchNorm" | "BatchNormalization" => NativeRole::BatchNorm,
        "InnerProduct" | "Dense" => NativeRole::Layer(LayerKind::Dense),
        "Convolution" | "Conv2D" | "Convolution2D" => NativeRole::Layer(LayerKind::Convolution2D),
        "Pooling" => match layer.pool.unwrap_or(PoolMethod::Max) {
            PoolMethod::Max => NativeRole::Layer(LayerKind::MaxPooling2D),
            PoolMethod::Average => NativeRole::Layer(LayerKind::AveragePooling2D),
        },
        "MaxPooling2D" => NativeRole::Layer(LayerKind::MaxPooling2D),
        "AveragePooling2D" => NativeRole::Layer(LayerKind::AveragePooling2D),
        "ReLU" | "Softmax" | "Activation" => NativeRole::Layer(LayerKind::Activation),
        "Flatten" => NativeRole::Layer(LayerKind::Flatten),
        "ZeroPadding2D" => NativeRole::Layer(LayerKind::ZeroPadding2D),
        other => return Err(ConversionError::UnsupportedLayerType(other.to_string())),
    };

    Ok(role)
}

fn activation_kind(layer: &NativeLayer) -> ActivationKind {
    match layer.layer_type.as_str() {
        "ReLU" => ActivationKind::Relu,
        "Softmax" => ActivationKind::Softmax,
        _ => layer.activation.unwrap_or(ActivationKind::Linear),
    }
}

fn pick(specific: usize, shared: usize) -> usize {
    specific.max(shared)
}

pub fn extract(net: &impl NativeNet) -> Result<ParsedModel> {
    let native = net.layers();
    let roles = native.iter().map(classify).collect::<Result<Vec<_>>>()?;
    let data_format = net.data_format();
    let input_shape = net.input_shape();

    let mut layers: Vec<CanonicalLayer> = Vec::new();
    let mut fused_activations = Vec::new();

    for (layer_num, (native_layer, role)) in native.iter().zip(&roles).enumerate() {
        let kind = match role {
            NativeRole::Skip => continue,
            NativeRole::BatchNorm => {
                let follows_affine = layer_num > 0
                    && matches!(roles[layer_num - 1], NativeRole::Layer(kind) if kind.is_affine());

                if !follows_affine {
                    return Err(ConversionError::UnsupportedTopology(format!(
                        "batch normalization layer {} must directly follow an affine layer",
                        native_layer.name
                    )));
                }

                continue;
            }
            NativeRole::Layer(kind) => *kind,
        };

        if fused_activations.contains(&layer_num) {
            continue;
        }

        let prev_shape = layers
            .last()
            .map(|layer| layer.output_shape.clone())
            .unwrap_or_else(|| input_shape.clone());

        let mut layer = build_layer(net, native_layer, kind, layer_num, &prev_shape, data_format)?;

        if kind.is_affine() {
            let mut next = layer_num + 1;

            if roles.get(next) == Some(&NativeRole::BatchNorm) {
                let bn = batch_norm_params(net, &native[next])?;
                if let Some(weights) = &layer.weights {
                    layer.weights = Some(batch_norm::absorb_batch_norm(weights, &bn)?);
                }
                debug!("absorbed {} into {}", native[next].name, layer.label);
                next += 1;
            }

            if roles.get(next) == Some(&NativeRole::Layer(LayerKind::Activation)) {
                layer.activation = Some(activation_kind(&native[next]));
                fused_activations.push(next);
            }
        }

        if kind == LayerKind::Activation {
            layer.activation = Some(activation_kind(native_layer));
        }

        layers.push(layer);
    }

    info!(
        "parsed {} layers: {:?}",
        layers.len(),
        layers.iter().map(|l| &l.label).collect::<Vec<_>>()
    );

    Ok(ParsedModel { input_shape, layers })
}

fn build_layer(
    net: &impl NativeNet,
    native_layer: &NativeLayer,
    kind: LayerKind,
    layer_num: usize,
    prev_shape: &[usize],
    data_format: DataFormat,
) -> Result<CanonicalLayer> {
    let prev_non_batch = non_batch(prev_shape);

    let stated_shape = net.output_shape(&native_layer.name);

    let mut weights = None;
    let mut kernel_size = None;
    let mut strides = None;
    let mut border_mode = None;
    let mut padding = None;
    let mut input_shape = None;

    let output_shape = match kind {
        LayerKind::Dense => {
            let dense = dense_weights(net, native_layer, shape_size(prev_non_batch))?;
            let num_outputs = dense.num_outputs();
            weights = Some(dense);
            stated_shape.unwrap_or_else(|| vec![0, num_outputs])
        }
        LayerKind::Convolution2D | LayerKind::MaxPooling2D | LayerKind::AveragePooling2D => {
            let kernel = [
                pick(native_layer.kernel_h, native_layer.kernel_size),
                pick(native_layer.kernel_w, native_layer.kernel_size),
            ];
            let pad = [
                pick(native_layer.pad_h, native_layer.pad),
                pick(native_layer.pad_w, native_layer.pad),
            ];
            let default_stride = if kind == LayerKind::Convolution2D { [1, 1] } else { kernel };
            let stride = [
                pick(native_layer.stride_h, native_layer.stride),
                pick(native_layer.stride_w, native_layer.stride),
            ];
            let stride = [
                if stride[0] == 0 { default_stride[0] } else { stride[0] },
                if stride[1] == 0 { default_stride[1] } else { stride[1] },
            ];
            let mode = match native_layer.border_mode {
                Some(mode) => mode,
                None => shape::border_mode_from_padding(pad, kernel)?,
            };

            let geometry = FeatureMapGeometry::from_shape(prev_non_batch, data_format)?;

            let out_channels = if kind == LayerKind::Convolution2D {
                let conv = conv_weights(net, native_layer, kernel, geometry.channels)?;
                let out_channels = conv.num_outputs();
                weights = Some(conv);
                out_channels
            } else {
                geometry.channels
            };

            let out_h = shape::output_length(
                geometry.height,
                kernel[0],
                stride[0],
                mode.padding(kernel[0]),
            )?;
            let out_w = shape::output_length(
                geometry.width,
                kernel[1],
                stride[1],
                mode.padding(kernel[1]),
            )?;

            kernel_size = Some(kernel);
            strides = Some(stride);
            border_mode = Some(mode);
            input_shape = Some(prev_shape.to_vec());

            stated_shape
                .unwrap_or_else(|| feature_map_shape(out_channels, out_h, out_w, data_format))
        }
        LayerKind::ZeroPadding2D => {
            let pads = native_layer.padding.ok_or_else(|| {
                ConversionError::UnsupportedPadding(format!(
                    "zero padding layer {} does not state its padding",
                    native_layer.name
                ))
            })?;
            padding = Some(pads);
            input_shape = Some(prev_shape.to_vec());

            match stated_shape {
                Some(shape) => shape,
                None => {
                    let geometry = FeatureMapGeometry::from_shape(prev_non_batch, data_format)?;
                    feature_map_shape(
                        geometry.channels,
                        geometry.height + pads[0][0] + pads[0][1],
                        geometry.width + pads[1][0] + pads[1][1],
                        data_format,
                    )
                }
            }
        }
        LayerKind::Flatten => stated_shape.unwrap_or_else(|| vec![0, shape_size(prev_non_batch)]),
        LayerKind::Activation => stated_shape.unwrap_or_else(|| prev_shape.to_vec()),
    };

    let mut layer = CanonicalLayer::new(layer_num, kind, output_shape);
    layer.weights = weights;
    layer.kernel_size = kernel_size;
    layer.strides = strides;
    layer.border_mode = border_mode;
    layer.padding = padding;
    layer.input_shape = input_shape;

    Ok(layer)
}

fn feature_map_shape(
    channels: usize,
    height: usize,
    width: usize,
    data_format: DataFormat,
) -> Shape {
    match data_format {
        DataFormat::ChannelsFirst => vec![0, channels, height, width],
        DataFormat::ChannelsLast => vec![0, height, width, channels],
    }
}

fn weight_blobs<'a>(net: &'a impl NativeNet, native_layer: &NativeLayer) -> Result<&'a [Blob]> {
    match net.blobs(&native_layer.name) {
        Some(blobs) if !blobs.is_empty() => Ok(blobs),
        _ => Err(ConversionError::MissingWeights(native_layer.name.clone())),
    }
}

fn bias_or_zeros(blobs: &[Blob], num_outputs: usize, layer_name: &str) -> Result<Array1<f32>> {
    match blobs.get(1) {
        Some(blob) if blob.data.len() == num_outputs => Ok(Array1::from_vec(blob.data.clone())),
        Some(blob) => Err(ConversionError::InvalidShape(format!(
            "bias of {} has {} entries, expected {}",
            layer_name,
            blob.data.len(),
            num_outputs
        ))),
        None => Ok(Array1::zeros(num_outputs)),
    }
}

// Dense weight blobs are stored `[outputs, inputs]`.
fn dense_weights(
    net: &impl NativeNet,
    native_layer: &NativeLayer,
    num_inputs: usize,
) -> Result<LayerWeights> {
    let blobs = weight_blobs(net, native_layer)?;
    let blob = &blobs[0];

    let (num_outputs, blob_inputs) = match blob.shape.as_slice() {
        [num_outputs, blob_inputs] => (*num_outputs, *blob_inputs),
        other => {
            return Err(ConversionError::InvalidShape(format!(
                "dense weights of {} must be two-dimensional, got {:?}",
                native_layer.name, other
            )))
        }
    };

    if blob_inputs != num_inputs {
        return Err(ConversionError::InvalidShape(format!(
            "dense weights of {} expect {} inputs, previous layer has {}",
            native_layer.name, blob_inputs, num_inputs
        )));
    }

    let kernel = Array2::from_shape_vec((num_outputs, num_inputs), blob.data.clone())
        .map_err(|err| ConversionError::InvalidShape(format!("{}: {}", native_layer.name, err)))?
        .reversed_axes();

    Ok(LayerWeights {
        kernel: Kernel::Dense(kernel.as_standard_layout().to_owned()),
        bias: bias_or_zeros(blobs, num_outputs, &native_layer.name)?,
    })
}

// Convolution weight blobs are stored `[out_channels, in_channels, kernel_h, kernel_w]`.
fn conv_weights(
    net: &impl NativeNet,
    native_layer: &NativeLayer,
    kernel: [usize; 2],
    in_channels: usize,
) -> Result<LayerWeights> {
    let blobs = weight_blobs(net, native_layer)?;
    let blob = &blobs[0];

    let dims = match blob.shape.as_slice() {
        [out, inp, kh, kw] if *inp == in_channels && [*kh, *kw] == kernel => (*out, *inp, *kh, *kw),
        other => {
            return Err(ConversionError::InvalidShape(format!(
                "convolution weights of {} have shape {:?}, expected [_, {}, {}, {}]",
                native_layer.name, other, in_channels, kernel[0], kernel[1]
            )))
        }
    };

    let kernel = Array4::from_shape_vec(dims, blob.data.clone())
        .map_err(|err| ConversionError::InvalidShape(format!("{}: {}", native_layer.name, err)))?;

    Ok(LayerWeights {
        kernel: Kernel::Convolution(kernel),
        bias: bias_or_zeros(blobs, dims.0, &native_layer.name)?,
    })
}

// Batch normalization blobs are `gamma, beta, mean, variance`.
fn batch_norm_params(net: &impl NativeNet, native_layer: &NativeLayer) -> Result<BatchNormParams> {
    let blobs = weight_blobs(net, native_layer)?;

    if blobs.len() != 4 {
        return Err(ConversionError::InvalidShape(format!(
            "batch normalization layer {} needs 4 blobs, got {}",
            native_layer.name,
            blobs.len()
        )));
    }

    let to_array = |idx: usize| Array1::from_vec(blobs[idx].data.clone());

    Ok(BatchNormParams {
        gamma: to_array(0),
        beta: to_array(1),
        mean: to_array(2),
        variance: to_array(3),
        epsilon: native_layer.epsilon.unwrap_or(1e-3),
    })
}


#[cfg(test)]
mod tests {
    use super::test_nets::*;
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn small_conv_net_layers() {
        let model = extract(&small_conv_net()).unwrap();

        let labels: Vec<_> = model.labels().collect();
        assert_eq!(
            labels,
            [
                "01Convolution2D_2x4x4",
                "03AveragePooling2D_2x2x2",
                "04Flatten_8",
                "05Dense_4"
            ]
        );

        let conv = &model.layers[0];
        assert_eq!(conv.activation, Some(ActivationKind::Relu));
        assert_eq!(conv.border_mode, Some(BorderMode::Same));
        assert_eq!(conv.kernel_size, Some([3, 3]));
        assert_eq!(conv.strides, Some([1, 1]));
        assert_eq!(conv.input_shape, Some(vec![0, 1, 4, 4]));

        let pool = &model.layers[1];
        assert_eq!(pool.border_mode, Some(BorderMode::Valid));
        assert_eq!(pool.strides, Some([2, 2]));

        let dense = &model.layers[3];
        assert_eq!(dense.activation, Some(ActivationKind::Softmax));
        let Some(LayerWeights { kernel: Kernel::Dense(w), .. }) = &dense.weights else {
            panic!("expected dense weights");
        };
        assert_eq!(w.shape(), &[8, 4]);
        // blob is [outputs, inputs]: entry (out 1, in 2) sits at 1 * 8 + 2
        assert_approx_eq!(f32, w[[2, 1]], ramp(32, 0.05)[10]);
    }

    #[test]
    fn stated_output_shape_is_used_and_missing_one_inherited() {
        let mut net = small_conv_net();
        net.output_shapes.insert("conv1".to_string(), vec![0, 2, 4, 4]);
        net.layers.insert(2, layer("act", "Activation"));
        net.layers[2].activation = Some(ActivationKind::Linear);
        let model = extract(&net).unwrap();

        assert_eq!(model.layers[0].output_shape, vec![0, 2, 4, 4]);
        // "act" is fused into conv1, the relu behind it is not and inherits the shape
        assert_eq!(model.layers[1].kind, LayerKind::Activation);
        assert_eq!(model.layers[1].output_shape, vec![0, 2, 4, 4]);
    }

    #[test]
    fn unsupported_layer_type() {
        let mut net = small_conv_net();
        net.layers.push(layer("lrn", "LRN"));

        assert!(matches!(
            extract(&net),
            Err(ConversionError::UnsupportedLayerType(name)) if name == "LRN"
        ));
    }

    #[test]
    fn batch_norm_after_pooling_is_rejected() {
        let mut net = small_conv_net();
        net.layers.insert(4, layer("bn", "BatchNorm"));

        assert!(matches!(
            extract(&net),
            Err(ConversionError::UnsupportedTopology(_))
        ));
    }

    #[test]
    fn batch_norm_is_absorbed_and_activation_fused() {
        let mut net = small_conv_net();
        net.layers.insert(2, layer("bn", "BatchNorm"));
        net.layers[2].epsilon = Some(0.0);
        net.params.insert(
            "bn".to_string(),
            vec![
                blob(&[2], vec![2.0, 1.0]),
                blob(&[2], vec![0.5, 0.0]),
                blob(&[2], vec![0.0, 0.1]),
                blob(&[2], vec![4.0, 1.0]),
            ],
        );

        let model = extract(&net).unwrap();
        let conv = &model.layers[0];
        assert_eq!(conv.activation, Some(ActivationKind::Relu));
        assert_eq!(model.layers.len(), 4);

        let weights = conv.weights.as_ref().unwrap();
        let Kernel::Convolution(w) = &weights.kernel else {
            panic!("expected convolution kernel");
        };
        // gamma / sqrt(var) == 1.0 for channel 0
        assert_approx_eq!(f32, w[[0, 0, 1, 1]], ramp(18, 0.1)[4]);
        assert_approx_eq!(f32, weights.bias[0], 0.5);
        assert_approx_eq!(f32, weights.bias[1], 0.0);
    }

    #[test]
    fn unrecognized_border_mode() {
        let mut net = small_conv_net();
        net.layers[1].pad = 2;

        assert!(matches!(
            extract(&net),
            Err(ConversionError::UnrecognizedBorderMode { .. })
        ));
    }

    #[test]
    fn missing_weights() {
        let mut net = small_conv_net();
        net.params.remove("fc1");

        assert!(matches!(
            extract(&net),
            Err(ConversionError::MissingWeights(name)) if name == "fc1"
        ));
    }

    #[test]
    fn json_round_trip_of_native_description() {
        let net = small_conv_net();
        let json = serde_json::to_string(&net).unwrap();
        let parsed = JsonNet::from_json_str(&json).unwrap();

        assert_eq!(extract(&parsed).unwrap(), extract(&net).unwrap());
    }
}
