use std::fmt;

use ndarray::{Array1, Array2, Array4};
use serde::{Deserialize, Serialize};

use crate::shape::{self, BorderMode};
use crate::types::Shape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Dense,
    Convolution2D,
    MaxPooling2D,
    AveragePooling2D,
    Activation,
    Flatten,
    ZeroPadding2D,
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Dense => "Dense",
            LayerKind::Convolution2D => "Convolution2D",
            LayerKind::MaxPooling2D => "MaxPooling2D",
            LayerKind::AveragePooling2D => "AveragePooling2D",
            LayerKind::Activation => "Activation",
            LayerKind::Flatten => "Flatten",
            LayerKind::ZeroPadding2D => "ZeroPadding2D",
        }
    }

    pub fn is_affine(&self) -> bool {
        matches!(self, LayerKind::Dense | LayerKind::Convolution2D)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    Relu,
    Softmax,
    Linear,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    // `[inputs, outputs]`
    Dense(Array2<f32>),
    // `[out_channels, in_channels, kernel_height, kernel_width]`
    Convolution(Array4<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerWeights {
    pub kernel: Kernel,
    pub bias: Array1<f32>,
}

impl LayerWeights {
    pub fn num_outputs(&self) -> usize {
        match &self.kernel {
            Kernel::Dense(w) => w.ncols(),
            Kernel::Convolution(w) => w.shape()[0],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalLayer {
    pub index: usize,
    pub kind: LayerKind,
    pub output_shape: Shape,
    pub label: String,
    pub weights: Option<LayerWeights>,
    pub activation: Option<ActivationKind>,
    pub kernel_size: Option<[usize; 2]>,
    pub strides: Option<[usize; 2]>,
    pub border_mode: Option<BorderMode>,
    pub input_shape: Option<Shape>,
    // `[[top, bottom], [left, right]]` of a zero-padding layer.
    pub padding: Option<[[usize; 2]; 2]>,
}

impl CanonicalLayer {
    pub fn new(index: usize, kind: LayerKind, output_shape: Shape) -> Self {
        let label = shape::layer_label(index, kind.name(), non_batch(&output_shape));

        Self {
            index,
            kind,
            output_shape,
            label,
            weights: None,
            activation: None,
            kernel_size: None,
            strides: None,
            border_mode: None,
            input_shape: None,
            padding: None,
        }
    }

    pub fn non_batch_output_shape(&self) -> &[usize] {
        non_batch(&self.output_shape)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedModel {
    pub input_shape: Shape,
    pub layers: Vec<CanonicalLayer>,
}

impl ParsedModel {
    pub fn non_batch_input_shape(&self) -> &[usize] {
        non_batch(&self.input_shape)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|layer| layer.label.as_str())
    }

    pub fn output_shape(&self) -> &[usize] {
        self.layers
            .last()
            .map(|layer| layer.non_batch_output_shape())
            .unwrap_or_else(|| self.non_batch_input_shape())
    }
}

pub fn non_batch(shape: &[usize]) -> &[usize] {
    shape.get(1..).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_derived_from_index_kind_and_shape() {
        let layer = CanonicalLayer::new(4, LayerKind::MaxPooling2D, vec![0, 16, 8, 8]);
        assert_eq!(layer.label, "04MaxPooling2D_16x8x8");
        assert_eq!(layer.non_batch_output_shape(), &[16, 8, 8]);
    }

    #[test]
    fn empty_model_output_shape_is_input_shape() {
        let model = ParsedModel {
            input_shape: vec![0, 1, 28, 28],
            layers: Vec::new(),
        };
        assert_eq!(model.output_shape(), &[1, 28, 28]);
    }
}
