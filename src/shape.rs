use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, Result};
use crate::params::DataFormat;
use crate::types::Shape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BorderMode {
    Valid,
    Same,
    Full,
}

impl BorderMode {
    pub fn padding(&self, kernel_size: usize) -> usize {
        match self {
            BorderMode::Valid => 0,
            BorderMode::Same => kernel_size.saturating_sub(1) / 2,
            BorderMode::Full => kernel_size.saturating_sub(1),
        }
    }
}

pub fn border_mode_from_padding(pad: [usize; 2], kernel_size: [usize; 2]) -> Result<BorderMode> {
    if pad == [0, 0] {
        return Ok(BorderMode::Valid);
    }

    let same_pad = [
        BorderMode::Same.padding(kernel_size[0]),
        BorderMode::Same.padding(kernel_size[1]),
    ];

    if pad == same_pad {
        Ok(BorderMode::Same)
    } else {
        Err(ConversionError::UnrecognizedBorderMode { pad, kernel_size })
    }
}

pub fn output_length(input: usize, kernel_size: usize, stride: usize, pad: usize) -> Result<usize> {
    let padded = input + 2 * pad;

    if stride == 0 || kernel_size == 0 || padded < kernel_size {
        return Err(ConversionError::InvalidShape(format!(
            "window of size {} and stride {} does not fit input of length {} with padding {}",
            kernel_size, stride, input, pad
        )));
    }

    Ok((padded - kernel_size) / stride + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMapGeometry {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl FeatureMapGeometry {
    pub fn from_shape(shape: &[usize], data_format: DataFormat) -> Result<Self> {
        match (shape, data_format) {
            ([features], _) => Ok(Self {
                channels: *features,
                height: 1,
                width: 1,
            }),
            ([channels, height, width], DataFormat::ChannelsFirst) => Ok(Self {
                channels: *channels,
                height: *height,
                width: *width,
            }),
            ([height, width, channels], DataFormat::ChannelsLast) => Ok(Self {
                channels: *channels,
                height: *height,
                width: *width,
            }),
            _ => Err(ConversionError::InvalidShape(format!(
                "expected a feature map shape, got {:?}",
                shape
            ))),
        }
    }

    pub fn size(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn index(&self, channel: usize, row: usize, col: usize) -> usize {
        channel * self.height * self.width + row * self.width + col
    }

    pub fn coordinates(
        &self,
        linear_index: usize,
        data_format: DataFormat,
    ) -> (usize, usize, usize) {
        match data_format {
            DataFormat::ChannelsFirst => (
                linear_index / (self.height * self.width),
                (linear_index / self.width) % self.height,
                linear_index % self.width,
            ),
            DataFormat::ChannelsLast => (
                linear_index % self.channels,
                linear_index / (self.channels * self.width),
                (linear_index / self.channels) % self.width,
            ),
        }
    }
}

pub fn layer_label(index: usize, kind_name: &str, shape: &[usize]) -> String {
    format!("{:02}{}_{}", index, kind_name, shape.iter().join("x"))
}

pub fn shape_from_label(label: &str) -> Result<Shape> {
    let invalid = || ConversionError::InvalidShape(format!("no shape in label {}", label));

    let shape_str = label.split('_').nth(1).ok_or_else(invalid)?;

    shape_str
        .split('x')
        .map(|dim| dim.parse::<usize>().map_err(|_| invalid()))
        .collect()
}
