use ndarray::{Array2, Array4};

use crate::error::{ConversionError, Result};
use crate::network::Connection;
use crate::params::DataFormat;
use crate::shape::{self, FeatureMapGeometry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub input: FeatureMapGeometry,
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
    pub pad: [usize; 2],
    out_height: usize,
    out_width: usize,
}

impl Window {
    pub fn new(
        input: FeatureMapGeometry,
        kernel: [usize; 2],
        stride: [usize; 2],
        pad: [usize; 2],
    ) -> Result<Self> {
        let out_height = shape::output_length(input.height, kernel[0], stride[0], pad[0])?;
        let out_width = shape::output_length(input.width, kernel[1], stride[1], pad[1])?;

        Ok(Self {
            input,
            kernel,
            stride,
            pad,
            out_height,
            out_width,
        })
    }

    pub fn output_geometry(&self, channels: usize) -> FeatureMapGeometry {
        FeatureMapGeometry {
            channels,
            height: self.out_height,
            width: self.out_width,
        }
    }

    pub fn receptive_field(
        &self,
        out_row: usize,
        out_col: usize,
    ) -> impl Iterator<Item = (usize, usize, usize, usize)> + '_ {
        let row_origin = (out_row * self.stride[0]) as isize - self.pad[0] as isize;
        let col_origin = (out_col * self.stride[1]) as isize - self.pad[1] as isize;

        (0..self.kernel[0]).flat_map(move |k_row| {
            (0..self.kernel[1]).filter_map(move |k_col| {
                let in_row = row_origin + k_row as isize;
                let in_col = col_origin + k_col as isize;

                if in_row < 0
                    || in_col < 0
                    || in_row as usize >= self.input.height
                    || in_col as usize >= self.input.width
                {
                    None
                } else {
                    Some((k_row, k_col, in_row as usize, in_col as usize))
                }
            })
        })
    }
}

pub fn flatten_remap(geometry: &FeatureMapGeometry, data_format: DataFormat) -> Vec<usize> {
    (0..geometry.size())
        .map(|linear_index| {
            let (channel, row, col) = geometry.coordinates(linear_index, data_format);
            geometry.index(channel, row, col)
        })
        .collect()
}

pub fn dense_connections(
    weights: &Array2<f32>,
    remap: Option<&[usize]>,
    delay: f32,
) -> Result<Vec<Connection>> {
    if let Some(remap) = remap {
        if remap.len() != weights.nrows() {
            return Err(ConversionError::InvalidShape(format!(
                "flattened input has {} neurons, weights expect {}",
                remap.len(),
                weights.nrows()
            )));
        }
    }

    let mut connections = Vec::with_capacity(weights.len());

    for ((row, col), weight) in weights.indexed_iter() {
        let source_index = remap.map_or(row, |remap| remap[row]);
        connections.push(Connection::new(source_index, col, *weight, delay));
    }

    Ok(connections)
}

pub fn kernel_tap(
    kernel: &Array4<f32>,
    out_channel: usize,
    in_channel: usize,
    k_row: usize,
    k_col: usize,
    flip_kernel: bool,
) -> f32 {
    let (_, _, kernel_height, kernel_width) = kernel.dim();

    if flip_kernel {
        kernel[[out_channel, in_channel, kernel_height - 1 - k_row, kernel_width - 1 - k_col]]
    } else {
        kernel[[out_channel, in_channel, k_row, k_col]]
    }
}

// Kernel is `[out_channels, in_channels, kernel_height, kernel_width]`.
pub fn convolution_connections(
    kernel: &Array4<f32>,
    window: &Window,
    flip_kernel: bool,
    delay: f32,
) -> Result<Vec<Connection>> {
    let (out_channels, in_channels, kernel_height, kernel_width) = kernel.dim();

    if in_channels != window.input.channels || [kernel_height, kernel_width] != window.kernel {
        return Err(ConversionError::InvalidShape(format!(
            "kernel of shape {:?} does not match window over {:?}",
            kernel.shape(),
            window.input
        )));
    }

    let output = window.output_geometry(out_channels);
    let mut connections = Vec::new();

    for out_channel in 0..out_channels {
        for out_row in 0..output.height {
            for out_col in 0..output.width {
                let target_index = output.index(out_channel, out_row, out_col);

                for in_channel in 0..in_channels {
                    for (k_row, k_col, in_row, in_col) in window.receptive_field(out_row, out_col) {
                        connections.push(Connection::new(
                            window.input.index(in_channel, in_row, in_col),
                            target_index,
                            kernel_tap(kernel, out_channel, in_channel, k_row, k_col, flip_kernel),
                            delay,
                        ));
                    }
                }
            }
        }
    }

    Ok(connections)
}

pub fn pooling_connections(window: &Window, weight: f32, delay: f32) -> Vec<Connection> {
    let output = window.output_geometry(window.input.channels);
    let mut connections = Vec::new();

    for channel in 0..output.channels {
        for out_row in 0..output.height {
            for out_col in 0..output.width {
                let target_index = output.index(channel, out_row, out_col);

                for (_, _, in_row, in_col) in window.receptive_field(out_row, out_col) {
                    connections.push(Connection::new(
                        window.input.index(channel, in_row, in_col),
                        target_index,
                        weight,
                        delay,
                    ));
                }
            }
        }
    }

    connections
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use itertools::Itertools;
    use rand::{distributions::Uniform, prelude::Distribution, rngs::StdRng, SeedableRng};

    fn geometry(channels: usize, height: usize, width: usize) -> FeatureMapGeometry {
        FeatureMapGeometry {
            channels,
            height,
            width,
        }
    }

    #[test]
    fn dense_cross_product() {
        let weights = Array2::from_shape_fn((5, 3), |(i, j)| (i * 3 + j) as f32 * 0.25 - 1.0);
        let connections = dense_connections(&weights, None, 2.0).unwrap();

        assert_eq!(connections.len(), 15);

        for connection in &connections {
            assert_eq!(
                connection.weight,
                weights[[connection.source_index, connection.target_index]]
            );
            assert_approx_eq!(f32, connection.delay, 2.0);
        }

        let pairs: Vec<_> = connections
            .iter()
            .map(|c| (c.source_index, c.target_index))
            .unique()
            .collect();
        assert_eq!(pairs.len(), 15);
    }

    #[test]
    fn channels_last_flatten_remap() {
        // shape (h=2, w=2, c=3) in channels_last
        let geometry =
            FeatureMapGeometry::from_shape(&[2, 2, 3], DataFormat::ChannelsLast).unwrap();
        let remap = flatten_remap(&geometry, DataFormat::ChannelsLast);

        // i = (y * w + x) * c + f  ->  f * h * w + y * w + x
        assert_eq!(remap, vec![0, 4, 8, 1, 5, 9, 2, 6, 10, 3, 7, 11]);
    }

    #[test]
    fn channels_first_flatten_remap_is_identity() {
        let geometry = geometry(3, 2, 2);
        let remap = flatten_remap(&geometry, DataFormat::ChannelsFirst);
        assert_eq!(remap, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn remapped_dense_connections() {
        let weights = Array2::from_shape_fn((4, 2), |(i, j)| (i * 2 + j) as f32);
        let remap = [2, 0, 3, 1];
        let connections = dense_connections(&weights, Some(&remap), 1.0).unwrap();

        assert_eq!(connections.len(), 8);
        let from_row_0: Vec<_> = connections.iter().filter(|c| c.weight < 2.0).collect();
        assert!(from_row_0.iter().all(|c| c.source_index == 2));

        assert!(dense_connections(&weights, Some(&[0, 1]), 1.0).is_err());
    }

    #[test]
    fn valid_convolution_geometry() {
        let window = Window::new(geometry(1, 4, 4), [3, 3], [1, 1], [0, 0]).unwrap();
        let kernel = Array4::from_shape_fn((2, 1, 3, 3), |(o, _, r, c)| (o * 9 + r * 3 + c) as f32);
        let connections = convolution_connections(&kernel, &window, false, 1.0).unwrap();

        // 2 output channels x 2x2 positions x 9 taps
        assert_eq!(connections.len(), 2 * 4 * 9);

        // output (0, 1, 1) sees input rows 1..4, cols 1..4
        let into_last: Vec<_> = connections.iter().filter(|c| c.target_index == 3).collect();
        assert_eq!(into_last.len(), 9);
        let top_left = into_last.iter().find(|c| c.source_index == 5).unwrap();
        assert_approx_eq!(f32, top_left.weight, 0.0);
        let bottom_right = into_last.iter().find(|c| c.source_index == 15).unwrap();
        assert_approx_eq!(f32, bottom_right.weight, 8.0);
    }

    #[test]
    fn flipped_kernel() {
        let window = Window::new(geometry(1, 3, 3), [3, 3], [1, 1], [0, 0]).unwrap();
        let kernel = Array4::from_shape_fn((1, 1, 3, 3), |(_, _, r, c)| (r * 3 + c) as f32);
        let connections = convolution_connections(&kernel, &window, true, 1.0).unwrap();

        let from_first = connections.iter().find(|c| c.source_index == 0).unwrap();
        assert_approx_eq!(f32, from_first.weight, 8.0);
    }

    #[test]
    fn padded_convolution_skips_out_of_bounds_taps() {
        let window = Window::new(geometry(1, 3, 3), [3, 3], [1, 1], [1, 1]).unwrap();
        let kernel = Array4::from_elem((1, 1, 3, 3), 1.0);
        let connections = convolution_connections(&kernel, &window, false, 1.0).unwrap();

        // corner outputs see 4 taps, edges 6, center 9
        assert_eq!(connections.len(), 4 * 4 + 4 * 6 + 9);
        let into_corner = connections.iter().filter(|c| c.target_index == 0).count();
        assert_eq!(into_corner, 4);
    }

    #[test]
    fn convolution_indices_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(0);
        let dist = Uniform::new(-1.0f32, 1.0);

        for (input, kernel_size, stride, pad) in [
            (geometry(2, 7, 5), [3, 3], [1, 1], [1, 1]),
            (geometry(3, 8, 8), [5, 5], [2, 2], [4, 4]),
            (geometry(1, 6, 9), [3, 1], [2, 1], [2, 0]),
            (geometry(2, 5, 5), [2, 2], [1, 1], [0, 0]),
        ] {
            let window = Window::new(input, kernel_size, stride, pad).unwrap();
            let kernel_shape = (4, input.channels, kernel_size[0], kernel_size[1]);
            let kernel = Array4::from_shape_fn(kernel_shape, |_| dist.sample(&mut rng));
            let connections = convolution_connections(&kernel, &window, false, 1.0).unwrap();
            let output_size = window.output_geometry(4).size();

            assert!(!connections.is_empty());
            assert!(connections.iter().all(|c| c.source_index < input.size()));
            assert!(connections.iter().all(|c| c.target_index < output_size));
        }
    }

    #[test]
    fn mismatched_kernel() {
        let window = Window::new(geometry(2, 4, 4), [3, 3], [1, 1], [0, 0]).unwrap();
        let kernel = Array4::zeros((1, 1, 3, 3));
        assert!(convolution_connections(&kernel, &window, false, 1.0).is_err());
    }

    #[test]
    fn average_pooling_connections() {
        let window = Window::new(geometry(2, 4, 4), [2, 2], [2, 2], [0, 0]).unwrap();
        let connections = pooling_connections(&window, 0.25, 1.0);

        assert_eq!(connections.len(), 2 * 4 * 4);

        let into_second_channel_first: Vec<_> = connections
            .iter()
            .filter(|c| c.target_index == 4)
            .map(|c| c.source_index)
            .sorted()
            .collect();
        assert_eq!(into_second_channel_first, vec![16, 17, 20, 21]);
        assert!(connections.iter().all(|c| c.weight == 0.25));
    }
}
