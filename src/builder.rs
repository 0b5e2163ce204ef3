use log::{debug, info, warn};

use crate::connectivity::{self, Window};
use crate::error::{ConversionError, Result};
use crate::model::{ActivationKind, CanonicalLayer, Kernel, LayerKind, LayerWeights, ParsedModel};
use crate::network::{CellKind, Connection, Population, Projection, SpikingNetwork, INPUT_LABEL};
use crate::params::{ConversionParams, InputCoding};
use crate::shape::{BorderMode, FeatureMapGeometry};
use crate::types::{shape_size, Shape};

#[derive(Debug, Clone, PartialEq)]
pub struct FlattenShapeRecord {
    pub label: String,
    pub shape: Shape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    Empty,
    InputAdded,
    LayerAdded,
    Compiled,
}

pub struct NetworkBuilder {
    params: ConversionParams,
    state: BuildState,
    populations: Vec<Population>,
    projections: Vec<Projection>,
    flatten_records: Vec<FlattenShapeRecord>,
    pending_padding: bool,
    warned_max_pooling: bool,
}

pub fn build_network(model: &ParsedModel, params: &ConversionParams) -> Result<SpikingNetwork> {
    let mut builder = NetworkBuilder::new(params.clone());
    builder.add_input(&model.input_shape)?;

    for layer in &model.layers {
        builder.add_layer(layer)?;
    }

    builder.compile()
}

impl NetworkBuilder {
    pub fn new(params: ConversionParams) -> Self {
        Self {
            params,
            state: BuildState::Empty,
            populations: Vec::new(),
            projections: Vec::new(),
            flatten_records: Vec::new(),
            pending_padding: false,
            warned_max_pooling: false,
        }
    }

    fn expect_state(&self, operation: &str, allowed: &[BuildState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ConversionError::InvalidBuildState(format!(
                "cannot {} in state {:?}",
                operation, self.state
            )))
        }
    }

    pub fn add_input(&mut self, input_shape: &[usize]) -> Result<()> {
        self.expect_state("add input", &[BuildState::Empty])?;

        let shape = input_shape.get(1..).unwrap_or(&[]).to_vec();
        if shape.is_empty() || shape_size(&shape) == 0 {
            return Err(ConversionError::InvalidShape(format!(
                "input shape {:?} has no neurons",
                input_shape
            )));
        }

        let cell_kind = match self.params.input_params.input_coding {
            InputCoding::Poisson => CellKind::SpikeSourcePoisson,
            InputCoding::Deterministic => CellKind::SpikeSourceArray,
        };

        self.populations.push(Population::new(
            INPUT_LABEL,
            shape,
            cell_kind,
            self.params.cell_params.clone(),
        ));
        self.state = BuildState::InputAdded;

        Ok(())
    }

    pub fn add_layer(&mut self, layer: &CanonicalLayer) -> Result<()> {
        self.expect_state("add layer", &[BuildState::InputAdded, BuildState::LayerAdded])?;

        match layer.kind {
            LayerKind::ZeroPadding2D => self.add_zero_padding(layer)?,
            LayerKind::Flatten => {
                let shape = self.previous_population()?.shape.clone();
                debug!("{} records flattened shape {:?}", layer.label, shape);
                self.flatten_records.push(FlattenShapeRecord {
                    label: layer.label.clone(),
                    shape,
                });
            }
            LayerKind::Activation => {
                debug!("{} is implicit in the spiking units", layer.label);
            }
            LayerKind::Dense => {
                self.reject_pending_padding(layer)?;
                let connections = self.dense_connections(layer)?;
                self.push_layer(layer, CellKind::IfCurrExp, connections)?;
            }
            LayerKind::Convolution2D => {
                let connections = self.convolution_connections(layer)?;
                self.push_layer(layer, CellKind::IfCurrExp, connections)?;
            }
            LayerKind::AveragePooling2D | LayerKind::MaxPooling2D => {
                self.reject_pending_padding(layer)?;
                let (cell_kind, connections) = self.pooling_connections(layer)?;
                self.push_layer(layer, cell_kind, connections)?;
            }
        }

        self.state = BuildState::LayerAdded;

        Ok(())
    }

    pub fn add_prebuilt_layer(
        &mut self,
        population: Population,
        connections: Vec<Connection>,
    ) -> Result<()> {
        self.expect_state("add layer", &[BuildState::InputAdded, BuildState::LayerAdded])?;

        let source = self.populations.len() - 1;
        let projection = Projection {
            source,
            target: source + 1,
            connections,
        };
        projection.check_bounds(self.populations[source].size(), population.size())?;

        self.populations.push(population);
        self.projections.push(projection);
        self.state = BuildState::LayerAdded;

        Ok(())
    }

    pub fn compile(&mut self) -> Result<SpikingNetwork> {
        self.expect_state("compile", &[BuildState::InputAdded, BuildState::LayerAdded])?;

        if !self.flatten_records.is_empty() {
            return Err(ConversionError::UnconsumedFlattenRecord(
                self.flatten_records.iter().map(|record| record.label.clone()).collect(),
            ));
        }

        if self.pending_padding {
            return Err(ConversionError::UnsupportedPadding(
                "zero padding is not followed by a convolution".to_string(),
            ));
        }

        let network = SpikingNetwork {
            dt: self.params.simulation_params.dt,
            populations: std::mem::take(&mut self.populations),
            projections: std::mem::take(&mut self.projections),
        };
        network.validate()?;

        self.state = BuildState::Compiled;

        info!(
            "compiled {} populations, {} neurons, {} connections",
            network.populations.len(),
            network.num_neurons(),
            network.num_connections()
        );

        Ok(network)
    }

    fn previous_population(&self) -> Result<&Population> {
        self.populations
            .last()
            .ok_or_else(|| ConversionError::InvalidBuildState("no input population".to_string()))
    }

    fn previous_geometry(&self) -> Result<FeatureMapGeometry> {
        FeatureMapGeometry::from_shape(&self.previous_population()?.shape, self.params.data_format)
    }

    fn reject_pending_padding(&self, layer: &CanonicalLayer) -> Result<()> {
        if self.pending_padding {
            Err(ConversionError::UnsupportedPadding(format!(
                "zero padding before {} is only supported for convolutions",
                layer.label
            )))
        } else {
            Ok(())
        }
    }

    fn add_zero_padding(&mut self, layer: &CanonicalLayer) -> Result<()> {
        match layer.padding {
            Some([[1, 1], [1, 1]]) if !self.pending_padding => {
                self.pending_padding = true;
                Ok(())
            }
            other => Err(ConversionError::UnsupportedPadding(format!(
                "{}: only a single symmetric zero-padding of one cell is supported, got {:?}",
                layer.label, other
            ))),
        }
    }

    fn dense_connections(&mut self, layer: &CanonicalLayer) -> Result<Vec<Connection>> {
        let weights = layer_weights(layer)?;
        let Kernel::Dense(w) = &weights.kernel else {
            return Err(ConversionError::InvalidShape(format!(
                "{} needs a dense kernel",
                layer.label
            )));
        };

        if layer.activation == Some(ActivationKind::Softmax) {
            warn!("{}: softmax activation is approximated by relu", layer.label);
        }

        let delay = self.params.simulation_params.delay;

        match self.flatten_records.len() {
            0 => {
                let source_size = self.previous_population()?.size();
                if source_size != w.nrows() {
                    return Err(ConversionError::InvalidShape(format!(
                        "{} expects {} inputs, previous population has {}",
                        layer.label,
                        w.nrows(),
                        source_size
                    )));
                }
                connectivity::dense_connections(w, None, delay)
            }
            1 => {
                let record = self.flatten_records.remove(0);
                let geometry =
                    FeatureMapGeometry::from_shape(&record.shape, self.params.data_format)?;
                let remap = connectivity::flatten_remap(&geometry, self.params.data_format);
                connectivity::dense_connections(w, Some(&remap), delay)
            }
            _ => Err(ConversionError::UnconsumedFlattenRecord(
                self.flatten_records.iter().map(|record| record.label.clone()).collect(),
            )),
        }
    }

    fn convolution_connections(&mut self, layer: &CanonicalLayer) -> Result<Vec<Connection>> {
        let weights = layer_weights(layer)?;
        let Kernel::Convolution(kernel) = &weights.kernel else {
            return Err(ConversionError::InvalidShape(format!(
                "{} needs a convolution kernel",
                layer.label
            )));
        };

        let (_, _, kernel_height, kernel_width) = kernel.dim();
        let kernel_size = [kernel_height, kernel_width];
        let border_mode = layer.border_mode.unwrap_or(BorderMode::Valid);

        let pad = if self.pending_padding {
            if border_mode != BorderMode::Valid {
                return Err(ConversionError::UnsupportedPadding(format!(
                    "zero padding before {} requires a valid border mode, got {:?}",
                    layer.label, border_mode
                )));
            }
            self.pending_padding = false;
            [1, 1]
        } else {
            [border_mode.padding(kernel_height), border_mode.padding(kernel_width)]
        };

        let window = Window::new(
            self.previous_geometry()?,
            kernel_size,
            layer.strides.unwrap_or([1, 1]),
            pad,
        )?;

        self.check_output_size(layer, window.output_geometry(kernel.dim().0).size())?;

        connectivity::convolution_connections(
            kernel,
            &window,
            self.params.simulation_params.flip_kernel,
            self.params.simulation_params.delay,
        )
    }

    fn pooling_connections(
        &mut self,
        layer: &CanonicalLayer,
    ) -> Result<(CellKind, Vec<Connection>)> {
        let kernel_size = layer.kernel_size.ok_or_else(|| {
            ConversionError::InvalidShape(format!("{} has no pool size", layer.label))
        })?;
        let border_mode = layer.border_mode.unwrap_or(BorderMode::Valid);

        let window = Window::new(
            self.previous_geometry()?,
            kernel_size,
            layer.strides.unwrap_or(kernel_size),
            [border_mode.padding(kernel_size[0]), border_mode.padding(kernel_size[1])],
        )?;

        self.check_output_size(layer, window.output_geometry(window.input.channels).size())?;

        let delay = self.params.simulation_params.delay;

        if layer.kind == LayerKind::MaxPooling2D {
            if !self.warned_max_pooling {
                warn!("max pooling is approximated by spike gating on the most active input");
                self.warned_max_pooling = true;
            }
            Ok((CellKind::MaxPoolGate, connectivity::pooling_connections(&window, 1.0, delay)))
        } else {
            let weight = 1.0 / (kernel_size[0] * kernel_size[1]) as f32;
            Ok((CellKind::IfCurrExp, connectivity::pooling_connections(&window, weight, delay)))
        }
    }

    fn check_output_size(&self, layer: &CanonicalLayer, computed: usize) -> Result<()> {
        let declared = shape_size(layer.non_batch_output_shape());

        if declared == computed {
            Ok(())
        } else {
            Err(ConversionError::InvalidShape(format!(
                "{} declares {} outputs, its window produces {}",
                layer.label, declared, computed
            )))
        }
    }

    fn push_layer(
        &mut self,
        layer: &CanonicalLayer,
        cell_kind: CellKind,
        connections: Vec<Connection>,
    ) -> Result<()> {
        let mut population = Population::new(
            &layer.label,
            layer.non_batch_output_shape().to_vec(),
            cell_kind,
            self.params.cell_params.clone(),
        );

        if let Some(weights) = &layer.weights {
            population.bias_current = bias_current(weights, self.params.simulation_params.dt);
        }

        debug!(
            "{}: {} neurons, {} connections",
            population.label,
            population.size(),
            connections.len()
        );

        self.add_prebuilt_layer(population, connections)
    }
}

fn layer_weights(layer: &CanonicalLayer) -> Result<&LayerWeights> {
    layer
        .weights
        .as_ref()
        .ok_or_else(|| ConversionError::MissingWeights(layer.label.clone()))
}

pub fn bias_current(weights: &LayerWeights, dt: f32) -> Option<Vec<f32>> {
    if weights.bias.iter().all(|b| *b == 0.0) {
        None
    } else {
        Some(weights.bias.iter().map(|b| b * dt / 100.0).collect())
    }
}
