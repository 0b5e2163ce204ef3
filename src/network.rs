use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, Result};
use crate::params::CellParams;
use crate::types::{shape_size, Shape};

pub const INPUT_LABEL: &str = "InputLayer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    SpikeSourcePoisson,
    SpikeSourceArray,
    IfCurrExp,
    MaxPoolGate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    pub label: String,
    pub shape: Shape,
    pub cell_kind: CellKind,
    pub cell_params: CellParams,
    pub bias_current: Option<Vec<f32>>,
}

impl Population {
    pub fn new(label: &str, shape: Shape, cell_kind: CellKind, cell_params: CellParams) -> Self {
        Self {
            label: label.to_string(),
            shape,
            cell_kind,
            cell_params,
            bias_current: None,
        }
    }

    pub fn size(&self) -> usize {
        shape_size(&self.shape)
    }

    pub fn resting_potential(&self) -> f32 {
        self.cell_params.v_rest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub source_index: usize,
    pub target_index: usize,
    pub weight: f32,
    // ms
    pub delay: f32,
}

impl Connection {
    pub fn new(source_index: usize, target_index: usize, weight: f32, delay: f32) -> Self {
        Self {
            source_index,
            target_index,
            weight,
            delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub source: usize,
    pub target: usize,
    pub connections: Vec<Connection>,
}

impl Projection {
    pub fn check_bounds(&self, source_size: usize, target_size: usize) -> Result<()> {
        for connection in &self.connections {
            if connection.source_index >= source_size || connection.target_index >= target_size {
                return Err(ConversionError::InvalidShape(format!(
                    "connection {} -> {} out of bounds for populations of size {} and {}",
                    connection.source_index, connection.target_index, source_size, target_size
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpikingNetwork {
    pub dt: f32,
    pub populations: Vec<Population>,
    pub projections: Vec<Projection>,
}

impl SpikingNetwork {
    pub fn input_population(&self) -> Option<&Population> {
        self.populations.first()
    }

    // Cell parameters of the first non-input population; every population of
    // a converted network shares them.
    pub fn shared_cell_params(&self) -> CellParams {
        self.populations
            .get(1)
            .or_else(|| self.populations.first())
            .map(|population| population.cell_params.clone())
            .unwrap_or_default()
    }

    pub fn num_neurons(&self) -> usize {
        self.populations.iter().map(|population| population.size()).sum()
    }

    pub fn num_connections(&self) -> usize {
        self.projections.iter().map(|projection| projection.connections.len()).sum()
    }

    pub fn validate(&self) -> Result<()> {
        for population in &self.populations {
            if let Some(bias) = &population.bias_current {
                if bias.len() != population.size() {
                    return Err(ConversionError::InvalidShape(format!(
                        "{} has {} neurons but {} bias values",
                        population.label,
                        population.size(),
                        bias.len()
                    )));
                }
            }
        }

        for projection in &self.projections {
            let source = self.populations.get(projection.source);
            let target = self.populations.get(projection.target);

            match (source, target) {
                (Some(source), Some(target)) => {
                    projection.check_bounds(source.size(), target.size())?
                }
                _ => {
                    return Err(ConversionError::InvalidShape(format!(
                        "projection {} -> {} refers to a missing population",
                        projection.source, projection.target
                    )))
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_population_network(connections: Vec<Connection>) -> SpikingNetwork {
        let params = CellParams::default();
        SpikingNetwork {
            dt: 1.0,
            populations: vec![
                Population::new(INPUT_LABEL, vec![3], CellKind::SpikeSourceArray, params.clone()),
                Population::new("01Dense_2", vec![2], CellKind::IfCurrExp, params),
            ],
            projections: vec![Projection {
                source: 0,
                target: 1,
                connections,
            }],
        }
    }

    #[test]
    fn in_bounds_network_is_valid() {
        let network = two_population_network(vec![Connection::new(2, 1, 0.5, 1.0)]);
        assert!(network.validate().is_ok());
        assert_eq!(network.num_neurons(), 5);
        assert_eq!(network.num_connections(), 1);
    }

    #[test]
    fn shared_cell_params_skip_input() {
        let mut network = two_population_network(Vec::new());
        network.populations[1].cell_params.v_thresh = 0.5;
        assert_eq!(network.shared_cell_params().v_thresh, 0.5);

        network.populations.truncate(1);
        assert_eq!(network.shared_cell_params(), CellParams::default());
    }

    #[test]
    fn out_of_bounds_connection_is_rejected() {
        let network = two_population_network(vec![Connection::new(3, 0, 0.5, 1.0)]);
        assert!(matches!(network.validate(), Err(ConversionError::InvalidShape(_))));

        let network = two_population_network(vec![Connection::new(0, 2, 0.5, 1.0)]);
        assert!(network.validate().is_err());
    }

    #[test]
    fn bias_must_cover_every_neuron() {
        let mut network = two_population_network(vec![Connection::new(0, 0, 0.5, 1.0)]);
        network.populations[1].bias_current = Some(vec![0.0001]);
        assert!(matches!(network.validate(), Err(ConversionError::InvalidShape(_))));

        network.populations[1].bias_current = Some(vec![0.0001, 0.0002]);
        assert!(network.validate().is_ok());
    }
}
