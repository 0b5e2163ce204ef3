use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::builder::NetworkBuilder;
use crate::error::{ConversionError, Result};
use crate::network::{CellKind, Population, SpikingNetwork, INPUT_LABEL};
use crate::params::{CellParams, OverwritePolicy};
use crate::persistence;
use crate::types::Shape;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplayStep {
    AddInput {
        shape: Shape,
        cell_kind: CellKind,
    },
    AddLayer {
        label: String,
        shape: Shape,
        cell_kind: CellKind,
        connections: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        biases: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    pub config_path: Option<PathBuf>,
    pub dt: f32,
    pub cell_params: CellParams,
    pub steps: Vec<ReplayStep>,
}

pub fn replay_script_path(dir: &Path, filename_snn: &str) -> PathBuf {
    dir.join(format!("{}.replay.yaml", filename_snn))
}

pub fn render_replay_script(network: &SpikingNetwork, config_path: Option<&Path>) -> ReplayScript {
    let steps = network
        .populations
        .iter()
        .map(|population| {
            if population.label == INPUT_LABEL {
                ReplayStep::AddInput {
                    shape: population.shape.clone(),
                    cell_kind: population.cell_kind,
                }
            } else {
                ReplayStep::AddLayer {
                    label: population.label.clone(),
                    shape: population.shape.clone(),
                    cell_kind: population.cell_kind,
                    connections: population.label.clone(),
                    biases: population
                        .bias_current
                        .as_ref()
                        .map(|_| format!("{}_biases", population.label)),
                }
            }
        })
        .collect();

    ReplayScript {
        config_path: config_path.map(Path::to_path_buf),
        dt: network.dt,
        cell_params: network.shared_cell_params(),
        steps,
    }
}

pub fn write_replay_script(
    script: &ReplayScript,
    path: &Path,
    policy: OverwritePolicy,
) -> Result<()> {
    if !persistence::may_write(path, policy)? {
        return Ok(());
    }

    fs::write(path, serde_yaml::to_string(script)?)?;
    info!("wrote replay script {}", path.display());

    Ok(())
}

pub fn read_replay_script(path: &Path) -> Result<ReplayScript> {
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

pub fn replay(script: &ReplayScript, dir: &Path) -> Result<SpikingNetwork> {
    let mut steps = script.steps.iter();

    let Some(ReplayStep::AddInput { shape, cell_kind }) = steps.next() else {
        return Err(ConversionError::InvalidBuildState(
            "replay script must start with the input population".to_string(),
        ));
    };

    let params = persistence::rebuild_params(*cell_kind, script.dt, &script.cell_params);
    let mut builder = NetworkBuilder::new(params);
    let mut input_shape = vec![0];
    input_shape.extend_from_slice(shape);
    builder.add_input(&input_shape)?;

    for step in steps {
        match step {
            ReplayStep::AddInput { .. } => {
                return Err(ConversionError::InvalidBuildState(
                    "replay script adds a second input population".to_string(),
                ))
            }
            ReplayStep::AddLayer {
                label,
                shape,
                cell_kind,
                connections,
                biases,
            } => {
                let mut population = Population::new(
                    label,
                    shape.clone(),
                    *cell_kind,
                    script.cell_params.clone(),
                );
                if let Some(biases) = biases {
                    population.bias_current = Some(persistence::read_biases(&dir.join(biases))?);
                }

                let connections = persistence::read_connections(&dir.join(connections))?;
                builder.add_prebuilt_layer(population, connections)?;
            }
        }
    }

    builder.compile()
}
