use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::builder::NetworkBuilder;
use crate::error::{ConversionError, Result};
use crate::network::{CellKind, Connection, Population, SpikingNetwork, INPUT_LABEL};
use crate::params::{CellParams, ConversionParams, InputCoding, OverwritePolicy};
use crate::types::{shape_size, HashMap, Shape};

pub const CONNECTION_HEADER: &str = r#"# columns = ["i", "j", "weight", "delay"]"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationDescriptor {
    pub size: usize,
    pub structure: Shape,
    pub celltype: CellKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i_offset: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyDescriptor {
    pub labels: Vec<String>,
    pub size: usize,
    pub populations: HashMap<String, PopulationDescriptor>,
    pub dt: f32,
    pub cell_params: CellParams,
}

impl AssemblyDescriptor {
    pub fn from_network(network: &SpikingNetwork) -> Self {
        Self {
            labels: network.populations.iter().map(|p| p.label.clone()).collect(),
            size: network.populations.len(),
            populations: network
                .populations
                .iter()
                .map(|p| {
                    (
                        p.label.clone(),
                        PopulationDescriptor {
                            size: p.size(),
                            structure: p.shape.clone(),
                            celltype: p.cell_kind,
                            i_offset: p.bias_current.clone(),
                        },
                    )
                })
                .collect(),
            dt: network.dt,
            cell_params: network.shared_cell_params(),
        }
    }

    fn population(&self, label: &str) -> Result<&PopulationDescriptor> {
        let descriptor = self.populations.get(label).ok_or_else(|| ConversionError::Parse {
            path: PathBuf::from(label),
            message: "label listed without a population entry".to_string(),
        })?;

        if descriptor.size != shape_size(&descriptor.structure) {
            return Err(ConversionError::InvalidShape(format!(
                "{} has size {} but structure {:?}",
                label, descriptor.size, descriptor.structure
            )));
        }

        Ok(descriptor)
    }
}

pub fn connection_file_path(dir: &Path, label: &str) -> PathBuf {
    dir.join(label)
}

pub fn bias_file_path(dir: &Path, label: &str) -> PathBuf {
    dir.join(format!("{}_biases", label))
}

fn confirm_overwrite(path: &Path) -> Result<bool> {
    print!("[WARNING] {} already exists - overwrite? [y/n] ", path.display());
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;

    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

pub fn may_write(path: &Path, policy: OverwritePolicy) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }

    match policy {
        OverwritePolicy::Overwrite => Ok(true),
        OverwritePolicy::Fail => Err(ConversionError::FileExists(path.to_path_buf())),
        OverwritePolicy::Prompt => {
            let confirmed = confirm_overwrite(path)?;
            if !confirmed {
                warn!("keeping existing {}", path.display());
            }
            Ok(confirmed)
        }
    }
}

pub fn save_assembly(network: &SpikingNetwork, path: &Path, policy: OverwritePolicy) -> Result<()> {
    if !may_write(path, policy)? {
        return Ok(());
    }

    let descriptor = AssemblyDescriptor::from_network(network);
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &descriptor)?;

    Ok(())
}

pub fn load_assembly(path: &Path) -> Result<AssemblyDescriptor> {
    if !path.is_file() {
        return Err(ConversionError::MissingAssembly(path.to_path_buf()));
    }

    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn write_connections(connections: &[Connection], path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{}", CONNECTION_HEADER)?;

    for connection in connections {
        writeln!(
            writer,
            "{} {} {} {}",
            connection.source_index, connection.target_index, connection.weight, connection.delay
        )?;
    }

    writer.flush()?;
    Ok(())
}

fn parse_error(path: &Path, line_idx: usize, message: impl std::fmt::Display) -> ConversionError {
    ConversionError::Parse {
        path: path.to_path_buf(),
        message: format!("line {}: {}", line_idx + 1, message),
    }
}

pub fn read_connections(path: &Path) -> Result<Vec<Connection>> {
    if !path.is_file() {
        return Err(ConversionError::MissingConnectionFile(path.to_path_buf()));
    }

    let reader = BufReader::new(File::open(path)?);
    let mut connections = Vec::new();

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let [i, j, weight, delay] = fields[..] else {
            return Err(parse_error(
                path,
                line_idx,
                format!("expected 4 columns, got {}", fields.len()),
            ));
        };

        connections.push(Connection::new(
            i.parse().map_err(|err| parse_error(path, line_idx, err))?,
            j.parse().map_err(|err| parse_error(path, line_idx, err))?,
            weight.parse().map_err(|err| parse_error(path, line_idx, err))?,
            delay.parse().map_err(|err| parse_error(path, line_idx, err))?,
        ));
    }

    Ok(connections)
}

pub fn write_biases(biases: &[f32], path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);

    for bias in biases {
        writeln!(writer, "{}", bias)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn read_biases(path: &Path) -> Result<Vec<f32>> {
    let content = fs::read_to_string(path)?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_idx, line)| line.trim().parse().map_err(|err| parse_error(path, line_idx, err)))
        .collect()
}

pub fn save_network(
    network: &SpikingNetwork,
    dir: &Path,
    filename: &str,
    policy: OverwritePolicy,
) -> Result<()> {
    fs::create_dir_all(dir)?;

    info!("saving network to {}", dir.display());

    save_assembly(network, &dir.join(filename), policy)?;

    for projection in &network.projections {
        let label = &network.populations[projection.target].label;
        let path = connection_file_path(dir, label);
        if may_write(&path, policy)? {
            write_connections(&projection.connections, &path)?;
        }
    }

    for population in network.populations.iter().filter(|p| p.label != INPUT_LABEL) {
        if let Some(bias) = &population.bias_current {
            let path = bias_file_path(dir, &population.label);
            if may_write(&path, policy)? {
                write_biases(bias, &path)?;
            }
        }
    }

    Ok(())
}

pub(crate) fn rebuild_params(
    input_kind: CellKind,
    dt: f32,
    cell_params: &CellParams,
) -> ConversionParams {
    let mut params = ConversionParams::default();
    params.input_params.input_coding = match input_kind {
        CellKind::SpikeSourcePoisson => InputCoding::Poisson,
        _ => InputCoding::Deterministic,
    };
    params.simulation_params.dt = dt;
    params.cell_params = cell_params.clone();
    params
}

pub fn load_network(dir: &Path, filename: &str) -> Result<SpikingNetwork> {
    let assembly = load_assembly(&dir.join(filename))?;

    let (input_label, layer_labels) = assembly
        .labels
        .split_first()
        .ok_or_else(|| ConversionError::Parse {
            path: dir.join(filename),
            message: "assembly has no populations".to_string(),
        })?;

    let input = assembly.population(input_label)?;

    let params = rebuild_params(input.celltype, assembly.dt, &assembly.cell_params);
    let mut builder = NetworkBuilder::new(params);
    let mut input_shape = vec![0];
    input_shape.extend_from_slice(&input.structure);
    builder.add_input(&input_shape)?;

    for label in layer_labels {
        let descriptor = assembly.population(label)?;
        let connections = read_connections(&connection_file_path(dir, label))?;

        let mut population = Population::new(
            label,
            descriptor.structure.clone(),
            descriptor.celltype,
            assembly.cell_params.clone(),
        );
        population.bias_current = descriptor.i_offset.clone();

        builder.add_prebuilt_layer(population, connections)?;
    }

    let network = builder.compile()?;
    info!("loaded {} populations from {}", network.populations.len(), dir.display());

    Ok(network)
}
