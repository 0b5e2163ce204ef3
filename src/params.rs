use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use simple_error::SimpleError;

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionParams {
    pub simulation_params: SimulationParams,
    pub input_params: InputParams,
    pub cell_params: CellParams,
    pub output_params: OutputParams,
    pub data_format: DataFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub dt: f32,
    pub duration: f32,
    pub delay: f32,
    pub batch_size: usize,
    // Reset before every n-th sample. Zero resets only before the first sample.
    pub reset_between_nth_sample: usize,
    pub flip_kernel: bool,
    pub record_voltage: bool,
    pub seed_override: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputCoding {
    Poisson,
    Deterministic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputParams {
    pub input_coding: InputCoding,
    pub max_input_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellParams {
    pub tau_m: f32,
    pub cm: f32,
    pub v_rest: f32,
    pub v_reset: f32,
    pub v_thresh: f32,
    pub tau_refrac: f32,
    pub tau_syn_e: f32,
    pub tau_syn_i: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverwritePolicy {
    Overwrite,
    Prompt,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputParams {
    pub path_wd: PathBuf,
    pub filename_snn: String,
    pub overwrite: OverwritePolicy,
    pub write_replay_script: bool,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFormat {
    ChannelsFirst,
    ChannelsLast,
}

impl Default for DataFormat {
    fn default() -> Self {
        DataFormat::ChannelsFirst
    }
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            dt: 1.0,
            duration: 200.0,
            delay: 1.0,
            batch_size: 1,
            reset_between_nth_sample: 1,
            flip_kernel: false,
            record_voltage: false,
            seed_override: None,
        }
    }
}

impl SimulationParams {
    pub fn num_steps(&self) -> usize {
        (self.duration / self.dt).round() as usize
    }
}

impl Default for InputParams {
    fn default() -> Self {
        Self {
            input_coding: InputCoding::Poisson,
            max_input_rate: 1000.0,
        }
    }
}

impl Default for CellParams {
    fn default() -> Self {
        Self {
            tau_m: 1000.0,
            cm: 1.0,
            v_rest: 0.0,
            v_reset: 0.0,
            v_thresh: 1.0,
            tau_refrac: 0.0,
            tau_syn_e: 0.01,
            tau_syn_i: 0.01,
        }
    }
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            path_wd: PathBuf::from("."),
            filename_snn: String::from("snn"),
            overwrite: OverwritePolicy::Overwrite,
            write_replay_script: true,
            config_path: None,
        }
    }
}

impl ConversionParams {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

pub fn validate_conversion_params(params: &ConversionParams) -> Result<(), SimpleError> {
    validate_simulation_params(&params.simulation_params)?;
    validate_input_params(&params.input_params)?;
    validate_cell_params(&params.cell_params)?;
    validate_output_params(&params.output_params)?;

    Ok(())
}

fn validate_simulation_params(simulation_params: &SimulationParams) -> Result<(), SimpleError> {
    if simulation_params.dt <= 0.0 {
        return Err(SimpleError::new("dt must be strictly positive"));
    }

    if simulation_params.duration < simulation_params.dt {
        return Err(SimpleError::new("duration must not be less than dt"));
    }

    if simulation_params.delay <= 0.0 {
        return Err(SimpleError::new("delay must be strictly positive"));
    }

    if simulation_params.batch_size == 0 {
        return Err(SimpleError::new("batch_size must be strictly positive"));
    }

    Ok(())
}

fn validate_input_params(input_params: &InputParams) -> Result<(), SimpleError> {
    if input_params.max_input_rate <= 0.0 {
        return Err(SimpleError::new("max_input_rate must be strictly positive"));
    }

    Ok(())
}

fn validate_cell_params(cell_params: &CellParams) -> Result<(), SimpleError> {
    if cell_params.tau_m <= 0.0 {
        return Err(SimpleError::new("tau_m must be strictly positive"));
    }

    if cell_params.cm <= 0.0 {
        return Err(SimpleError::new("cm must be strictly positive"));
    }

    if cell_params.v_reset >= cell_params.v_thresh {
        return Err(SimpleError::new("v_reset must be less than v_thresh"));
    }

    if cell_params.v_rest >= cell_params.v_thresh {
        return Err(SimpleError::new("v_rest must be less than v_thresh"));
    }

    if cell_params.tau_refrac < 0.0 {
        return Err(SimpleError::new("tau_refrac must not be negative"));
    }

    if cell_params.tau_syn_e <= 0.0 || cell_params.tau_syn_i <= 0.0 {
        return Err(SimpleError::new(
            "synaptic time constants must be strictly positive",
        ));
    }

    Ok(())
}

fn validate_output_params(output_params: &OutputParams) -> Result<(), SimpleError> {
    if output_params.filename_snn.is_empty() {
        return Err(SimpleError::new("filename_snn must not be empty"));
    }

    Ok(())
}
