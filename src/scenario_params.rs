use ann2snn::params::ConversionParams;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct BenchmarkScenario {
    pub layer_sizes: Vec<usize>,
    pub max_weight: f32,
    pub mean_input_spikes_per_step: f64,
    pub num_steps: usize,
    pub conversion_params: ConversionParams,
}

pub fn get_scenario_params() -> BenchmarkScenario {
    let params_yaml_str = r#"
layer_sizes: [784, 512, 256, 10]
max_weight: 0.08
mean_input_spikes_per_step: 40.0
num_steps: 5000
conversion_params:
  simulation_params:
    dt: 1.0
    duration: 100.0
    delay: 1.0
    batch_size: 1
    reset_between_nth_sample: 1
    flip_kernel: false
    record_voltage: false
    seed_override: 0
  input_params:
    input_coding: Poisson
    max_input_rate: 1000.0
  cell_params:
    tau_m: 20.0
    cm: 1.0
    v_rest: 0.0
    v_reset: 0.0
    v_thresh: 1.0
    tau_refrac: 1.0
    tau_syn_e: 0.01
    tau_syn_i: 0.01
  data_format: ChannelsFirst
"#;

    serde_yaml::from_str(params_yaml_str).unwrap()
}
