use crate::{params::CellParams, types::HashMap, util::get_decay_factor};

#[derive(Debug, Clone)]
pub struct Neuron {
    voltage: f32,
    i_syn_exc: f32,
    i_syn_inh: f32,
    refractory_until: usize,
}

impl Neuron {
    pub fn new(v_rest: f32) -> Self {
        Self {
            voltage: v_rest,
            i_syn_exc: 0.0,
            i_syn_inh: 0.0,
            refractory_until: 0,
        }
    }

    pub fn apply_psp(&mut self, weight: f32) {
        if weight >= 0.0 {
            self.i_syn_exc += weight;
        } else {
            self.i_syn_inh += weight;
        }
    }

    pub fn step(&mut self, t: usize, i_offset: f32, cell_params: &CellParams, dt: f32) -> bool {
        let i_syn = self.i_syn_exc + self.i_syn_inh;

        self.i_syn_exc *= get_decay_factor(dt, cell_params.tau_syn_e);
        self.i_syn_inh *= get_decay_factor(dt, cell_params.tau_syn_i);

        if self.is_refractory(t) {
            return false;
        }

        let decay_factor_voltage = get_decay_factor(dt, cell_params.tau_m);
        self.voltage =
            cell_params.v_rest + (self.voltage - cell_params.v_rest) * decay_factor_voltage;
        self.voltage += (i_syn + i_offset) * dt / cell_params.cm;

        if self.voltage >= cell_params.v_thresh {
            self.spike(t, cell_params, dt);
            true
        } else {
            false
        }
    }

    fn spike(&mut self, t: usize, cell_params: &CellParams, dt: f32) {
        let refractory_steps = (cell_params.tau_refrac / dt).round() as usize;
        self.voltage = cell_params.v_reset;
        self.refractory_until = t + 1 + refractory_steps;
    }

    fn is_refractory(&self, t: usize) -> bool {
        self.refractory_until > t
    }

    pub fn get_voltage(&self) -> f32 {
        self.voltage
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaxPoolGate {
    spike_counts: HashMap<usize, u32>,
    running_max: u32,
}

impl MaxPoolGate {
    pub fn on_input_spike(&mut self, source_index: usize) -> bool {
        let count = self.spike_counts.entry(source_index).or_insert(0);
        *count += 1;

        if *count >= self.running_max {
            self.running_max = *count;
            true
        } else {
            false
        }
    }
}
