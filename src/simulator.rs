use crate::delay_buffer::DelayBuffer;
use crate::error::{ConversionError, Result};
use crate::network::{CellKind, Population, SpikingNetwork};
use crate::neuron::{MaxPoolGate, Neuron};
use crate::params::CellParams;
use crate::util::get_delay_steps;
use log::debug;

#[derive(Debug, Clone, Copy)]
struct Synapse {
    target_index: usize,
    weight: f32,
    delay_steps: usize,
}

#[derive(Debug, Clone, Copy)]
struct SpikeEvent {
    source_index: usize,
    target_index: usize,
    weight: f32,
}

#[derive(Debug)]
struct FanOut {
    target: usize,
    synapses: Vec<Vec<Synapse>>,
}

#[derive(Debug)]
enum Cells {
    Source,
    IfCurrExp {
        neurons: Vec<Neuron>,
        i_offset: Vec<f32>,
        cell_params: CellParams,
    },
    MaxPoolGate(Vec<MaxPoolGate>),
}

#[derive(Debug)]
struct PopulationState {
    size: usize,
    cells: Cells,
    incoming: DelayBuffer<SpikeEvent>,
    fan_outs: Vec<FanOut>,
}

impl PopulationState {
    fn new(population: &Population) -> Self {
        let size = population.size();

        let cells = match population.cell_kind {
            CellKind::SpikeSourcePoisson | CellKind::SpikeSourceArray => Cells::Source,
            CellKind::IfCurrExp => Cells::IfCurrExp {
                neurons: vec![Neuron::new(population.resting_potential()); size],
                i_offset: population.bias_current.clone().unwrap_or_else(|| vec![0.0; size]),
                cell_params: population.cell_params.clone(),
            },
            CellKind::MaxPoolGate => Cells::MaxPoolGate(vec![MaxPoolGate::default(); size]),
        };

        Self {
            size,
            cells,
            incoming: DelayBuffer::new(1),
            fan_outs: Vec::new(),
        }
    }

    fn reset(&mut self, v_rest: f32) {
        match &mut self.cells {
            Cells::Source => {}
            Cells::IfCurrExp { neurons, .. } => neurons
                .iter_mut()
                .for_each(|neuron| *neuron = Neuron::new(v_rest)),
            Cells::MaxPoolGate(gates) => gates
                .iter_mut()
                .for_each(|gate| *gate = MaxPoolGate::default()),
        }

        self.incoming.clear();
    }

    fn voltages(&self) -> Option<Vec<f32>> {
        match &self.cells {
            Cells::IfCurrExp { neurons, .. } => {
                Some(neurons.iter().map(Neuron::get_voltage).collect())
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct TickResult {
    pub t: usize,
    pub spiking_nids: Vec<Vec<usize>>,
    pub synaptic_transmission_count: usize,
}

pub struct Simulator {
    dt: f32,
    populations: Vec<PopulationState>,
    resting_potentials: Vec<f32>,
    tick_period: usize,
}

impl Simulator {
    pub fn new(network: &SpikingNetwork, dt: f32) -> Result<Self> {
        network.validate()?;

        if dt <= 0.0 {
            return Err(ConversionError::InvalidShape(format!(
                "time step {} is not positive",
                dt
            )));
        }

        let mut populations: Vec<PopulationState> = network
            .populations
            .iter()
            .map(PopulationState::new)
            .collect();

        let mut horizons = vec![1; populations.len()];

        for projection in &network.projections {
            let mut synapses = vec![Vec::new(); populations[projection.source].size];

            for connection in &projection.connections {
                let delay_steps = get_delay_steps(connection.delay, dt);
                horizons[projection.target] = horizons[projection.target].max(delay_steps + 1);

                synapses[connection.source_index].push(Synapse {
                    target_index: connection.target_index,
                    weight: connection.weight,
                    delay_steps,
                });
            }

            populations[projection.source].fan_outs.push(FanOut {
                target: projection.target,
                synapses,
            });
        }

        for (population, horizon) in populations.iter_mut().zip(horizons) {
            population.incoming = DelayBuffer::new(horizon);
        }

        debug!(
            "simulator ready: {} populations, dt = {} ms",
            populations.len(),
            dt
        );

        Ok(Simulator {
            dt,
            resting_potentials: network
                .populations
                .iter()
                .map(Population::resting_potential)
                .collect(),
            populations,
            tick_period: 0,
        })
    }

    pub fn get_num_in_channels(&self) -> usize {
        self.populations.first().map_or(0, |population| population.size)
    }

    pub fn get_tick_period(&self) -> usize {
        self.tick_period
    }

    fn validate_tick_input(&self, spiking_in_channel_ids: &[usize]) -> Result<()> {
        let num_in_channels = self.get_num_in_channels();

        match spiking_in_channel_ids.iter().find(|id| **id >= num_in_channels) {
            Some(id) => Err(ConversionError::InvalidShape(format!(
                "input channel {} out of range, {} channels",
                id, num_in_channels
            ))),
            None => Ok(()),
        }
    }

    pub fn tick(&mut self, spiking_in_channel_ids: &[usize]) -> Result<TickResult> {
        self.validate_tick_input(spiking_in_channel_ids)?;

        let t = self.tick_period;
        let dt = self.dt;
        let mut spiking_nids = Vec::with_capacity(self.populations.len());
        let mut synaptic_transmission_count = 0;

        for pop_idx in 0..self.populations.len() {
            let population = &mut self.populations[pop_idx];

            let mut spiking = match &mut population.cells {
                Cells::Source => {
                    population.incoming.take_due().for_each(drop);
                    spiking_in_channel_ids.to_vec()
                }
                Cells::IfCurrExp {
                    neurons,
                    i_offset,
                    cell_params,
                } => {
                    for event in population.incoming.take_due() {
                        neurons[event.target_index].apply_psp(event.weight);
                        synaptic_transmission_count += 1;
                    }

                    neurons
                        .iter_mut()
                        .zip(i_offset.iter())
                        .enumerate()
                        .filter_map(|(nid, (neuron, offset))| {
                            neuron.step(t, *offset, cell_params, dt).then_some(nid)
                        })
                        .collect()
                }
                Cells::MaxPoolGate(gates) => {
                    let mut passed = Vec::new();
                    for event in population.incoming.take_due() {
                        synaptic_transmission_count += 1;
                        if gates[event.target_index].on_input_spike(event.source_index) {
                            passed.push(event.target_index);
                        }
                    }
                    passed
                }
            };

            spiking.sort_unstable();
            spiking.dedup();

            self.propagate(pop_idx, &spiking);
            spiking_nids.push(spiking);
        }

        self.tick_period += 1;

        Ok(TickResult {
            t,
            spiking_nids,
            synaptic_transmission_count,
        })
    }

    pub fn tick_no_input(&mut self) -> Result<TickResult> {
        self.tick(&[])
    }

    fn propagate(&mut self, pop_idx: usize, spiking: &[usize]) {
        let fan_outs = std::mem::take(&mut self.populations[pop_idx].fan_outs);

        for fan_out in &fan_outs {
            let incoming = &mut self.populations[fan_out.target].incoming;

            for source_index in spiking {
                for synapse in &fan_out.synapses[*source_index] {
                    incoming.schedule(
                        synapse.delay_steps,
                        SpikeEvent {
                            source_index: *source_index,
                            target_index: synapse.target_index,
                            weight: synapse.weight,
                        },
                    );
                }
            }
        }

        self.populations[pop_idx].fan_outs = fan_outs;
    }

    pub fn get_voltages(&self, pop_idx: usize) -> Option<Vec<f32>> {
        self.populations.get(pop_idx).and_then(PopulationState::voltages)
    }

    pub fn reset(&mut self) {
        for (population, v_rest) in self.populations.iter_mut().zip(&self.resting_potentials) {
            population.reset(*v_rest);
        }

        self.tick_period = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Connection, Projection, INPUT_LABEL};
    use float_cmp::assert_approx_eq;
    use itertools::assert_equal;

    const EMPTY: [usize; 0] = [];

    fn chain(weight: f32, delay: f32, cell_kind: CellKind) -> SpikingNetwork {
        let params = CellParams::default();
        SpikingNetwork {
            dt: 1.0,
            populations: vec![
                Population::new(INPUT_LABEL, vec![2], CellKind::SpikeSourceArray, params.clone()),
                Population::new("01Dense_1", vec![1], cell_kind, params),
            ],
            projections: vec![Projection {
                source: 0,
                target: 1,
                connections: vec![
                    Connection::new(0, 0, weight, delay),
                    Connection::new(1, 0, weight, delay),
                ],
            }],
        }
    }

    #[test]
    fn spike_arrives_after_delay() {
        let mut sut = Simulator::new(&chain(1.0, 3.0, CellKind::IfCurrExp), 1.0).unwrap();

        let result = sut.tick(&[0]).unwrap();
        assert_equal(result.spiking_nids[0].iter().copied(), [0]);
        assert_equal(result.spiking_nids[1].iter().copied(), EMPTY);

        for _ in 0..2 {
            assert!(sut.tick_no_input().unwrap().spiking_nids[1].is_empty());
        }

        let result = sut.tick_no_input().unwrap();
        assert_eq!(result.t, 3);
        assert_equal(result.spiking_nids[1].iter().copied(), [0]);
        assert_eq!(result.synaptic_transmission_count, 1);
    }

    #[test]
    fn sub_threshold_input_accumulates() {
        let mut sut = Simulator::new(&chain(0.6, 1.0, CellKind::IfCurrExp), 1.0).unwrap();

        sut.tick(&[0]).unwrap();
        assert!(sut.tick(&[1]).unwrap().spiking_nids[1].is_empty());
        assert_approx_eq!(f32, sut.get_voltages(1).unwrap()[0], 0.6, epsilon = 1e-6);

        let result = sut.tick_no_input().unwrap();
        assert_equal(result.spiking_nids[1].iter().copied(), [0]);
    }

    #[test]
    fn gate_forwards_leading_source() {
        let mut sut = Simulator::new(&chain(1.0, 1.0, CellKind::MaxPoolGate), 1.0).unwrap();

        sut.tick(&[0]).unwrap();
        sut.tick(&[0]).unwrap();
        assert_eq!(sut.tick(&[1]).unwrap().spiking_nids[1], vec![0]);
        // source 1 has a single spike against two of source 0
        assert!(sut.tick_no_input().unwrap().spiking_nids[1].is_empty());
        assert!(sut.get_voltages(1).is_none());
    }

    #[test]
    fn reset_drops_pending_spikes() {
        let mut sut = Simulator::new(&chain(1.0, 2.0, CellKind::IfCurrExp), 1.0).unwrap();

        sut.tick(&[0, 1]).unwrap();
        sut.reset();
        assert_eq!(sut.get_tick_period(), 0);

        for _ in 0..4 {
            assert!(sut.tick_no_input().unwrap().spiking_nids[1].is_empty());
        }
    }

    #[test]
    fn invalid_input_channel() {
        let mut sut = Simulator::new(&chain(1.0, 1.0, CellKind::IfCurrExp), 1.0).unwrap();
        assert!(matches!(sut.tick(&[2]), Err(ConversionError::InvalidShape(_))));
    }

    #[test]
    fn bias_current_drives_spiking() {
        let mut network = chain(0.0, 1.0, CellKind::IfCurrExp);
        network.populations[1].bias_current = Some(vec![0.6]);

        let mut sut = Simulator::new(&network, 1.0).unwrap();
        let spike_count: usize = (0..10)
            .map(|_| sut.tick_no_input().unwrap().spiking_nids[1].len())
            .sum();
        assert_eq!(spike_count, 5);
    }

    #[test]
    fn bias_shorter_than_population_is_rejected() {
        let mut network = chain(1.0, 1.0, CellKind::IfCurrExp);
        network.populations[1].shape = vec![3];
        network.populations[1].bias_current = Some(vec![0.0001]);

        assert!(matches!(Simulator::new(&network, 1.0), Err(ConversionError::InvalidShape(_))));
    }
}
