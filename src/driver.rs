use log::{debug, info};
use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, Axis, IxDyn};
use simple_error::try_with;

use crate::encoding::InputEncoder;
use crate::error::{ConversionError, Result};
use crate::evaluate::to_channels_first;
use crate::network::SpikingNetwork;
use crate::params::{self, ConversionParams, DataFormat, SimulationParams};
use crate::shape::FeatureMapGeometry;
use crate::simulator::Simulator;
use crate::types::Shape;
use crate::util::argmax;

#[derive(Debug, Clone)]
pub struct PopulationRecording {
    pub label: String,
    // `[batch, ...population shape, num_steps]`; 1 where a neuron spiked.
    pub spikes: ArrayD<u32>,
    pub voltages: Option<ArrayD<f32>>,
}

#[derive(Debug, Clone)]
pub struct BatchRecordings {
    pub populations: Vec<PopulationRecording>,
}

impl BatchRecordings {
    pub fn output(&self) -> Option<&PopulationRecording> {
        self.populations.last()
    }

    pub fn get(&self, label: &str) -> Option<&PopulationRecording> {
        self.populations.iter().find(|recording| recording.label == label)
    }

    pub fn output_spike_counts(&self) -> Option<Array2<u32>> {
        let output = self.output()?;
        let batch_size = output.spikes.len_of(Axis(0));
        let counts = output.spikes.sum_axis(Axis(output.spikes.ndim() - 1));
        let num_outputs = counts.len() / batch_size.max(1);

        counts.into_shape_with_order((batch_size, num_outputs)).ok()
    }
}

pub fn top1_correct(spike_counts: ArrayView2<u32>, y: ArrayView2<f32>) -> usize {
    spike_counts
        .outer_iter()
        .zip(y.outer_iter())
        .filter(|(counts, truth)| {
            let counts = counts.mapv(|count| count as f32);
            argmax(counts.view()) == argmax(truth.view())
        })
        .count()
}

pub fn is_reset_due(sample_idx: usize, reset_between_nth_sample: usize) -> bool {
    match reset_between_nth_sample {
        0 => sample_idx == 0,
        n => sample_idx % n == 0,
    }
}

fn recording_shape(shape: &[usize], data_format: DataFormat) -> Shape {
    match FeatureMapGeometry::from_shape(shape, data_format) {
        Ok(geometry) if shape.len() == 3 => {
            vec![geometry.channels, geometry.height, geometry.width]
        }
        _ => shape.to_vec(),
    }
}

pub struct SimulationDriver {
    simulator: Option<Simulator>,
    encoder: InputEncoder,
    simulation_params: SimulationParams,
    data_format: DataFormat,
    labels: Vec<String>,
    shapes: Vec<Shape>,
    sizes: Vec<usize>,
    input_shape: Shape,
    samples_presented: usize,
}

impl SimulationDriver {
    pub fn new(network: &SpikingNetwork, params: &ConversionParams) -> Result<Self> {
        try_with!(
            params::validate_conversion_params(params),
            "invalid simulation parameters"
        );

        let input = network.input_population().ok_or_else(|| {
            ConversionError::InvalidBuildState("network has no input population".to_string())
        })?;

        let simulator = Simulator::new(network, params.simulation_params.dt)?;

        Ok(Self {
            simulator: Some(simulator),
            encoder: InputEncoder::new(&params.input_params, &params.simulation_params),
            simulation_params: params.simulation_params.clone(),
            data_format: params.data_format,
            labels: network.populations.iter().map(|p| p.label.clone()).collect(),
            shapes: network
                .populations
                .iter()
                .map(|p| recording_shape(&p.shape, params.data_format))
                .collect(),
            sizes: network.populations.iter().map(|p| p.size()).collect(),
            input_shape: input.shape.clone(),
            samples_presented: 0,
        })
    }

    pub fn simulate(&mut self, x_batch: ArrayViewD<f32>) -> Result<BatchRecordings> {
        if x_batch.ndim() == 0 || &x_batch.shape()[1..] != self.input_shape.as_slice() {
            return Err(ConversionError::InvalidShape(format!(
                "batch of shape {:?} does not match input population {:?}",
                x_batch.shape(),
                self.input_shape
            )));
        }

        let simulator = self
            .simulator
            .as_mut()
            .ok_or_else(|| ConversionError::InvalidBuildState("simulation has ended".to_string()))?;

        let batch_size = x_batch.len_of(Axis(0));
        let num_steps = self.simulation_params.num_steps();
        let record_voltage = self.simulation_params.record_voltage;

        let mut spikes: Vec<ArrayD<u32>> = self
            .shapes
            .iter()
            .map(|shape| ArrayD::zeros(IxDyn(&recorded_dims(batch_size, shape, num_steps))))
            .collect();

        let mut voltages: Vec<Option<ArrayD<f32>>> = (0..self.shapes.len())
            .map(|pop_idx| {
                (record_voltage && simulator.get_voltages(pop_idx).is_some()).then(|| {
                    let dims = recorded_dims(batch_size, &self.shapes[pop_idx], num_steps);
                    ArrayD::zeros(IxDyn(&dims))
                })
            })
            .collect();

        let mut spiking_inputs = Vec::new();

        for (sample_idx, sample) in x_batch.outer_iter().enumerate() {
            if is_reset_due(
                self.samples_presented,
                self.simulation_params.reset_between_nth_sample,
            ) {
                debug!("resetting simulator before sample {}", self.samples_presented);
                simulator.reset();
            }

            self.encoder.set_sample(&to_channels_first(sample, self.data_format))?;

            for step in 0..num_steps {
                spiking_inputs.clear();
                self.encoder.spiking_neurons(step, &mut spiking_inputs);

                let result = simulator.tick(&spiking_inputs)?;

                for (pop_idx, nids) in result.spiking_nids.iter().enumerate() {
                    let mut sample_spikes = spikes[pop_idx]
                        .index_axis_mut(Axis(0), sample_idx)
                        .into_shape_with_order((self.sizes[pop_idx], num_steps))
                        .map_err(|err| ConversionError::InvalidShape(err.to_string()))?;

                    for nid in nids {
                        sample_spikes[[*nid, step]] = 1;
                    }
                }

                for (pop_idx, recording) in voltages.iter_mut().enumerate() {
                    let Some(recording) = recording.as_mut() else {
                        continue;
                    };

                    if let Some(v) = simulator.get_voltages(pop_idx) {
                        let mut sample_voltages = recording
                            .index_axis_mut(Axis(0), sample_idx)
                            .into_shape_with_order((v.len(), num_steps))
                            .map_err(|err| ConversionError::InvalidShape(err.to_string()))?;

                        for (nid, value) in v.iter().enumerate() {
                            sample_voltages[[nid, step]] = *value;
                        }
                    }
                }

                if step % 100 == 0 {
                    debug!("sample {}: step {}/{}", self.samples_presented, step, num_steps);
                }
            }

            self.samples_presented += 1;
        }

        info!("simulated {} samples of {} steps", batch_size, num_steps);

        Ok(BatchRecordings {
            populations: self
                .labels
                .iter()
                .cloned()
                .zip(spikes)
                .zip(voltages)
                .map(|((label, spikes), voltages)| PopulationRecording {
                    label,
                    spikes,
                    voltages,
                })
                .collect(),
        })
    }

    pub fn simulate_and_score(
        &mut self,
        x_batch: ArrayViewD<f32>,
        y_batch: ArrayView2<f32>,
    ) -> Result<(BatchRecordings, usize)> {
        let recordings = self.simulate(x_batch)?;

        let counts = recordings.output_spike_counts().ok_or_else(|| {
            ConversionError::InvalidShape("no output population recorded".to_string())
        })?;

        if counts.dim() != y_batch.dim() {
            return Err(ConversionError::InvalidShape(format!(
                "output spike counts {:?} do not match labels {:?}",
                counts.shape(),
                y_batch.shape()
            )));
        }

        let correct = top1_correct(counts.view(), y_batch);

        Ok((recordings, correct))
    }

    pub fn is_running(&self) -> bool {
        self.simulator.is_some()
    }

    pub fn end(&mut self) {
        if self.simulator.take().is_some() {
            debug!("simulator released after {} samples", self.samples_presented);
        }
    }
}

fn recorded_dims(batch_size: usize, shape: &[usize], num_steps: usize) -> Vec<usize> {
    let mut dims = Vec::with_capacity(shape.len() + 2);
    dims.push(batch_size);
    dims.extend_from_slice(shape);
    dims.push(num_steps);
    dims
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NetworkBuilder;
    use crate::model::{CanonicalLayer, Kernel, LayerKind, LayerWeights};
    use crate::util::test_util::get_template_params;
    use ndarray::{array, Array1, Array2, Array4};

    fn identity_network(params: &ConversionParams) -> SpikingNetwork {
        let mut layer = CanonicalLayer::new(1, LayerKind::Dense, vec![0, 2]);
        layer.weights = Some(LayerWeights {
            kernel: Kernel::Dense(array![[1.0, 0.0], [0.0, 1.0]]),
            bias: Array1::zeros(2),
        });

        let mut builder = NetworkBuilder::new(params.clone());
        builder.add_input(&[0, 2]).unwrap();
        builder.add_layer(&layer).unwrap();
        builder.compile().unwrap()
    }

    #[test]
    fn reset_schedule() {
        let due: Vec<_> = (0..5).filter(|idx| is_reset_due(*idx, 0)).collect();
        assert_eq!(due, [0]);
        assert!((0..5).all(|idx| is_reset_due(idx, 1)));
        let due: Vec<_> = (0..7).filter(|idx| is_reset_due(*idx, 3)).collect();
        assert_eq!(due, vec![0, 3, 6]);
    }

    #[test]
    fn recordings_have_batch_shape_time_layout() {
        let params = get_template_params();
        let network = identity_network(&params);
        let mut sut = SimulationDriver::new(&network, &params).unwrap();

        let x = array![[0.1, 0.0], [0.0, 0.2], [0.0, 0.0]].into_dyn();
        let recordings = sut.simulate(x.view()).unwrap();

        let input = recordings.get("InputLayer").unwrap();
        assert_eq!(input.spikes.shape(), &[3, 2, 50]);

        let output = recordings.output().unwrap();
        assert_eq!(output.spikes.shape(), &[3, 2, 50]);
        assert!(output.voltages.is_none());

        // input spikes at steps 0, 12, 25, 37 arrive one step later
        assert_eq!(output.spikes[[0, 0, 1]], 1);
        assert_eq!(output.spikes[[0, 0, 13]], 1);
        assert_eq!(output.spikes[[0, 1, 1]], 0);

        let counts = recordings.output_spike_counts().unwrap();
        assert_eq!(counts, array![[4, 0], [0, 9], [0, 0]]);
    }

    #[test]
    fn scoring() {
        let params = get_template_params();
        let network = identity_network(&params);
        let mut sut = SimulationDriver::new(&network, &params).unwrap();

        let x = array![[0.2, 0.0], [0.0, 0.2], [0.3, 0.1]].into_dyn();
        let y = array![[1.0, 0.0], [0.0, 1.0], [0.0, 1.0]];
        let (_, correct) = sut.simulate_and_score(x.view(), y.view()).unwrap();
        assert_eq!(correct, 2);
    }

    #[test]
    fn top1_ties_pick_first() {
        let counts = array![[3u32, 3], [0, 0]];
        let y = array![[1.0, 0.0], [0.0, 1.0]];
        assert_eq!(top1_correct(counts.view(), y.view()), 1);
    }

    #[test]
    fn voltage_recording() {
        let mut params = get_template_params();
        params.simulation_params.record_voltage = true;
        let network = identity_network(&params);
        let mut sut = SimulationDriver::new(&network, &params).unwrap();

        let recordings = sut.simulate(Array2::<f32>::zeros((1, 2)).into_dyn().view()).unwrap();

        assert!(recordings.populations[0].voltages.is_none());
        let voltages = recordings.output().unwrap().voltages.as_ref().unwrap();
        assert_eq!(voltages.shape(), &[1, 2, 50]);
        assert!(voltages.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn channels_last_input_is_transposed() {
        let mut params = get_template_params();
        params.data_format = DataFormat::ChannelsLast;

        let mut builder = NetworkBuilder::new(params.clone());
        builder.add_input(&[0, 1, 2, 2]).unwrap();
        let network = builder.compile().unwrap();
        let mut sut = SimulationDriver::new(&network, &params).unwrap();

        // (h=1, w=2, c=2), only channel 1 of pixel 0 is active
        let mut x = Array4::<f32>::zeros((1, 1, 2, 2));
        x[[0, 0, 0, 1]] = 0.1;
        let recordings = sut.simulate(x.into_dyn().view()).unwrap();

        let input = &recordings.populations[0].spikes;
        assert_eq!(input.shape(), &[1, 2, 1, 2, 50]);
        assert_eq!(input[[0, 1, 0, 0, 0]], 1);
        assert_eq!(input.sum(), 4);
    }

    #[test]
    fn ended_driver_rejects_batches() {
        let params = get_template_params();
        let network = identity_network(&params);
        let mut sut = SimulationDriver::new(&network, &params).unwrap();

        sut.end();
        assert!(!sut.is_running());
        let x = array![[0.0, 0.0]].into_dyn();
        assert!(matches!(sut.simulate(x.view()), Err(ConversionError::InvalidBuildState(_))));
    }

    #[test]
    fn invalid_params_are_rejected() {
        let mut params = get_template_params();
        let network = identity_network(&params);
        params.simulation_params.batch_size = 0;

        assert!(matches!(
            SimulationDriver::new(&network, &params),
            Err(ConversionError::InvalidParams(_))
        ));
    }

    #[test]
    fn mismatched_batch() {
        let params = get_template_params();
        let network = identity_network(&params);
        let mut sut = SimulationDriver::new(&network, &params).unwrap();
        let x = array![[0.0, 0.0, 0.0]].into_dyn();
        assert!(matches!(sut.simulate(x.view()), Err(ConversionError::InvalidShape(_))));
    }
}
