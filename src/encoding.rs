use rand::{distributions::Bernoulli, prelude::Distribution, rngs::StdRng, SeedableRng};
use simple_error::SimpleError;

use crate::error::{ConversionError, Result};
use crate::params::{InputCoding, InputParams, SimulationParams};

pub fn deterministic_spike_times(intensity: f32, duration: f32) -> Vec<f32> {
    let num_spikes = (duration * intensity).floor().max(0.0) as usize;

    match num_spikes {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let interval = duration / (num_spikes - 1) as f32;
            (0..num_spikes).map(|i| i as f32 * interval).collect()
        }
    }
}

pub fn spike_probability(rate: f32, dt: f32) -> f64 {
    (rate as f64 * dt as f64 / 1000.0).clamp(0.0, 1.0)
}

pub enum InputEncoder {
    Poisson {
        max_input_rate: f32,
        dt: f32,
        sources: Vec<Bernoulli>,
        rng: StdRng,
    },
    Deterministic {
        duration: f32,
        dt: f32,
        num_steps: usize,
        schedule: Vec<Vec<usize>>,
    },
}

impl InputEncoder {
    pub fn new(input_params: &InputParams, simulation_params: &SimulationParams) -> Self {
        match input_params.input_coding {
            InputCoding::Poisson => {
                let rng = match simulation_params.seed_override {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };

                InputEncoder::Poisson {
                    max_input_rate: input_params.max_input_rate,
                    dt: simulation_params.dt,
                    sources: Vec::new(),
                    rng,
                }
            }
            InputCoding::Deterministic => InputEncoder::Deterministic {
                duration: simulation_params.duration,
                dt: simulation_params.dt,
                num_steps: simulation_params.num_steps(),
                schedule: Vec::new(),
            },
        }
    }

    pub fn set_sample(&mut self, intensities: &[f32]) -> Result<()> {
        match self {
            InputEncoder::Poisson {
                max_input_rate,
                dt,
                sources,
                ..
            } => {
                *sources = intensities
                    .iter()
                    .map(|x| {
                        let p = spike_probability(x * *max_input_rate, *dt);
                        Bernoulli::new(p).map_err(|err| {
                            ConversionError::InvalidParams(SimpleError::new(format!(
                                "input intensity {} gives no valid spike probability: {}",
                                x, err
                            )))
                        })
                    })
                    .collect::<Result<_>>()?;
            }
            InputEncoder::Deterministic {
                duration,
                dt,
                num_steps,
                schedule,
            } => {
                *schedule = vec![Vec::new(); *num_steps];

                for (neuron, x) in intensities.iter().enumerate() {
                    for t in deterministic_spike_times(*x, *duration) {
                        let step = (t / *dt) as usize;
                        if step < *num_steps {
                            schedule[step].push(neuron);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    pub fn spiking_neurons(&mut self, step: usize, spiking: &mut Vec<usize>) {
        match self {
            InputEncoder::Poisson { sources, rng, .. } => {
                spiking.extend(
                    sources
                        .iter()
                        .enumerate()
                        .filter(|(_, source)| source.sample(&mut *rng))
                        .map(|(neuron, _)| neuron),
                );
            }
            InputEncoder::Deterministic { schedule, .. } => {
                if let Some(neurons) = schedule.get(step) {
                    spiking.extend_from_slice(neurons);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{assert_approx_eq_slice, get_template_params};
    use itertools::assert_equal;

    #[test]
    fn deterministic_times() {
        assert!(deterministic_spike_times(0.0, 50.0).is_empty());
        assert!(deterministic_spike_times(0.01, 50.0).is_empty());
        assert_approx_eq_slice(&deterministic_spike_times(0.03, 50.0), &[0.0]);
        assert_approx_eq_slice(
            &deterministic_spike_times(0.1, 50.0),
            &[0.0, 12.5, 25.0, 37.5, 50.0],
        );
        assert_eq!(deterministic_spike_times(1.0, 50.0).len(), 50);
    }

    #[test]
    fn deterministic_schedule_drops_last_instant() {
        let params = get_template_params();
        let mut sut = InputEncoder::new(&params.input_params, &params.simulation_params);
        sut.set_sample(&[0.1, 0.0]).unwrap();

        let mut spiking = Vec::new();
        let steps_with_spikes: Vec<_> = (0..params.simulation_params.num_steps())
            .filter(|step| {
                spiking.clear();
                sut.spiking_neurons(*step, &mut spiking);
                !spiking.is_empty()
            })
            .collect();

        // the spike at t = duration falls outside the simulated steps
        assert_eq!(steps_with_spikes, vec![0, 12, 25, 37]);
    }

    #[test]
    fn deterministic_restarts_per_sample() {
        let params = get_template_params();
        let mut sut = InputEncoder::new(&params.input_params, &params.simulation_params);

        for _ in 0..2 {
            sut.set_sample(&[0.0, 1.0]).unwrap();
            let mut spiking = Vec::new();
            sut.spiking_neurons(0, &mut spiking);
            assert_equal(spiking, [1]);
        }
    }

    #[test]
    fn poisson_rate() {
        let mut params = get_template_params();
        params.input_params.input_coding = InputCoding::Poisson;
        params.input_params.max_input_rate = 200.0;

        let mut sut = InputEncoder::new(&params.input_params, &params.simulation_params);
        sut.set_sample(&[1.0, 0.5, 0.0]).unwrap();

        let mut counts = [0usize; 3];
        let mut spiking = Vec::new();
        for step in 0..10_000 {
            spiking.clear();
            sut.spiking_neurons(step, &mut spiking);
            for neuron in &spiking {
                counts[*neuron] += 1;
            }
        }

        // p = 0.2 and 0.1 per step
        assert!((1800..2200).contains(&counts[0]));
        assert!((850..1150).contains(&counts[1]));
        assert_eq!(counts[2], 0);
    }

    #[test]
    fn saturating_probability() {
        assert_eq!(spike_probability(5000.0, 1.0), 1.0);
        assert_eq!(spike_probability(0.0, 1.0), 0.0);
    }
}
