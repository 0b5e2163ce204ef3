use std::time::Instant;

use ann2snn::builder;
use ann2snn::model::{ActivationKind, CanonicalLayer, Kernel, LayerKind, LayerWeights, ParsedModel};
use ann2snn::simulator::Simulator;
use ndarray::{Array1, Array2};
use rand::{
    distributions::Uniform, prelude::Distribution, rngs::StdRng, seq::SliceRandom, SeedableRng,
};
use statrs::distribution::Poisson;

#[path = "../scenario_params.rs"]
mod scenario_params;

fn random_dense_model(layer_sizes: &[usize], max_weight: f32, rng: &mut StdRng) -> ParsedModel {
    let weight_dist = Uniform::new_inclusive(-max_weight, max_weight);

    let layers = layer_sizes
        .windows(2)
        .enumerate()
        .map(|(idx, sizes)| {
            let mut layer = CanonicalLayer::new(idx + 1, LayerKind::Dense, vec![0, sizes[1]]);
            layer.weights = Some(LayerWeights {
                kernel: Kernel::Dense(Array2::from_shape_fn((sizes[0], sizes[1]), |_| {
                    weight_dist.sample(rng)
                })),
                bias: Array1::zeros(sizes[1]),
            });
            layer.activation = Some(ActivationKind::Relu);
            layer
        })
        .collect();

    ParsedModel {
        input_shape: vec![0, layer_sizes[0]],
        layers,
    }
}

fn main() {
    env_logger::init();

    let scenario = scenario_params::get_scenario_params();
    let mut rng = StdRng::seed_from_u64(0);

    let model = random_dense_model(&scenario.layer_sizes, scenario.max_weight, &mut rng);
    let network = builder::build_network(&model, &scenario.conversion_params).unwrap();
    let mut simulator =
        Simulator::new(&network, scenario.conversion_params.simulation_params.dt).unwrap();

    let all_in_channels: Vec<usize> = (0..scenario.layer_sizes[0]).collect();
    let num_stimulus_spikes_dist = Poisson::new(scenario.mean_input_spikes_per_step).unwrap();

    let mut spike_count = 0usize;
    let mut synaptic_transmission_count = 0usize;
    let mut checksum = 0;

    let wall_start = Instant::now();

    for _ in 0..scenario.num_steps {
        let num_stimulus_spikes = num_stimulus_spikes_dist.sample(&mut rng) as usize;

        let spiking_in_channel_ids: Vec<usize> = all_in_channels
            .choose_multiple(&mut rng, num_stimulus_spikes)
            .copied()
            .collect();
        let tick_result = simulator.tick(&spiking_in_channel_ids).unwrap();

        synaptic_transmission_count += tick_result.synaptic_transmission_count;

        for nids in &tick_result.spiking_nids[1..] {
            spike_count += nids.len();
            checksum += nids.iter().sum::<usize>();
        }
    }

    let wall_time = wall_start.elapsed();
    let synaptic_transm_proc_throughput =
        synaptic_transmission_count as f64 / wall_time.as_secs_f64();

    eprintln!(
        "Network: {} neurons, {} connections",
        network.num_neurons(),
        network.num_connections()
    );
    eprintln!(
        "Spikes per step: {}",
        spike_count as f64 / scenario.num_steps as f64
    );
    eprintln!(
        "Synaptic transmission processing throughput: {:.3e} ({:.3} ns per transmission)",
        synaptic_transm_proc_throughput,
        1e9 / synaptic_transm_proc_throughput
    );
    eprintln!("Checksum: {}", checksum);
}
