use log::{info, warn};
use ndarray::{s, ArrayView2, ArrayViewD, Axis};
use simple_error::try_with;

use crate::builder;
use crate::driver::SimulationDriver;
use crate::error::{ConversionError, Result};
use crate::evaluate::{self, EvalResult, ReferenceModel};
use crate::extract::{self, NativeNet};
use crate::model::ParsedModel;
use crate::network::SpikingNetwork;
use crate::params::{self, ConversionParams};
use crate::persistence;
use crate::replay;

#[derive(Debug, Clone)]
pub struct Conversion {
    pub model: ParsedModel,
    pub network: SpikingNetwork,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub analog: EvalResult,
    pub spiking_accuracy: f32,
    pub num_samples: usize,
}

pub fn convert(net: &impl NativeNet, params: &ConversionParams) -> Result<Conversion> {
    try_with!(
        params::validate_conversion_params(params),
        "invalid conversion parameters"
    );

    if net.data_format() != params.data_format {
        warn!(
            "model declares {:?}, converting with configured {:?}",
            net.data_format(),
            params.data_format
        );
    }

    let model = extract::extract(net)?;
    let network = builder::build_network(&model, params)?;

    let output = &params.output_params;
    persistence::save_network(&network, &output.path_wd, &output.filename_snn, output.overwrite)?;

    if output.write_replay_script {
        let script = replay::render_replay_script(&network, output.config_path.as_deref());
        replay::write_replay_script(
            &script,
            &replay::replay_script_path(&output.path_wd, &output.filename_snn),
            output.overwrite,
        )?;
    }

    info!("converted {} layers into {} populations", model.layers.len(), network.populations.len());

    Ok(Conversion { model, network })
}

pub fn simulate_dataset(
    network: &SpikingNetwork,
    params: &ConversionParams,
    x_test: ArrayViewD<f32>,
    y_test: ArrayView2<f32>,
) -> Result<f32> {
    try_with!(
        params::validate_conversion_params(params),
        "invalid simulation parameters"
    );

    let num_samples = x_test.len_of(Axis(0));

    if num_samples != y_test.nrows() {
        return Err(ConversionError::InvalidShape(format!(
            "{} samples but {} labels",
            num_samples,
            y_test.nrows()
        )));
    }

    let mut driver = SimulationDriver::new(network, params)?;
    let batch_size = params.simulation_params.batch_size;
    let mut correct = 0;

    for batch_start in (0..num_samples).step_by(batch_size) {
        let batch_end = (batch_start + batch_size).min(num_samples);
        let x_batch = x_test.slice_axis(Axis(0), (batch_start..batch_end).into());
        let y_batch = y_test.slice(s![batch_start..batch_end, ..]);

        let (_, batch_correct) = driver.simulate_and_score(x_batch, y_batch)?;
        correct += batch_correct;

        info!(
            "batch {}..{}: running accuracy {:.2}%",
            batch_start,
            batch_end,
            correct as f32 / batch_end as f32 * 100.0
        );
    }

    driver.end();

    Ok(if num_samples == 0 {
        0.0
    } else {
        correct as f32 / num_samples as f32
    })
}

pub fn run(
    net: &impl NativeNet,
    params: &ConversionParams,
    x_test: ArrayViewD<f32>,
    y_test: ArrayView2<f32>,
) -> Result<RunSummary> {
    let num_samples = x_test.len_of(Axis(0));
    let conversion = convert(net, params)?;

    let reference = ReferenceModel::new(
        &conversion.model,
        params.data_format,
        params.simulation_params.flip_kernel,
    );
    let analog = evaluate::evaluate(&reference, x_test.view(), y_test)?;

    let spiking_accuracy = simulate_dataset(&conversion.network, params, x_test, y_test)?;

    info!(
        "accuracy: analog {:.2}%, spiking {:.2}%",
        analog.accuracy * 100.0,
        spiking_accuracy * 100.0
    );

    Ok(RunSummary {
        analog,
        spiking_accuracy,
        num_samples,
    })
}
