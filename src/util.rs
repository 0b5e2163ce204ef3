use ndarray::ArrayView1;

pub fn get_decay_factor(elapsed: f32, tau: f32) -> f32 {
    (-elapsed / tau).exp()
}

pub fn get_delay_steps(delay: f32, dt: f32) -> usize {
    ((delay / dt).round() as usize).max(1)
}

pub fn argmax(values: ArrayView1<f32>) -> Option<usize> {
    let mut result: Option<(usize, f32)> = None;

    for (idx, value) in values.iter().enumerate() {
        match result {
            Some((_, best)) if *value <= best => {}
            _ => result = Some((idx, *value)),
        }
    }

    result.map(|(idx, _)| idx)
}
