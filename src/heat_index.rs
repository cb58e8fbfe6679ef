// Synthetic regression data: the heat index felt for a given temperature and relative humidity.
//
// Inputs and outputs are scaled to activations in [0, 1] over the ranges below.

use crate::dataset::{Batch, DataSource};
use ndarray::Array2;
use ndarray_rand::{
    RandomExt,
    rand::{SeedableRng, rngs::StdRng},
    rand_distr::Uniform,
};

pub const MIN_HUMIDITY: f64 = 40.0;
pub const MAX_HUMIDITY: f64 = 100.0;

pub const MIN_TEMP: f64 = 27.0;
pub const MAX_TEMP: f64 = 44.0;

pub const MIN_HEAT_INDEX: f64 = MIN_TEMP;
pub const MAX_HEAT_INDEX: f64 = 65.0;

// Heat index in Celsius from a temperature in Celsius and a relative humidity in percent.
//
// See <https://en.wikipedia.org/wiki/Heat_index>.
pub fn compute_heat_index(t: f64, r: f64) -> f64 {
    -8.784 + 1.611 * t + 2.338 * r - 0.1461 * t * r - 0.0123 * t.powi(2) - 0.01642 * r.powi(2)
        + 2.211e-3 * t.powi(2) * r
        + 7.254e-4 * t * r.powi(2)
        - 3.582e-6 * t.powi(2) * r.powi(2)
}

pub fn humidity_to_activation(humidity: f64) -> f64 {
    (humidity - MIN_HUMIDITY) / (MAX_HUMIDITY - MIN_HUMIDITY)
}

pub fn activation_to_humidity(activation: f64) -> f64 {
    MIN_HUMIDITY + activation * (MAX_HUMIDITY - MIN_HUMIDITY)
}

pub fn temp_to_activation(temp: f64) -> f64 {
    (temp - MIN_TEMP) / (MAX_TEMP - MIN_TEMP)
}

pub fn activation_to_temp(activation: f64) -> f64 {
    MIN_TEMP + activation * (MAX_TEMP - MIN_TEMP)
}

pub fn heat_index_to_activation(heat_index: f64) -> f64 {
    (heat_index - MIN_HEAT_INDEX) / (MAX_HEAT_INDEX - MIN_HEAT_INDEX)
}

pub fn activation_to_heat_index(activation: f64) -> f64 {
    MIN_HEAT_INDEX + activation * (MAX_HEAT_INDEX - MIN_HEAT_INDEX)
}

// Endless random (temperature, humidity) samples labelled with their heat index.
pub struct TemperatureControlData {
    rng: StdRng,
}

impl TemperatureControlData {
    pub fn new(seed: u64) -> TemperatureControlData {
        TemperatureControlData {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl DataSource for TemperatureControlData {
    fn input_size(&self) -> usize {
        2
    }

    fn output_size(&self) -> usize {
        1
    }

    fn next_train_batch(&mut self, batch_size: usize) -> Batch {
        let xs = Array2::random_using((batch_size, 2), Uniform::new(0.0, 1.0), &mut self.rng);
        let labels = Array2::from_shape_fn((batch_size, 1), |(i, _)| {
            let heat_index =
                compute_heat_index(activation_to_temp(xs[[i, 0]]), activation_to_humidity(xs[[i, 1]]));
            heat_index_to_activation(heat_index)
        });
        Batch { xs, labels }
    }

    // Test data is drawn from the same distribution.
    fn next_test_batch(&mut self, batch_size: usize) -> Batch {
        self.next_train_batch(batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn heat_index_matches_the_regression_formula() {
        assert_relative_eq!(compute_heat_index(30.0, 50.0), 31.0165, epsilon = 1e-4);
    }

    #[test]
    fn activations_span_the_ranges() {
        assert_relative_eq!(temp_to_activation(MIN_TEMP), 0.0);
        assert_relative_eq!(temp_to_activation(MAX_TEMP), 1.0);
        assert_relative_eq!(humidity_to_activation(70.0), 0.5);
        assert_relative_eq!(activation_to_humidity(0.5), 70.0);
        assert_relative_eq!(activation_to_temp(temp_to_activation(33.3)), 33.3, epsilon = 1e-12);
        assert_relative_eq!(
            activation_to_heat_index(heat_index_to_activation(41.0)),
            41.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn batches_are_labelled_with_the_heat_index() {
        let mut data = TemperatureControlData::new(3);
        let batch = data.next_train_batch(16);

        assert_eq!(batch.xs.dim(), (16, 2));
        assert_eq!(batch.labels.dim(), (16, 1));
        assert!(batch.xs.iter().all(|&x| (0.0..1.0).contains(&x)));
        for (x, label) in batch.xs.rows().into_iter().zip(batch.labels.column(0)) {
            let expected = heat_index_to_activation(compute_heat_index(
                activation_to_temp(x[0]),
                activation_to_humidity(x[1]),
            ));
            assert_relative_eq!(*label, expected);
        }
    }
}
