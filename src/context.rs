use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::playground::Playground;
use crate::presets::NetworkKind;
use std::path::PathBuf;
use tracing::info;

// The network being worked on, and the settings that outlive a switch to another network.
pub struct AppContext {
    data_dir: PathBuf,
    seed: u64,
    learning_rate: Option<f64>,
    playground: Playground,
}

impl AppContext {
    pub fn new(config: &AppConfig) -> Result<AppContext> {
        let playground = Playground::from_preset(config.network, &config.data_dir, config.seed)?;
        let mut context = AppContext {
            data_dir: config.data_dir.clone(),
            seed: config.seed,
            learning_rate: None,
            playground,
        };
        if let Some(learning_rate) = config.learning_rate {
            context.set_learning_rate(learning_rate)?;
        }
        Ok(context)
    }

    pub fn active(&self) -> &Playground {
        &self.playground
    }

    pub fn active_mut(&mut self) -> &mut Playground {
        &mut self.playground
    }

    // Replaces the active network with a fresh one of the given kind. A learning rate set by the
    // user carries over; otherwise the new network keeps its preset rate.
    pub fn select(&mut self, kind: NetworkKind) -> Result<&mut Playground> {
        let mut playground = Playground::from_preset(kind, &self.data_dir, self.seed)?;
        if let Some(learning_rate) = self.learning_rate {
            playground.model_mut().set_learning_rate(learning_rate);
        }
        info!(?kind, learning_rate = playground.model().learning_rate(), "selected network");
        self.playground = playground;
        Ok(&mut self.playground)
    }

    pub fn learning_rate(&self) -> f64 {
        self.playground.model().learning_rate()
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) -> Result<()> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }
        self.learning_rate = Some(learning_rate);
        self.playground.model_mut().set_learning_rate(learning_rate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn heat_config() -> AppConfig {
        AppConfig {
            network: NetworkKind::TemperatureControl,
            ..AppConfig::default()
        }
    }

    #[test]
    fn starts_with_the_preset_learning_rate() {
        let context = AppContext::new(&heat_config()).unwrap();

        assert_eq!(context.active().kind(), Some(NetworkKind::TemperatureControl));
        assert_relative_eq!(context.learning_rate(), 0.1);
    }

    #[test]
    fn user_learning_rate_survives_a_switch() {
        let config = AppConfig {
            learning_rate: Some(0.02),
            ..heat_config()
        };
        let mut context = AppContext::new(&config).unwrap();
        assert_relative_eq!(context.learning_rate(), 0.02);

        context.active_mut().train_round(2, 8);
        context.set_learning_rate(0.3).unwrap();
        let playground = context.select(NetworkKind::TemperatureControl).unwrap();

        assert!(playground.history().is_empty());
        assert_relative_eq!(playground.model().learning_rate(), 0.3);
    }

    #[test]
    fn rejects_a_non_positive_learning_rate() {
        let mut context = AppContext::new(&heat_config()).unwrap();

        assert!(matches!(context.set_learning_rate(0.0), Err(Error::Config(_))));
        assert_relative_eq!(context.learning_rate(), 0.1);
    }

    #[test]
    fn missing_datasets_fail_to_select() {
        let mut context = AppContext::new(&heat_config()).unwrap();
        context.data_dir = PathBuf::from("/nonexistent/neuron-view");

        assert!(context.select(NetworkKind::AllDigits).is_err());
        assert_eq!(context.active().kind(), Some(NetworkKind::TemperatureControl));
    }
}
