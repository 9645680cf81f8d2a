use std::sync::Arc;

use crate::clients::jma::JmaRemote;
use crate::core::error::GatewayError;
use crate::core::tool::ToolProvider;
use crate::infra::config::Config;

use super::time::TimeProvider;
use super::weather::WeatherProvider;

/// The live provider set, in attach order. Later providers win name collisions.
pub fn build_providers(cfg: &Config) -> Result<Vec<Arc<dyn ToolProvider>>, GatewayError> {
    let time: Arc<dyn ToolProvider> = Arc::new(TimeProvider);
    let weather: Arc<dyn ToolProvider> = Arc::new(WeatherProvider::new(JmaRemote::from_config(&cfg.weather)?));
    Ok(vec![time, weather])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_time_then_weather() {
        let providers = build_providers(&Config::default()).unwrap();
        let names: Vec<String> = providers
            .iter()
            .flat_map(|p| p.tools().into_iter().map(|t| t.name.to_string()))
            .collect();
        assert_eq!(names, vec!["get-current-time", "get-weather"]);
    }
}
