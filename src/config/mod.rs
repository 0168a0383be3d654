use crate::models::Hyperparameters;
use crate::services::feedback::DEFAULT_ISSUED_CAPACITY;
use crate::utils::DEFAULT_CONFIDENCE_SCALE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub training: TrainingConfig,
    pub recommendation: RecommendationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the per-scope CSV views and factor files.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub factors: usize,
    pub regularization: f64,
    pub learning_rate: f64,
    pub epochs: usize,
    pub seed: Option<u64>,
}

impl TrainingConfig {
    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            factors: self.factors,
            regularization: self.regularization,
            learning_rate: self.learning_rate,
            epochs: self.epochs,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    pub default_top_n: usize,
    pub confidence_scale: f64,
    /// Issued recommendations kept for feedback before the oldest are evicted.
    pub max_issued: usize,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = Hyperparameters::default();
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: num_cpus::get(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("data"),
            },
            training: TrainingConfig {
                factors: defaults.factors,
                regularization: defaults.regularization,
                learning_rate: defaults.learning_rate,
                epochs: defaults.epochs,
                seed: defaults.seed,
            },
            recommendation: RecommendationConfig {
                default_top_n: 3,
                confidence_scale: DEFAULT_CONFIDENCE_SCALE,
                max_issued: DEFAULT_ISSUED_CAPACITY,
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("FACTOREC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hyperparameters() {
        let config = Config::default();
        let hp = config.training.hyperparameters();
        assert_eq!(hp.factors, 20);
        assert_eq!(hp.epochs, 40);
        assert!((hp.learning_rate - 0.015).abs() < 1e-12);
        assert!((hp.regularization - 0.1).abs() < 1e-12);
        assert_eq!(config.recommendation.confidence_scale, 20.0);
        assert_eq!(config.recommendation.max_issued, DEFAULT_ISSUED_CAPACITY);
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factorec.toml");
        std::fs::write(&path, "[training]\nepochs = 5\nseed = 9\n\n[storage]\ndata_dir = \"/tmp/factorec\"\n").unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.seed, Some(9));
        assert_eq!(config.training.factors, 20);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/factorec"));
    }

    #[test]
    fn test_socket_addr() {
        let config = Config::default();
        assert_eq!(config.server.socket_addr().unwrap().port(), 8080);
    }
}
