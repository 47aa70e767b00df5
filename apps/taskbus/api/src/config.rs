use core_config::{app_info, server::ServerConfig, AppInfo, FromEnv};
use database::redis::RedisConfig;
use domain_tasks::TaskBusConfig;

pub use core_config::Environment;

/// Application configuration, composed from the shared config pieces
#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppInfo,
    pub redis: RedisConfig,
    pub server: ServerConfig,
    pub bus: TaskBusConfig,
    pub environment: Environment,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        let environment = Environment::from_env();
        let server = ServerConfig::from_env()?; // HOST=0.0.0.0, PORT=8080
        let redis = RedisConfig::from_env()?; // Required
        let bus = TaskBusConfig::from_env()?;

        Ok(Self {
            app: app_info!(),
            redis,
            server,
            bus,
            environment,
        })
    }
}
