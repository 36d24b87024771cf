use anyhow::{anyhow, Result};
use config::{Config, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::FleetConfig;

/// 配置加载器
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// 创建配置加载器
    pub fn new<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    /// 加载配置
    ///
    /// 文件不存在时返回默认配置；文件存在但无法解析时返回错误（启动期致命）。
    pub fn load(&self) -> Result<FleetConfig> {
        if !self.config_path.exists() {
            return Ok(FleetConfig::default());
        }

        let config = Config::builder()
            .add_source(File::new(
                self.config_path
                    .to_str()
                    .ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// 验证配置
    pub fn validate(config: &FleetConfig) -> Result<()> {
        if config.scheduler.liveness_interval_secs == 0
            || config.scheduler.firmware_interval_secs == 0
            || config.scheduler.persist_interval_secs == 0
        {
            return Err(anyhow!("scheduler intervals must be greater than 0"));
        }

        if config.distributor.tick_interval_secs == 0 {
            return Err(anyhow!("tick_interval_secs must be greater than 0"));
        }

        if config.distributor.update_age_threshold_secs <= 0.0 {
            return Err(anyhow!("update_age_threshold_secs must be greater than 0"));
        }

        for station in &config.stations {
            if station.name.is_empty() {
                return Err(anyhow!("station name cannot be empty"));
            }
            if station.parallel_uploads == 0 {
                return Err(anyhow!(
                    "station {} must allow at least one parallel upload",
                    station.name
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loader = ConfigLoader::new("/nonexistent/fleet.toml");
        let config = loader.load().unwrap();

        assert_eq!(config.broker.port, 1883);
        assert!(config.stations.is_empty());
        assert_eq!(config.distributor.sync_ordered_reset_ticks, 20);
    }

    #[test]
    fn loads_stations_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[broker]
host = "broker.example.com"
port = 8883

[[stations]]
name = "EvoStation1"
parallel_uploads = 6

[[stations]]
name = "EvoStation2"
parallel_uploads = 2
"#
        )
        .unwrap();

        let config = ConfigLoader::new(file.path()).load().unwrap();
        assert_eq!(config.broker.host, "broker.example.com");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.stations.len(), 2);
        assert_eq!(config.stations[1].parallel_uploads, 2);

        ConfigLoader::validate(&config).unwrap();
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "broker = {{ not toml").unwrap();

        assert!(ConfigLoader::new(file.path()).load().is_err());
    }

    #[test]
    fn validate_rejects_zero_parallel_uploads() {
        let mut config = FleetConfig::default();
        config.stations.push(crate::StationConfig {
            name: "EvoStation1".to_string(),
            parallel_uploads: 0,
        });

        assert!(ConfigLoader::validate(&config).is_err());
    }
}
