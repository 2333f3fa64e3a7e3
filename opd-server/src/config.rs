//! 服务配置
//!
//! 加载顺序：内置默认值、`--config` 指定的TOML文件、`OPD__` 前缀的环境变量，
//! 后者覆盖前者。例如 `OPD__SERVER__PORT=8081`。

use anyhow::{Context, Result};
use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use opd_database::DatabaseSettings;
use opd_queue::QueueSettings;
use serde::{Deserialize, Serialize};

/// 时区偏移上限（分钟）
const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// 分配有效期上限（小时）
const MAX_ASSIGNMENT_TTL_HOURS: i64 = 365 * 24;

/// 服务配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP服务配置
    pub server: HttpSettings,
    /// 数据库配置，缺省时使用内存存储
    pub database: Option<DatabaseSettings>,
    /// 排队调度参数
    pub queue: QueueSettings,
    /// 自动过期任务配置
    pub sweeper: SweeperSettings,
    /// 日志配置
    pub logging: LoggingSettings,
}

/// HTTP服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

/// 自动过期任务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweeperSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600, // 每小时一次
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// "json" 或 "pretty"
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ServerConfig {
    /// 加载配置，`path` 为空时只使用默认值和环境变量
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings = builder
            .add_source(Environment::with_prefix("OPD").separator("__").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.server.port == 0 {
            problems.push("server.port cannot be 0".to_string());
        }
        if self.queue.assignment_ttl_hours <= 0 || self.queue.assignment_ttl_hours > MAX_ASSIGNMENT_TTL_HOURS {
            problems.push(format!(
                "queue.assignment_ttl_hours must be between 1 and {}",
                MAX_ASSIGNMENT_TTL_HOURS
            ));
        }
        if self.queue.minutes_per_patient <= 0 {
            problems.push("queue.minutes_per_patient must be positive".to_string());
        }
        if self.queue.average_sample_size == 0 {
            problems.push("queue.average_sample_size cannot be 0".to_string());
        }
        if self.queue.max_transition_attempts == 0 {
            problems.push("queue.max_transition_attempts cannot be 0".to_string());
        }
        if self.queue.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            problems.push(format!(
                "queue.utc_offset_minutes must be within ±{}",
                MAX_UTC_OFFSET_MINUTES
            ));
        }
        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            problems.push("sweeper.interval_secs cannot be 0 when the sweeper is enabled".to_string());
        }
        if let Some(database) = &self.database {
            if database.max_connections == 0 {
                problems.push("database.max_connections cannot be 0".to_string());
            }
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            problems.push(format!("logging.format must be json or pretty, got {}", self.logging.format));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Invalid configuration: {}", problems.join("; ")))
        }
    }
}
