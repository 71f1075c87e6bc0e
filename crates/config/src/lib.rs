//! 统一配置中心
//!
//! 提供实时推送服务的全局配置，包括：
//! - 凭证签名密钥
//! - 握手限流
//! - 清理与健康检查定时器
//! - 广播队列
//! - 服务设置

use std::env;
use std::path::Path;
use std::str::FromStr;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 开发环境默认密钥，`validate()` 会拒绝它
pub const DEV_JWT_SECRET: &str = "dev-secret-key-not-for-production-use-minimum-32-chars";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 握手限流配置
    pub rate_limit: RateLimitConfig,
    /// 清理与健康检查配置
    pub monitor: MonitorConfig,
    /// 广播器配置
    pub broadcast: BroadcastConfig,
    /// 服务配置
    pub server: ServerConfig,
    /// 账号种子文件（JSON），仅用于内存账号目录
    #[serde(default)]
    pub accounts_file: Option<String>,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// 固定窗口限流配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_attempts: u32,
}

/// 定时任务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// 死连接清理间隔
    pub connection_sweep_secs: u64,
    /// 空房间清理间隔
    pub room_sweep_secs: u64,
    /// 空房间最大空闲时长
    pub room_idle_secs: u64,
    /// 统计日志间隔
    pub stats_interval_secs: u64,
    /// 内存采样间隔
    pub memory_check_secs: u64,
    /// 内存告警阈值（MB）
    pub memory_threshold_mb: u64,
}

/// 广播器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastConfig {
    /// 发布队列容量
    pub capacity: usize,
    /// 单连接发送队列容量
    pub outbound_buffer: usize,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_attempts: 5,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            connection_sweep_secs: 30,
            room_sweep_secs: 60 * 60,
            room_idle_secs: 60 * 60,
            stats_interval_secs: 5 * 60,
            memory_check_secs: 2 * 60,
            memory_threshold_mb: 512,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            outbound_buffer: 64,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// 纯默认值，不读取环境变量
    pub fn development() -> Self {
        Self {
            jwt: JwtConfig {
                secret: DEV_JWT_SECRET.to_string(),
                expiration_hours: 24,
            },
            rate_limit: RateLimitConfig::default(),
            monitor: MonitorConfig::default(),
            broadcast: BroadcastConfig::default(),
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            accounts_file: None,
        }
    }

    /// 从环境变量加载配置
    ///
    /// 缺少 `JWT_SECRET` 时返回错误，避免生产环境使用开发密钥。
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = env::var("JWT_SECRET").map_err(|_| ConfigError::MissingVar("JWT_SECRET"))?;
        let mut config = Self::from_env_with_defaults();
        config.jwt.secret = secret;
        Ok(config)
    }

    /// 从环境变量加载配置，开发环境版本
    /// 提供不安全的默认值，仅用于测试和开发
    pub fn from_env_with_defaults() -> Self {
        let defaults = Self::development();
        let monitor = defaults.monitor;
        Self {
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").unwrap_or(defaults.jwt.secret),
                expiration_hours: env_or("JWT_EXPIRATION_HOURS", defaults.jwt.expiration_hours),
            },
            rate_limit: RateLimitConfig {
                window_secs: env_or("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit.window_secs),
                max_attempts: env_or("RATE_LIMIT_MAX_ATTEMPTS", defaults.rate_limit.max_attempts),
            },
            monitor: MonitorConfig {
                connection_sweep_secs: env_or(
                    "CONNECTION_SWEEP_SECS",
                    monitor.connection_sweep_secs,
                ),
                room_sweep_secs: env_or("ROOM_SWEEP_SECS", monitor.room_sweep_secs),
                room_idle_secs: env_or("ROOM_IDLE_SECS", monitor.room_idle_secs),
                stats_interval_secs: env_or("STATS_INTERVAL_SECS", monitor.stats_interval_secs),
                memory_check_secs: env_or("MEMORY_CHECK_SECS", monitor.memory_check_secs),
                memory_threshold_mb: env_or("MEMORY_THRESHOLD_MB", monitor.memory_threshold_mb),
            },
            broadcast: BroadcastConfig {
                capacity: env_or("BROADCAST_CAPACITY", defaults.broadcast.capacity),
                outbound_buffer: env_or("OUTBOUND_BUFFER", defaults.broadcast.outbound_buffer),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: env_or("SERVER_PORT", defaults.server.port),
            },
            accounts_file: env::var("ACCOUNTS_FILE").ok(),
        }
    }

    /// 从 YAML 文件加载，再用 `REALTIME_` 前缀的环境变量覆盖
    ///
    /// 嵌套字段用双下划线分隔，例如 `REALTIME_RATE_LIMIT__MAX_ATTEMPTS=10`。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(Self::development()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("REALTIME_").split("__"))
            .extract()
            .map_err(|err| ConfigError::Load(err.to_string()))
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证JWT密钥长度和安全性（至少256位/32字节）
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.jwt.secret.contains("dev-secret")
            || self.jwt.secret.contains("not-for-production")
            || self.jwt.secret.contains("please-change")
        {
            return Err(ConfigError::InvalidJwtSecret(
                "Cannot use development JWT secret in production".to_string(),
            ));
        }

        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration_hours must be positive".to_string(),
            ));
        }

        if self.rate_limit.window_secs == 0 || self.rate_limit.max_attempts == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "window and cap must be greater than 0".to_string(),
            ));
        }

        let monitor = &self.monitor;
        let intervals = [
            ("connection_sweep_secs", monitor.connection_sweep_secs),
            ("room_sweep_secs", monitor.room_sweep_secs),
            ("stats_interval_secs", monitor.stats_interval_secs),
            ("memory_check_secs", monitor.memory_check_secs),
            ("memory_threshold_mb", monitor.memory_threshold_mb),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidMonitorConfig(format!(
                "{} must be greater than 0",
                name
            )));
        }

        if self.broadcast.capacity == 0 || self.broadcast.outbound_buffer == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "broadcast queues must have a non-zero capacity".to_string(),
            ));
        }

        Ok(())
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid rate limit configuration: {0}")]
    InvalidRateLimit(String),
    #[error("Invalid monitor configuration: {0}")]
    InvalidMonitorConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl Default for AppConfig {
    /// 默认配置使用开发环境版本
    /// 注意：生产环境应该明确调用 from_env() 而不是依赖默认值
    fn default() -> Self {
        Self::development()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const PROD_SECRET: &str = "production-grade-secret-key-with-sufficient-length";

    #[test]
    fn test_development_defaults() {
        let config = AppConfig::development();
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.rate_limit.max_attempts, 5);
        assert_eq!(config.monitor.connection_sweep_secs, 30);
        assert_eq!(config.monitor.room_sweep_secs, 3600);
        assert_eq!(config.monitor.stats_interval_secs, 300);
        assert_eq!(config.monitor.memory_check_secs, 120);
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_config_from_env_requires_secret() {
        Jail::expect_with(|_jail| {
            env::remove_var("JWT_SECRET");
            let result = AppConfig::from_env();
            assert!(matches!(result, Err(ConfigError::MissingVar("JWT_SECRET"))));
            Ok(())
        });
    }

    #[test]
    fn test_config_from_env_with_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("JWT_SECRET", PROD_SECRET);
            jail.set_env("RATE_LIMIT_MAX_ATTEMPTS", "10");
            jail.set_env("MEMORY_THRESHOLD_MB", "2048");
            jail.set_env("SERVER_PORT", "9100");

            let config = AppConfig::from_env().expect("secret is set");
            assert_eq!(config.jwt.secret, PROD_SECRET);
            assert_eq!(config.rate_limit.max_attempts, 10);
            assert_eq!(config.monitor.memory_threshold_mb, 2048);
            assert_eq!(config.server.port, 9100);
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_unparseable_values_fall_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("RATE_LIMIT_WINDOW_SECS", "soon");
            let config = AppConfig::from_env_with_defaults();
            assert_eq!(config.rate_limit.window_secs, 60);
            Ok(())
        });
    }

    #[test]
    fn test_load_merges_yaml_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "realtime.yaml",
                r#"
jwt:
  secret: production-grade-secret-key-with-sufficient-length
  expiration_hours: 8
rate_limit:
  window_secs: 30
  max_attempts: 3
"#,
            )?;
            jail.set_env("REALTIME_RATE_LIMIT__MAX_ATTEMPTS", "7");

            let config = AppConfig::load("realtime.yaml").expect("config loads");
            assert_eq!(config.jwt.expiration_hours, 8);
            assert_eq!(config.rate_limit.window_secs, 30);
            assert_eq!(config.rate_limit.max_attempts, 7);
            assert_eq!(config.monitor, MonitorConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::development();

        // 开发密钥不能通过验证
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("development JWT secret"));

        config.jwt.secret = PROD_SECRET.to_string();
        assert!(config.validate().is_ok());

        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_err());

        config.jwt.secret = PROD_SECRET.to_string();
        config.rate_limit.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRateLimit(_))
        ));

        config.rate_limit.max_attempts = 5;
        config.monitor.memory_check_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("memory_check_secs"));
    }
}
