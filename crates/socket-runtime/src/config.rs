use std::path::Path;
use std::time::Duration;

use anyhow::{Context, ensure};
use serde::Deserialize;
type Result<T> = anyhow::Result<T>;

use crate::broadcast::BackpressurePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// 每个连接出站队列容量。
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    /// 串行模式下每个连接等待处理的入站帧上限。
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,
    /// 并发模式共享的 handler 执行上限。
    #[serde(default = "default_concurrent_limit")]
    pub concurrent_limit: usize,
    #[serde(default = "default_http_bridge_timeout_ms")]
    pub http_bridge_timeout_ms: u64,
    #[serde(default)]
    pub backpressure: BackpressureConfig,
}

impl RuntimeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("failed to deserialize runtime config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.send_queue_capacity > 0,
            "send_queue_capacity must be greater than zero"
        );
        ensure!(
            self.inbound_queue_capacity > 0,
            "inbound_queue_capacity must be greater than zero"
        );
        ensure!(
            self.concurrent_limit > 0,
            "concurrent_limit must be greater than zero"
        );
        ensure!(
            self.backpressure.mode != BackpressureMode::Drop || self.backpressure.max_drops > 0,
            "backpressure.max_drops must be greater than zero for the drop policy"
        );
        Ok(())
    }

    pub fn http_bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.http_bridge_timeout_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            send_queue_capacity: default_send_queue_capacity(),
            inbound_queue_capacity: default_inbound_queue_capacity(),
            concurrent_limit: default_concurrent_limit(),
            http_bridge_timeout_ms: default_http_bridge_timeout_ms(),
            backpressure: BackpressureConfig::default(),
        }
    }
}

/// 出站队列饱和时的处理策略配置。
#[derive(Debug, Clone, Deserialize)]
pub struct BackpressureConfig {
    #[serde(default, rename = "policy")]
    pub mode: BackpressureMode,
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
    #[serde(default = "default_max_drops")]
    pub max_drops: u64,
}

impl BackpressureConfig {
    pub fn policy(&self) -> BackpressurePolicy {
        match self.mode {
            BackpressureMode::Block => BackpressurePolicy::Block {
                timeout: Duration::from_millis(self.block_timeout_ms),
            },
            BackpressureMode::Drop => BackpressurePolicy::Drop {
                max_drops: self.max_drops,
            },
            BackpressureMode::Close => BackpressurePolicy::Close,
        }
    }
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            mode: BackpressureMode::default(),
            block_timeout_ms: default_block_timeout_ms(),
            max_drops: default_max_drops(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureMode {
    #[default]
    Block,
    Drop,
    Close,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_send_queue_capacity() -> usize {
    256
}

fn default_inbound_queue_capacity() -> usize {
    256
}

fn default_concurrent_limit() -> usize {
    64
}

fn default_http_bridge_timeout_ms() -> u64 {
    30_000
}

fn default_block_timeout_ms() -> u64 {
    1_000
}

fn default_max_drops() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{BackpressureMode, RuntimeConfig};
    use crate::broadcast::BackpressurePolicy;

    #[test]
    fn test_parse_config() {
        let raw = r#"
bind_addr = "0.0.0.0:9000"
send_queue_capacity = 32
inbound_queue_capacity = 8
concurrent_limit = 4

[backpressure]
policy = "drop"
max_drops = 10
"#;

        let config = RuntimeConfig::from_str(raw).expect("config should parse");
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.send_queue_capacity, 32);
        assert_eq!(config.inbound_queue_capacity, 8);
        assert_eq!(config.concurrent_limit, 4);
        assert_eq!(config.backpressure.mode, BackpressureMode::Drop);
        assert_eq!(
            config.backpressure.policy(),
            BackpressurePolicy::Drop { max_drops: 10 }
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RuntimeConfig::from_str("").expect("empty config should parse");
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.send_queue_capacity, 256);
        assert_eq!(config.concurrent_limit, 64);
        assert_eq!(config.http_bridge_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.backpressure.policy(),
            BackpressurePolicy::Block {
                timeout: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let err = RuntimeConfig::from_str("send_queue_capacity = 0")
            .expect_err("zero capacity should be rejected");
        assert!(err.to_string().contains("send_queue_capacity"));
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let raw = r#"
[backpressure]
policy = "explode"
"#;
        assert!(RuntimeConfig::from_str(raw).is_err());
    }
}
