//! 定义了连接配置快照和管理器的可配置参数。
//! Defines the connection configuration snapshot and the manager's tunable parameters.

use crate::error::{Error, Result};
use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

/// The raw configuration mapping handed over by the hosting runtime.
///
/// 由宿主运行时传入的原始配置映射。
pub type ConfigMap = BTreeMap<String, String>;

/// Recognized configuration keys.
/// 已识别的配置键。
pub mod keys {
    /// Comma-separated list of ensemble endpoints.
    pub const ENSEMBLE_URL: &str = "ensemble-url";
    /// Credential used for digest authentication.
    pub const CREDENTIAL: &str = "credential";
    /// Number of retries for retryable operations.
    pub const RETRY_MAX_COUNT: &str = "retry-max-count";
    /// Fixed sleep between retries, in milliseconds.
    pub const RETRY_INTERVAL_MS: &str = "retry-interval-ms";
    /// Time allowed for establishing a connection, in milliseconds.
    pub const CONNECT_TIMEOUT_MS: &str = "connect-timeout-ms";
    /// Session expiry negotiated with the ensemble, in milliseconds.
    pub const SESSION_TIMEOUT_MS: &str = "session-timeout-ms";
}

const DEFAULT_RETRY_MAX_COUNT: u32 = 3;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(15_000);
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(60_000);

/// A secret used to authenticate against the ensemble. Never printed.
///
/// 用于向集群认证的密钥。不会被打印。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// An immutable, value-comparable configuration for one connection attempt.
///
/// Equality covers exactly the fields that affect connection identity; keys consumed
/// by co-located collaborators never take part in it.
///
/// 一次连接尝试的不可变、可按值比较的配置。
///
/// 相等性仅覆盖影响连接身份的字段；由其他协作者消费的键不参与比较。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigSnapshot {
    /// The ensemble connect string, `None` when not configured.
    /// 集群连接串，未配置时为 `None`。
    pub ensemble: Option<String>,
    /// Optional authentication credential.
    /// 可选的认证凭据。
    pub credential: Option<Credential>,
    /// Maximum number of retries for a retryable operation.
    /// 可重试操作的最大重试次数。
    pub retry_max_count: u32,
    /// Fixed interval between two retries.
    /// 两次重试之间的固定间隔。
    pub retry_interval: Duration,
    /// Time allowed for establishing a connection.
    /// 建立连接允许的时间。
    pub connect_timeout: Duration,
    /// Session timeout negotiated with the ensemble.
    /// 与集群协商的会话超时时间。
    pub session_timeout: Duration,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            ensemble: None,
            credential: None,
            retry_max_count: DEFAULT_RETRY_MAX_COUNT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }
}

impl ConfigSnapshot {
    /// Builds a snapshot from the raw configuration mapping.
    ///
    /// Missing keys fall back to their defaults, empty strings count as missing.
    ///
    /// 从原始配置映射构建快照。缺失的键使用默认值，空字符串视为缺失。
    pub fn from_map(map: &ConfigMap) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            ensemble: non_empty(map, keys::ENSEMBLE_URL),
            credential: non_empty(map, keys::CREDENTIAL).map(Credential),
            retry_max_count: parse_or(map, keys::RETRY_MAX_COUNT, defaults.retry_max_count)?,
            retry_interval: parse_millis_or(map, keys::RETRY_INTERVAL_MS, defaults.retry_interval)?,
            connect_timeout: parse_millis_or(
                map,
                keys::CONNECT_TIMEOUT_MS,
                defaults.connect_timeout,
            )?,
            session_timeout: parse_millis_or(
                map,
                keys::SESSION_TIMEOUT_MS,
                defaults.session_timeout,
            )?,
        })
    }

    /// Returns a snapshot for the given ensemble with every other field defaulted.
    pub fn for_ensemble(ensemble: impl Into<String>) -> Self {
        Self {
            ensemble: Some(ensemble.into()),
            ..Self::default()
        }
    }

    pub fn has_ensemble(&self) -> bool {
        self.ensemble.is_some()
    }

    /// Iterates over the individual endpoints of the connect string.
    ///
    /// 遍历连接串中的各个端点。
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.ensemble
            .as_deref()
            .into_iter()
            .flat_map(|s| s.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

fn non_empty(map: &ConfigMap, key: &str) -> Option<String> {
    map.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn parse_or<T: FromStr>(map: &ConfigMap, key: &'static str, default: T) -> Result<T> {
    match non_empty(map, key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::InvalidConfig { key, value: raw }),
        None => Ok(default),
    }
}

fn parse_millis_or(map: &ConfigMap, key: &'static str, default: Duration) -> Result<Duration> {
    match non_empty(map, key) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| Error::InvalidConfig { key, value: raw }),
        None => Ok(default),
    }
}

/// Tunable parameters of the lifecycle manager itself.
///
/// 生命周期管理器自身的可调参数。
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long `deactivate` waits for the serialized stream to drain.
    /// Exceeding it is logged, never escalated.
    ///
    /// `deactivate` 等待串行任务流排空的最长时间。超时仅记录日志，不会上报。
    pub drain_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
        }
    }
}
