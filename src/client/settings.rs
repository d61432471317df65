//! 定义了构建协调客户端所需的参数以及重试策略。
//! Defines the parameters used to build a coordination client and its retry policy.

use crate::{
    config::ConfigSnapshot,
    error::{Error, Result},
};
use bytes::Bytes;
use std::{fmt, sync::Arc, time::Duration};

/// Authentication scheme used when a credential is configured.
pub const DIGEST_SCHEME: &str = "digest";

/// Principal the credential is presented for under digest authentication.
pub const DIGEST_PRINCIPAL: &str = "cluster";

/// A pluggable retry policy consulted by the client between attempts.
///
/// 可插拔的重试策略，客户端在两次尝试之间会咨询该策略。
pub trait RetryPolicy: fmt::Debug + Send + Sync + 'static {
    /// Returns how long to sleep before retry number `retry_count` (zero-based),
    /// or `None` when no further retry is allowed.
    ///
    /// 返回第 `retry_count` 次重试（从零开始）前需要等待的时间；不再允许重试时返回 `None`。
    fn allow_retry(&self, retry_count: u32) -> Option<Duration>;
}

/// Retries a bounded number of times with a fixed interval.
///
/// 固定间隔、有限次数的重试策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryNTimes {
    pub max_retries: u32,
    pub interval: Duration,
}

impl RetryNTimes {
    pub fn new(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
        }
    }
}

impl RetryPolicy for RetryNTimes {
    fn allow_retry(&self, retry_count: u32) -> Option<Duration> {
        (retry_count < self.max_retries).then_some(self.interval)
    }
}

/// Authentication material handed to the client.
///
/// 交给客户端的认证材料。
#[derive(Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub scheme: &'static str,
    pub payload: Bytes,
}

impl AuthInfo {
    /// Digest authentication in the `principal:secret` form.
    pub fn digest(secret: &str) -> Self {
        Self {
            scheme: DIGEST_SCHEME,
            payload: Bytes::from(format!("{DIGEST_PRINCIPAL}:{secret}")),
        }
    }
}

impl fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInfo")
            .field("scheme", &self.scheme)
            .field("payload", &"<redacted>")
            .finish()
    }
}

/// Everything a `ClientFactory` needs to build one client.
///
/// `ClientFactory` 构建一个客户端所需的全部参数。
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// The raw connect string, as configured.
    /// 原始连接串。
    pub connect_string: String,
    /// The individual endpoints of the connect string.
    /// 连接串中的各个端点。
    pub endpoints: Vec<String>,
    pub connect_timeout: Duration,
    pub session_timeout: Duration,
    pub retry_policy: Arc<dyn RetryPolicy>,
    /// Whether the client may settle for a read-only ensemble member.
    /// 客户端是否允许连接到只读成员。
    pub can_be_read_only: bool,
    pub auth: Option<AuthInfo>,
}

impl ClientSettings {
    pub fn builder(connect_string: impl Into<String>) -> ClientSettingsBuilder {
        ClientSettingsBuilder::new(connect_string)
    }

    /// Derives the client settings for a configuration snapshot.
    ///
    /// 根据配置快照推导客户端参数。
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self> {
        let connect_string = snapshot.ensemble.as_deref().ok_or(Error::MissingEnsemble)?;
        let mut builder = Self::builder(connect_string)
            .connect_timeout(snapshot.connect_timeout)
            .session_timeout(snapshot.session_timeout)
            .retry_policy(RetryNTimes::new(
                snapshot.retry_max_count,
                snapshot.retry_interval,
            ))
            .can_be_read_only(true);
        if let Some(credential) = &snapshot.credential {
            builder = builder.auth(AuthInfo::digest(credential.expose()));
        }
        builder.build()
    }
}

/// Builder for [`ClientSettings`].
pub struct ClientSettingsBuilder {
    connect_string: String,
    connect_timeout: Duration,
    session_timeout: Duration,
    retry_policy: Arc<dyn RetryPolicy>,
    can_be_read_only: bool,
    auth: Option<AuthInfo>,
}

impl ClientSettingsBuilder {
    fn new(connect_string: impl Into<String>) -> Self {
        let defaults = ConfigSnapshot::default();
        Self {
            connect_string: connect_string.into(),
            connect_timeout: defaults.connect_timeout,
            session_timeout: defaults.session_timeout,
            retry_policy: Arc::new(RetryNTimes::new(
                defaults.retry_max_count,
                defaults.retry_interval,
            )),
            can_be_read_only: false,
            auth: None,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: impl RetryPolicy) -> Self {
        self.retry_policy = Arc::new(policy);
        self
    }

    pub fn can_be_read_only(mut self, allowed: bool) -> Self {
        self.can_be_read_only = allowed;
        self
    }

    pub fn auth(mut self, auth: AuthInfo) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Fails with [`Error::MissingEnsemble`] if the connect string names no endpoint.
    pub fn build(self) -> Result<ClientSettings> {
        let endpoints: Vec<String> = self
            .connect_string
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        if endpoints.is_empty() {
            return Err(Error::MissingEnsemble);
        }
        Ok(ClientSettings {
            connect_string: self.connect_string,
            endpoints,
            connect_timeout: self.connect_timeout,
            session_timeout: self.session_timeout,
            retry_policy: self.retry_policy,
            can_be_read_only: self.can_be_read_only,
            auth: self.auth,
        })
    }
}
