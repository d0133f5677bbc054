use std::fmt;
use std::time::Duration;

use ctxbridge_protocol::{extract_transfer, Message, Transferable};

use crate::error::{ProxyError, Result};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "__comctx__";

/// Configuration shared by the provider and injector of one proxy definition.
#[derive(Clone, PartialEq, Eq)]
pub struct Options {
    /// Isolation key. Messages from another namespace are ignored.
    pub namespace: String,
    /// Probe the provider before every call.
    pub heartbeat_check: bool,
    /// Delay between liveness probes.
    pub heartbeat_interval: Duration,
    /// Give up on the provider after this long without a pong.
    pub heartbeat_timeout: Duration,
    /// Hand transferable payload leaves to the adapter as transfer hints.
    pub transfer: bool,
    /// Keep a local snapshot of the target on the injector side for
    /// membership queries.
    pub backup: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            heartbeat_check: true,
            heartbeat_interval: Duration::from_millis(300),
            heartbeat_timeout: Duration::from_millis(1000),
            transfer: false,
            backup: false,
        }
    }
}

impl Options {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_heartbeat_check(mut self, enabled: bool) -> Self {
        self.heartbeat_check = enabled;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_transfer(mut self, enabled: bool) -> Self {
        self.transfer = enabled;
        self
    }

    pub fn with_backup(mut self, enabled: bool) -> Self {
        self.backup = enabled;
        self
    }

    /// Check the invariants every proxy definition relies on.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(ProxyError::InvalidConfig(
                "invalid namespace: must not be empty".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ProxyError::InvalidConfig(
                "invalid heartbeat config: interval must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ProxyError::InvalidConfig(format!(
                "invalid heartbeat config: timeout ({}ms) must exceed interval ({}ms)",
                self.heartbeat_timeout.as_millis(),
                self.heartbeat_interval.as_millis()
            )));
        }
        Ok(())
    }

    /// Transfer hints for an outgoing message. Empty unless transfer is on.
    pub(crate) fn transfer_hints(&self, message: &Message) -> Vec<Transferable> {
        if self.transfer {
            extract_transfer(&message.to_value())
        } else {
            Vec::new()
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("namespace", &self.namespace)
            .field("heartbeat_check", &self.heartbeat_check)
            .field(
                "heartbeat_interval",
                &format_args!("{}ms", self.heartbeat_interval.as_millis()),
            )
            .field(
                "heartbeat_timeout",
                &format_args!("{}ms", self.heartbeat_timeout.as_millis()),
            )
            .field("transfer", &self.transfer)
            .field("backup", &self.backup)
            .finish()
    }
}
