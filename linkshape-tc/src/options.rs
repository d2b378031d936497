//! Engine configuration and its defaults.

use std::time::Duration;

use linkshape_common::constants::KiB;

use crate::impairment::Delay;

/// Default timeout applied to every external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default burst allowance of the bandwidth discipline, in bytes.
pub const DEFAULT_BURST_BYTES: u32 = 32 * KiB;

/// Default maximum time a packet may wait in the bandwidth discipline before being dropped.
/// Kept generous so the shaper itself is not where the bottleneck drops packets.
pub const DEFAULT_LATENCY_BOUND: Delay = Delay::from_millis(400);

/// Options for an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Program used for traffic control, `tc` by default.
    pub tc_program: String,
    /// Program used to list interfaces and addresses, `ip` by default.
    pub ip_program: String,
    /// Program used to probe link speed, `ethtool` by default.
    pub ethtool_program: String,
    /// Prepended to every command that mutates kernel state. Defaults to `sudo -n`, so a
    /// missing sudoers entry fails fast instead of prompting for a password.
    pub privilege_prefix: Vec<String>,
    /// Upper bound on the runtime of a single command. Commands exceeding it are killed.
    pub command_timeout: Duration,
    /// Burst allowance of the bandwidth discipline, in bytes.
    pub burst_bytes: u32,
    /// Maximum queueing latency of the bandwidth discipline.
    pub latency_bound: Delay,
    /// Whether discovery should probe the negotiated link speed with `ethtool`.
    pub probe_link_speed: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tc_program: "tc".to_string(),
            ip_program: "ip".to_string(),
            ethtool_program: "ethtool".to_string(),
            privilege_prefix: vec!["sudo".to_string(), "-n".to_string()],
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            burst_bytes: DEFAULT_BURST_BYTES,
            latency_bound: DEFAULT_LATENCY_BOUND,
            probe_link_speed: true,
        }
    }
}

impl EngineOptions {
    /// Sets the privilege prefix. An empty prefix runs mutating commands directly, which is
    /// what you want when already running as root.
    pub fn with_privilege_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privilege_prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the `tc` program, e.g. an absolute path.
    pub fn with_tc_program(mut self, program: impl Into<String>) -> Self {
        self.tc_program = program.into();
        self
    }

    /// Sets the `ip` program.
    pub fn with_ip_program(mut self, program: impl Into<String>) -> Self {
        self.ip_program = program.into();
        self
    }

    /// Sets the `ethtool` program.
    pub fn with_ethtool_program(mut self, program: impl Into<String>) -> Self {
        self.ethtool_program = program.into();
        self
    }

    /// Sets the burst allowance of the bandwidth discipline, in bytes.
    pub fn with_burst_bytes(mut self, burst_bytes: u32) -> Self {
        self.burst_bytes = burst_bytes;
        self
    }

    /// Sets the maximum queueing latency of the bandwidth discipline.
    pub fn with_latency_bound(mut self, latency: Delay) -> Self {
        self.latency_bound = latency;
        self
    }

    /// Enables or disables link speed probing during discovery.
    pub fn with_link_speed_probe(mut self, enabled: bool) -> Self {
        self.probe_link_speed = enabled;
        self
    }
}
