//! Builders for the `tc`, `ip` and `ethtool` invocations the engine issues.
//!
//! Hierarchy installed on an impaired interface:
//!
//! ```text
//! root 1: netem [delay D] [loss L%]
//!   └── class 1:1
//!         └── 10: tbf rate R burst B latency T   (only with a rate cap)
//! ```

use crate::{
    command::Command,
    impairment::{ImpairmentProfile, Rate},
    options::EngineOptions,
};

/// Handle of the root netem discipline.
pub const ROOT_HANDLE: &str = "1:";
/// The single class netem exposes for a child discipline.
pub const NETEM_CLASS: &str = "1:1";
/// Handle of the bandwidth discipline.
pub const RATE_HANDLE: &str = "10:";

/// Fragments `tc` prints when asked to delete a root discipline that isn't there. The first
/// one is what recent iproute2 prints for an interface still on its default discipline.
const MISSING_QDISC_ERRORS: [&str; 3] = [
    "Cannot delete qdisc with handle of zero",
    "No such file or directory",
    "Cannot find specified qdisc",
];

/// Returns `true` if `stderr` of a delete says there was nothing to delete.
pub fn is_missing_qdisc(stderr: &str) -> bool {
    MISSING_QDISC_ERRORS.iter().any(|needle| stderr.contains(needle))
}

/// Command factory bound to the configured program names.
#[derive(Debug, Clone, Copy)]
pub struct Commands<'a> {
    options: &'a EngineOptions,
}

impl<'a> Commands<'a> {
    /// Builds commands using the programs configured in `options`.
    pub fn new(options: &'a EngineOptions) -> Self {
        Self { options }
    }

    fn tc(&self) -> Command {
        Command::new(self.options.tc_program.as_str())
    }

    /// `ip -j -4 addr show`
    pub fn list_addresses(&self) -> Command {
        Command::new(self.options.ip_program.as_str()).args(["-j", "-4", "addr", "show"])
    }

    /// `ethtool <dev>`
    pub fn link_settings(&self, dev: &str) -> Command {
        Command::new(self.options.ethtool_program.as_str()).arg(dev)
    }

    /// `tc qdisc show dev <dev> root`
    pub fn show_root(&self, dev: &str) -> Command {
        self.tc().args(["qdisc", "show", "dev", dev, "root"])
    }

    /// `tc qdisc show dev <dev>`
    pub fn show_all(&self, dev: &str) -> Command {
        self.tc().args(["qdisc", "show", "dev", dev])
    }

    /// `tc qdisc del dev <dev> root`
    pub fn delete_root(&self, dev: &str) -> Command {
        self.tc().args(["qdisc", "del", "dev", dev, "root"]).privileged()
    }

    /// `tc qdisc add dev <dev> root handle 1: netem [delay D] [loss L%]`
    ///
    /// Zero-valued parameters are left out. With both at zero this is a pass-through netem,
    /// which is still needed as the parent of a bandwidth discipline.
    pub fn add_netem(&self, dev: &str, profile: &ImpairmentProfile) -> Command {
        let mut cmd =
            self.tc().args(["qdisc", "add", "dev", dev, "root", "handle", ROOT_HANDLE, "netem"]);

        if !profile.delay().is_zero() {
            cmd = cmd.args(["delay".to_string(), profile.delay().to_string()]);
        }

        if !profile.loss().is_zero() {
            cmd = cmd.args(["loss".to_string(), profile.loss().to_string()]);
        }

        cmd.privileged()
    }

    /// `tc qdisc add dev <dev> parent 1:1 handle 10: tbf rate R burst B latency T`
    pub fn add_rate(&self, dev: &str, rate: Rate) -> Command {
        self.tc()
            .args(["qdisc", "add", "dev", dev, "parent", NETEM_CLASS, "handle", RATE_HANDLE, "tbf"])
            .args([
                "rate".to_string(),
                rate.to_string(),
                "burst".to_string(),
                self.options.burst_bytes.to_string(),
                "latency".to_string(),
                self.options.latency_bound.to_string(),
            ])
            .privileged()
    }
}
