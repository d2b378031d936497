//! Finding the interfaces that can be impaired.
//!
//! Interfaces come from `ip -j -4 addr show`. Loopback and interfaces without an IPv4 address
//! are dropped; every remaining one is inspected, and probed for its link speed when it has no
//! bandwidth cap.

use std::{net::Ipv4Addr, sync::Arc};

use serde::Deserialize;

use crate::{
    command::{CommandExecutor, Termination},
    impairment::{InterfaceState, LinkSpeed},
    inspect::StateInspector,
    options::EngineOptions,
    tc::Commands,
};

/// Name of the loopback interface, which is never offered for impairment.
pub const LOOPBACK: &str = "lo";

/// Listing the host's interfaces failed.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The `ip` command failed.
    #[error("interface listing failed ({termination}): {stderr}")]
    Command { termination: Termination, stderr: String },
    /// `ip` printed something that is not the expected JSON.
    #[error("invalid interface listing: {0}")]
    Json(#[from] serde_json::Error),
}

/// One entry of `ip -j addr show`. Interfaces filtered out by `-4` show up as `{}`, hence the
/// defaults.
#[derive(Debug, Deserialize)]
struct IpLink {
    #[serde(default)]
    ifname: String,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    #[serde(default)]
    family: String,
    #[serde(default)]
    local: Option<String>,
}

/// An interface name and its first IPv4 address, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAddress {
    /// Kernel interface name, e.g. `eth0`.
    pub name: String,
    /// First IPv4 address, if the interface has one.
    pub address: Option<Ipv4Addr>,
}

impl LinkAddress {
    /// Loopback and interfaces without an IPv4 address (a proxy for "not in use") are skipped.
    pub fn is_candidate(&self) -> bool {
        self.name != LOOPBACK && self.address.is_some()
    }
}

/// Parses the JSON printed by `ip -j -4 addr show`.
pub fn parse_addresses(json: &str) -> Result<Vec<LinkAddress>, serde_json::Error> {
    let links: Vec<IpLink> = serde_json::from_str(json)?;

    Ok(links
        .into_iter()
        .filter(|link| !link.ifname.is_empty())
        .map(|link| {
            let address = link
                .addr_info
                .iter()
                .filter(|info| info.family == "inet")
                .find_map(|info| info.local.as_deref()?.parse().ok());

            LinkAddress { name: link.ifname, address }
        })
        .collect())
}

/// Extracts `Speed: <N>Mb/s` from `ethtool` output. `Speed: Unknown!` yields `None`.
pub fn parse_link_speed(output: &str) -> Option<LinkSpeed> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Speed:"))
        .and_then(|value| value.trim().strip_suffix("Mb/s"))
        .and_then(|mbps| mbps.parse().ok())
        .map(LinkSpeed)
}

/// Lists the interfaces that can be impaired, with their current state.
#[derive(Debug, Clone)]
pub struct InterfaceDiscovery {
    executor: CommandExecutor,
    inspector: StateInspector,
    options: Arc<EngineOptions>,
}

impl InterfaceDiscovery {
    /// Creates a discovery that inspects each interface with `inspector`.
    pub fn new(
        executor: CommandExecutor,
        inspector: StateInspector,
        options: Arc<EngineOptions>,
    ) -> Self {
        Self { executor, inspector, options }
    }

    /// Enumerates candidate interfaces and inspects each one concurrently.
    ///
    /// Only the listing itself can fail; problems enriching a single interface degrade that
    /// interface's optional fields.
    pub async fn discover(&self) -> Result<Vec<InterfaceState>, DiscoveryError> {
        let result = self.executor.run(Commands::new(&self.options).list_addresses()).await;
        if !result.success() {
            return Err(DiscoveryError::Command {
                termination: result.termination,
                stderr: result.stderr.trim().to_string(),
            });
        }

        let links = parse_addresses(&result.stdout)?;
        tracing::debug!(total = links.len(), "listed interfaces");

        let candidates = links.into_iter().filter(LinkAddress::is_candidate);
        let states = futures::future::join_all(candidates.map(|link| self.enrich(link))).await;

        Ok(states)
    }

    async fn enrich(&self, link: LinkAddress) -> InterfaceState {
        let profile = self.inspector.inspect(&link.name).await;

        let link_speed = if profile.rate.is_none() && self.options.probe_link_speed {
            self.link_speed(&link.name).await
        } else {
            None
        };

        InterfaceState { name: link.name, address: link.address, profile, link_speed }
    }

    async fn link_speed(&self, dev: &str) -> Option<LinkSpeed> {
        let result = self.executor.run(Commands::new(&self.options).link_settings(dev)).await;
        if !result.success() {
            tracing::debug!(dev, termination = %result.termination, "link speed unavailable");
            return None;
        }

        let speed = parse_link_speed(&result.stdout);
        if speed.is_none() {
            tracing::debug!(dev, "link speed not reported");
        }

        speed
    }
}
