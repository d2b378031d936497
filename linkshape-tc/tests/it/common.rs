//! An in-memory stand-in for the kernel, answering `ip`, `tc` and `ethtool` the way the real
//! tools do for the subset of commands the engine issues.

use std::{collections::HashMap, sync::Arc, time::Duration};

use linkshape_tc::{CommandResult, Engine, EngineOptions, MemoryAudit, Rate, Runner};
use parking_lot::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Netem {
    pub delay: Option<String>,
    pub loss: Option<String>,
}

/// The queueing hierarchy of one interface. `Default` is the kernel's own default discipline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hierarchy {
    pub netem: Option<Netem>,
    pub tbf: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    links: Vec<(String, Option<String>)>,
    speeds: HashMap<String, u32>,
    qdiscs: HashMap<String, Hierarchy>,
    failures: Vec<(String, String)>,
    listing_broken: bool,
    calls: Vec<Vec<String>>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    global_in_flight: usize,
    max_global_in_flight: usize,
}

#[derive(Debug, Default)]
pub struct FakeKernel {
    state: Mutex<State>,
    latency: Duration,
    mutation_latency: Duration,
}

/// Renders a rate the way `tc` does: in the largest unit that keeps the value whole.
fn render_rate(rate: &str) -> String {
    let Ok(rate) = rate.parse::<Rate>() else { return rate.to_string() };

    let mut value = rate.bits_per_second();
    let mut units = ["bit", "Kbit", "Mbit", "Gbit", "Tbit"].iter().peekable();
    while value >= 1000 && value % 1000 == 0 && units.len() > 1 {
        value /= 1000;
        units.next();
    }

    format!("{value}{}", units.peek().unwrap())
}

fn exited(argv: &[String], code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> CommandResult {
    CommandResult::exited(argv.to_vec(), code, stdout, stderr)
}

fn ok(argv: &[String], stdout: impl Into<String>) -> CommandResult {
    exited(argv, 0, stdout, "")
}

/// Value following `key` in `args`.
fn value_of<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    args.iter().position(|a| a == key).and_then(|i| args.get(i + 1)).map(String::as_str)
}

fn is_mutation(args: &[String]) -> bool {
    args.first().is_some_and(|p| p == "tc")
        && args.get(2).is_some_and(|verb| verb == "add" || verb == "del")
}

impl FakeKernel {
    /// A host with `lo` and `eth0`.
    pub fn new() -> Self {
        Self::default()
            .with_link("lo", Some("127.0.0.1"))
            .with_link("eth0", Some("10.0.0.2"))
    }

    pub fn with_link(self, name: &str, address: Option<&str>) -> Self {
        self.state.lock().links.push((name.to_string(), address.map(str::to_string)));
        self
    }

    pub fn with_speed(self, name: &str, mbps: u32) -> Self {
        self.state.lock().speeds.insert(name.to_string(), mbps);
        self
    }

    /// Makes every command take `latency` to complete.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes only `tc qdisc add/del` take `latency` to complete.
    pub fn with_mutation_latency(mut self, latency: Duration) -> Self {
        self.mutation_latency = latency;
        self
    }

    /// Any command whose argv contains `needle` fails with `stderr`.
    pub fn fail_when(&self, needle: &str, stderr: &str) {
        self.state.lock().failures.push((needle.to_string(), stderr.to_string()));
    }

    pub fn break_listing(&self) {
        self.state.lock().listing_broken = true;
    }

    pub fn set_hierarchy(&self, dev: &str, hierarchy: Hierarchy) {
        self.state.lock().qdiscs.insert(dev.to_string(), hierarchy);
    }

    pub fn hierarchy(&self, dev: &str) -> Hierarchy {
        self.state.lock().qdiscs.get(dev).cloned().unwrap_or_default()
    }

    /// Every argv received, in order, privilege prefix included.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Vec<String>> {
        self.calls().into_iter().filter(|argv| is_mutation(strip_prefix(argv))).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Highest number of concurrent mutations seen on `dev`.
    pub fn max_in_flight(&self, dev: &str) -> usize {
        self.state.lock().max_in_flight.get(dev).copied().unwrap_or_default()
    }

    /// Highest number of concurrent mutations seen across all interfaces.
    pub fn max_global_in_flight(&self) -> usize {
        self.state.lock().max_global_in_flight
    }

    fn enter(&self, dev: &str) {
        let mut state = self.state.lock();
        let n = state.in_flight.entry(dev.to_string()).or_default();
        *n += 1;
        let n = *n;
        let max = state.max_in_flight.entry(dev.to_string()).or_default();
        *max = (*max).max(n);
        state.global_in_flight += 1;
        state.max_global_in_flight = state.max_global_in_flight.max(state.global_in_flight);
    }

    fn exit(&self, dev: &str) {
        let mut state = self.state.lock();
        if let Some(n) = state.in_flight.get_mut(dev) {
            *n -= 1;
        }
        state.global_in_flight -= 1;
    }

    fn answer(&self, argv: &[String]) -> CommandResult {
        let args = strip_prefix(argv);
        let mut state = self.state.lock();

        let joined = args.join(" ");
        if let Some((_, stderr)) = state.failures.iter().find(|(needle, _)| joined.contains(needle.as_str())) {
            return exited(argv, 2, "", stderr.clone());
        }

        match args.first().map(String::as_str) {
            Some("ip") => {
                if state.listing_broken {
                    return exited(argv, 255, "", "Cannot open netlink socket: Permission denied\n");
                }
                let entries: Vec<String> = state
                    .links
                    .iter()
                    .enumerate()
                    .map(|(i, (name, addr))| match addr {
                        Some(addr) => format!(
                            r#"{{"ifindex":{},"ifname":"{name}","addr_info":[{{"family":"inet","local":"{addr}","prefixlen":24}}]}}"#,
                            i + 1
                        ),
                        // What `ip -j -4` prints for an interface with no IPv4 address.
                        None => "{}".to_string(),
                    })
                    .collect();
                ok(argv, format!("[{}]", entries.join(",")))
            }
            Some("ethtool") => {
                let dev = args.get(1).cloned().unwrap_or_default();
                match state.speeds.get(&dev) {
                    Some(speed) => ok(argv, format!("Settings for {dev}:\n\tSpeed: {speed}Mb/s\n\tDuplex: Full\n")),
                    None => ok(argv, format!("Settings for {dev}:\n\tSpeed: Unknown!\n")),
                }
            }
            Some("tc") => Self::tc(&mut state, argv, args),
            _ => exited(argv, 127, "", "command not found\n"),
        }
    }

    fn tc(state: &mut State, argv: &[String], args: &[String]) -> CommandResult {
        let Some(dev) = value_of(args, "dev").map(str::to_string) else {
            return exited(argv, 1, "", "Command line is not complete. Try option \"help\"\n");
        };
        if !state.links.iter().any(|(name, _)| *name == dev) {
            return exited(argv, 1, "", format!("Cannot find device \"{dev}\"\n"));
        }

        let hierarchy = state.qdiscs.entry(dev).or_default();
        let verb = args.get(2).map(String::as_str);

        match verb {
            Some("show") => {
                let mut out = match &hierarchy.netem {
                    Some(netem) => {
                        let mut line = "qdisc netem 1: root refcnt 2 limit 1000".to_string();
                        if let Some(delay) = &netem.delay {
                            line.push_str(&format!(" delay {delay}"));
                        }
                        if let Some(loss) = &netem.loss {
                            line.push_str(&format!(" loss {loss}"));
                        }
                        line + "\n"
                    }
                    None => "qdisc noqueue 0: root refcnt 2 \n".to_string(),
                };
                let root_only = args.last().is_some_and(|a| a == "root");
                if let (Some(rate), false) = (&hierarchy.tbf, root_only) {
                    out.push_str(&format!(
                        "qdisc tbf 10: parent 1:1 rate {} burst 32Kb lat 400ms \n",
                        render_rate(rate)
                    ));
                }
                ok(argv, out)
            }
            Some("del") => {
                if hierarchy.netem.is_none() {
                    return exited(argv, 2, "", "Error: Cannot delete qdisc with handle of zero.\n");
                }
                *hierarchy = Hierarchy::default();
                ok(argv, "")
            }
            Some("add") if args.contains(&"netem".to_string()) => {
                if hierarchy.netem.is_some() {
                    return exited(argv, 2, "", "Error: Exclusivity flag on, cannot modify.\n");
                }
                hierarchy.netem = Some(Netem {
                    delay: value_of(args, "delay").map(str::to_string),
                    loss: value_of(args, "loss").map(str::to_string),
                });
                ok(argv, "")
            }
            Some("add") if args.contains(&"tbf".to_string()) => {
                if hierarchy.netem.is_none() {
                    return exited(argv, 2, "", "Error: Failed to find specified qdisc.\n");
                }
                if hierarchy.tbf.is_some() {
                    return exited(argv, 2, "", "Error: Exclusivity flag on, cannot modify.\n");
                }
                hierarchy.tbf = value_of(args, "rate").map(str::to_string);
                ok(argv, "")
            }
            _ => exited(argv, 1, "", "Unknown qdisc command\n"),
        }
    }
}

/// Drops a leading `sudo [-flags]`.
fn strip_prefix(argv: &[String]) -> &[String] {
    match argv.first().map(String::as_str) {
        Some("sudo") => {
            let skip = 1 + argv[1..].iter().take_while(|a| a.starts_with('-')).count();
            &argv[skip..]
        }
        _ => argv,
    }
}

#[async_trait::async_trait]
impl Runner for FakeKernel {
    async fn run(&self, argv: Vec<String>) -> CommandResult {
        let args = strip_prefix(&argv);
        let mutation = is_mutation(args);
        let dev = value_of(args, "dev").unwrap_or_default().to_string();

        self.state.lock().calls.push(argv.clone());

        if mutation {
            self.enter(&dev);
        }
        let latency = if mutation { self.latency + self.mutation_latency } else { self.latency };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let result = self.answer(&argv);
        if mutation {
            self.exit(&dev);
        }

        result
    }
}

/// An engine wired to `kernel`, with the default `sudo -n` prefix and an in-memory audit log.
pub fn engine(kernel: &Arc<FakeKernel>) -> (Engine, Arc<MemoryAudit>) {
    engine_with(kernel, EngineOptions::default())
}

pub fn engine_with(kernel: &Arc<FakeKernel>, options: EngineOptions) -> (Engine, Arc<MemoryAudit>) {
    let audit = Arc::new(MemoryAudit::default());
    let engine = Engine::with_runner(options, kernel.clone(), audit.clone());
    (engine, audit)
}

#[test]
fn fake_renders_rates_like_tc() {
    assert_eq!(render_rate("1000Kbit"), "1Mbit");
    assert_eq!(render_rate("1500Kbit"), "1500Kbit");
    assert_eq!(render_rate("10Mbit"), "10Mbit");
    assert_eq!(render_rate("2Gbit"), "2Gbit");
    assert_eq!(render_rate("1000Gbit"), "1Tbit");
}
