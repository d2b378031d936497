//! The `linkshape` command line: list, show, apply and remove impairment.

use std::{io, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use linkshape::{
    AuditSink, Engine, EngineOptions, FileAudit, ImpairmentRequest, InterfaceState,
    ProcessRunner, TracingAudit,
};

/// Apply and remove synthetic network impairment on Linux interfaces.
#[derive(Debug, Parser)]
#[command(name = "linkshape", version)]
struct Cli {
    #[command(subcommand)]
    action: Action,

    /// Run mutating commands directly instead of through `sudo -n`
    #[arg(long, global = true)]
    no_sudo: bool,

    /// Per-command timeout in milliseconds
    #[arg(long, global = true, default_value_t = 5000)]
    timeout_ms: u64,

    /// Path of the `tc` binary
    #[arg(long, global = true, default_value = "tc")]
    tc: String,

    /// Append a JSON line per executed command to this file
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// List addressed interfaces with their current impairment
    List,
    /// Show the impairment currently enforced on an interface
    Show { iface: String },
    /// Merge the given fields into an interface's impairment
    Apply {
        iface: String,
        /// Added latency, e.g. `50ms`, `500us` or `50` (milliseconds)
        #[arg(long)]
        delay: Option<String>,
        /// Packet loss percentage, 0 to 100
        #[arg(long)]
        loss: Option<String>,
        /// Bandwidth cap, e.g. `10Mbit`
        #[arg(long)]
        rate: Option<String>,
    },
    /// Remove all impairment from an interface
    Remove { iface: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Engine(#[from] linkshape::Error),
    #[error("opening audit log {path:?}: {source}")]
    AuditLog { path: PathBuf, source: io::Error },
}

impl Cli {
    fn options(&self) -> EngineOptions {
        let options = EngineOptions::default()
            .with_command_timeout(Duration::from_millis(self.timeout_ms))
            .with_tc_program(self.tc.clone());

        if self.no_sudo {
            options.with_privilege_prefix(Vec::<String>::new())
        } else {
            options
        }
    }

    fn audit(&self) -> Result<Arc<dyn AuditSink>, CliError> {
        let Some(path) = &self.audit_log else { return Ok(Arc::new(TracingAudit)) };

        let audit = FileAudit::open(path)
            .map_err(|source| CliError::AuditLog { path: path.clone(), source })?;
        Ok(Arc::new(audit))
    }
}

fn print_table(interfaces: &[InterfaceState]) {
    println!(
        "{:<16} {:<16} {:<10} {:<6} {:<12} {}",
        "INTERFACE", "ADDRESS", "DELAY", "LOSS", "RATE", "LINK"
    );

    for iface in interfaces {
        let address = iface.address.map(|a| a.to_string()).unwrap_or_default();
        let rate = iface.profile.rate.map(|r| r.to_string()).unwrap_or_else(|| "-".into());
        let link = iface.link_speed.map(|s| s.to_string()).unwrap_or_else(|| "-".into());

        println!(
            "{:<16} {:<16} {:<10} {:<6} {:<12} {}",
            iface.name,
            address,
            iface.profile.delay.to_string(),
            iface.profile.loss.to_string(),
            rate,
            link
        );
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let engine = Engine::with_runner(cli.options(), Arc::new(ProcessRunner), cli.audit()?);

    match cli.action {
        Action::List => print_table(&engine.list_interfaces().await?),
        Action::Show { iface } => {
            let snapshot = engine.inspect(&iface).await?;
            println!("{iface}: {snapshot}");
        }
        Action::Apply { iface, delay, loss, rate } => {
            let request = ImpairmentRequest { delay, loss, rate };
            let profile = engine.apply_impairment(&iface, &request).await?;
            println!("{iface}: {profile}");
        }
        Action::Remove { iface } => {
            engine.remove_impairment(&iface).await?;
            println!("{iface}: clean");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
