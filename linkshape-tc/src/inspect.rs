//! Reading the impairment currently enforced on an interface.
//!
//! Parsing is token based and lenient: unknown output is ignored and only the first
//! occurrence of each keyword counts. A missing keyword means the clean value for that field;
//! a keyword followed by something unparseable is a [`ParseFailure`], logged and also
//! treated as the clean value for that field alone.

use std::sync::Arc;

use crate::{
    command::{CommandExecutor, CommandResult, Termination},
    impairment::{Delay, ImpairmentSnapshot, LossPercent, Rate, ValueError},
    options::EngineOptions,
    tc::{Commands, RATE_HANDLE},
};

/// A keyword was found in `tc` output but its value could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot parse {field} value {token:?}: {source}")]
pub struct ParseFailure {
    /// The keyword, e.g. `delay`.
    pub field: &'static str,
    /// The token following it, empty if there was none.
    pub token: String,
    #[source]
    pub source: ValueError,
}

/// Returns the whitespace-separated token following the first `key` token, if `key` occurs.
/// The inner option is `None` if `key` is the last token.
fn token_after<'a>(output: &'a str, key: &str) -> Option<Option<&'a str>> {
    let mut tokens = output.split_whitespace().skip_while(|t| *t != key);
    tokens.next()?;
    Some(tokens.next())
}

fn parse_field<T>(
    output: &str,
    key: &'static str,
    parse: impl FnOnce(&str) -> Result<T, ValueError>,
) -> Result<Option<T>, ParseFailure> {
    match token_after(output, key) {
        None => Ok(None),
        Some(None) => {
            Err(ParseFailure { field: key, token: String::new(), source: ValueError::Empty })
        }
        Some(Some(token)) => parse(token)
            .map(Some)
            .map_err(|source| ParseFailure { field: key, token: token.to_string(), source }),
    }
}

/// Returns the `tc qdisc show` line describing the discipline with `handle`.
fn qdisc_line<'a>(output: &'a str, handle: &str) -> Option<&'a str> {
    // qdisc <kind> <handle> ...
    output.lines().find(|line| {
        let mut tokens = line.split_whitespace();
        tokens.next() == Some("qdisc") && tokens.nth(1) == Some(handle)
    })
}

/// Builds a snapshot from `tc qdisc show dev <dev> root` and `tc qdisc show dev <dev>` output.
///
/// Every field that had to fall back to its clean value because of malformed output is
/// reported in the returned failures.
pub fn parse_snapshot(root: &str, all: &str) -> (ImpairmentSnapshot, Vec<ParseFailure>) {
    let mut snapshot = ImpairmentSnapshot::default();
    let mut failures = Vec::new();

    match parse_field(root, "delay", Delay::from_tc) {
        Ok(delay) => snapshot.delay = delay.unwrap_or_default(),
        Err(e) => failures.push(e),
    }

    match parse_field(root, "loss", LossPercent::from_tc) {
        Ok(loss) => snapshot.loss = loss.unwrap_or_default(),
        Err(e) => failures.push(e),
    }

    if let Some(line) = qdisc_line(all, RATE_HANDLE) {
        match parse_field(line, "rate", Rate::from_tc) {
            Ok(rate) => snapshot.rate = rate,
            Err(e) => failures.push(e),
        }
    }

    (snapshot, failures)
}

/// A `tc qdisc show` query itself failed, so the state of the interface is unknown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("querying qdiscs of {interface} failed ({termination}): {}", str::trim(.stderr))]
pub struct QueryError {
    /// The interface being queried.
    pub interface: String,
    /// The query that failed.
    pub argv: Vec<String>,
    /// How it ended.
    pub termination: Termination,
    /// What it printed to stderr.
    pub stderr: String,
}

impl QueryError {
    fn new(dev: &str, result: &CommandResult) -> Self {
        Self {
            interface: dev.to_string(),
            argv: result.argv.clone(),
            termination: result.termination,
            stderr: result.stderr.clone(),
        }
    }
}

/// Queries the kernel for the impairment on one interface.
#[derive(Debug, Clone)]
pub struct StateInspector {
    executor: CommandExecutor,
    options: Arc<EngineOptions>,
}

impl StateInspector {
    /// Creates an inspector issuing its queries through `executor`.
    pub fn new(executor: CommandExecutor, options: Arc<EngineOptions>) -> Self {
        Self { executor, options }
    }

    /// Returns what the kernel currently enforces on `dev`. Never fails: a failed query is
    /// logged and its output read as "no impairment".
    pub async fn inspect(&self, dev: &str) -> ImpairmentSnapshot {
        let (root, all) = self.run_queries(dev).await;

        for result in [&root, &all] {
            if !result.success() {
                tracing::warn!(
                    dev,
                    argv = ?result.argv,
                    stderr = %result.stderr.trim(),
                    "failed to query qdisc, assuming clean"
                );
            }
        }

        let root_out = if root.success() { root.stdout.as_str() } else { "" };
        let all_out = if all.success() { all.stdout.as_str() } else { "" };

        Self::snapshot(dev, root_out, all_out)
    }

    /// Like [`Self::inspect`], but fails if either query fails instead of assuming clean.
    /// Malformed fields in successful output still fall back to their clean value.
    pub async fn query(&self, dev: &str) -> Result<ImpairmentSnapshot, QueryError> {
        let (root, all) = self.run_queries(dev).await;

        if let Some(failed) = [&root, &all].into_iter().find(|r| !r.success()) {
            return Err(QueryError::new(dev, failed));
        }

        Ok(Self::snapshot(dev, &root.stdout, &all.stdout))
    }

    async fn run_queries(&self, dev: &str) -> (CommandResult, CommandResult) {
        let commands = Commands::new(&self.options);

        tokio::join!(
            self.executor.run(commands.show_root(dev)),
            self.executor.run(commands.show_all(dev)),
        )
    }

    fn snapshot(dev: &str, root: &str, all: &str) -> ImpairmentSnapshot {
        let (snapshot, failures) = parse_snapshot(root, all);
        for failure in failures {
            tracing::warn!(dev, %failure, "unexpected tc output, field read as clean");
        }

        tracing::debug!(dev, %snapshot, "inspected interface");

        snapshot
    }
}
