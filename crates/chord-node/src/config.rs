//! Command-line configuration (§A.3 of the expanded specification): a
//! Chord node is configured entirely from CLI flags and environment
//! variables, with no settings file or per-environment config layer.

use flow_cli_common::LogArgs;

use crate::node::ConsistencyMode;

#[derive(Debug, clap::Parser)]
#[clap(author, version, about = "A Chord-ring replicated key/value node")]
pub struct Args {
    /// The IP address this node advertises to peers and binds its HTTP
    /// server to.
    #[clap(long, env = "CHORD_IP", default_value = "127.0.0.1")]
    pub ip: String,

    /// The port this node listens on.
    #[clap(long, env = "CHORD_PORT", default_value = "8000")]
    pub port: u16,

    /// Join an existing ring through the bootstrap coordinator at this
    /// address instead of starting a new one.
    #[clap(long, env = "CHORD_BOOTSTRAP", requires = "bootstrap_port")]
    pub bootstrap_ip: Option<String>,

    /// Port of the bootstrap coordinator named by `--bootstrap-ip`.
    #[clap(long, env = "CHORD_BOOTSTRAP_PORT", requires = "bootstrap_ip")]
    pub bootstrap_port: Option<u16>,

    /// Number of copies (primary plus replicas) maintained for each key.
    /// Only meaningful as supplied to the bootstrap node; members that
    /// join later receive it from the coordinator.
    #[clap(long, env = "CHORD_REPLICATION_FACTOR", default_value = "1")]
    pub replication_factor: u32,

    /// Replication discipline: `linearizability` waits for the full chain
    /// to commit before acknowledging; `eventual` acknowledges
    /// immediately and propagates in the background.
    #[clap(
        long,
        env = "CHORD_CONSISTENCY",
        value_enum,
        default_value = "eventual"
    )]
    pub consistency: ConsistencyModeArg,

    #[clap(flatten)]
    pub log: LogArgs,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ConsistencyModeArg {
    Linearizability,
    Eventual,
}

impl From<ConsistencyModeArg> for ConsistencyMode {
    fn from(value: ConsistencyModeArg) -> Self {
        match value {
            ConsistencyModeArg::Linearizability => ConsistencyMode::Linearizability,
            ConsistencyModeArg::Eventual => ConsistencyMode::Eventual,
        }
    }
}

impl Args {
    pub fn is_bootstrap(&self) -> bool {
        self.bootstrap_ip.is_none()
    }

    pub fn bootstrap_addr(&self) -> Option<(String, u16)> {
        match (&self.bootstrap_ip, self.bootstrap_port) {
            (Some(ip), Some(port)) => Some((ip.clone(), port)),
            _ => None,
        }
    }
}
