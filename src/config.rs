use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::warn;

use crate::chord_util::{self, GeneralError};
use crate::gval;
use crate::logging::LogLevel;
use crate::training::TrainingParams;

#[derive(Parser, Debug)]
#[command(name = "chord_train", about = "Chord ring that places training jobs by content key")]
pub struct Cli {
    #[arg(long, value_enum, default_value = "info", env = "CHORD_TRAIN_LOG", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the membership directory
    Supernode(SupernodeArgs),
    /// Run a compute node and join the ring
    Node(NodeArgs),
    /// Submit training jobs and aggregate the results
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SupernodeArgs {
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,
    #[arg(long, default_value_t = gval::DEFAULT_SUPERNODE_PORT)]
    pub port: u16,
    /// File of "host,port" lines used to resolve node hosts
    #[arg(long, default_value = gval::DEFAULT_ADDRESS_TABLE_FILE)]
    pub address_table: PathBuf,
    #[arg(long, default_value_t = gval::DEFAULT_MAX_NODES)]
    pub max_nodes: usize,
    #[arg(long, default_value_t = gval::DEFAULT_ID_SPACE_BITS)]
    pub id_bits: u32,
    /// Host used for ports missing from the address table
    #[arg(long, default_value = gval::DEFAULT_NODE_HOST)]
    pub default_host: String,
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    pub port: u16,
    pub supernode_host: String,
    pub supernode_port: u16,
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,
    #[arg(long, default_value = gval::DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
    #[arg(long, default_value_t = gval::DEFAULT_EPOCHS)]
    pub epochs: usize,
    #[arg(long, default_value_t = gval::DEFAULT_LEARNING_RATE)]
    pub eta: f64,
    #[arg(long, default_value_t = gval::DEFAULT_HIDDEN_UNITS)]
    pub hidden: usize,
    #[arg(long, default_value_t = gval::DEFAULT_CLASS_NUM)]
    pub classes: usize,
    #[command(flatten)]
    pub rpc: RpcArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    pub supernode_host: String,
    pub supernode_port: u16,
    #[arg(long, default_value = gval::DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
    /// Number of files taken from the data directory
    #[arg(long, default_value_t = gval::DEFAULT_CLIENT_FILE_NUM)]
    pub files: usize,
    #[arg(long, default_value_t = gval::DEFAULT_POLL_MAX_ATTEMPTS)]
    pub max_attempts: usize,
    #[arg(long, default_value_t = gval::DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,
    #[arg(long, default_value = gval::DEFAULT_VALIDATION_FILE)]
    pub validation_file: PathBuf,
    #[arg(long, default_value_t = gval::DEFAULT_V_SCALE)]
    pub v_scale: f64,
    #[arg(long, default_value_t = gval::DEFAULT_CLASS_NUM)]
    pub classes: usize,
    #[command(flatten)]
    pub rpc: RpcArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RpcArgs {
    /// Outbound request timeout in seconds, 0 disables it
    #[arg(long, default_value_t = gval::DEFAULT_RPC_TIMEOUT_SECS)]
    pub rpc_timeout_secs: u64,
    /// Keep connections open between calls instead of one per call
    #[arg(long)]
    pub reuse_connections: bool,
}

// 外向きRPCの接続方針
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcConfig {
    pub timeout: Option<Duration>,
    pub reuse_connections: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            timeout: Some(Duration::from_secs(gval::DEFAULT_RPC_TIMEOUT_SECS)),
            reuse_connections: false,
        }
    }
}

impl From<&RpcArgs> for RpcConfig {
    fn from(args: &RpcArgs) -> Self {
        RpcConfig {
            timeout: (args.rpc_timeout_secs > 0).then(|| Duration::from_secs(args.rpc_timeout_secs)),
            reuse_connections: args.reuse_connections,
        }
    }
}

impl NodeArgs {
    pub fn training_params(&self) -> TrainingParams {
        TrainingParams {
            class_num: self.classes,
            hidden_units: self.hidden,
            eta: self.eta,
            epochs: self.epochs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub max_nodes: usize,
    pub id_bits: u32,
    pub default_host: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig {
            max_nodes: gval::DEFAULT_MAX_NODES,
            id_bits: gval::DEFAULT_ID_SPACE_BITS,
            default_host: gval::DEFAULT_NODE_HOST.to_string(),
        }
    }
}

impl From<&SupernodeArgs> for DirectoryConfig {
    fn from(args: &SupernodeArgs) -> Self {
        DirectoryConfig {
            max_nodes: args.max_nodes,
            id_bits: args.id_bits,
            default_host: args.default_host.clone(),
        }
    }
}

// ポート番号からホストを引くための表. 1行に "host,port"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressTable {
    hosts: HashMap<u16, String>,
}

impl AddressTable {
    pub fn parse(text: &str) -> Result<AddressTable, GeneralError> {
        let mut hosts = HashMap::new();
        for (line_idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bad_line = || {
                GeneralError::new(
                    format!("address table line {}: expected \"host,port\", got {:?}", line_idx + 1, line),
                    chord_util::ERR_CODE_CONFIG,
                )
            };
            let (host, port) = line.split_once(',').ok_or_else(bad_line)?;
            let port: u16 = port.trim().parse().map_err(|_| bad_line())?;
            let host = host.trim();
            if host.is_empty() {
                return Err(bad_line());
            }
            hosts.insert(port, host.to_string());
        }
        Ok(AddressTable { hosts })
    }

    // ファイルが無い場合は空の表として扱う
    pub fn load(path: &Path) -> Result<AddressTable, GeneralError> {
        match fs::read_to_string(path) {
            Ok(text) => AddressTable::parse(&text),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "address table not readable, every node resolves to the default host");
                Ok(AddressTable::default())
            }
        }
    }

    pub fn host_of(&self, port: u16) -> Option<&str> {
        self.hosts.get(&port).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
