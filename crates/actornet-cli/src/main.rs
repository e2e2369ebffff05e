//! # actornet CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Run a node with the default configuration
//! actornet node -b 0.0.0.0:3563
//!
//! # Run a node from a config file or a directory of them
//! actornet node -c conf/
//!
//! # Make one call and print the JSON reply
//! actornet call 127.0.0.1:3563 Node.Info
//! actornet call 127.0.0.1:3563 Math.Add -a '[1, 2]'
//! ```

use actornet_cli::NodeConfig;
use actornet_client::RpcClient;
use actornet_server::{Node, ServiceRegistry};
use anyhow::{bail, Result};
use argh::FromArgs;
use std::sync::Arc;
use std::time::Duration;

#[derive(FromArgs)]
/// actornet - distributed-actor node runtime
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Node(NodeArgs),
    Call(CallArgs),
}

/// Arguments for running a node.
///
/// Without `-c` the node runs on the default configuration. `-b` overrides
/// the listen address from the configuration.
#[derive(FromArgs)]
#[argh(subcommand, name = "node")]
/// run an actornet node until Ctrl-C
struct NodeArgs {
    /// configuration file (.json/.toml) or directory of them
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// address to listen on, overriding the configuration
    #[argh(option, short = 'b')]
    bind: Option<String>,
}

/// Arguments for a single call.
///
/// The reply is printed as raw JSON on stdout; `null` when the method
/// returned nothing. No logging is installed, so the output can be piped.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// make one RPC call and print the JSON reply
struct CallArgs {
    /// node address (e.g., 127.0.0.1:3563)
    #[argh(positional)]
    addr: String,

    /// method to call, as Service.Method
    #[argh(positional)]
    method: String,

    /// JSON arguments
    #[argh(option, short = 'a', default = "\"null\".into()")]
    args: String,

    /// send without waiting for a reply
    #[argh(switch, long = "no-reply")]
    no_reply: bool,

    /// how long to wait for the connection, in milliseconds
    #[argh(option, long = "timeout-ms", default = "5000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    match cli.command {
        Commands::Node(args) => run_node(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

async fn run_node(args: NodeArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listen_addr = bind;
    }

    config.log.init()?;
    if let Some(path) = &args.config {
        tracing::info!(path = %path, "loaded configuration");
    }

    let registry = Arc::new(ServiceRegistry::default());
    let node = Node::start(config.listen_addr.as_str(), config.transport, registry).await?;
    tracing::info!(addr = %node.local_addr(), "press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    tracing::info!(uptime_ms = node.uptime().as_millis() as u64, "shutting down");
    node.close().await;
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let in_param: serde_json::Value =
        serde_json::from_str(&args.args).map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))?;

    let client = RpcClient::default();
    client.connect(&args.addr).await?;

    let result = call_connected(&client, &args, &in_param).await;
    client.close().await;

    if let Some(reply) = result? {
        println!("{}", serde_json::to_string(&reply)?);
    }
    Ok(())
}

async fn call_connected(
    client: &RpcClient,
    args: &CallArgs,
    in_param: &serde_json::Value,
) -> Result<Option<serde_json::Value>> {
    let timeout = Duration::from_millis(args.timeout_ms);
    let connected = tokio::time::timeout(timeout, async {
        while !client.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if connected.is_err() {
        bail!("could not connect to {} within {}ms", args.addr, args.timeout_ms);
    }

    if args.no_reply {
        let handle = client.go::<_, serde_json::Value>(true, &args.method, in_param).await;
        if let Some(err) = handle.err() {
            bail!("{}", err);
        }
        return Ok(None);
    }

    let reply: Option<serde_json::Value> = client.call(&args.method, in_param).await?;
    Ok(Some(reply.unwrap_or(serde_json::Value::Null)))
}
