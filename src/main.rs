use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use parking_lot::Mutex;
use rocket::fairing::AdHoc;
use tokio::sync::oneshot;
use tracing::{info, warn};

use chord_train::chord_node::ChordNode;
use chord_train::chord_util::IdSpace;
use chord_train::client;
use chord_train::config::{AddressTable, Cli, ClientArgs, Command, DirectoryConfig, NodeArgs, RpcConfig, SupernodeArgs};
use chord_train::endpoints::{self, HttpNodeRpc};
use chord_train::logging;
use chord_train::rpc::{DirectoryRpc, NodeRpc};
use chord_train::stabilizer;
use chord_train::supernode::Directory;
use chord_train::supernode_endpoints::{self, HttpDirectoryRpc};
use chord_train::training::{MlpTrainer, Trainer};

async fn serve(rocket: rocket::Rocket<rocket::Build>) -> anyhow::Result<()> {
    match rocket.launch().await {
        Ok(_) => Ok(()),
        Err(err) => Err(anyhow!("server stopped: {}", err.kind())),
    }
}

async fn run_supernode(args: SupernodeArgs) -> anyhow::Result<()> {
    let conf = DirectoryConfig::from(&args);
    let address_table = AddressTable::load(&args.address_table)?;
    info!(entries = address_table.len(), max_nodes = conf.max_nodes, id_bits = conf.id_bits, "supernode starting");
    let directory = Arc::new(Directory::new(&conf, address_table)?);
    serve(supernode_endpoints::build_rocket(directory, args.bind, args.port)).await
}

// リスナーを立ち上げてから join を行う.
// join 中に他ノードから update_finger_table が届くことがあるため
async fn run_compute_node(args: NodeArgs) -> anyhow::Result<()> {
    let rpc_conf = RpcConfig::from(&args.rpc);
    let directory: Arc<dyn DirectoryRpc> =
        Arc::new(HttpDirectoryRpc::new(&args.supernode_host, args.supernode_port, &rpc_conf)?);

    let resp = directory
        .request_join(args.port)
        .await
        .context("could not reach the supernode")?
        .map_err(|rejected| anyhow!("join rejected: {}", rejected))?;
    info!(node_id = resp.assigned_id, peer_count = resp.peer_count, "id assigned");

    let id_space = IdSpace::new(resp.id_bits)?;
    let rpc: Arc<dyn NodeRpc> = Arc::new(HttpNodeRpc::new(Arc::clone(&directory), rpc_conf)?);
    let trainer: Arc<dyn Trainer> = Arc::new(MlpTrainer::new(args.data_dir.clone(), args.training_params()));
    let node = Arc::new(ChordNode::new(resp.assigned_id, id_space, rpc, trainer));

    let (ready_tx, ready_rx) = oneshot::channel::<()>();
    let ready_tx = Mutex::new(Some(ready_tx));
    let rocket = endpoints::build_rocket(Arc::clone(&node), args.bind, args.port).attach(AdHoc::on_liftoff(
        "ring join",
        move |_| {
            let tx = ready_tx.lock().take();
            Box::pin(async move {
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
            })
        },
    ));
    let server = tokio::spawn(serve(rocket));

    if ready_rx.await.is_err() {
        directory.cancel_join(resp.assigned_id).await.ok();
        return match server.await {
            Ok(result) => result,
            Err(join_err) => Err(join_err.into()),
        };
    }

    if let Err(err) = stabilizer::join_and_confirm(&node, &resp, directory.as_ref()).await {
        server.abort();
        bail!("join failed: {}", err);
    }

    server.await?
}

async fn run_client(args: ClientArgs) -> anyhow::Result<()> {
    let rpc_conf = RpcConfig::from(&args.rpc);
    let directory: Arc<dyn DirectoryRpc> =
        Arc::new(HttpDirectoryRpc::new(&args.supernode_host, args.supernode_port, &rpc_conf)?);
    let entry = directory.get_node().await.context("no entry node available")?;
    info!(entry = %entry, "entry node");

    let rpc = HttpNodeRpc::new(Arc::clone(&directory), rpc_conf)?;
    let keys = client::list_job_keys(&args.data_dir, args.files)
        .with_context(|| format!("cannot list {}", args.data_dir.display()))?;
    if keys.is_empty() {
        bail!("no input files in {}", args.data_dir.display());
    }

    let submitted = client::submit_all(&rpc, entry.node_id, &keys).await;
    let models = client::collect_models(
        &rpc,
        entry.node_id,
        &submitted,
        args.max_attempts,
        Duration::from_secs(args.poll_interval_secs),
    )
    .await;
    info!(received = models.len(), submitted = submitted.len(), "collection finished");

    let (avg_v, avg_w) = match client::average_gradients(models.values()) {
        Some(avg) => avg,
        None => bail!("no models were trained successfully"),
    };
    match client::validate(&avg_v, &avg_w, args.v_scale, &args.validation_file, args.classes) {
        Ok(error_rate) => println!("Final validation error: {:.2}%", error_rate * 100.0),
        Err(err) => warn!(error = %err, "validation skipped"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level);

    match cli.command {
        Command::Supernode(args) => run_supernode(args).await,
        Command::Node(args) => run_compute_node(args).await,
        Command::Client(args) => run_client(args).await,
    }
}
