use axum::Json;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use gridstore::cluster::invoker::{ClusterInvoker, ReplicaBroadcaster};
use gridstore::cluster::topology::ClusterTopology;
use gridstore::cluster::types::{Node, NodeId};
use gridstore::expiry::dispatcher::ExpiryBackupSender;
use gridstore::expiry::sweeper::ExpirySweeper;
use gridstore::store::gateway::ReplicatedMap;
use gridstore::store::handlers::{handle_get, handle_operation, handle_put};
use gridstore::store::protocol::{
    ENDPOINT_GET, ENDPOINT_OPERATION, ENDPOINT_PUT, GetResponse, OpEnvelope, OpResponse,
    PutRequest, PutResponse,
};
use gridstore::store::record::RecordStore;
use std::net::SocketAddr;
use std::sync::Arc;

type Key = String;
type Value = serde_json::Value;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--node <addr:port>]... [--backups <count>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:6000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:6001 --node 127.0.0.1:6000 --node 127.0.0.1:6001",
            args[0]
        );
        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut node_addrs: Vec<SocketAddr> = vec![];
    let mut backup_count: u32 = 1;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--node" => {
                node_addrs.push(args[i + 1].parse()?);
                i += 2;
            }
            "--backups" => {
                backup_count = args[i + 1].parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.expect("--bind is required");
    if !node_addrs.contains(&bind_addr) {
        node_addrs.push(bind_addr);
    }

    tracing::info!("Starting node on {}", bind_addr);
    tracing::info!(
        "Cluster of {} node(s), {} backup replica(s) per partition",
        node_addrs.len(),
        backup_count
    );

    // 1. Static topology:
    let local = NodeId::from_addr(bind_addr);
    let nodes: Vec<Node> = node_addrs.into_iter().map(Node::new).collect();
    let topology = ClusterTopology::new(local, nodes, backup_count);

    // 2. Record store + invocation layer:
    let store: Arc<RecordStore<Key, Value>> = RecordStore::new();
    let invoker = ClusterInvoker::new(store.clone(), topology.clone());
    let broadcaster = ReplicaBroadcaster::new("replication", invoker);

    let map = ReplicatedMap::new(store.clone(), topology.clone(), broadcaster.clone());

    // 3. Expiration propagation:
    let sender = ExpiryBackupSender::with_defaults(broadcaster);
    let sweeper = ExpirySweeper::new(store.clone(), topology, sender);
    sweeper.start();

    // 4. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_PUT, post(handle_put_value))
        .route(&format!("{}/:map/:key", ENDPOINT_GET), get(handle_get_value))
        .route(ENDPOINT_OPERATION, post(handle_operation_value))
        .layer(Extension(map))
        .layer(Extension(store.clone()));

    // 5. Spawn stats reporter:
    let stats_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));

        loop {
            interval.tick().await;
            tracing::info!(
                "Store stats: {} committed entries, {} prepared writes",
                stats_store.entry_count(),
                stats_store.prepared_count()
            );
        }
    });

    // 6. Start HTTP server:
    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_put_value(
    map: Extension<Arc<ReplicatedMap<Key, Value>>>,
    json: Json<PutRequest>,
) -> (StatusCode, Json<PutResponse>) {
    handle_put::<Key, Value>(map, json).await
}

async fn handle_get_value(
    map: Extension<Arc<ReplicatedMap<Key, Value>>>,
    path: Path<(String, String)>,
) -> (StatusCode, Json<GetResponse>) {
    handle_get::<Key, Value>(map, path).await
}

async fn handle_operation_value(
    store: Extension<Arc<RecordStore<Key, Value>>>,
    json: Json<OpEnvelope>,
) -> (StatusCode, Json<OpResponse>) {
    handle_operation::<Key, Value>(store, json).await
}
