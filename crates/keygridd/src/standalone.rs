//! Standalone mode: every subsystem in one process.
//!
//! In this mode, the daemon:
//! 1. Opens the redb state store under the data directory
//! 2. Connects the configuration store and builds the watch registry
//! 3. Republishes every tenant resource from the stored rows
//! 4. Starts a range watcher and tombstone reaper per embedded node
//! 5. Serves the REST API until Ctrl-C, then closes every watch

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use keygrid_api::{ApiState, build_router};
use keygrid_control::{NodeManager, PartitionManager};
use keygrid_core::{KeygridConfig, StoreBackend, StoreConfig};
use keygrid_node::{MemoryTenantStorage, RangeWatcher};
use keygrid_propagation::{ConfigStore, MemoryConfigStore, PropagationEngine, WatchRegistry, WatchSettings};
use keygrid_proxy::{NodeRangeResolver, TenantRangeCache};
use keygrid_state::StateStore;

async fn connect_config_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn ConfigStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("using in-memory configuration store");
            Ok(Arc::new(MemoryConfigStore::new()))
        }
        #[cfg(feature = "etcd")]
        StoreBackend::Etcd => {
            let store =
                keygrid_propagation::EtcdConfigStore::connect(&config.etcd_endpoints, &config.key_prefix)
                    .await?;
            info!(endpoints = ?config.etcd_endpoints, prefix = %config.key_prefix, "etcd configuration store connected");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "etcd"))]
        StoreBackend::Etcd => {
            anyhow::bail!("store.backend = \"etcd\" needs keygridd built with the `etcd` feature")
        }
    }
}

pub async fn run_standalone(config: KeygridConfig, embedded_nodes: Vec<String>) -> anyhow::Result<()> {
    info!("keygrid daemon starting in standalone mode");

    for warning in config.validate()? {
        warn!(%warning, "configuration warning");
    }

    // ── State store ────────────────────────────────────────────

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("keygrid.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Propagation ────────────────────────────────────────────

    let store = connect_config_store(&config.store).await?;
    let engine = PropagationEngine::new(store.clone());
    let registry = WatchRegistry::new(
        store,
        WatchSettings {
            worker_threads: config.watch.worker_threads,
            close_grace: config.watch.close_grace(),
        },
    )?;
    info!(workers = config.watch.worker_threads, "watch registry initialized");

    // ── Control plane ──────────────────────────────────────────

    let nodes = NodeManager::new(state.clone());
    let partitions =
        PartitionManager::new(state.clone(), engine.clone()).with_cluster_size(config.control.default_cluster_size);
    match partitions.republish_all() {
        Ok(count) => info!(count, "tenant resources republished"),
        Err(e) => warn!(error = %e, "startup republication failed"),
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Embedded nodes ─────────────────────────────────────────

    let mut watchers = Vec::new();
    let mut reapers = Vec::new();
    for uuid in &embedded_nodes {
        if let Err(e) = nodes
            .register(uuid, "127.0.0.1", config.server.port)
            .and_then(|_| nodes.enable(uuid))
        {
            warn!(node_uuid = %uuid, error = %e, "embedded node not started");
            continue;
        }

        let watcher = Arc::new(RangeWatcher::new(
            uuid,
            engine.clone(),
            registry.clone(),
            Arc::new(MemoryTenantStorage::new()),
            Arc::new(partitions.clone()),
        ));
        let applied = watcher.start()?;
        info!(node_uuid = %uuid, applied, "embedded node started");

        let reaper = watcher.clone();
        let interval = config.node.tombstone_interval();
        let reaper_shutdown = shutdown_rx.clone();
        reapers.push(tokio::spawn(async move {
            reaper.run_reaper(interval, reaper_shutdown).await;
        }));
        watchers.push(watcher);
    }

    // ── Routing ────────────────────────────────────────────────

    let cache = TenantRangeCache::new(engine, registry.clone()).with_capacity(config.proxy.cache_capacity);
    let resolver = NodeRangeResolver::new(cache).with_replication_factor(config.proxy.replication_factor);

    // ── API server ─────────────────────────────────────────────

    let router = build_router(ApiState {
        store: state,
        nodes,
        partitions,
        resolver,
        registry: registry.clone(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // ── Teardown ───────────────────────────────────────────────

    for watcher in &watchers {
        watcher.stop();
    }
    for handle in reapers {
        let _ = handle.await;
    }
    let open = registry.active_watches();
    registry.shutdown().await;
    info!(closed = open, "keygrid daemon stopped");
    Ok(())
}
