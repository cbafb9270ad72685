//! Node assembly: transport, persisted state, coordinator and the metadata
//! services of one cluster member

use crate::allocation::AllocationService;
use crate::cluster::node::{Node, NodeRole};
use crate::cluster::service::ClusterService;
use crate::common::{generate_node_id, Config, Result};
use crate::coordination::{Coordinator, FilePersistedState, PersistedState};
use crate::metadata::{
    MetadataCreateIndexService, MetadataDeleteIndexService, MetadataIndexAliasesService,
    MetadataIndexStateService,
};
use crate::transport::{TcpTransport, Transport};
use std::sync::Arc;

pub struct ClusterNode {
    coordinator: Arc<Coordinator>,
    create_index: MetadataCreateIndexService,
    delete_index: MetadataDeleteIndexService,
    index_aliases: MetadataIndexAliasesService,
    index_state: MetadataIndexStateService,
}

impl ClusterNode {
    /// Identity of a fresh node process: a new random id and the configured roles.
    pub fn local_node(config: &Config) -> Node {
        let mut roles = Vec::new();
        if config.node.master {
            roles.push(NodeRole::Master);
        }
        if config.node.data {
            roles.push(NodeRole::Data);
        }
        let address = config.node.bind_addr.to_string();
        let name = config.node.name.clone().unwrap_or_else(|| address.clone());
        let mut node = Node::new(generate_node_id(), name, address, roles);
        node.attributes = config.node.attributes.clone();
        node
    }

    /// Bind a TCP transport and open the persisted state under `data_path`.
    pub async fn bind(config: &Config) -> Result<Self> {
        config.validate()?;
        let transport = TcpTransport::bind(
            Self::local_node(config),
            config.node.bind_addr,
            config.discovery.seed_hosts.clone(),
            config.discovery.max_frame_bytes,
        )
        .await?;
        let persisted = Arc::new(FilePersistedState::open(
            &config.node.data_path,
            &config.node.cluster_name,
        )?);
        Ok(Self::new(config, transport, persisted))
    }

    /// Assemble a node over an existing transport. Must be called within a
    /// tokio runtime.
    pub fn new(config: &Config, transport: Arc<dyn Transport>, persisted: Arc<dyn PersistedState>) -> Self {
        let allocation = Arc::new(AllocationService::new(config.allocation));
        let coordinator = Coordinator::new(
            &config.node.cluster_name,
            config.discovery.clone(),
            transport,
            persisted,
            allocation.clone(),
        );
        let cluster_service = coordinator.cluster_service().clone();
        Self {
            create_index: MetadataCreateIndexService::new(cluster_service.clone(), allocation.clone()),
            delete_index: MetadataDeleteIndexService::new(cluster_service.clone()),
            index_aliases: MetadataIndexAliasesService::new(cluster_service.clone()),
            index_state: MetadataIndexStateService::new(cluster_service, allocation),
            coordinator,
        }
    }

    /// Register the request handlers and start looking for a cluster.
    pub fn start(&self) -> Result<()> {
        self.coordinator.start()?;
        self.coordinator.start_initial_join();
        Ok(())
    }

    /// Run until Ctrl-C.
    pub async fn serve(self) -> Result<()> {
        self.start()?;
        tracing::info!("node {} started", self.coordinator.local_node());
        tokio::signal::ctrl_c().await?;
        tracing::info!("shutting down");
        self.stop();
        Ok(())
    }

    pub fn stop(&self) {
        self.coordinator.stop();
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn cluster_service(&self) -> &ClusterService {
        self.coordinator.cluster_service()
    }

    pub fn node(&self) -> &Node {
        self.coordinator.local_node()
    }

    pub fn create_index_service(&self) -> &MetadataCreateIndexService {
        &self.create_index
    }

    pub fn delete_index_service(&self) -> &MetadataDeleteIndexService {
        &self.delete_index
    }

    pub fn index_aliases_service(&self) -> &MetadataIndexAliasesService {
        &self.index_aliases
    }

    pub fn index_state_service(&self) -> &MetadataIndexStateService {
        &self.index_state
    }
}
