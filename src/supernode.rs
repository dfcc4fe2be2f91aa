use std::collections::HashMap;

use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use tracing::{debug, info, warn};

use crate::chord_util::{self, GeneralError, IdSpace};
use crate::config::{AddressTable, DirectoryConfig};
use crate::rpc::{JoinRejected, JoinResponse, NodeAddress};

#[derive(Debug, Default)]
struct DirectoryState {
    // join 処理中のノードも含む
    active_nodes: HashMap<u32, (String, u16)>,
    confirmed_nodes: HashMap<u32, (String, u16)>,
    pending_join: Option<u32>,
}

// リングの参加者を管理する. リングのトポロジーは持たず、
// ID の払い出しと join の直列化、アドレスの解決のみを行う
pub struct Directory {
    state: Mutex<DirectoryState>,
    id_space: IdSpace,
    max_nodes: usize,
    default_host: String,
    address_table: AddressTable,
}

impl Directory {
    pub fn new(conf: &DirectoryConfig, address_table: AddressTable) -> Result<Directory, GeneralError> {
        Ok(Directory {
            state: Mutex::new(DirectoryState::default()),
            id_space: IdSpace::new(conf.id_bits)?,
            max_nodes: conf.max_nodes,
            default_host: conf.default_host.clone(),
            address_table,
        })
    }

    pub fn id_space(&self) -> IdSpace {
        self.id_space
    }

    fn resolve_host(&self, port: u16) -> String {
        match self.address_table.host_of(port) {
            Some(host) => host.to_string(),
            None => {
                warn!(port, default_host = %self.default_host, "port not in address table");
                self.default_host.clone()
            }
        }
    }

    pub fn request_join(&self, port: u16) -> Result<JoinResponse, JoinRejected> {
        let mut state = self.state.lock();

        if let Some(pending) = state.pending_join {
            debug!(port, pending, "join rejected, another join in progress");
            return Err(JoinRejected::JoinInProgress);
        }
        if state.confirmed_nodes.len() >= self.max_nodes {
            debug!(port, max_nodes = self.max_nodes, "join rejected, network full");
            return Err(JoinRejected::NetworkFull);
        }

        let assigned_id = self.id_space.hash_str_to_id(&port.to_string());
        if state.confirmed_nodes.contains_key(&assigned_id) {
            warn!(port, assigned_id, "join rejected, id already in use");
            return Err(JoinRejected::IdCollision(assigned_id));
        }

        let host = self.resolve_host(port);
        state.active_nodes.insert(assigned_id, (host.clone(), port));
        state.pending_join = Some(assigned_id);
        let peer_count = state.confirmed_nodes.len();

        info!(assigned_id, host = %host, port, peer_count, "join requested");
        Ok(JoinResponse {
            assigned_id,
            peer_count,
            id_bits: self.id_space.bits(),
        })
    }

    pub fn confirm_join(&self, node_id: u32) -> bool {
        let mut state = self.state.lock();
        if state.pending_join != Some(node_id) {
            warn!(node_id, pending = ?state.pending_join, "confirm for a node that is not joining");
            return false;
        }
        let address = match state.active_nodes.get(&node_id) {
            Some(address) => address.clone(),
            None => return false,
        };
        state.confirmed_nodes.insert(node_id, address);
        state.pending_join = None;
        info!(node_id, confirmed = state.confirmed_nodes.len(), "join confirmed");
        true
    }

    // join 処理に失敗したノードの仮登録を取り消す
    pub fn cancel_join(&self, node_id: u32) -> bool {
        let mut state = self.state.lock();
        if state.pending_join != Some(node_id) {
            return false;
        }
        state.pending_join = None;
        state.active_nodes.remove(&node_id);
        info!(node_id, "join cancelled");
        true
    }

    pub fn get_random_node(&self) -> Result<NodeAddress, GeneralError> {
        let state = self.state.lock();
        let picked = state.confirmed_nodes.iter().choose(&mut rand::thread_rng());
        match picked {
            Some((node_id, (host, port))) => Ok(NodeAddress {
                node_id: *node_id,
                host: host.clone(),
                port: *port,
            }),
            None => Err(GeneralError::new(
                "no nodes available".to_string(),
                chord_util::ERR_CODE_APPROPRIATE_NODE_NOT_FOUND,
            )),
        }
    }

    pub fn get_node_address(&self, node_id: u32) -> Result<(String, u16), GeneralError> {
        let state = self.state.lock();
        state.active_nodes.get(&node_id).cloned().ok_or_else(|| {
            GeneralError::new(
                format!("address of node {} not found", node_id),
                chord_util::ERR_CODE_ADDRESS_NOT_FOUND,
            )
        })
    }

    pub fn confirmed_node_ids(&self) -> Vec<u32> {
        let state = self.state.lock();
        let mut ids: Vec<u32> = state.confirmed_nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn pending_join(&self) -> Option<u32> {
        self.state.lock().pending_join
    }
}
