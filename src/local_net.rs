use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::chord_node::{self, ChordNode};
use crate::chord_util::{self, GeneralError, IdSpace};
use crate::config::{AddressTable, DirectoryConfig};
use crate::node_info::NodeInfo;
use crate::router;
use crate::rpc::{DirectoryRpc, JoinRejected, JoinResponse, ModelReply, NodeAddress, NodeRpc, PutDataReply};
use crate::stabilizer;
use crate::supernode::Directory;
use crate::training::Trainer;

// 1プロセス内で複数ノードと supernode を動かすためのネットワーク.
// RPC は宛先ノードの処理を直接呼び出すことで行う
pub struct LocalNetwork {
    nodes: RwLock<HashMap<u32, Arc<ChordNode>>>,
    downed: RwLock<HashSet<u32>>,
    directory: Directory,
}

impl LocalNetwork {
    pub fn new(conf: &DirectoryConfig) -> Result<Arc<LocalNetwork>, GeneralError> {
        Ok(Arc::new(LocalNetwork {
            nodes: RwLock::new(HashMap::new()),
            downed: RwLock::new(HashSet::new()),
            directory: Directory::new(conf, AddressTable::default())?,
        }))
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn node(&self, node_id: u32) -> Result<Arc<ChordNode>, GeneralError> {
        if self.downed.read().contains(&node_id) {
            return Err(GeneralError::new(format!("node {} is down", node_id), chord_util::ERR_CODE_NODE_IS_DOWNED));
        }
        self.nodes.read().get(&node_id).cloned().ok_or_else(|| {
            GeneralError::new(format!("node {} is not on this network", node_id), chord_util::ERR_CODE_NODE_IS_DOWNED)
        })
    }

    pub fn node_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.nodes.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // 以降そのノード宛ての呼び出しは全て失敗する
    pub fn set_downed(&self, node_id: u32, downed: bool) {
        let mut set = self.downed.write();
        if downed {
            set.insert(node_id);
        } else {
            set.remove(&node_id);
        }
    }

    pub fn create_node(self: &Arc<Self>, node_id: u32, id_space: IdSpace, trainer: Arc<dyn Trainer>) -> Arc<ChordNode> {
        let rpc: Arc<dyn NodeRpc> = Arc::clone(self) as Arc<dyn NodeRpc>;
        let node = Arc::new(ChordNode::new(node_id, id_space, rpc, trainer));
        self.nodes.write().insert(node_id, Arc::clone(&node));
        node
    }

    // supernode を介さず、指定したIDでリングに参加させる.
    // reference が None であれば新しいリングを作る
    pub async fn join_with_id(
        self: &Arc<Self>,
        node_id: u32,
        id_space: IdSpace,
        reference: Option<u32>,
        trainer: Arc<dyn Trainer>,
    ) -> Arc<ChordNode> {
        let node = self.create_node(node_id, id_space, trainer);
        match reference {
            None => stabilizer::init_single_ring(&node),
            Some(reference) => {
                stabilizer::fix_fingers(&node, reference).await;
                stabilizer::update_others(&node).await;
            }
        }
        node
    }

    // supernode への join 要求から確定までを通して行う
    pub async fn join_node(self: &Arc<Self>, port: u16, trainer: Arc<dyn Trainer>) -> Result<Arc<ChordNode>, GeneralError> {
        let resp = self.directory.request_join(port)?;
        let id_space = IdSpace::new(resp.id_bits)?;
        let node = self.create_node(resp.assigned_id, id_space, trainer);
        if let Err(err) = stabilizer::join_and_confirm(&node, &resp, &**self).await {
            self.nodes.write().remove(&resp.assigned_id);
            return Err(err);
        }
        debug!(node = resp.assigned_id, port, "local node joined");
        Ok(node)
    }
}

#[async_trait]
impl NodeRpc for LocalNetwork {
    async fn find_successor(&self, target: u32, id: u32) -> Result<u32, GeneralError> {
        let node = self.node(target)?;
        router::find_successor(&node, id).await
    }

    async fn closest_preceding_node(&self, target: u32, id: u32) -> Result<u32, GeneralError> {
        Ok(self.node(target)?.closest_preceding_node(id))
    }

    async fn get_predecessor(&self, target: u32) -> Result<Option<u32>, GeneralError> {
        Ok(self.node(target)?.get_predecessor())
    }

    async fn get_successor(&self, target: u32) -> Result<u32, GeneralError> {
        Ok(self.node(target)?.get_successor())
    }

    async fn set_predecessor(&self, target: u32, node_id: u32) -> Result<bool, GeneralError> {
        Ok(self.node(target)?.set_predecessor(node_id))
    }

    async fn set_successor(&self, target: u32, node_id: u32) -> Result<bool, GeneralError> {
        Ok(self.node(target)?.set_successor(node_id))
    }

    async fn update_finger_table(&self, target: u32, node_id: u32, index: u32) -> Result<bool, GeneralError> {
        let node = self.node(target)?;
        stabilizer::update_finger_table(&node, node_id, index).await
    }

    async fn put_data(&self, target: u32, key: &str, ttl: u32) -> Result<PutDataReply, GeneralError> {
        let node = self.node(target)?;
        chord_node::put_data(&node, key, ttl).await
    }

    async fn get_model(&self, target: u32, key: &str, ttl: u32) -> Result<ModelReply, GeneralError> {
        let node = self.node(target)?;
        chord_node::get_model(&node, key, ttl).await
    }

    async fn get_node_info(&self, target: u32) -> Result<NodeInfo, GeneralError> {
        Ok(self.node(target)?.get_node_info())
    }
}

#[async_trait]
impl DirectoryRpc for LocalNetwork {
    async fn request_join(&self, port: u16) -> Result<Result<JoinResponse, JoinRejected>, GeneralError> {
        Ok(self.directory.request_join(port))
    }

    async fn confirm_join(&self, node_id: u32) -> Result<bool, GeneralError> {
        Ok(self.directory.confirm_join(node_id))
    }

    async fn cancel_join(&self, node_id: u32) -> Result<bool, GeneralError> {
        Ok(self.directory.cancel_join(node_id))
    }

    async fn get_node(&self) -> Result<NodeAddress, GeneralError> {
        self.directory.get_random_node()
    }

    async fn get_node_address(&self, node_id: u32) -> Result<(String, u16), GeneralError> {
        self.directory.get_node_address(node_id)
    }
}
