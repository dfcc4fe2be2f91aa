use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::chord_util::{self, GeneralError, IdSpace};
use crate::job_store::JobStore;
use crate::node_info::NodeInfo;
use crate::router;
use crate::rpc::{ModelReply, NodeRpc, PutDataReply, PutStatus};
use crate::training::Trainer;
use crate::ArMu;

// リング上の1ノード. 経路情報とジョブの状態はそれぞれ個別のロックで保護し、
// ロックを保持したまま他ノードへのRPCを行わない
pub struct ChordNode {
    pub self_node: ArMu<NodeInfo>,
    pub job_store: ArMu<JobStore>,
    pub rpc: Arc<dyn NodeRpc>,
    pub trainer: Arc<dyn Trainer>,
    node_id: u32,
    id_space: IdSpace,
}

impl ChordNode {
    pub fn new(node_id: u32, id_space: IdSpace, rpc: Arc<dyn NodeRpc>, trainer: Arc<dyn Trainer>) -> ChordNode {
        ChordNode {
            self_node: ArMu_new!(NodeInfo::new(node_id, id_space)),
            job_store: ArMu_new!(JobStore::new()),
            rpc,
            trainer,
            node_id,
            id_space,
        }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn id_space(&self) -> IdSpace {
        self.id_space
    }

    pub fn get_node_info(&self) -> NodeInfo {
        self.self_node.lock().clone()
    }

    pub fn get_successor(&self) -> u32 {
        self.self_node.lock().successor
    }

    pub fn get_predecessor(&self) -> Option<u32> {
        self.self_node.lock().predecessor
    }

    pub fn set_successor(&self, node_id: u32) -> bool {
        self.self_node.lock().set_successor(node_id);
        debug!(node = self.node_id, successor = node_id, "successor set");
        true
    }

    pub fn set_predecessor(&self, node_id: u32) -> bool {
        self.self_node.lock().predecessor = Some(node_id);
        debug!(node = self.node_id, predecessor = node_id, "predecessor set");
        true
    }

    pub fn closest_preceding_node(&self, id: u32) -> u32 {
        self.self_node.lock().closest_preceding_finger(id)
    }

    // 宛先が自ノードであればRPCを経由せずに処理する
    pub async fn successor_of(&self, node_id: u32) -> Result<u32, GeneralError> {
        if node_id == self.node_id {
            return Ok(self.get_successor());
        }
        self.rpc.get_successor(node_id).await
    }

    pub async fn closest_preceding_node_of(&self, node_id: u32, id: u32) -> Result<u32, GeneralError> {
        if node_id == self.node_id {
            return Ok(self.closest_preceding_node(id));
        }
        self.rpc.closest_preceding_node(node_id, id).await
    }

    // 学習ジョブを登録し、バックグラウンドで学習を開始する.
    // 既に登録済みのキーであれば何もせず false を返す
    fn start_training(&self, key: &str) -> bool {
        if !self.job_store.lock().begin(key) {
            return false;
        }

        let job_store = Arc::clone(&self.job_store);
        let trainer = Arc::clone(&self.trainer);
        let key = key.to_string();
        let node_id = self.node_id;
        tokio::spawn(async move {
            let train_key = key.clone();
            let joined = tokio::task::spawn_blocking(move || trainer.train(&train_key)).await;
            let mut store = job_store.lock();
            match joined {
                Ok(outcome) => {
                    if let Err(err) = &outcome {
                        warn!(node = node_id, key = %key, error = %err, "training failed");
                    }
                    store.complete(&key, outcome);
                }
                Err(join_err) => {
                    error!(node = node_id, key = %key, error = %join_err, "training task aborted");
                    store.fail(&key, format!("training task aborted: {}", join_err));
                }
            }
        });
        true
    }
}

fn forward_limit_error(node_id: u32, key: &str, owner: u32) -> GeneralError {
    GeneralError::new(
        format!("node {} cannot forward {} to {}: forwarding limit reached", node_id, key, owner),
        chord_util::ERR_CODE_INTERNAL_CONTROL_FLOW_PROBLEM,
    )
}

fn format_path(path: &[u32]) -> String {
    path.iter().map(u32::to_string).collect::<Vec<String>>().join(" -> ")
}

// key を担当するノードで学習させる. 自ノードが担当でなければ担当ノードへ転送する
pub async fn put_data(node: &ChordNode, key: &str, ttl: u32) -> Result<PutDataReply, GeneralError> {
    let hashed = node.id_space.hash_str_to_id(key);
    let (owner, path) = router::find_successor_with_path(node, hashed).await?;

    let ni = node.get_node_info();
    info!(
        node = %chord_util::gen_debug_str_of_node(&ni),
        key,
        data = %chord_util::gen_debug_str_of_data(&node.id_space, hashed),
        owner,
        path = %format_path(&path),
        "put_data routed"
    );
    debug!(fingers = %chord_util::format_finger_table(&ni), "routing state");

    if owner == node.node_id {
        let status = if node.start_training(key) {
            PutStatus::Training
        } else {
            debug!(node = node.node_id, key, "job already submitted");
            PutStatus::AlreadySubmitted
        };
        return Ok(PutDataReply { status, owner, path });
    }

    if ttl == 0 {
        return Err(forward_limit_error(node.node_id, key, owner));
    }
    let remote = node.rpc.put_data(owner, key, ttl - 1).await?;
    let mut full_path = path;
    full_path.extend(remote.path.into_iter().skip(1));
    Ok(PutDataReply {
        status: PutStatus::Forwarded,
        owner: remote.owner,
        path: full_path,
    })
}

// key の学習結果を担当ノードから取得する
pub async fn get_model(node: &ChordNode, key: &str, ttl: u32) -> Result<ModelReply, GeneralError> {
    let hashed = node.id_space.hash_str_to_id(key);
    let (owner, path) = router::find_successor_with_path(node, hashed).await?;
    debug!(node = node.node_id, key, owner, path = %format_path(&path), "get_model routed");

    if owner == node.node_id {
        return Ok(node.job_store.lock().model_reply(key));
    }
    if ttl == 0 {
        return Err(forward_limit_error(node.node_id, key, owner));
    }
    node.rpc.get_model(owner, key, ttl - 1).await
}
