use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chord_util::{self, GeneralError};
use crate::node_info::NodeInfo;
use crate::training::TrainedModel;

// ノード間で呼び出される操作. 宛先はノードIDで指定し、アドレスの解決は実装側で行う
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn find_successor(&self, target: u32, id: u32) -> Result<u32, GeneralError>;
    async fn closest_preceding_node(&self, target: u32, id: u32) -> Result<u32, GeneralError>;
    async fn get_predecessor(&self, target: u32) -> Result<Option<u32>, GeneralError>;
    async fn get_successor(&self, target: u32) -> Result<u32, GeneralError>;
    async fn set_predecessor(&self, target: u32, node_id: u32) -> Result<bool, GeneralError>;
    async fn set_successor(&self, target: u32, node_id: u32) -> Result<bool, GeneralError>;
    async fn update_finger_table(&self, target: u32, node_id: u32, index: u32) -> Result<bool, GeneralError>;
    async fn put_data(&self, target: u32, key: &str, ttl: u32) -> Result<PutDataReply, GeneralError>;
    async fn get_model(&self, target: u32, key: &str, ttl: u32) -> Result<ModelReply, GeneralError>;
    async fn get_node_info(&self, target: u32) -> Result<NodeInfo, GeneralError>;
}

// supernode に対する操作
#[async_trait]
pub trait DirectoryRpc: Send + Sync {
    async fn request_join(&self, port: u16) -> Result<Result<JoinResponse, JoinRejected>, GeneralError>;
    async fn confirm_join(&self, node_id: u32) -> Result<bool, GeneralError>;
    async fn cancel_join(&self, node_id: u32) -> Result<bool, GeneralError>;
    async fn get_node(&self) -> Result<NodeAddress, GeneralError>;
    async fn get_node_address(&self, node_id: u32) -> Result<(String, u16), GeneralError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UpdateFingerTable {
    pub node_id: u32,
    pub index: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub key: String,
    pub ttl: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequest {
    pub port: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinResponse {
    pub assigned_id: u32,
    // join 時点で確定済みのノード数. 0 なら自身がリングの最初のノード
    pub peer_count: usize,
    pub id_bits: u32,
}

#[derive(Error, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRejected {
    #[error("another node is in process of joining")]
    JoinInProgress,
    #[error("network is full")]
    NetworkFull,
    #[error("node id {0} is already taken")]
    IdCollision(u32),
}

impl From<JoinRejected> for GeneralError {
    fn from(rejected: JoinRejected) -> GeneralError {
        GeneralError::new(rejected.to_string(), chord_util::ERR_CODE_JOIN_REJECTED)
    }
}

// "id:host:port" 形式で表現されるノードの所在
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub node_id: u32,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.node_id, self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = GeneralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || {
            GeneralError::new(format!("malformed node address: {}", s), chord_util::ERR_CODE_ADDRESS_NOT_FOUND)
        };
        let mut parts = s.splitn(3, ':');
        let node_id = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        let host = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        let port = parts.next().and_then(|p| p.parse().ok()).ok_or_else(malformed)?;
        Ok(NodeAddress { node_id, host: host.to_string(), port })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    // 自ノードが担当となり学習を開始した
    Training,
    // 既に投入済み（学習中または完了済み）
    AlreadySubmitted,
    // 担当ノードへ転送した
    Forwarded,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PutDataReply {
    pub status: PutStatus,
    pub owner: u32,
    pub path: Vec<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Done,
    Failed,
    Wait,
    NotFound,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub status: ModelStatus,
    pub model: Option<TrainedModel>,
    pub reason: Option<String>,
}

impl ModelReply {
    pub fn with_status(status: ModelStatus) -> ModelReply {
        ModelReply { status, model: None, reason: None }
    }
}
