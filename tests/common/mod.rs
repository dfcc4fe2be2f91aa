#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use chord_train::chord_node::{self, ChordNode};
use chord_train::chord_util::IdSpace;
use chord_train::config::DirectoryConfig;
use chord_train::local_net::LocalNetwork;
use chord_train::rpc::{ModelReply, ModelStatus};
use chord_train::training::{TrainedModel, Trainer, TrainingError, TrainingOutcome};

pub fn space() -> IdSpace {
    IdSpace::new(6).unwrap()
}

pub fn model_for(key: &str) -> TrainedModel {
    TrainedModel {
        v: vec![vec![key.len() as f64, 1.0]],
        w: vec![vec![0.5, 0.5, 0.5]],
        error_rate: 0.25,
    }
}

// 固定のモデルをすぐに返し、呼び出し回数を数える
#[derive(Default)]
pub struct CountingTrainer {
    pub calls: AtomicUsize,
}

impl Trainer for CountingTrainer {
    fn train(&self, key: &str) -> TrainingOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(model_for(key))
    }
}

// release() が呼ばれるまで train() の中で待つ
pub struct GatedTrainer {
    pub calls: AtomicUsize,
    gate_rx: Mutex<mpsc::Receiver<()>>,
    gate_tx: Mutex<mpsc::Sender<()>>,
}

impl GatedTrainer {
    pub fn new() -> GatedTrainer {
        let (gate_tx, gate_rx) = mpsc::channel();
        GatedTrainer {
            calls: AtomicUsize::new(0),
            gate_rx: Mutex::new(gate_rx),
            gate_tx: Mutex::new(gate_tx),
        }
    }

    pub fn release(&self) {
        self.gate_tx.lock().send(()).unwrap();
    }
}

impl Trainer for GatedTrainer {
    fn train(&self, key: &str) -> TrainingOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate_rx.lock().recv_timeout(Duration::from_secs(10)).unwrap();
        Ok(model_for(key))
    }
}

pub struct FailingTrainer;

impl Trainer for FailingTrainer {
    fn train(&self, key: &str) -> TrainingOutcome {
        Err(TrainingError::MissingInput(PathBuf::from("letters").join(key)))
    }
}

pub fn network() -> Arc<LocalNetwork> {
    LocalNetwork::new(&DirectoryConfig::default()).unwrap()
}

// ids の順に参加させる. 先頭のノードがリングを作り、以降の参加の問い合わせ先になる
pub async fn build_ring(net: &Arc<LocalNetwork>, ids: &[u32], trainer: Arc<dyn Trainer>) -> Vec<Arc<ChordNode>> {
    let mut nodes = Vec::new();
    let first = ids[0];
    for (idx, id) in ids.iter().enumerate() {
        let reference = if idx == 0 { None } else { Some(first) };
        nodes.push(net.join_with_id(*id, space(), reference, Arc::clone(&trainer)).await);
    }
    nodes
}

// ids の中で id を担当するノード. id 以降で最初のノード、なければ先頭に戻る
pub fn expected_owner(ids: &[u32], id: u32) -> u32 {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.iter().copied().find(|n| *n >= id).unwrap_or(sorted[0])
}

pub fn expected_successor(ids: &[u32], node: u32) -> u32 {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.iter().copied().find(|n| *n > node).unwrap_or(sorted[0])
}

pub fn expected_predecessor(ids: &[u32], node: u32) -> u32 {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.iter().rev().copied().find(|n| *n < node).unwrap_or(sorted[sorted.len() - 1])
}

// 学習中でなくなるまで get_model を繰り返す
pub async fn wait_for_model(node: &ChordNode, key: &str) -> ModelReply {
    for _ in 0..200 {
        let reply = chord_node::get_model(node, key, 3).await.unwrap();
        if reply.status != ModelStatus::Wait {
            return reply;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never finished", key);
}

// ハッシュ値を owner が担当するようなキーを探す
pub fn key_owned_by(ids: &[u32], owner: u32) -> String {
    (0..10_000)
        .map(|i| format!("letter_{}.txt", i))
        .find(|key| expected_owner(ids, space().hash_str_to_id(key)) == owner)
        .unwrap()
}
