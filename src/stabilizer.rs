use tracing::{debug, info, warn};

use crate::chord_node::ChordNode;
use crate::chord_util::{self, GeneralError};
use crate::rpc::{DirectoryRpc, JoinResponse};

// リングに最初に参加したノードとして初期化する
pub fn init_single_ring(node: &ChordNode) {
    let mut ni = node.self_node.lock();
    ni.init_single_ring();
    info!(node = %chord_util::gen_debug_str_of_node(&ni), "ring created");
}

// 既存ノード reference に問い合わせて自身の経路表を構築し、
// successor との間で predecessor を付け替える
pub async fn fix_fingers(node: &ChordNode, reference: u32) {
    let self_id = node.node_id();
    if reference == self_id {
        return;
    }
    let id_space = node.id_space();

    for idx in 0..id_space.bits() {
        let start = id_space.finger_start(self_id, idx);
        let found = if idx == id_space.bits() - 1 && self_id > start {
            // 最後のエントリの範囲が 0 を跨ぐ場合は自身を入れておく
            self_id
        } else {
            match node.rpc.find_successor(reference, start).await {
                Ok(found) => found,
                Err(err) => {
                    warn!(node = self_id, reference, idx, start, error = %err, "fix_fingers could not resolve entry, skipped");
                    continue;
                }
            }
        };
        node.self_node.lock().set_finger(idx as usize, found);
    }

    let successor = {
        let ni = node.self_node.lock();
        debug!(node = %chord_util::gen_debug_str_of_node(&ni), fingers = %chord_util::format_finger_table(&ni), "fingers fixed");
        ni.successor
    };
    if successor == self_id {
        warn!(node = self_id, "successor unresolved, predecessor exchange skipped");
        return;
    }

    match node.rpc.get_predecessor(successor).await {
        Ok(pred) => {
            node.self_node.lock().predecessor = pred;
        }
        Err(err) => warn!(node = self_id, successor, error = %err, "could not fetch predecessor of successor"),
    }
    if let Err(err) = node.rpc.set_predecessor(successor, self_id).await {
        warn!(node = self_id, successor, error = %err, "could not set predecessor of successor");
    }
}

// 自ノードを経路表に入れるべきノードへ更新を依頼する
pub async fn update_others(node: &ChordNode) {
    let self_id = node.node_id();
    let id_space = node.id_space();

    for idx in 0..id_space.bits() {
        let target = id_space.update_target(self_id, idx);
        let p = crate::router::find_predecessor(node, target).await;
        if p == self_id {
            debug!(node = self_id, idx, target, "update_others skipped, predecessor is self");
            continue;
        }

        match node.rpc.update_finger_table(p, self_id, idx).await {
            Ok(true) if idx == 0 => {
                if let Err(err) = node.rpc.set_successor(p, self_id).await {
                    warn!(node = self_id, p, error = %err, "set_successor failed");
                }
            }
            Ok(updated) => {
                debug!(node = self_id, p, idx, updated, "update_finger_table sent");
            }
            Err(err) => {
                warn!(node = self_id, p, idx, error = %err, "update_finger_table failed, skipped");
            }
        }
    }

    let ni = node.get_node_info();
    debug!(node = %chord_util::gen_debug_str_of_node(&ni), fingers = %chord_util::format_finger_table(&ni), "update_others done");
}

// candidate が finger_table[index] により適したノードであれば置き換え、
// 同じ依頼を predecessor へ伝播する
pub async fn update_finger_table(node: &ChordNode, candidate: u32, index: u32) -> Result<bool, GeneralError> {
    let self_id = node.node_id();
    if candidate == self_id {
        return Ok(false);
    }

    let predecessor = {
        let mut ni = node.self_node.lock();
        let current = match ni.finger_node(index as usize) {
            Some(current) => current,
            None => return Ok(false),
        };
        // 既に同じ値であれば伝播もしない
        if current == candidate {
            return Ok(false);
        }
        if !(chord_util::in_interval(self_id, candidate, current) || current == self_id) {
            return Ok(false);
        }
        ni.set_finger(index as usize, candidate);
        debug!(node = self_id, index, candidate, old = current, "finger updated");
        ni.predecessor
    };

    if let Some(pred) = predecessor {
        if pred != self_id && pred != candidate {
            if let Err(err) = node.rpc.update_finger_table(pred, candidate, index).await {
                warn!(node = self_id, pred, candidate, index, error = %err, "propagation to predecessor failed");
            }
        }
    }
    Ok(true)
}

// supernode から割り当てられた情報をもとにリングへ参加する
pub async fn join(node: &ChordNode, resp: &JoinResponse, directory: &dyn DirectoryRpc) -> Result<(), GeneralError> {
    if resp.peer_count == 0 {
        init_single_ring(node);
        return Ok(());
    }

    let reference = directory.get_node().await?;
    info!(node = node.node_id(), reference = %reference, "joining via reference node");
    fix_fingers(node, reference.node_id).await;
    update_others(node).await;

    let ni = node.get_node_info();
    info!(node = %chord_util::gen_debug_str_of_node(&ni), fingers = %chord_util::format_finger_table(&ni), "joined ring");
    Ok(())
}

// join を行い、成功すれば確定、失敗すれば取り消しを supernode へ通知する
pub async fn join_and_confirm(node: &ChordNode, resp: &JoinResponse, directory: &dyn DirectoryRpc) -> Result<(), GeneralError> {
    if let Err(err) = join(node, resp, directory).await {
        warn!(node = node.node_id(), error = %err, "join failed, cancelling");
        if let Err(cancel_err) = directory.cancel_join(node.node_id()).await {
            warn!(node = node.node_id(), error = %cancel_err, "cancel_join failed");
        }
        return Err(err);
    }

    if !directory.confirm_join(node.node_id()).await? {
        return Err(GeneralError::new(
            format!("supernode refused to confirm node {}", node.node_id()),
            chord_util::ERR_CODE_JOIN_REJECTED,
        ));
    }
    info!(node = node.node_id(), "join confirmed");
    Ok(())
}
