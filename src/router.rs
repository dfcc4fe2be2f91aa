use std::collections::HashSet;

use tracing::{debug, warn};

use crate::chord_node::ChordNode;
use crate::chord_util::{self, GeneralError};
use crate::gval;

// idで識別されるデータを担当するノードの名前解決を行う
pub async fn find_successor(node: &ChordNode, id: u32) -> Result<u32, GeneralError> {
    let self_id = node.node_id();
    // 自身のIDは自身が担当する
    if id == self_id {
        return Ok(self_id);
    }

    let n_dash = find_predecessor(node, id).await;
    debug!(node = self_id, data = %chord_util::gen_debug_str_of_data(&node.id_space(), id), n_dash, "find_successor");

    if n_dash == self_id {
        return Ok(node.get_successor());
    }
    node.rpc.get_successor(n_dash).await
}

// id の前で一番近い位置に存在するノードを探索する.
// 探索が打ち切られた場合もその時点で最善のノードを返す
pub async fn find_predecessor(node: &ChordNode, id: u32) -> u32 {
    trace_predecessor(node, id).await.0
}

// find_successor と同じ解決を行い、担当ノードと経由したノードの列を返す
// 列の先頭は自ノード、末尾は担当ノード
pub async fn find_successor_with_path(node: &ChordNode, id: u32) -> Result<(u32, Vec<u32>), GeneralError> {
    let self_id = node.node_id();
    let mut path = vec![self_id];

    if id == self_id {
        return Ok((self_id, path));
    }

    let successor = node.get_successor();
    if chord_util::in_interval(self_id, id, successor) {
        path.push(successor);
        return Ok((successor, path));
    }

    let (n_dash, hops) = trace_predecessor(node, id).await;
    path.extend(hops);
    let owner = node.successor_of(n_dash).await?;
    path.push(owner);
    Ok((owner, path))
}

// find_predecessor の本体. 見つかったノードと、自ノード以降に経由したノードを返す
async fn trace_predecessor(node: &ChordNode, id: u32) -> (u32, Vec<u32>) {
    let self_id = node.node_id();
    let mut n_dash = self_id;
    let mut n_dash_succ = node.get_successor();
    let mut visited: HashSet<u32> = HashSet::new();
    let mut hops: Vec<u32> = Vec::new();

    // n_dash と n_dashのsuccessorの 間に id が位置するような n_dash を見つけたら終了
    while !chord_util::in_interval(n_dash, id, n_dash_succ) {
        if hops.len() >= gval::FIND_PREDECESSOR_MAX_HOPS || !visited.insert(n_dash) {
            warn!(node = self_id, id, n_dash, hops = hops.len(), "find_predecessor gave up, returning best known node");
            break;
        }

        let n_dash_found = match node.closest_preceding_node_of(n_dash, id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(node = self_id, n_dash, error = %err, "closest_preceding_node call failed");
                break;
            }
        };

        // 同じノードが返ってきた場合は同じ経路表で探索を続けることになるので打ち切る
        if n_dash_found == n_dash {
            break;
        }

        n_dash_succ = match node.successor_of(n_dash_found).await {
            Ok(succ) => succ,
            Err(err) => {
                warn!(node = self_id, n_dash_found, error = %err, "get_successor call failed");
                break;
            }
        };
        debug!(node = self_id, from = n_dash, to = n_dash_found, "find_predecessor hop");
        n_dash = n_dash_found;
        hops.push(n_dash);
    }

    (n_dash, hops)
}
