use serde::{Deserialize, Serialize};

use crate::chord_util::{self, IdSpace};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerEntry {
    // (node_id + 2^i) mod 2^m
    pub start: u32,
    // start 以降で最初に位置するノード
    pub node: u32,
}

// 各ノードが保持する経路情報
// finger_table はインデックスの小さい方から狭い範囲が格納される形で保持する.
// finger_table[0].node は常に successor と一致させる
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: u32,
    pub id_space: IdSpace,
    // join 前と単一ノード構成以外では None にならない
    pub predecessor: Option<u32>,
    pub successor: u32,
    pub finger_table: Vec<FingerEntry>,
}

impl NodeInfo {
    // 全エントリが自身を指す、リングに参加する前の状態で生成する
    pub fn new(node_id: u32, id_space: IdSpace) -> NodeInfo {
        let finger_table = (0..id_space.bits())
            .map(|idx| FingerEntry {
                start: id_space.finger_start(node_id, idx),
                node: node_id,
            })
            .collect();

        NodeInfo {
            node_id,
            id_space,
            predecessor: None,
            successor: node_id,
            finger_table,
        }
    }

    pub fn set_successor(&mut self, successor: u32) {
        self.successor = successor;
        if let Some(entry) = self.finger_table.get_mut(0) {
            entry.node = successor;
        }
    }

    // index 0 への書き込みは successor にも反映する
    pub fn set_finger(&mut self, idx: usize, node: u32) {
        if idx == 0 {
            self.set_successor(node);
        } else if let Some(entry) = self.finger_table.get_mut(idx) {
            entry.node = node;
        }
    }

    pub fn finger_node(&self, idx: usize) -> Option<u32> {
        self.finger_table.get(idx).map(|entry| entry.node)
    }

    //  自身の持つ経路情報をもとに, id から前方向に一番近いノードのIDを返す
    // 範囲の広いエントリから見ていき、自身と id の間（両端含まず）にあるものを採用する
    pub fn closest_preceding_finger(&self, id: u32) -> u32 {
        for entry in self.finger_table.iter().rev() {
            if entry.node != self.node_id
                && chord_util::exist_strictly_between(self.node_id, entry.node, id)
            {
                return entry.node;
            }
        }
        // どんなに範囲を狭めても id を飛び越してしまうノードしか無ければ自身
        self.node_id
    }

    // 自身が単独でリングを構成している状態にする
    pub fn init_single_ring(&mut self) {
        let node_id = self.node_id;
        for entry in self.finger_table.iter_mut() {
            entry.node = node_id;
        }
        self.successor = node_id;
        self.predecessor = Some(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> IdSpace {
        IdSpace::new(6).unwrap()
    }

    #[test]
    fn new_node_points_to_itself() {
        let ni = NodeInfo::new(10, space());
        assert_eq!(ni.finger_table.len(), 6);
        assert_eq!(ni.successor, 10);
        assert_eq!(ni.predecessor, None);
        let starts: Vec<u32> = ni.finger_table.iter().map(|e| e.start).collect();
        assert_eq!(starts, vec![11, 12, 14, 18, 26, 42]);
        assert!(ni.finger_table.iter().all(|e| e.node == 10));
    }

    #[test]
    fn finger_zero_and_successor_stay_in_sync() {
        let mut ni = NodeInfo::new(10, space());
        ni.set_finger(0, 40);
        assert_eq!(ni.successor, 40);
        ni.set_successor(20);
        assert_eq!(ni.finger_node(0), Some(20));
        ni.set_finger(3, 40);
        assert_eq!(ni.successor, 20);
        // out of range index is ignored
        ni.set_finger(99, 1);
        assert_eq!(ni.finger_table.len(), 6);
    }

    #[test]
    fn closest_preceding_finger_scans_from_widest_entry() {
        let mut ni = NodeInfo::new(10, space());
        ni.set_finger(0, 20);
        ni.set_finger(3, 30);
        ni.set_finger(5, 50);

        assert_eq!(ni.closest_preceding_finger(60), 50);
        assert_eq!(ni.closest_preceding_finger(50), 30);
        assert_eq!(ni.closest_preceding_finger(25), 20);
        // nothing strictly between 10 and 15
        assert_eq!(ni.closest_preceding_finger(15), 10);
        // wraps past zero
        assert_eq!(ni.closest_preceding_finger(5), 50);
    }

    #[test]
    fn single_ring_is_its_own_neighbour() {
        let mut ni = NodeInfo::new(33, space());
        ni.init_single_ring();
        assert_eq!(ni.predecessor, Some(33));
        assert_eq!(ni.successor, 33);
        assert_eq!(ni.closest_preceding_finger(7), 33);
    }
}
