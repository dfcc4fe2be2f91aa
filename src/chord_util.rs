use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::gval;
use crate::node_info::NodeInfo;

// GeneralError型で利用するエラーコード
pub const ERR_CODE_NODE_IS_DOWNED : u32 = 1;
pub const ERR_CODE_APPROPRIATE_NODE_NOT_FOUND : u32 = 2;
pub const ERR_CODE_INTERNAL_CONTROL_FLOW_PROBLEM : u32 = 3;
pub const ERR_CODE_HTTP_REQUEST_ERR : u32 = 4;
pub const ERR_CODE_ADDRESS_NOT_FOUND : u32 = 5;
pub const ERR_CODE_JOIN_REJECTED : u32 = 6;
pub const ERR_CODE_CONFIG : u32 = 7;

#[derive(Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[error("{message} (err_code={err_code})")]
pub struct GeneralError {
    pub message: String,
    pub err_code: u32,
}

impl GeneralError {
    pub fn new(message: String, err_code: u32) -> GeneralError {
        GeneralError { message, err_code }
    }
}

// 2^bits 個のIDからなる環状のID空間
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSpace {
    bits: u32,
}

impl IdSpace {
    pub fn new(bits: u32) -> Result<IdSpace, GeneralError> {
        if !(gval::MIN_ID_SPACE_BITS..=gval::MAX_ID_SPACE_BITS).contains(&bits) {
            return Err(GeneralError::new(
                format!("id space bits must be in {}..={}, got {}", gval::MIN_ID_SPACE_BITS, gval::MAX_ID_SPACE_BITS, bits),
                ERR_CODE_CONFIG,
            ));
        }
        Ok(IdSpace { bits })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    // 0を含めての数である点に注意
    pub fn size(&self) -> u64 {
        1u64 << self.bits
    }

    fn wrap(&self, val: u64) -> u32 {
        (val % self.size()) as u32
    }

    // finger_table[idx] が担当する範囲の先頭 (node_id + 2^idx) mod 2^m
    pub fn finger_start(&self, node_id: u32, idx: u32) -> u32 {
        self.wrap(node_id as u64 + (1u64 << idx))
    }

    // update_others で finger_table[idx] を自ノードへ向けるべきノードを探す際の起点.
    // (node_id - 2^idx + 1) mod 2^m の predecessor は、ちょうど node_id - 2^idx に
    // 位置するノードも含めて取りこぼさない
    pub fn update_target(&self, node_id: u32, idx: u32) -> u32 {
        self.wrap(node_id as u64 + self.size() - (1u64 << idx) + 1)
    }

    // 任意の文字列をSHA-1でハッシュし、ID空間に収まる値にして返す
    // ダイジェストをビッグエンディアンの整数とみなした値の mod 2^m と同じ
    pub fn hash_str_to_id(&self, input_str: &str) -> u32 {
        let digest = Sha1::digest(input_str.as_bytes());
        let low_bits = digest[12..]
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | *byte as u64);
        self.wrap(low_bits)
    }

    pub fn conv_id_to_ratio_str(&self, id: u32) -> String {
        let ratio = (id as f64 / self.size() as f64) * 100.0;
        format!("{:.4}", ratio)
    }
}

// 時計回りの半開区間 (start, end] に id が含まれるか.
// start == end はリング一周（単一ノード）として扱う
pub fn in_interval(start: u32, id: u32, end: u32) -> bool {
    if start == end {
        return true;
    }
    if start < end {
        start < id && id <= end
    } else {
        id > start || id <= end
    }
}

// 開区間 (start, end). closest_preceding_node でのみ用いる
pub fn exist_strictly_between(start: u32, id: u32, end: u32) -> bool {
    id != start && id != end && in_interval(start, id, end)
}

pub fn gen_debug_str_of_node(node: &NodeInfo) -> String {
    let id_space = node.id_space;
    format!(
        "{},{},pred={},succ={}",
        node.node_id,
        id_space.conv_id_to_ratio_str(node.node_id),
        node.predecessor.map(|pred| pred.to_string()).unwrap_or_else(|| "None".to_string()),
        node.successor
    )
}

pub fn gen_debug_str_of_data(id_space: &IdSpace, data_id: u32) -> String {
    format!("{},{}", data_id, id_space.conv_id_to_ratio_str(data_id))
}

// 経路表の内容を一行の文字列にする. "start->node" をカンマ区切りで並べる
pub fn format_finger_table(node: &NodeInfo) -> String {
    node.finger_table
        .iter()
        .map(|entry| format!("{}->{}", entry.start, entry.node))
        .collect::<Vec<String>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_interval_covers_all_three_shapes() {
        // degenerate full circle
        assert!(in_interval(7, 3, 7));
        assert!(in_interval(7, 7, 7));

        // start < end
        assert!(in_interval(10, 25, 40));
        assert!(in_interval(10, 40, 40));
        assert!(!in_interval(10, 10, 40));
        assert!(!in_interval(10, 50, 40));

        // wraparound
        assert!(in_interval(40, 50, 10));
        assert!(in_interval(40, 0, 10));
        assert!(in_interval(40, 10, 10));
        assert!(!in_interval(40, 40, 10));
        assert!(!in_interval(40, 25, 10));
    }

    #[test]
    fn strictly_between_excludes_both_ends() {
        assert!(exist_strictly_between(10, 11, 40));
        assert!(!exist_strictly_between(10, 40, 40));
        assert!(!exist_strictly_between(10, 10, 40));
        // start == end means everything except that point
        assert!(exist_strictly_between(10, 40, 10));
        assert!(!exist_strictly_between(10, 10, 10));
    }

    #[test]
    fn finger_start_and_update_target_wrap() {
        let id_space = IdSpace::new(6).unwrap();
        assert_eq!(id_space.size(), 64);
        assert_eq!(id_space.finger_start(10, 0), 11);
        assert_eq!(id_space.finger_start(40, 5), 8);
        assert_eq!(id_space.finger_start(63, 0), 0);
        assert_eq!(id_space.update_target(40, 0), 40);
        assert_eq!(id_space.update_target(10, 4), 59);
        assert_eq!(id_space.update_target(0, 5), 33);
    }

    #[test]
    fn id_space_rejects_out_of_range_bits() {
        assert!(IdSpace::new(1).is_err());
        assert!(IdSpace::new(33).is_err());
        assert_eq!(IdSpace::new(32).unwrap().size(), 1u64 << 32);
    }

    #[test]
    fn hash_is_stable_and_bounded() {
        let id_space = IdSpace::new(6).unwrap();
        let first = id_space.hash_str_to_id("5001");
        assert_eq!(first, id_space.hash_str_to_id("5001"));
        assert!((first as u64) < id_space.size());

        // low bits of the digest: growing m only adds high bits
        let wide = IdSpace::new(16).unwrap().hash_str_to_id("5001");
        assert_eq!(wide % 64, first);
    }

    #[test]
    fn general_error_displays_code() {
        let err = GeneralError::new("boom".to_string(), ERR_CODE_HTTP_REQUEST_ERR);
        assert_eq!(err.to_string(), "boom (err_code=4)");
    }
}
