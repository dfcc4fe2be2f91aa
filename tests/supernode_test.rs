use std::sync::{Arc, Barrier};
use std::thread;

use chord_train::config::{AddressTable, DirectoryConfig};
use chord_train::rpc::JoinRejected;
use chord_train::supernode::Directory;

fn directory() -> Arc<Directory> {
    let table = AddressTable::parse("# test hosts\n10.0.0.1,5001\n10.0.0.2,5002\n").unwrap();
    Arc::new(Directory::new(&DirectoryConfig::default(), table).unwrap())
}

#[test]
fn concurrent_join_requests_are_serialized() {
    let dir = directory();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [5001u16, 5002]
        .into_iter()
        .map(|port| {
            let dir = Arc::clone(&dir);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                dir.request_join(port)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let accepted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let rejected: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(accepted.len(), 1, "exactly one join may be in progress");
    assert_eq!(rejected, vec![&JoinRejected::JoinInProgress]);
    assert_eq!(dir.pending_join(), Some(accepted[0].assigned_id));
}

#[test]
fn joins_proceed_one_after_another() {
    let dir = directory();
    let mut confirmed = Vec::new();
    for port in [5001u16, 5002, 5003] {
        let resp = match dir.request_join(port) {
            Ok(resp) => resp,
            // 既存の id と衝突するポート
            Err(JoinRejected::IdCollision(_)) => continue,
            Err(other) => panic!("unexpected rejection {:?}", other),
        };
        assert_eq!(resp.peer_count, confirmed.len());
        assert!(dir.confirm_join(resp.assigned_id));
        confirmed.push(resp.assigned_id);
    }
    confirmed.sort_unstable();
    assert_eq!(dir.confirmed_node_ids(), confirmed);
    assert_eq!(dir.pending_join(), None);

    let picked = dir.get_random_node().unwrap();
    assert!(confirmed.contains(&picked.node_id));
}

#[test]
fn hosts_come_from_the_address_table() {
    let dir = directory();
    let resp = dir.request_join(5002).unwrap();
    let (host, port) = dir.get_node_address(resp.assigned_id).unwrap();
    assert_eq!(host, "10.0.0.2");
    assert_eq!(port, 5002);
}
