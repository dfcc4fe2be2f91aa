mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chord_train::chord_node;
use chord_train::chord_util;
use chord_train::config::DirectoryConfig;
use chord_train::local_net::LocalNetwork;
use chord_train::rpc::{ModelStatus, PutStatus};
use chord_train::training::{MlpTrainer, TrainingParams};

use common::*;

const RING: [u32; 2] = [10, 40];

// ============================================================
// ジョブの投入
// ============================================================

#[tokio::test]
async fn owner_trains_once_even_if_submitted_twice() {
    let net = network();
    let trainer = Arc::new(GatedTrainer::new());
    let nodes = build_ring(&net, &RING, trainer.clone()).await;
    let key = key_owned_by(&RING, 40);
    let owner = &nodes[1];

    let first = chord_node::put_data(owner, &key, 3).await.unwrap();
    assert_eq!(first.status, PutStatus::Training);
    assert_eq!(first.owner, 40);

    let second = chord_node::put_data(owner, &key, 3).await.unwrap();
    assert_eq!(second.status, PutStatus::AlreadySubmitted);

    let pending = chord_node::get_model(owner, &key, 3).await.unwrap();
    assert_eq!(pending.status, ModelStatus::Wait, "job stays in training until the trainer returns");

    trainer.release();
    let done = wait_for_model(owner, &key).await;
    assert_eq!(done.status, ModelStatus::Done);
    assert_eq!(done.model, Some(model_for(&key)));
    assert_eq!(trainer.calls.load(Ordering::SeqCst), 1, "exactly one training run");

    let third = chord_node::put_data(owner, &key, 3).await.unwrap();
    assert_eq!(third.status, PutStatus::AlreadySubmitted, "finished jobs are not retrained");
    assert_eq!(trainer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_owner_forwards_to_owner() {
    let net = network();
    let trainer = Arc::new(CountingTrainer::default());
    let nodes = build_ring(&net, &RING, trainer.clone()).await;
    let key = key_owned_by(&RING, 40);
    let (a, b) = (&nodes[0], &nodes[1]);

    let reply = chord_node::put_data(a, &key, 3).await.unwrap();
    assert_eq!(reply.status, PutStatus::Forwarded);
    assert_eq!(reply.owner, 40);
    assert_eq!(reply.path.first(), Some(&10));
    assert_eq!(reply.path.last(), Some(&40));

    let done = wait_for_model(b, &key).await;
    assert_eq!(done.status, ModelStatus::Done);
    assert!(a.job_store.lock().get(&key).is_none(), "only the owner keeps a record");

    // 担当でないノードに問い合わせても同じ記録に届く
    let via_a = chord_node::get_model(a, &key, 3).await.unwrap();
    assert_eq!(via_a, done);
    assert_eq!(trainer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn submissions_spread_by_key_hash() {
    let net = network();
    let nodes = build_ring(&net, &RING, Arc::new(CountingTrainer::default())).await;

    for i in 0..20 {
        let key = format!("letter_{}.txt", i);
        let expected = expected_owner(&RING, space().hash_str_to_id(&key));
        let reply = chord_node::put_data(&nodes[0], &key, 3).await.unwrap();
        assert_eq!(reply.owner, expected, "owner of {}", key);
        let done = wait_for_model(&nodes[0], &key).await;
        assert_eq!(done.status, ModelStatus::Done);
    }
    let total = nodes[0].job_store.lock().len() + nodes[1].job_store.lock().len();
    assert_eq!(total, 20, "every key has exactly one record in the ring");
}

// ============================================================
// 学習結果の取得
// ============================================================

#[tokio::test]
async fn unknown_key_is_not_found() {
    let net = network();
    let nodes = build_ring(&net, &RING, Arc::new(CountingTrainer::default())).await;
    for node in &nodes {
        let reply = chord_node::get_model(node, "never_submitted.txt", 3).await.unwrap();
        assert_eq!(reply.status, ModelStatus::NotFound);
        assert!(reply.model.is_none());
    }
}

#[tokio::test]
async fn failed_training_is_terminal() {
    let net = network();
    let nodes = build_ring(&net, &RING, Arc::new(FailingTrainer)).await;
    let key = key_owned_by(&RING, 10);

    chord_node::put_data(&nodes[1], &key, 3).await.unwrap();
    let reply = wait_for_model(&nodes[0], &key).await;
    assert_eq!(reply.status, ModelStatus::Failed);
    assert!(reply.reason.unwrap().contains(&key));

    let again = chord_node::put_data(&nodes[0], &key, 3).await.unwrap();
    assert_eq!(again.status, PutStatus::AlreadySubmitted);
    assert_eq!(wait_for_model(&nodes[0], &key).await.status, ModelStatus::Failed);
}

#[tokio::test]
async fn missing_input_file_fails_the_job() {
    let dir = std::env::temp_dir().join(format!("chord_train_empty_dir_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let trainer = Arc::new(MlpTrainer::new(&dir, TrainingParams::default()));

    let net = LocalNetwork::new(&DirectoryConfig::default()).unwrap();
    let node = net.join_with_id(7, space(), None, trainer).await;

    let reply = chord_node::put_data(&node, "letter_missing.txt", 3).await.unwrap();
    assert_eq!(reply.status, PutStatus::Training);
    let done = wait_for_model(&node, "letter_missing.txt").await;
    assert_eq!(done.status, ModelStatus::Failed);
    assert!(done.reason.unwrap().contains("not found"));
}

// ============================================================
// 転送回数の上限
// ============================================================

#[tokio::test]
async fn exhausted_ttl_is_an_error() {
    let net = network();
    let nodes = build_ring(&net, &RING, Arc::new(CountingTrainer::default())).await;
    let key = key_owned_by(&RING, 40);

    let err = chord_node::put_data(&nodes[0], &key, 0).await.unwrap_err();
    assert_eq!(err.err_code, chord_util::ERR_CODE_INTERNAL_CONTROL_FLOW_PROBLEM);
    let err = chord_node::get_model(&nodes[0], &key, 0).await.unwrap_err();
    assert_eq!(err.err_code, chord_util::ERR_CODE_INTERNAL_CONTROL_FLOW_PROBLEM);

    // 担当ノード自身は転送しないので上限は関係ない
    let reply = chord_node::put_data(&nodes[1], &key, 0).await.unwrap();
    assert_eq!(reply.status, PutStatus::Training);
}

#[tokio::test]
async fn unreachable_owner_reports_error() {
    let net = network();
    let nodes = build_ring(&net, &RING, Arc::new(CountingTrainer::default())).await;
    let key = key_owned_by(&RING, 40);
    net.set_downed(40, true);

    let err = chord_node::put_data(&nodes[0], &key, 3).await.unwrap_err();
    assert_eq!(err.err_code, chord_util::ERR_CODE_NODE_IS_DOWNED);
}
