use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::gval;
use crate::mlp::{self, Mlp};
use crate::rpc::{ModelStatus, NodeRpc, PutStatus};
use crate::training::{TrainedModel, TrainingError};

// データディレクトリ内のファイル名を名前順に limit 個返す
pub fn list_job_keys(data_dir: &Path, limit: usize) -> io::Result<Vec<String>> {
    let mut keys = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                keys.push(name.to_string());
            }
        }
    }
    keys.sort();
    keys.truncate(limit);
    Ok(keys)
}

// 全キーを entry ノード経由で投入する. 投入に失敗したキーは除いて返す
pub async fn submit_all(rpc: &dyn NodeRpc, entry: u32, keys: &[String]) -> Vec<String> {
    let mut submitted = Vec::new();
    for key in keys {
        match rpc.put_data(entry, key, gval::DEFAULT_FORWARD_TTL).await {
            Ok(reply) => {
                let path = reply.path.iter().map(u32::to_string).collect::<Vec<String>>().join(" -> ");
                info!(key = %key, owner = reply.owner, path = %path, forwarded = reply.status == PutStatus::Forwarded, "submitted");
                submitted.push(key.clone());
            }
            Err(err) => warn!(key = %key, error = %err, "put_data failed"),
        }
    }
    submitted
}

// 全ジョブが終わるか試行回数を使い切るまで get_model を繰り返す
pub async fn collect_models(
    rpc: &dyn NodeRpc,
    entry: u32,
    keys: &[String],
    max_attempts: usize,
    poll_interval: Duration,
) -> BTreeMap<String, TrainedModel> {
    let mut models = BTreeMap::new();
    let mut outstanding: Vec<String> = keys.to_vec();

    for attempt in 1..=max_attempts {
        let mut still_waiting = Vec::new();
        for key in outstanding {
            match rpc.get_model(entry, &key, gval::DEFAULT_FORWARD_TTL).await {
                Ok(reply) => match (reply.status, reply.model) {
                    (ModelStatus::Done, Some(model)) => {
                        info!(key = %key, error_rate = model.error_rate, "model received");
                        models.insert(key, model);
                    }
                    (ModelStatus::Failed, _) => {
                        warn!(key = %key, reason = reply.reason.as_deref().unwrap_or("unknown"), "training failed");
                    }
                    (status, _) => {
                        info!(key = %key, ?status, attempt, "waiting");
                        still_waiting.push(key);
                    }
                },
                Err(err) => {
                    warn!(key = %key, error = %err, attempt, "get_model failed");
                    still_waiting.push(key);
                }
            }
        }
        outstanding = still_waiting;
        if outstanding.is_empty() {
            break;
        }
        if attempt < max_attempts {
            tokio::time::sleep(poll_interval).await;
        }
    }

    if !outstanding.is_empty() {
        warn!(missing = ?outstanding, "gave up waiting for some models");
    }
    models
}

// 形の揃っている勾配だけを要素ごとに平均する
pub fn average_gradients<'a>(models: impl IntoIterator<Item = &'a TrainedModel>) -> Option<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    let mut models = models.into_iter();
    let first = models.next()?;
    let same_shape = |a: &[Vec<f64>], b: &[Vec<f64>]| a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.len() == y.len());

    let mut sum_v = first.v.clone();
    let mut sum_w = first.w.clone();
    let mut count = 1usize;
    for model in models {
        if !same_shape(&model.v, &sum_v) || !same_shape(&model.w, &sum_w) {
            warn!("skipping a model with mismatched weight shape");
            continue;
        }
        for (acc, row) in sum_v.iter_mut().zip(&model.v) {
            acc.iter_mut().zip(row).for_each(|(a, b)| *a += b);
        }
        for (acc, row) in sum_w.iter_mut().zip(&model.w) {
            acc.iter_mut().zip(row).for_each(|(a, b)| *a += b);
        }
        count += 1;
    }

    let scale = |m: Vec<Vec<f64>>, factor: f64| -> Vec<Vec<f64>> {
        m.into_iter().map(|row| row.into_iter().map(|x| x * factor).collect()).collect()
    };
    let inv = 1.0 / count as f64;
    Some((scale(sum_v, inv), scale(sum_w, inv)))
}

// 平均した勾配を重みとしたモデルで検証データの誤分類率を求める
pub fn validate(
    avg_v: &[Vec<f64>],
    avg_w: &[Vec<f64>],
    v_scale: f64,
    validation_file: &Path,
    class_num: usize,
) -> Result<f64, TrainingError> {
    let v = avg_v.iter().map(|row| row.iter().map(|x| x * v_scale).collect()).collect();
    let model = Mlp::from_weights(v, avg_w.to_vec())?;
    let samples = mlp::load_samples(validation_file, class_num)?;
    if samples[0].features.len() != model.inputs() {
        return Err(TrainingError::ShapeMismatch(format!(
            "validation data has {} features, model expects {}",
            samples[0].features.len(),
            model.inputs()
        )));
    }
    Ok(model.error_rate(&samples))
}
