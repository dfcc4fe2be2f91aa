use std::collections::HashMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::rpc::{ModelReply, ModelStatus};
use crate::training::{TrainedModel, TrainingOutcome};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Training,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub status: JobStatus,
    pub result: Option<TrainedModel>,
    pub failure: Option<String>,
    pub submitted_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
}

// 自ノードが担当するジョブの状態を保持する
// 状態遷移は (なし) -> Training -> Done | Failed のみ
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<String, JobRecord>,
}

impl JobStore {
    pub fn new() -> JobStore {
        JobStore { jobs: HashMap::new() }
    }

    // 未登録のキーであれば Training として登録し true を返す.
    // 既に存在する場合は何もしない
    pub fn begin(&mut self, key: &str) -> bool {
        if self.jobs.contains_key(key) {
            return false;
        }
        self.jobs.insert(
            key.to_string(),
            JobRecord {
                status: JobStatus::Training,
                result: None,
                failure: None,
                submitted_at: Local::now(),
                finished_at: None,
            },
        );
        true
    }

    // Training 中のジョブにのみ結果を反映する
    pub fn complete(&mut self, key: &str, outcome: TrainingOutcome) -> bool {
        let record = match self.jobs.get_mut(key) {
            Some(record) if record.status == JobStatus::Training => record,
            _ => return false,
        };
        match outcome {
            Ok(model) => {
                record.status = JobStatus::Done;
                record.result = Some(model);
            }
            Err(err) => {
                record.status = JobStatus::Failed;
                record.failure = Some(err.to_string());
            }
        }
        record.finished_at = Some(Local::now());
        true
    }

    // 学習タスク自体が異常終了した場合
    pub fn fail(&mut self, key: &str, reason: String) -> bool {
        match self.jobs.get_mut(key) {
            Some(record) if record.status == JobStatus::Training => {
                record.status = JobStatus::Failed;
                record.failure = Some(reason);
                record.finished_at = Some(Local::now());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&JobRecord> {
        self.jobs.get(key)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn model_reply(&self, key: &str) -> ModelReply {
        match self.jobs.get(key) {
            None => ModelReply::with_status(ModelStatus::NotFound),
            Some(record) => match record.status {
                JobStatus::Training => ModelReply::with_status(ModelStatus::Wait),
                JobStatus::Done => ModelReply {
                    status: ModelStatus::Done,
                    model: record.result.clone(),
                    reason: None,
                },
                JobStatus::Failed => ModelReply {
                    status: ModelStatus::Failed,
                    model: None,
                    reason: record.failure.clone(),
                },
            },
        }
    }
}
