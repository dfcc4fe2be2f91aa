use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::gval;
use crate::mlp::{self, Mlp};

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),
    #[error("invalid job key {0:?}")]
    InvalidKey(String),
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("no samples in {0}")]
    EmptyDataset(PathBuf),
    #[error("weight shape mismatch: {0}")]
    ShapeMismatch(String),
}

// 一回の学習結果. v, w は学習前後の重みの差分
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub v: Vec<Vec<f64>>,
    pub w: Vec<Vec<f64>>,
    pub error_rate: f64,
}

pub type TrainingOutcome = Result<TrainedModel, TrainingError>;

// ジョブキーを受け取り学習を行う. ブロッキングで呼び出される
pub trait Trainer: Send + Sync + 'static {
    fn train(&self, key: &str) -> TrainingOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingParams {
    pub class_num: usize,
    pub hidden_units: usize,
    pub eta: f64,
    pub epochs: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        TrainingParams {
            class_num: gval::DEFAULT_CLASS_NUM,
            hidden_units: gval::DEFAULT_HIDDEN_UNITS,
            eta: gval::DEFAULT_LEARNING_RATE,
            epochs: gval::DEFAULT_EPOCHS,
        }
    }
}

// <data_dir>/<key> のサンプルでMLPを学習する
pub struct MlpTrainer {
    data_dir: PathBuf,
    params: TrainingParams,
}

impl MlpTrainer {
    pub fn new(data_dir: impl Into<PathBuf>, params: TrainingParams) -> MlpTrainer {
        MlpTrainer { data_dir: data_dir.into(), params }
    }

    fn input_path(&self, key: &str) -> Result<PathBuf, TrainingError> {
        let as_path = Path::new(key);
        let is_plain_name = as_path.file_name().map(|name| name == as_path.as_os_str()).unwrap_or(false);
        if key.is_empty() || !is_plain_name {
            return Err(TrainingError::InvalidKey(key.to_string()));
        }
        Ok(self.data_dir.join(key))
    }
}

impl Trainer for MlpTrainer {
    fn train(&self, key: &str) -> TrainingOutcome {
        let path = self.input_path(key)?;
        let samples = mlp::load_samples(&path, self.params.class_num)?;
        let inputs = samples[0].features.len();
        debug!(key, samples = samples.len(), inputs, "training started");

        let mut model = Mlp::random(inputs, self.params.hidden_units, self.params.class_num);
        let initial = model.clone();
        let error_rate = model.train(&samples, self.params.eta, self.params.epochs);
        info!(key, error_rate, "training finished");

        Ok(TrainedModel {
            v: mlp::matrix_sub(&model.v, &initial.v),
            w: mlp::matrix_sub(&model.w, &initial.w),
            error_rate,
        })
    }
}
