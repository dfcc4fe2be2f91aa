use std::fs;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::training::TrainingError;

// 1行 = "ラベル,特徴量1,特徴量2,..." の学習サンプル
// ラベルは A-Z の1文字、もしくは 0 始まりのクラス番号
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub label: usize,
    pub features: Vec<f64>,
}

pub fn parse_samples(text: &str, class_num: usize) -> Result<Vec<Sample>, TrainingError> {
    let mut samples = Vec::new();
    let mut feature_num: Option<usize> = None;

    for (line_idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parse_err = |message: String| TrainingError::Parse { line: line_idx + 1, message };

        let mut fields = line.split(',').map(str::trim);
        let label_str = fields.next().unwrap_or_default();
        let label = parse_label(label_str).ok_or_else(|| parse_err(format!("bad label {:?}", label_str)))?;
        if label >= class_num {
            return Err(parse_err(format!("label {} out of range for {} classes", label, class_num)));
        }

        let features = fields
            .map(|f| f.parse::<f64>().map_err(|e| parse_err(format!("bad feature {:?}: {}", f, e))))
            .collect::<Result<Vec<f64>, TrainingError>>()?;
        if features.is_empty() {
            return Err(parse_err("no features".to_string()));
        }
        match feature_num {
            None => feature_num = Some(features.len()),
            Some(expected) if expected != features.len() => {
                return Err(parse_err(format!("expected {} features, got {}", expected, features.len())));
            }
            Some(_) => {}
        }

        samples.push(Sample { label, features });
    }

    Ok(samples)
}

fn parse_label(label_str: &str) -> Option<usize> {
    let mut chars = label_str.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_uppercase() => Some((c as u8 - b'A') as usize),
        _ => label_str.parse().ok(),
    }
}

pub fn load_samples(path: &Path, class_num: usize) -> Result<Vec<Sample>, TrainingError> {
    if !path.is_file() {
        return Err(TrainingError::MissingInput(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    let samples = parse_samples(&text, class_num)?;
    if samples.is_empty() {
        return Err(TrainingError::EmptyDataset(path.to_path_buf()));
    }
    Ok(samples)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// 隠れ層1層の多層パーセプトロン
// v: class_num x (hidden + 1), w: hidden x (inputs + 1). 先頭列はバイアス
#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    pub v: Vec<Vec<f64>>,
    pub w: Vec<Vec<f64>>,
}

impl Mlp {
    pub fn random(inputs: usize, hidden: usize, class_num: usize) -> Mlp {
        let mut rng = rand::thread_rng();
        let mut matrix = |rows: usize, cols: usize| -> Vec<Vec<f64>> {
            (0..rows)
                .map(|_| (0..cols).map(|_| rng.gen_range(-0.01..0.01)).collect())
                .collect()
        };
        let v = matrix(class_num, hidden + 1);
        let w = matrix(hidden, inputs + 1);
        Mlp { v, w }
    }

    pub fn from_weights(v: Vec<Vec<f64>>, w: Vec<Vec<f64>>) -> Result<Mlp, TrainingError> {
        let hidden = w.len();
        let inputs_plus_bias = w.first().map(|row| row.len()).unwrap_or(0);
        if hidden == 0 || inputs_plus_bias < 2 || w.iter().any(|row| row.len() != inputs_plus_bias) {
            return Err(TrainingError::ShapeMismatch("w must be a non-empty rectangular matrix".to_string()));
        }
        if v.is_empty() || v.iter().any(|row| row.len() != hidden + 1) {
            return Err(TrainingError::ShapeMismatch(format!("every row of v must have {} columns", hidden + 1)));
        }
        Ok(Mlp { v, w })
    }

    pub fn inputs(&self) -> usize {
        self.w.first().map(|row| row.len() - 1).unwrap_or(0)
    }

    fn hidden_out(&self, x: &[f64]) -> Vec<f64> {
        self.w
            .iter()
            .map(|row| sigmoid(row[0] + row[1..].iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>()))
            .collect()
    }

    // softmax 出力
    fn output(&self, z: &[f64]) -> Vec<f64> {
        let o: Vec<f64> = self
            .v
            .iter()
            .map(|row| row[0] + row[1..].iter().zip(z).map(|(vi, zi)| vi * zi).sum::<f64>())
            .collect();
        let max = o.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = o.iter().map(|oi| (oi - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.iter().map(|e| e / total).collect()
    }

    pub fn predict(&self, x: &[f64]) -> usize {
        let y = self.output(&self.hidden_out(x));
        y.iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (idx, &p)| if p > best.1 { (idx, p) } else { best })
            .0
    }

    // 誤分類率 (0.0 - 1.0)
    pub fn error_rate(&self, samples: &[Sample]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let wrong = samples.iter().filter(|s| self.predict(&s.features) != s.label).count();
        wrong as f64 / samples.len() as f64
    }

    fn train_one(&mut self, sample: &Sample, eta: f64) {
        let x = &sample.features;
        let z = self.hidden_out(x);
        let y = self.output(&z);
        let r: Vec<f64> = (0..y.len()).map(|k| if k == sample.label { 1.0 } else { 0.0 }).collect();
        let delta: Vec<f64> = r.iter().zip(&y).map(|(ri, yi)| ri - yi).collect();

        // 更新前の v で隠れ層の誤差を求める
        let hidden_delta: Vec<f64> = (0..z.len())
            .map(|h| {
                let back: f64 = delta.iter().zip(&self.v).map(|(d, row)| d * row[h + 1]).sum();
                back * z[h] * (1.0 - z[h])
            })
            .collect();

        for (row, d) in self.v.iter_mut().zip(&delta) {
            row[0] += eta * d;
            for (vi, zi) in row[1..].iter_mut().zip(&z) {
                *vi += eta * d * zi;
            }
        }
        for (row, hd) in self.w.iter_mut().zip(&hidden_delta) {
            row[0] += eta * hd;
            for (wi, xi) in row[1..].iter_mut().zip(x) {
                *wi += eta * hd * xi;
            }
        }
    }

    // 確率的勾配降下法で学習し、学習データに対する誤分類率を返す
    pub fn train(&mut self, samples: &[Sample], eta: f64, epochs: usize) -> f64 {
        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut rng = rand::thread_rng();
        for _ in 0..epochs {
            order.shuffle(&mut rng);
            for &idx in &order {
                self.train_one(&samples[idx], eta);
            }
        }
        self.error_rate(samples)
    }
}

// a - b を要素ごとに計算する
pub fn matrix_sub(a: &[Vec<f64>], b: &[Vec<f64>]) -> Vec<Vec<f64>> {
    a.iter()
        .zip(b)
        .map(|(ra, rb)| ra.iter().zip(rb).map(|(x, y)| x - y).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_samples() -> Vec<Sample> {
        // two well separated clusters
        let mut samples = Vec::new();
        for i in 0..20 {
            let jitter = (i % 5) as f64 * 0.05;
            samples.push(Sample { label: 0, features: vec![0.1 + jitter, 0.1] });
            samples.push(Sample { label: 1, features: vec![0.9 - jitter, 0.9] });
        }
        samples
    }

    #[test]
    fn parse_letters_and_numeric_labels() {
        let text = "T,2,8,3\nA,1,1,1\n\n3,0,0,0\n";
        let samples = parse_samples(text, 26).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].label, 19);
        assert_eq!(samples[0].features, vec![2.0, 8.0, 3.0]);
        assert_eq!(samples[1].label, 0);
        assert_eq!(samples[2].label, 3);
    }

    #[test]
    fn parse_rejects_ragged_rows_and_bad_labels() {
        assert!(matches!(parse_samples("A,1,2\nB,1\n", 26), Err(TrainingError::Parse { line: 2, .. })));
        assert!(matches!(parse_samples("a?,1,2\n", 26), Err(TrainingError::Parse { line: 1, .. })));
        assert!(matches!(parse_samples("Z,1,2\n", 3), Err(TrainingError::Parse { .. })));
        assert!(matches!(parse_samples("A\n", 26), Err(TrainingError::Parse { .. })));
    }

    #[test]
    fn training_separates_two_clusters() {
        let samples = toy_samples();
        let mut mlp = Mlp::random(2, 4, 2);
        let err = mlp.train(&samples, 0.5, 1000);
        assert!(err < 0.1, "error rate should drop on separable data, got {}", err);
        assert_eq!(mlp.predict(&[0.1, 0.1]), 0);
        assert_eq!(mlp.predict(&[0.9, 0.9]), 1);
    }

    #[test]
    fn from_weights_checks_shapes() {
        let mlp = Mlp::random(3, 2, 4);
        assert_eq!(mlp.inputs(), 3);
        assert!(Mlp::from_weights(mlp.v.clone(), mlp.w.clone()).is_ok());
        assert!(Mlp::from_weights(vec![vec![0.0; 2]], mlp.w.clone()).is_err());
        assert!(Mlp::from_weights(mlp.v.clone(), vec![]).is_err());
    }

    #[test]
    fn matrix_sub_is_elementwise() {
        let a = vec![vec![3.0, 2.0], vec![1.0, 0.0]];
        let b = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        assert_eq!(matrix_sub(&a, &b), vec![vec![2.0, 1.0], vec![0.0, -1.0]]);
    }
}
