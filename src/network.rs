//! Small feed-forward classifier variant.
//!
//! Mirrors the production network this service replaces: two hidden ReLU
//! layers (64, 32) with L2 regularization, a sigmoid output, RMSprop on
//! binary cross-entropy. Weights persist in the network's own binary
//! format rather than the generic JSON used for the tree ensemble.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::{PipelineError, Result};

const MAGIC: &[u8; 4] = b"HRNN";
const FORMAT_VERSION: u32 = 1;

const HIDDEN: [usize; 2] = [64, 32];
const LEARNING_RATE: f64 = 1e-3;
const L2_PENALTY: f64 = 1e-2;
const RMS_DECAY: f64 = 0.9;
const RMS_EPS: f64 = 1e-8;
const BATCH_SIZE: usize = 32;
const INIT_SEED: u64 = 42;

/// Training length. The default matches the original 50-epoch schedule;
/// tests stretch it on tiny synthetic tables.
#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    pub epochs: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig { epochs: 50 }
    }
}

/// One dense layer, weights row-major `[out][in]`.
#[derive(Debug, Clone)]
struct Layer {
    inputs: usize,
    outputs: usize,
    weights: Vec<f64>,
    biases: Vec<f64>,
    l2: f64,
}

#[derive(Debug, Clone)]
pub struct NetworkClassifier {
    layers: Vec<Layer>,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Layer {
    fn glorot(inputs: usize, outputs: usize, l2: f64, rng: &mut StdRng) -> Layer {
        let bound = (6.0 / (inputs + outputs) as f64).sqrt();
        Layer {
            inputs,
            outputs,
            weights: (0..inputs * outputs)
                .map(|_| rng.gen_range(-bound..bound))
                .collect(),
            biases: vec![0.0; outputs],
            l2,
        }
    }

    fn forward(&self, input: &[f64], last: bool) -> Vec<f64> {
        (0..self.outputs)
            .map(|j| {
                let mut z = self.biases[j];
                for (i, x) in input.iter().enumerate() {
                    z += self.weights[j * self.inputs + i] * x;
                }
                if last {
                    sigmoid(z)
                } else {
                    z.max(0.0)
                }
            })
            .collect()
    }
}

/// Per-parameter RMSprop accumulators, one entry per layer.
struct RmsState {
    weights: Vec<Vec<f64>>,
    biases: Vec<Vec<f64>>,
}

impl NetworkClassifier {
    /// Fit with the default 50-epoch schedule.
    pub fn fit(x: &DenseMatrix<f64>, y: &[u32]) -> Result<Self> {
        Self::fit_with(x, y, TrainConfig::default())
    }

    pub fn fit_with(x: &DenseMatrix<f64>, y: &[u32], config: TrainConfig) -> Result<Self> {
        let (nrows, ncols) = x.shape();
        if nrows == 0 || y.len() != nrows {
            return Err(PipelineError::Train(format!(
                "feature matrix has {nrows} rows but {} labels",
                y.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(INIT_SEED);
        // The output layer carries no L2 penalty, as in the original net.
        let mut net = NetworkClassifier {
            layers: vec![
                Layer::glorot(ncols, HIDDEN[0], L2_PENALTY, &mut rng),
                Layer::glorot(HIDDEN[0], HIDDEN[1], L2_PENALTY, &mut rng),
                Layer::glorot(HIDDEN[1], 1, 0.0, &mut rng),
            ],
        };
        let mut rms = RmsState {
            weights: net.layers.iter().map(|l| vec![0.0; l.weights.len()]).collect(),
            biases: net.layers.iter().map(|l| vec![0.0; l.biases.len()]).collect(),
        };

        let rows: Vec<Vec<f64>> = (0..nrows)
            .map(|r| (0..ncols).map(|c| *x.get((r, c))).collect())
            .collect();
        let mut order: Vec<usize> = (0..nrows).collect();

        for _epoch in 0..config.epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(BATCH_SIZE) {
                net.train_batch(&rows, y, batch, &mut rms);
            }
        }
        Ok(net)
    }

    /// Accumulate averaged gradients over one minibatch and apply RMSprop.
    fn train_batch(&mut self, rows: &[Vec<f64>], y: &[u32], batch: &[usize], rms: &mut RmsState) {
        let n_layers = self.layers.len();
        let mut grad_w: Vec<Vec<f64>> = self
            .layers
            .iter()
            .map(|l| vec![0.0; l.weights.len()])
            .collect();
        let mut grad_b: Vec<Vec<f64>> = self
            .layers
            .iter()
            .map(|l| vec![0.0; l.biases.len()])
            .collect();

        for &sample in batch {
            // Forward pass, keeping each layer's activations.
            let mut activations: Vec<Vec<f64>> = vec![rows[sample].clone()];
            for (l, layer) in self.layers.iter().enumerate() {
                let out = layer.forward(activations.last().unwrap(), l == n_layers - 1);
                activations.push(out);
            }

            // Binary cross-entropy through the sigmoid: delta = p - y.
            let p = activations[n_layers][0];
            let mut delta = vec![p - y[sample] as f64];

            for l in (0..n_layers).rev() {
                let layer = &self.layers[l];
                let input = &activations[l];
                for j in 0..layer.outputs {
                    for (i, x) in input.iter().enumerate() {
                        grad_w[l][j * layer.inputs + i] += delta[j] * x;
                    }
                    grad_b[l][j] += delta[j];
                }
                if l > 0 {
                    // ReLU derivative: 1 where the activation is positive.
                    delta = (0..layer.inputs)
                        .map(|i| {
                            if input[i] > 0.0 {
                                (0..layer.outputs)
                                    .map(|j| self.layers[l].weights[j * layer.inputs + i] * delta[j])
                                    .sum()
                            } else {
                                0.0
                            }
                        })
                        .collect();
                }
            }
        }

        let scale = 1.0 / batch.len() as f64;
        for l in 0..n_layers {
            let layer = &mut self.layers[l];
            for (k, w) in layer.weights.iter_mut().enumerate() {
                let g = grad_w[l][k] * scale + layer.l2 * *w;
                let cache = &mut rms.weights[l][k];
                *cache = RMS_DECAY * *cache + (1.0 - RMS_DECAY) * g * g;
                *w -= LEARNING_RATE * g / (cache.sqrt() + RMS_EPS);
            }
            for (k, b) in layer.biases.iter_mut().enumerate() {
                let g = grad_b[l][k] * scale;
                let cache = &mut rms.biases[l][k];
                *cache = RMS_DECAY * *cache + (1.0 - RMS_DECAY) * g * g;
                *b -= LEARNING_RATE * g / (cache.sqrt() + RMS_EPS);
            }
        }
    }

    /// Sigmoid output per row.
    pub fn predict_proba(&self, x: &DenseMatrix<f64>) -> Result<Vec<f64>> {
        let (nrows, ncols) = x.shape();
        let expected = self.layers[0].inputs;
        if ncols != expected {
            return Err(PipelineError::Train(format!(
                "network expects {expected} features but got {ncols}"
            )));
        }
        let n_layers = self.layers.len();
        let mut out = Vec::with_capacity(nrows);
        for r in 0..nrows {
            let mut a: Vec<f64> = (0..ncols).map(|c| *x.get((r, c))).collect();
            for (l, layer) in self.layers.iter().enumerate() {
                a = layer.forward(&a, l == n_layers - 1);
            }
            out.push(a[0]);
        }
        Ok(out)
    }

    /// Write the weights in the network's own binary format:
    /// magic, format version, layer count, per-layer shapes, then
    /// little-endian weight and bias values.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_all(MAGIC)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&(self.layers.len() as u32).to_le_bytes())?;
        for layer in &self.layers {
            w.write_all(&(layer.inputs as u32).to_le_bytes())?;
            w.write_all(&(layer.outputs as u32).to_le_bytes())?;
        }
        for layer in &self.layers {
            for v in layer.weights.iter().chain(&layer.biases) {
                w.write_all(&v.to_le_bytes())?;
            }
        }
        w.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = BufReader::new(File::open(path)?);
        let bad = |msg: &str| {
            PipelineError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
        };

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(bad("not a network weight file"));
        }
        if read_u32(&mut r)? != FORMAT_VERSION {
            return Err(bad("unsupported weight format version"));
        }

        let n_layers = read_u32(&mut r)? as usize;
        if n_layers == 0 || n_layers > 16 {
            return Err(bad("implausible layer count"));
        }
        let mut shapes = Vec::with_capacity(n_layers);
        for _ in 0..n_layers {
            let inputs = read_u32(&mut r)? as usize;
            let outputs = read_u32(&mut r)? as usize;
            shapes.push((inputs, outputs));
        }

        let mut layers = Vec::with_capacity(n_layers);
        for (l, (inputs, outputs)) in shapes.into_iter().enumerate() {
            let mut weights = vec![0.0; inputs * outputs];
            for v in weights.iter_mut() {
                *v = read_f64(&mut r)?;
            }
            let mut biases = vec![0.0; outputs];
            for v in biases.iter_mut() {
                *v = read_f64(&mut r)?;
            }
            let l2 = if l + 1 < n_layers { L2_PENALTY } else { 0.0 };
            layers.push(Layer { inputs, outputs, weights, biases, l2 });
        }
        Ok(NetworkClassifier { layers })
    }
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}
