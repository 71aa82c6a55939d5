//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: every cell of the stride-8/16/32 feature grids
//! predicts one candidate face. Each stride contributes four tensors:
//! - `cls_{s}`:  [1, H*W, 1]  classification score
//! - `obj_{s}`:  [1, H*W, 1]  objectness score
//! - `bbox_{s}`: [1, H*W, 4]  (dx, dy, log w, log h) in stride units
//! - `kps_{s}`:  [1, H*W, 10] five landmark offsets in stride units
//!
//! Decoding, for the cell at row `r`, column `c`:
//! score = sqrt(clamp(cls) * clamp(obj))
//! cx = (c + dx) * s,  cy = (r + dy) * s
//! w = exp(log w) * s, h = exp(log h) * s
//! landmark_k = ((c + kx) * s, (r + ky) * s)

use anyhow::{bail, Result};

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// A candidate in detector-input pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// One model output tensor, flattened.
#[derive(Debug, Clone)]
pub struct OutputTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

/// The four tensors belonging to one stride.
#[derive(Debug, Clone)]
pub struct StrideLevel {
    pub stride: usize,
    pub cls: Vec<f32>,
    pub obj: Vec<f32>,
    pub bbox: Vec<f32>,
    pub kps: Vec<f32>,
}

impl StrideLevel {
    fn cells(&self) -> usize {
        self.cls.len()
    }
}

/// Group raw model outputs by stride.
///
/// Tensors are looked up by their exported names (`cls_8`, `obj_16`, ...).
/// Models exported without names fall back to positional order:
/// cls x3, obj x3, bbox x3, kps x3.
pub fn parse_outputs(outputs: &[OutputTensor], input_size: usize) -> Result<Vec<StrideLevel>> {
    if outputs.len() < 4 * STRIDES.len() {
        bail!(
            "YuNet produced {} outputs, expected {}",
            outputs.len(),
            4 * STRIDES.len()
        );
    }

    let find = |kind: &str, slot: usize, stride: usize, width: i64| -> Result<Vec<f32>> {
        let name = format!("{kind}_{stride}");
        let tensor = outputs
            .iter()
            .find(|t| t.name == name)
            .unwrap_or(&outputs[slot]);
        let cells = (input_size / stride) * (input_size / stride);

        if tensor.shape.len() != 3 || tensor.shape[0] != 1 || tensor.shape[2] != width {
            bail!(
                "unexpected {} shape {:?}, expected [1, {}, {}]",
                name,
                tensor.shape,
                cells,
                width
            );
        }
        if tensor.shape[1] as usize != cells || tensor.data.len() != cells * width as usize {
            bail!(
                "expected {} cells for {} ({}x{} grid), got {}",
                cells,
                name,
                input_size / stride,
                input_size / stride,
                tensor.shape[1]
            );
        }
        Ok(tensor.data.clone())
    };

    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            Ok(StrideLevel {
                stride,
                cls: find("cls", i, stride, 1)?,
                obj: find("obj", i + 3, stride, 1)?,
                bbox: find("bbox", i + 6, stride, 4)?,
                kps: find("kps", i + 9, stride, 10)?,
            })
        })
        .collect()
}

/// Decode every grid cell whose fused score reaches `score_threshold`.
pub fn decode_detections(
    levels: &[StrideLevel],
    score_threshold: f32,
    input_size: usize,
) -> Vec<RawDetection> {
    let mut detections = Vec::new();

    for level in levels {
        let cols = input_size / level.stride;
        let stride = level.stride as f32;

        for idx in 0..level.cells() {
            let cls = level.cls[idx].clamp(0.0, 1.0);
            let obj = level.obj[idx].clamp(0.0, 1.0);
            let score = (cls * obj).sqrt();
            if score < score_threshold {
                continue;
            }

            let r = (idx / cols) as f32;
            let c = (idx % cols) as f32;
            let b = &level.bbox[idx * 4..idx * 4 + 4];

            let cx = (c + b[0]) * stride;
            let cy = (r + b[1]) * stride;
            let w = b[2].exp() * stride;
            let h = b[3].exp() * stride;

            let k = &level.kps[idx * 10..idx * 10 + 10];
            let mut landmarks = [0.0f32; 10];
            for p in 0..5 {
                landmarks[p * 2] = (c + k[p * 2]) * stride;
                landmarks[p * 2 + 1] = (r + k[p * 2 + 1]) * stride;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    detections
}
