use crate::codec::Image;
use crate::embedding::Embedding;
use crate::yunet::{self, OutputTensor};
use anyhow::{Context, Result};
use image::{imageops, Rgb, RgbImage};
use ndarray::{Array4, ArrayViewMut3};
use ort::{session::Session, value::Value};

/// YuNet runs on a fixed 640x640 letterboxed canvas.
pub const DETECTOR_INPUT_SIZE: u32 = 640;

/// SFace (ArcFace layout) consumes 112x112 aligned crops.
pub const FACE_SIZE: u32 = 112;

/// Canonical landmark positions in a 112x112 ArcFace crop:
/// left eye, right eye, nose tip, left mouth corner, right mouth corner.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Detection result in source-image pixel coordinates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// A detected face, aligned and cropped for the recognizer.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    pub detection: Detection,
    pub crop: RgbImage,
}

/// Where the source image sits inside the square detector canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let max_dim = width.max(height).max(1);
        let scale = target as f32 / max_dim as f32;
        let new_w = ((width as f32 * scale) as u32).min(target);
        let new_h = ((height as f32 * scale) as u32).min(target);
        Self {
            scale,
            offset_x: (target - new_w) / 2,
            offset_y: (target - new_h) / 2,
        }
    }

    /// Map a canvas point back to the source image.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Resize preserving aspect ratio and pad onto a black square canvas.
pub fn letterbox(img: &Image, target: u32) -> (RgbImage, Letterbox) {
    let (w, h) = img.dimensions();
    let lb = Letterbox::fit(w, h, target);
    let new_w = ((w as f32 * lb.scale) as u32).clamp(1, target);
    let new_h = ((h as f32 * lb.scale) as u32).clamp(1, target);
    let resized = imageops::resize(img, new_w, new_h, imageops::FilterType::Triangle);

    let mut canvas = RgbImage::new(target, target);
    imageops::overlay(&mut canvas, &resized, lb.offset_x as i64, lb.offset_y as i64);
    (canvas, lb)
}

/// Write an RGB image into a CHW plane set in BGR order, values in [0, 255].
///
/// Both YuNet and SFace were trained on OpenCV `blobFromImage` output.
pub fn write_bgr_planes(img: &RgbImage, mut out: ArrayViewMut3<f32>) {
    for (x, y, px) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        out[[0, y, x]] = px[2] as f32;
        out[[1, y, x]] = px[1] as f32;
        out[[2, y, x]] = px[0] as f32;
    }
}

/// Detect faces in an image using the YuNet detector
pub fn detect_faces(
    session: &mut Session,
    img: &Image,
    score_threshold: f32,
    nms_threshold: f32,
    top_k: usize,
) -> Result<Vec<Detection>> {
    let size = DETECTOR_INPUT_SIZE as usize;
    let (canvas, lb) = letterbox(img, DETECTOR_INPUT_SIZE);

    let mut input = Array4::<f32>::zeros((1, 3, size, size));
    write_bgr_planes(&canvas, input.index_axis_mut(ndarray::Axis(0), 0));
    let input_tensor = Value::from_array(input)?;

    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut tensors = Vec::new();
    for (name, output) in outputs.iter() {
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .with_context(|| format!("reading detector output {name}"))?;
        tensors.push(OutputTensor {
            name: name.to_string(),
            shape: shape.iter().copied().collect(),
            data: data.to_vec(),
        });
    }

    let levels = yunet::parse_outputs(&tensors, size)?;
    let mut raw = yunet::decode_detections(&levels, score_threshold, size);
    raw.sort_by(|a, b| b.score.total_cmp(&a.score));
    raw.truncate(top_k);

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let (x, y) = lb.unmap(d.bbox[0], d.bbox[1]);
            let mut landmarks = [0.0f32; 10];
            for i in 0..5 {
                let (lx, ly) = lb.unmap(d.landmarks[i * 2], d.landmarks[i * 2 + 1]);
                landmarks[i * 2] = lx;
                landmarks[i * 2 + 1] = ly;
            }
            Detection {
                bbox: [x, y, d.bbox[2] / lb.scale, d.bbox[3] / lb.scale],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    log::debug!(
        "detector: {} face(s) in {}x{} image",
        detections.len(),
        img.width(),
        img.height()
    );

    Ok(nms(&detections, nms_threshold))
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|k| compute_iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Least-squares similarity transform (rotation, uniform scale, translation)
/// mapping `src` points onto `dst`. Returns `[a, b, tx, ty]` such that
/// `u = a*x - b*y + tx`, `v = b*x + a*y + ty`.
fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 4] {
    let n = src.len() as f32;
    let (sx, sy) = src.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    let (dx, dy) = dst.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    let (sx, sy, dx, dy) = (sx / n, sy / n, dx / n, dy / n);

    let mut num_a = 0.0;
    let mut num_b = 0.0;
    let mut den = 0.0;
    for (s, d) in src.iter().zip(dst.iter()) {
        let (x, y) = (s.0 - sx, s.1 - sy);
        let (u, v) = (d.0 - dx, d.1 - dy);
        num_a += x * u + y * v;
        num_b += x * v - y * u;
        den += x * x + y * y;
    }

    let (a, b) = if den > f32::EPSILON {
        (num_a / den, num_b / den)
    } else {
        (1.0, 0.0)
    };
    let tx = dx - (a * sx - b * sy);
    let ty = dy - (b * sx + a * sy);
    [a, b, tx, ty]
}

fn sample_bilinear(img: &Image, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        *slot = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Warp the face so its five landmarks land on the canonical ArcFace template.
///
/// Pixels that fall outside the source image are left black.
pub fn align_face(img: &Image, detection: &Detection, size: u32) -> RgbImage {
    let ratio = size as f32 / FACE_SIZE as f32;
    let mut src = [(0.0f32, 0.0f32); 5];
    let mut dst = [(0.0f32, 0.0f32); 5];
    for i in 0..5 {
        src[i] = (detection.landmarks[i * 2], detection.landmarks[i * 2 + 1]);
        dst[i] = (
            REFERENCE_LANDMARKS[i].0 * ratio,
            REFERENCE_LANDMARKS[i].1 * ratio,
        );
    }

    let [a, b, tx, ty] = similarity_transform(&src, &dst);
    // Inverse of [a -b; b a]
    let det = a * a + b * b;

    let mut output = RgbImage::new(size, size);
    if det <= f32::EPSILON {
        return output;
    }
    for (ox, oy, px) in output.enumerate_pixels_mut() {
        let u = ox as f32 - tx;
        let v = oy as f32 - ty;
        let x = (a * u + b * v) / det;
        let y = (-b * u + a * v) / det;
        if let Some(sample) = sample_bilinear(img, x, y) {
            *px = sample;
        }
    }
    output
}

/// Encode a batch of aligned crops with SFace in a single forward pass.
///
/// Output vectors are L2-normalised when their norm is non-zero; zero vectors
/// are passed through untouched so callers can reject them.
pub fn encode_faces(session: &mut Session, crops: &[RgbImage]) -> Result<Vec<Embedding>> {
    if crops.is_empty() {
        return Ok(Vec::new());
    }

    let size = FACE_SIZE as usize;
    let mut input = Array4::<f32>::zeros((crops.len(), 3, size, size));
    for (i, crop) in crops.iter().enumerate() {
        let crop = if crop.dimensions() == (FACE_SIZE, FACE_SIZE) {
            std::borrow::Cow::Borrowed(crop)
        } else {
            std::borrow::Cow::Owned(imageops::resize(
                crop,
                FACE_SIZE,
                FACE_SIZE,
                imageops::FilterType::Triangle,
            ))
        };
        write_bgr_planes(&crop, input.index_axis_mut(ndarray::Axis(0), i));
    }
    let input_tensor = Value::from_array(input)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let batch = crops.len();
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len() / batch
    };
    anyhow::ensure!(
        dim > 0 && data.len() >= batch * dim,
        "recognizer output {:?} does not hold {} embeddings",
        shape,
        batch
    );

    Ok(data
        .chunks_exact(dim)
        .take(batch)
        .map(|chunk| {
            let e = Embedding::from_vec(chunk.to_vec());
            e.normalized().unwrap_or(e)
        })
        .collect())
}
