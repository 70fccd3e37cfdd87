//! Face detection capability and the SCRFD implementation via ONNX Runtime.

use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::types::{FaceBox, ScoutError, ScoutResult};

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Default model filename under the models directory.
pub const DEFAULT_MODEL_FILENAME: &str = "scrfd_2.5g.onnx";

/// Detect faces in encoded image bytes.
///
/// Returned boxes are in source-image pixel coordinates, strongest first.
/// An image with no faces yields an empty list, not an error.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image_bytes: &[u8]) -> ScoutResult<Vec<FaceBox>>;
}

/// Output tensor indices for one stride: (score, bbox).
type StrideOutputIndices = (usize, usize);

/// Letterbox mapping from model input space back to the source image.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Detection in source-image float coordinates before rounding.
#[derive(Debug, Clone, Copy)]
struct RawDetection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

/// SCRFD face detector.
pub struct ScrfdDetector {
    session: Mutex<Session>,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model. Fails with `ModelNotAvailable` when the
    /// file is missing so callers can keep crawling without detection.
    pub fn load(model_path: &Path) -> ScoutResult<Self> {
        if !model_path.exists() {
            return Err(ScoutError::ModelNotAvailable(format!(
                "no SCRFD model at {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(2))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| ScoutError::Detection(format!("Failed to load ONNX model: {e}")))?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if output_names.len() < 6 {
            return Err(ScoutError::Detection(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_indices,
            "loaded SCRFD model"
        );

        Ok(Self {
            session: Mutex::new(session),
            stride_indices,
        })
    }

    fn preprocess(&self, img: &image::DynamicImage) -> (Array4<f32>, Letterbox) {
        let (width, height) = (img.width().max(1), img.height().max(1));
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32)
            .min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let pad_x = (SCRFD_INPUT_SIZE - new_w) / 2;
        let pad_y = (SCRFD_INPUT_SIZE - new_h) / 2;

        let resized = image::imageops::resize(&img.to_rgb8(), new_w, new_h, FilterType::Triangle);

        let size = SCRFD_INPUT_SIZE as usize;
        // Padding stays at zero, which is the normalized mean.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
            for c in 0..3usize {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        let letterbox = Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        };
        (tensor, letterbox)
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&self, image_bytes: &[u8]) -> ScoutResult<Vec<FaceBox>> {
        let img = image::load_from_memory(image_bytes)?;
        let (input, letterbox) = self.preprocess(&img);

        let input_tensor = Tensor::from_array(input)
            .map_err(|e| ScoutError::Detection(format!("Failed to create input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ScoutError::Detection("detector session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ScoutError::Detection(format!("ONNX inference failed: {e}")))?;

        let mut detections = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[pos];
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                ScoutError::Detection(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                ScoutError::Detection(format!("bboxes stride {stride}: {e}"))
            })?;
            detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let kept = nms(detections, SCRFD_NMS_THRESHOLD);
        Ok(to_face_boxes(&kept, img.width(), img.height()))
    }
}

/// Map output names to stride slots.
///
/// Named exports (`score_8`, `bbox_8`, ...) are matched by name; anything
/// else falls back to the standard positional layout of scores 0-2 then
/// bboxes 3-5.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Decode one stride level into source-image coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<RawDetection> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * s;
        let cy = (cell / grid) as f32 * s;

        let unmap_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
        let unmap_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;

        detections.push(RawDetection {
            x1: unmap_x(cx - bboxes[off] * s),
            y1: unmap_y(cy - bboxes[off + 1] * s),
            x2: unmap_x(cx + bboxes[off + 2] * s),
            y2: unmap_y(cy + bboxes[off + 3] * s),
            confidence: score,
        });
    }
    detections
}

/// Non-maximum suppression. Output is sorted by confidence, highest first.
fn nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Round to integer pixels inside the image; degenerate boxes are dropped.
fn to_face_boxes(detections: &[RawDetection], width: u32, height: u32) -> Vec<FaceBox> {
    detections
        .iter()
        .filter_map(|d| {
            let x1 = d.x1.round().clamp(0.0, width as f32) as i32;
            let y1 = d.y1.round().clamp(0.0, height as f32) as i32;
            let x2 = d.x2.round().clamp(0.0, width as f32) as i32;
            let y2 = d.y2.round().clamp(0.0, height as f32) as i32;
            FaceBox::new(x1, y1, (x2 - x1).max(0) as u32, (y2 - y1).max(0) as u32).ok()
        })
        .collect()
}
