use crate::yunet;
use anyhow::{Context, Result};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// Input edge length of the YuNet detector.
pub const DETECTOR_INPUT: u32 = 640;
/// Input edge length of the SFace encoder.
pub const ENCODER_INPUT: u32 = 112;

/// Face location in pixel coordinates, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// Builds a box from an `[x, y, w, h]` float rectangle.
    pub fn from_xywh(bbox: [f32; 4]) -> Self {
        let [x, y, w, h] = bbox;
        Self {
            top: y.round() as i32,
            right: (x + w).round() as i32,
            bottom: (y + h).round() as i32,
            left: x.round() as i32,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Multiplies every edge by `factor`, rounding to the nearest pixel.
    pub fn scaled(&self, factor: f32) -> Self {
        let s = |v: i32| (v as f32 * factor).round() as i32;
        Self {
            top: s(self.top),
            right: s(self.right),
            bottom: s(self.bottom),
            left: s(self.left),
        }
    }
}

/// Detection result from YuNet, in source image pixels.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

impl Detection {
    pub fn face_box(&self) -> FaceBox {
        FaceBox::from_xywh(self.bbox)
    }
}

/// Fixed-length face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }

    /// Euclidean distance. Embeddings of different lengths are infinitely far apart.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.len() != other.len() {
            return f32::INFINITY;
        }
        self.vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Distance from `probe` to each known embedding, index-aligned with `known`.
pub fn face_distance<'a, I>(known: I, probe: &Embedding) -> Vec<f32>
where
    I: IntoIterator<Item = &'a Embedding>,
{
    known.into_iter().map(|k| k.distance(probe)).collect()
}

/// Packs interleaved 3-channel pixels into planar CHW floats, keeping channel order.
fn to_planar(img: &RgbImage) -> Vec<f32> {
    let pixel_count = (img.width() * img.height()) as usize;
    let mut planar = vec![0.0f32; 3 * pixel_count];
    for (i, px) in img.pixels().enumerate() {
        planar[i] = px[0] as f32;
        planar[pixel_count + i] = px[1] as f32;
        planar[2 * pixel_count + i] = px[2] as f32;
    }
    planar
}

/// Detect faces with YuNet. `img` must already be in the detector's channel order (BGR).
///
/// Detections come back sorted by descending score.
pub fn detect_faces(
    session: &mut Session,
    img: &RgbImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (orig_width, orig_height) = img.dimensions();
    if orig_width == 0 || orig_height == 0 {
        anyhow::bail!("cannot detect faces in an empty image");
    }

    // Letterbox onto a square canvas to avoid distortion
    let max_dim = orig_width.max(orig_height);
    let scale = DETECTOR_INPUT as f32 / max_dim as f32;
    let new_width = ((orig_width as f32 * scale) as u32).clamp(1, DETECTOR_INPUT);
    let new_height = ((orig_height as f32 * scale) as u32).clamp(1, DETECTOR_INPUT);
    let resized = imageops::resize(img, new_width, new_height, FilterType::Triangle);

    let mut canvas = RgbImage::new(DETECTOR_INPUT, DETECTOR_INPUT);
    let offset_x = (DETECTOR_INPUT - new_width) / 2;
    let offset_y = (DETECTOR_INPUT - new_height) / 2;
    imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    let side = DETECTOR_INPUT as usize;
    let input = Array4::from_shape_vec((1, 3, side, side), to_planar(&canvas))?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;

    let mut heads: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        heads.push((shape.iter().copied().collect(), data.to_vec()));
    }

    let raw = yunet::decode(&heads, side, score_threshold).context("decoding detector output")?;

    // Undo the letterbox
    let unpad = |v: f32, offset: u32| (v - offset as f32) / scale;
    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for (i, lm) in landmarks.iter_mut().enumerate() {
                let offset = if i % 2 == 0 { offset_x } else { offset_y };
                *lm = unpad(d.landmarks[i], offset);
            }
            Detection {
                bbox: [
                    unpad(d.bbox[0], offset_x),
                    unpad(d.bbox[1], offset_y),
                    d.bbox[2] / scale,
                    d.bbox[3] / scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    Ok(nms(&detections, nms_threshold))
}

/// Non-maximum suppression. The result is sorted by descending score.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        let overlaps = keep
            .iter()
            .any(|kept| compute_iou(&kept.bbox, &candidate.bbox) > iou_threshold);
        if !overlaps {
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
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Align a face to the SFace reference eye positions using a similarity transform.
pub fn align_face(img: &RgbImage, landmarks: &[f32; 10], size: u32) -> RgbImage {
    // ArcFace reference eyes for a 112x112 crop
    const REF_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
    const REF_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

    let unit = size as f32 / ENCODER_INPUT as f32;
    let left_eye = (landmarks[0], landmarks[1]);
    let right_eye = (landmarks[2], landmarks[3]);

    let dx = right_eye.0 - left_eye.0;
    let dy = right_eye.1 - left_eye.1;
    let eye_dist = (dx * dx + dy * dy).sqrt();
    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    if eye_dist <= f32::EPSILON {
        return RgbImage::new(size, size);
    }

    let scale = unit * ref_dist / eye_dist;
    let (sin, cos) = dy.atan2(dx).sin_cos();

    // Forward transform: out = R * in + t, with R = scale * [cos sin; -sin cos]
    let a = scale * cos;
    let b = scale * sin;
    let c = -scale * sin;
    let d = scale * cos;

    let center = ((left_eye.0 + right_eye.0) / 2.0, (left_eye.1 + right_eye.1) / 2.0);
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
    );
    let tx = ref_center.0 - (a * center.0 + b * center.1);
    let ty = ref_center.1 - (c * center.0 + d * center.1);
    let det = a * d - b * c;

    let (img_w, img_h) = img.dimensions();
    let mut output = RgbImage::new(size, size);
    for (out_x, out_y, px) in output.enumerate_pixels_mut() {
        let ox = out_x as f32 - tx;
        let oy = out_y as f32 - ty;
        let in_x = (d * ox - b * oy) / det;
        let in_y = (-c * ox + a * oy) / det;
        if in_x < 0.0 || in_y < 0.0 || in_x >= img_w as f32 || in_y >= img_h as f32 {
            continue;
        }
        *px = bilinear(img, in_x, in_y);
    }
    output
}

fn bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let corners = [
        (img.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (img.get_pixel(x1, y0), fx * (1.0 - fy)),
        (img.get_pixel(x0, y1), (1.0 - fx) * fy),
        (img.get_pixel(x1, y1), fx * fy),
    ];
    let mut out = [0u8; 3];
    for (ch, value) in out.iter_mut().enumerate() {
        let v: f32 = corners.iter().map(|(p, w)| p[ch] as f32 * w).sum();
        *value = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Crop a box out of the image and resize it to `size`. Used when no landmarks are known.
pub fn crop_face(img: &RgbImage, face: &FaceBox, size: u32) -> Result<RgbImage> {
    let (w, h) = img.dimensions();
    let left = face.left.clamp(0, w as i32) as u32;
    let top = face.top.clamp(0, h as i32) as u32;
    let right = face.right.clamp(0, w as i32) as u32;
    let bottom = face.bottom.clamp(0, h as i32) as u32;
    if right <= left || bottom <= top {
        anyhow::bail!("face box {:?} lies outside the {}x{} image", face, w, h);
    }
    let crop = imageops::crop_imm(img, left, top, right - left, bottom - top).to_image();
    Ok(imageops::resize(&crop, size, size, FilterType::Triangle))
}

/// Encode an aligned face crop with SFace. Pixels must be in the encoder's channel order (BGR).
pub fn encode_face(session: &mut Session, face_img: &RgbImage) -> Result<Embedding> {
    let face = if face_img.dimensions() == (ENCODER_INPUT, ENCODER_INPUT) {
        face_img.clone()
    } else {
        imageops::resize(face_img, ENCODER_INPUT, ENCODER_INPUT, FilterType::Triangle)
    };

    let side = ENCODER_INPUT as usize;
    let input = Array4::from_shape_vec((1, 3, side, side), to_planar(&face))?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let embedding_size = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    let mut values = data[..embedding_size].to_vec();

    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|x| *x /= norm);
    }

    Ok(Embedding::new(values))
}
