//! YuNet detector post-processing.
//!
//! YuNet is anchor-free. For each stride (8, 16, 32) the network emits four
//! heads over an `(input / stride)^2` grid, in this output order:
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, ..., kps_8, ...`.
//!
//! For grid cell `(row, col)`:
//! - score = sqrt(cls * obj)
//! - cx = (col + dx) * stride, cy = (row + dy) * stride
//! - w = exp(dw) * stride, h = exp(dh) * stride
//! - landmark k = ((col + kx) * stride, (row + ky) * stride)
//!
//! All coordinates here are pixels of the square detector input.

use anyhow::Result;

const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// Validate one head tensor and return its data.
fn head<'a>(
    outputs: &'a [(Vec<i64>, Vec<f32>)],
    index: usize,
    cells: usize,
    width: usize,
) -> Result<&'a [f32]> {
    let Some((shape, data)) = outputs.get(index) else {
        anyhow::bail!("missing detector output {}", index);
    };
    let shape_ok = shape.len() == 3
        && shape[0] == 1
        && shape[1] as usize == cells
        && shape[2] as usize == width;
    if !shape_ok || data.len() != cells * width {
        anyhow::bail!(
            "detector output {} has shape {:?}, expected [1, {}, {}]",
            index,
            shape,
            cells,
            width
        );
    }
    Ok(data)
}

/// Decode the twelve YuNet heads into detections scoring at least `score_threshold`.
pub fn decode(
    outputs: &[(Vec<i64>, Vec<f32>)],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<RawDetection>> {
    let mut detections = Vec::new();

    for (scale, &stride) in STRIDES.iter().enumerate() {
        let side = input_size / stride;
        let cells = side * side;
        let cls = head(outputs, scale, cells, 1)?;
        let obj = head(outputs, scale + 3, cells, 1)?;
        let bbox = head(outputs, scale + 6, cells, 4)?;
        let kps = head(outputs, scale + 9, cells, 10)?;
        let stride = stride as f32;

        for idx in 0..cells {
            let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
            if score < score_threshold {
                continue;
            }

            let row = (idx / side) as f32;
            let col = (idx % side) as f32;
            let b = &bbox[idx * 4..idx * 4 + 4];
            let cx = (col + b[0]) * stride;
            let cy = (row + b[1]) * stride;
            let w = b[2].exp() * stride;
            let h = b[3].exp() * stride;

            let mut landmarks = [0.0f32; 10];
            for (k, lm) in landmarks.iter_mut().enumerate() {
                let cell = if k % 2 == 0 { col } else { row };
                *lm = (cell + kps[idx * 10 + k]) * stride;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_heads(input_size: usize) -> Vec<(Vec<i64>, Vec<f32>)> {
        let mut heads = Vec::new();
        for width in [1usize, 1, 4, 10] {
            for stride in STRIDES {
                let cells = (input_size / stride).pow(2);
                heads.push((
                    vec![1, cells as i64, width as i64],
                    vec![0.0; cells * width],
                ));
            }
        }
        heads
    }

    #[test]
    fn test_decode_single_cell() {
        let input_size = 640;
        let mut heads = empty_heads(input_size);

        // Stride 32 is a 20x20 grid; light up row 10, col 10
        let idx = 10 * 20 + 10;
        heads[2].1[idx] = 0.81; // cls
        heads[5].1[idx] = 1.0; // obj
        let bbox = &mut heads[8].1;
        bbox[idx * 4] = 0.5;
        bbox[idx * 4 + 1] = 0.25;
        bbox[idx * 4 + 2] = 4.0f32.ln();
        bbox[idx * 4 + 3] = 4.0f32.ln();

        let detections = decode(&heads, input_size, 0.5).unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections[0];

        // centre (10.5 * 32, 10.25 * 32) = (336, 328), size 4 * 32 = 128
        assert!((det.score - 0.9).abs() < 1e-5);
        assert!((det.bbox[0] - 272.0).abs() < 1e-3);
        assert!((det.bbox[1] - 264.0).abs() < 1e-3);
        assert!((det.bbox[2] - 128.0).abs() < 1e-3);
        assert!((det.bbox[3] - 128.0).abs() < 1e-3);

        // Zero landmark offsets sit on the cell origin
        assert!((det.landmarks[0] - 320.0).abs() < 1e-3);
        assert!((det.landmarks[1] - 320.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_below_threshold() {
        let mut heads = empty_heads(640);
        heads[0].1[0] = 0.2;
        heads[3].1[0] = 0.2;
        assert!(decode(&heads, 640, 0.5).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let mut heads = empty_heads(640);
        heads[6].0 = vec![1, 6400, 5];
        assert!(decode(&heads, 640, 0.5).is_err());

        let mut heads = empty_heads(640);
        heads.truncate(11);
        assert!(decode(&heads, 640, 0.5).is_err());
    }
}
