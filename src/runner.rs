use std::collections::BTreeMap;
use std::time::Instant;

use image::{RgbImage, RgbaImage};
use ndarray::prelude::*;
use tracing::debug;

use crate::{
    config::ModelConfig,
    errors::{Result, SegError},
    model::{preprocess, resize_to_input},
    render::overlay_mask,
    traits::SegmentationModel,
};

/// One accepted class segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub class_id: u32,
    pub score: f32,
    pub pixels: usize,
}

/// What a segmentation run hands to the presentation layer.
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    /// Overlay at the model input size.
    pub image: RgbaImage,
    /// Accepted classes, by descending score.
    pub class_ids: Vec<u32>,
    pub class_names: BTreeMap<u32, String>,
    /// Parallel to `class_ids`.
    pub scores: Vec<f32>,
}

impl SegmentationResult {
    pub fn is_empty(&self) -> bool {
        self.class_ids.is_empty()
    }
}

/// Per-pixel arg-max over the class axis of `[1, C, H, W]` logits.
///
/// Returns the label map and the softmax probability of the winning class.
pub fn label_map(logits: ArrayView4<f32>) -> Result<(Array2<u32>, Array2<f32>)> {
    let (batch, classes, height, width) = logits.dim();
    if batch != 1 || classes == 0 {
        return Err(SegError::model(
            "read logits",
            format!("expected [1, C, H, W] with C > 0, got {:?}", logits.shape()),
        ));
    }

    let logits = logits.index_axis(Axis(0), 0);
    let mut labels = Array2::<u32>::zeros((height, width));
    let mut probs = Array2::<f32>::zeros((height, width));

    for y in 0..height {
        for x in 0..width {
            let pixel = logits.slice(s![.., y, x]);
            let (best, max) = pixel
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                    if v > bv {
                        (i, v)
                    } else {
                        (bi, bv)
                    }
                });
            let sum: f32 = pixel.iter().map(|v| (v - max).exp()).sum();
            labels[[y, x]] = best as u32;
            probs[[y, x]] = 1.0 / sum;
        }
    }

    Ok((labels, probs))
}

/// Group pixels by class and keep the segments that pass the threshold.
///
/// Background (class 0) never forms a segment. The result is ordered by
/// descending score, ties broken by class id.
pub fn select_segments(
    labels: ArrayView2<u32>,
    probs: ArrayView2<f32>,
    threshold: u8,
    min_pixels: usize,
) -> Vec<Segment> {
    let mut totals: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for (&label, &prob) in labels.iter().zip(probs.iter()) {
        if label == 0 {
            continue;
        }
        let entry = totals.entry(label).or_insert((0.0, 0));
        entry.0 += f64::from(prob);
        entry.1 += 1;
    }

    let cutoff = f64::from(threshold) / 100.0;
    let mut segments: Vec<Segment> = totals
        .into_iter()
        .filter(|(_, (_, count))| *count > 0 && *count >= min_pixels)
        .filter_map(|(class_id, (sum, count))| {
            let mean = sum / count as f64;
            (mean >= cutoff).then_some(Segment {
                class_id,
                score: mean as f32,
                pixels: count,
            })
        })
        .collect();

    segments.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.class_id.cmp(&b.class_id))
    });
    segments
}

/// Resizes an image, runs the network and renders the predicted mask.
pub struct ImageRunner<'a, M: SegmentationModel + ?Sized> {
    model: &'a M,
    config: &'a ModelConfig,
    threshold: u8,
}

impl<'a, M: SegmentationModel + ?Sized> ImageRunner<'a, M> {
    pub fn new(model: &'a M, config: &'a ModelConfig, threshold: u8) -> Result<Self> {
        if threshold > 100 {
            return Err(SegError::validation(
                "threshold",
                format!("{} is outside 0..=100", threshold),
            ));
        }
        if model.input_size() != config.input_size() {
            return Err(SegError::Configuration {
                message: format!(
                    "model input {:?} differs from configured {:?}",
                    model.input_size(),
                    config.input_size()
                ),
            });
        }
        Ok(Self {
            model,
            config,
            threshold,
        })
    }

    pub fn process_image(&self, image: &RgbImage) -> Result<SegmentationResult> {
        let started = Instant::now();
        let resized = resize_to_input(image, self.config);
        let tensor = preprocess(&resized, self.config);
        let logits = self.model.predict(tensor.view())?;

        let classes = logits.shape().get(1).copied().unwrap_or_default();
        if classes != self.config.all_classes.len() {
            return Err(SegError::model(
                "read logits",
                format!(
                    "model returned {} classes, {} configured",
                    classes,
                    self.config.all_classes.len()
                ),
            ));
        }

        let (labels, probs) = label_map(logits.view())?;
        if labels.dim() != (resized.height() as usize, resized.width() as usize) {
            return Err(SegError::model(
                "read logits",
                format!(
                    "mask is {}x{}, input was {}x{}",
                    labels.dim().1,
                    labels.dim().0,
                    resized.width(),
                    resized.height()
                ),
            ));
        }

        let segments = select_segments(
            labels.view(),
            probs.view(),
            self.threshold,
            self.config.min_segment_pixels,
        );
        let class_ids: Vec<u32> = segments.iter().map(|s| s.class_id).collect();
        let scores: Vec<f32> = segments.iter().map(|s| s.score).collect();
        let class_names = class_ids
            .iter()
            .map(|&id| {
                let name = self
                    .config
                    .class_name(id)
                    .map_or_else(|| format!("class {}", id), str::to_string);
                (id, name)
            })
            .collect();

        let overlay = overlay_mask(
            &resized,
            labels.view(),
            &class_ids,
            self.config.overlay_alpha,
        )?;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            threshold = self.threshold,
            segments = class_ids.len(),
            "image processed"
        );

        Ok(SegmentationResult {
            image: overlay,
            class_ids,
            class_names,
            scores,
        })
    }
}
