use crate::errors::{Result, SegError};
use crate::traits::SegmentationModel;
use ndarray::prelude::*;

/// Logit given to the labelled class of each pixel; every other class gets 0.
pub const MOCK_LOGIT: f32 = 4.0;

/// Test model that "predicts" a fixed label map.
#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    labels: Array2<u32>,
    num_classes: usize,
}

impl MockSegmentationModel {
    /// `labels` is `[height, width]`; its size becomes the model input size.
    pub fn with_labels(labels: Array2<u32>, num_classes: usize) -> Self {
        Self {
            labels,
            num_classes,
        }
    }

    /// Everything is background.
    pub fn blank(width: u32, height: u32, num_classes: usize) -> Self {
        Self::with_labels(
            Array2::zeros((height as usize, width as usize)),
            num_classes,
        )
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn input_size(&self) -> (u32, u32) {
        let (height, width) = self.labels.dim();
        (width as u32, height as u32)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch, _, height, width) = tensor.dim();
        if (height, width) != self.labels.dim() {
            return Err(SegError::model(
                "mock predict",
                format!("input {}x{} does not match label map", width, height),
            ));
        }

        let mut logits = Array4::<f32>::zeros((batch, self.num_classes, height, width));
        for n in 0..batch {
            for ((y, x), &label) in self.labels.indexed_iter() {
                if (label as usize) < self.num_classes {
                    logits[[n, label as usize, y, x]] = MOCK_LOGIT;
                }
            }
        }
        Ok(logits)
    }
}
