use crate::errors::Result;
use ndarray::prelude::*;

/// A pretrained segmentation network.
///
/// The runner only sees this trait, so the ONNX session and the test mock are
/// interchangeable.
pub trait SegmentationModel: Send + Sync {
    /// Model input size as `(width, height)`.
    fn input_size(&self) -> (u32, u32);

    /// Number of output classes, background included.
    fn num_classes(&self) -> usize;

    /// Per-class logits `[N, C, H, W]` for a normalised `[N, 3, H, W]` batch.
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>>;
}

impl<M: SegmentationModel + ?Sized> SegmentationModel for std::sync::Arc<M> {
    fn input_size(&self) -> (u32, u32) {
        (**self).input_size()
    }

    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        (**self).predict(tensor)
    }
}
