use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    config::ModelConfig,
    errors::{Result, SegError},
    traits::SegmentationModel,
};

/// ONNX Runtime session for the clothes segmentation network.
pub struct OnnxModel {
    input_width: u32,
    input_height: u32,
    num_classes: usize,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl OnnxModel {
    pub fn new(config: &ModelConfig, device_id: i32) -> Result<Self> {
        let model_path = &config.model;
        let session = SessionBuilder::new()
            .map_err(|e| SegError::Model {
                operation: "session builder init".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| SegError::Model {
                operation: "execution provider setup".to_string(),
                source: Box::new(e),
            })?
            .with_memory_pattern(true)
            .map_err(|e| SegError::Model {
                operation: "memory pattern setup".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(model_path)
            .map_err(|e| SegError::Model {
                operation: format!("load model file: {}", model_path.display()),
                source: Box::new(e),
            })?;

        let inputs: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
        let outputs: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        for (name, names) in [(&config.input_name, &inputs), (&config.output_name, &outputs)] {
            if !names.contains(&name.as_str()) {
                return Err(SegError::model(
                    "tensor name lookup",
                    format!("model has no tensor named `{}` (found {:?})", name, names),
                ));
            }
        }

        let model = Self {
            input_width: config.input_width,
            input_height: config.input_height,
            num_classes: config.all_classes.len(),
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            session: Mutex::new(session),
        };

        // warm up, and catch a class list that disagrees with the network
        let data = Array4::<f32>::zeros((
            1,
            3,
            config.input_height as usize,
            config.input_width as usize,
        ));
        let logits = model.predict(data.view())?;
        if logits.shape()[1] != model.num_classes {
            return Err(SegError::Configuration {
                message: format!(
                    "model outputs {} classes but all_classes lists {}",
                    logits.shape()[1],
                    model.num_classes
                ),
            });
        }

        info!(
            model = %model_path.display(),
            classes = model.num_classes,
            width = model.input_width,
            height = model.input_height,
            "model loaded"
        );
        Ok(model)
    }
}

impl SegmentationModel for OnnxModel {
    fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        let logits = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        debug!(shape = ?logits.shape(), "inference done");
        Ok(logits)
    }
}

/// Resize to the model input size, channel-first, scaled to `[0, 1]` and
/// normalised per channel.
pub fn preprocess(image: &RgbImage, config: &ModelConfig) -> Array4<f32> {
    let resized = resize_to_input(image, config);
    let mut tensor = resized
        .as_ndarray3()
        .mapv(|v| f32::from(v) / 255.0)
        .insert_axis(Axis(0));

    for (c, mut channel) in tensor.axis_iter_mut(Axis(1)).enumerate() {
        let (mean, std) = (config.mean[c], config.std[c]);
        channel.mapv_inplace(|v| (v - mean) / std);
    }
    tensor
}

/// Area-style downsampling to the model input size; the overlay is drawn on
/// this same image so mask and pixels line up.
pub fn resize_to_input(image: &RgbImage, config: &ModelConfig) -> RgbImage {
    let (width, height) = config.input_size();
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}
