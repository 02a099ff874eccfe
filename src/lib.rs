pub mod catalog;
pub mod config;
pub mod errors;
pub mod mocks;
pub mod model;
pub mod render;
pub mod report;
pub mod runner;
pub mod server;
pub mod traits;

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub use catalog::{Catalog, CatalogCache};
pub use config::ModelConfig;
pub use errors::{Result, SegError};
pub use model::OnnxModel;
pub use report::Report;
pub use runner::{ImageRunner, SegmentationResult};
pub use traits::*;

/// File name offered for the rendered result.
pub const RESULT_FILE_NAME: &str = "segmentation_result.png";

/// A finished segmentation, ready for display.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub result: SegmentationResult,
    pub report: Report,
    /// The overlay resized to the configured display size.
    pub display_image: RgbaImage,
}

impl Analysis {
    /// The overlay at the model input size; this is the downloadable result.
    pub fn result_png(&self) -> Result<Vec<u8>> {
        render::encode_png(&self.result.image)
    }

    pub fn display_png(&self) -> Result<Vec<u8>> {
        render::encode_png(&self.display_image)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Owns the model and its configuration; the entry point for every surface.
pub struct Segmenter<M: SegmentationModel> {
    model: M,
    config: ModelConfig,
}

impl<M: SegmentationModel> Segmenter<M> {
    pub fn new(model: M, config: ModelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { model, config })
    }

    pub const fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn segment(&self, image: &RgbImage, threshold: u8) -> Result<Analysis> {
        let result = ImageRunner::new(&self.model, &self.config, threshold)?.process_image(image)?;
        let report = Report::from_result(&result);
        let (width, height) = self.config.display_size();
        let display_image = render::resize_for_display(&result.image, width, height);
        Ok(Analysis {
            result,
            report,
            display_image,
        })
    }

    pub fn segment_file(&self, path: &Path, threshold: u8) -> Result<Analysis> {
        let image = image::open(path).map_err(|e| SegError::ImageProcessing {
            path: path.display().to_string(),
            operation: "open image".to_string(),
            source: Box::new(e),
        })?;
        self.segment(&image.to_rgb8(), threshold)
            .map_err(|e| match e {
                SegError::ImageProcessing { operation, source, .. } => SegError::ImageProcessing {
                    path: path.display().to_string(),
                    operation,
                    source,
                },
                other => other,
            })
    }

    /// Segment every supported image below `input_dir`, mirroring the tree
    /// into `output_dir` as `<stem>.<format>` plus `<stem>.json`.
    ///
    /// Images sharing a stem in one directory (`a.png`, `a.jpg`) keep their
    /// source extension instead: `a.png.<format>`, `a.jpg.<format>`.
    /// Failures are logged and counted; the rest of the batch continues.
    pub fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        format: &str,
        threshold: u8,
    ) -> Result<BatchSummary> {
        if !input_dir.exists() {
            return Err(SegError::FileSystem {
                path: input_dir.to_path_buf(),
                operation: "check input directory".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "input directory does not exist",
                ),
            });
        }
        let output_format = ImageFormat::from_extension(format).ok_or_else(|| {
            SegError::validation("format", format!("`{}` is not an image format", format))
        })?;

        fs::create_dir_all(output_dir).map_err(|e| SegError::FileSystem {
            path: output_dir.to_path_buf(),
            operation: "create output directory".to_string(),
            source: e,
        })?;

        let image_files = plan_outputs(collect_image_files(input_dir), input_dir)?;
        if image_files.is_empty() {
            info!(dir = %input_dir.display(), "no images to process");
            return Ok(BatchSummary::default());
        }

        let pb = ProgressBar::new(image_files.len() as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }

        let failed = image_files
            .par_iter()
            .map(|(input_file, output_base)| {
                let outcome = self.process_single_image(
                    input_file,
                    &output_dir.join(output_base),
                    format,
                    output_format,
                    threshold,
                );
                pb.inc(1);
                match outcome {
                    Ok(()) => 0,
                    Err(e) => {
                        warn!(file = %input_file.display(), error = %e, "segmentation failed");
                        1
                    }
                }
            })
            .sum::<usize>();

        pb.finish_and_clear();
        let summary = BatchSummary {
            processed: image_files.len() - failed,
            failed,
        };
        info!(
            processed = summary.processed,
            failed = summary.failed,
            "batch finished"
        );
        Ok(summary)
    }

    fn process_single_image(
        &self,
        input_file: &Path,
        output_base: &Path,
        extension: &str,
        output_format: ImageFormat,
        threshold: u8,
    ) -> Result<()> {
        let analysis = self.segment_file(input_file, threshold)?;

        let output_file = append_extension(output_base, extension);
        if let Some(parent) = output_file.parent() {
            fs::create_dir_all(parent).map_err(|e| SegError::FileSystem {
                path: parent.to_path_buf(),
                operation: "create output directory".to_string(),
                source: e,
            })?;
        }

        let bytes = render::encode(
            &DynamicImage::ImageRgba8(analysis.result.image),
            output_format,
        )?;
        write_file(&output_file, &bytes)?;

        let json = serde_json::to_vec_pretty(&analysis.report.summary)?;
        write_file(&append_extension(output_base, "json"), &json)
    }
}

impl Segmenter<OnnxModel> {
    pub fn with_onnx_model(config: ModelConfig, device_id: i32) -> Result<Self> {
        config.validate_with_model()?;
        let model = OnnxModel::new(&config, device_id)?;
        Self::new(model, config)
    }
}

pub fn is_supported_image_format(path: &Path) -> bool {
    ImageFormat::from_path(path).is_ok_and(|f| f.reading_enabled())
}

fn collect_image_files(input_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported_image_format(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// Pair every input with its output path relative to the output directory,
/// minus the extension.
fn plan_outputs(image_files: Vec<PathBuf>, input_dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let relatives = image_files
        .iter()
        .map(|f| relative_path(f, input_dir))
        .collect::<Result<Vec<_>>>()?;

    let mut stems: HashMap<PathBuf, usize> = HashMap::new();
    for relative in &relatives {
        *stems.entry(relative.with_extension("")).or_default() += 1;
    }

    Ok(image_files
        .into_iter()
        .zip(relatives)
        .map(|(input, relative)| {
            let stem = relative.with_extension("");
            let base = if stems.get(&stem).is_some_and(|&n| n > 1) {
                warn!(file = %input.display(), "output stem shared with another image, keeping source extension");
                relative
            } else {
                stem
            };
            (input, base)
        })
        .collect())
}

fn append_extension(base: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

pub fn relative_path(input_file: &Path, input_dir: &Path) -> Result<PathBuf> {
    input_file
        .strip_prefix(input_dir)
        .map(Path::to_path_buf)
        .map_err(|_| SegError::FileSystem {
            path: input_file.to_path_buf(),
            operation: "relative path".to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "file is not inside the input directory",
            ),
        })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|e| SegError::FileSystem {
        path: path.to_path_buf(),
        operation: "write output".to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockSegmentationModel;
    use image::Rgb;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn segmenter() -> Segmenter<MockSegmentationModel> {
        let mut config = ModelConfig::new("model.onnx", vec!["background".into(), "shirt".into()]);
        config.input_width = 6;
        config.input_height = 4;
        config.display_width = 3;
        config.display_height = 4;
        config.min_segment_pixels = 2;

        let mut labels = Array2::<u32>::zeros((4, 6));
        labels[[1, 1]] = 1;
        labels[[1, 2]] = 1;
        labels[[2, 2]] = 1;
        Segmenter::new(MockSegmentationModel::with_labels(labels, 2), config).unwrap()
    }

    #[test]
    fn test_supported_formats() {
        for (filename, expected) in [
            ("test.jpg", true),
            ("test.JPEG", true),
            ("test.png", true),
            ("test.webp", true),
            ("test.txt", false),
            ("test", false),
        ] {
            assert_eq!(is_supported_image_format(Path::new(filename)), expected, "{}", filename);
        }
    }

    #[test]
    fn test_relative_path_calculation() -> Result<()> {
        let relative = relative_path(Path::new("input/subdir/test.jpg"), Path::new("input"))?;
        assert_eq!(relative, Path::new("subdir/test.jpg"));
        assert!(relative_path(Path::new("elsewhere/test.jpg"), Path::new("input")).is_err());
        Ok(())
    }

    #[test]
    fn test_segment_produces_display_image() -> Result<()> {
        let analysis = segmenter().segment(&RgbImage::from_pixel(12, 8, Rgb([9, 9, 9])), 50)?;
        assert_eq!(analysis.display_image.dimensions(), (3, 4));
        assert_eq!(analysis.result.class_ids, vec![1]);
        assert_eq!(analysis.report.summary.tags[0].class_name, "shirt");
        assert!(!analysis.display_png()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_process_directory_mirrors_tree() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input_dir = temp_dir.path().join("input");
        let output_dir = temp_dir.path().join("output");
        fs::create_dir_all(input_dir.join("tops"))?;

        RgbImage::from_pixel(6, 4, Rgb([1, 2, 3])).save(input_dir.join("tops/a.png"))?;
        RgbImage::from_pixel(6, 4, Rgb([1, 2, 3])).save(input_dir.join("b.png"))?;
        fs::write(input_dir.join("notes.txt"), "skip me")?;
        fs::write(input_dir.join("broken.png"), "not a png")?;

        let summary = segmenter().process_directory(&input_dir, &output_dir, "png", 75)?;
        assert_eq!(summary, BatchSummary { processed: 2, failed: 1 });

        assert!(output_dir.join("tops/a.png").exists());
        assert!(output_dir.join("b.png").exists());
        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(output_dir.join("tops/a.json"))?)?;
        assert_eq!(json["tags"][0]["class_name"], "shirt");
        Ok(())
    }

    #[test]
    fn test_process_directory_keeps_same_stem_images_apart() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let input_dir = temp_dir.path().join("input");
        let output_dir = temp_dir.path().join("output");
        fs::create_dir_all(&input_dir)?;

        RgbImage::from_pixel(6, 4, Rgb([1, 2, 3])).save(input_dir.join("a.png"))?;
        RgbImage::from_pixel(6, 4, Rgb([4, 5, 6])).save(input_dir.join("a.jpg"))?;
        RgbImage::from_pixel(6, 4, Rgb([7, 8, 9])).save(input_dir.join("b.png"))?;

        let summary = segmenter().process_directory(&input_dir, &output_dir, "png", 75)?;
        assert_eq!(summary, BatchSummary { processed: 3, failed: 0 });

        let mut outputs: Vec<String> = fs::read_dir(&output_dir)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<_>>()?;
        outputs.sort();
        assert_eq!(
            outputs,
            vec!["a.jpg.json", "a.jpg.png", "a.png.json", "a.png.png", "b.json", "b.png"]
        );
        Ok(())
    }

    #[test]
    fn test_append_extension() {
        assert_eq!(append_extension(Path::new("out/a"), "png"), Path::new("out/a.png"));
        assert_eq!(append_extension(Path::new("out/a.jpg"), "json"), Path::new("out/a.jpg.json"));
    }

    #[test]
    fn test_process_directory_missing_input() {
        let result = segmenter().process_directory(
            Path::new("/nonexistent/input"),
            Path::new("/nonexistent/output"),
            "png",
            75,
        );
        assert!(matches!(result, Err(SegError::FileSystem { .. })));
    }
}
