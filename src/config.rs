use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SegError};

pub const DEFAULT_THRESHOLD: u8 = 75;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Model configuration (JSON): model path, class names, input size
    #[arg(short, long, default_value = "segmentation.json", global = true)]
    pub config: PathBuf,

    /// Sample image catalog: {split: {category: [ids]}}
    #[arg(long, default_value = "all_image_files.json", global = true)]
    pub catalog: PathBuf,

    #[arg(short, long, default_value_t = 0, global = true)]
    pub device_id: i32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Serve the demo page over HTTP
    Serve {
        #[arg(short, long, default_value = "127.0.0.1:8501")]
        bind: String,
    },

    /// Segment a single image and print the JSON summary
    Segment {
        input: PathBuf,

        #[arg(short, long, default_value = "segmentation_result.png")]
        output: PathBuf,

        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD, value_parser = check_threshold)]
        threshold: u8,
    },

    /// Segment every image below a directory
    Batch {
        input_dir: PathBuf,

        #[arg(default_value = "output")]
        output_dir: PathBuf,

        #[arg(short, long, default_value = "png", value_parser = check_format)]
        format: String,

        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD, value_parser = check_threshold)]
        threshold: u8,

        #[arg(short, long, default_value_t = 0)]
        num_threads: usize,
    },
}

/// Model and rendering settings, read from a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: PathBuf,

    /// Class names in model output order. Index 0 is background.
    pub all_classes: Vec<String>,

    #[serde(default = "default_input_width")]
    pub input_width: u32,
    #[serde(default = "default_input_height")]
    pub input_height: u32,

    #[serde(default = "default_display_width")]
    pub display_width: u32,
    #[serde(default = "default_display_height")]
    pub display_height: u32,

    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],

    #[serde(default = "default_min_segment_pixels")]
    pub min_segment_pixels: usize,

    #[serde(default = "default_overlay_alpha")]
    pub overlay_alpha: f32,

    #[serde(default = "default_input_name")]
    pub input_name: String,
    #[serde(default = "default_output_name")]
    pub output_name: String,

    #[serde(default)]
    pub samples_dir: Option<PathBuf>,
}

const fn default_input_width() -> u32 {
    362
}

const fn default_input_height() -> u32 {
    562
}

const fn default_display_width() -> u32 {
    336
}

const fn default_display_height() -> u32 {
    562
}

const fn default_mean() -> [f32; 3] {
    [0.485, 0.456, 0.406]
}

const fn default_std() -> [f32; 3] {
    [0.229, 0.224, 0.225]
}

const fn default_min_segment_pixels() -> usize {
    64
}

const fn default_overlay_alpha() -> f32 {
    0.5
}

fn default_input_name() -> String {
    "input".to_string()
}

fn default_output_name() -> String {
    "output".to_string()
}

impl ModelConfig {
    /// Config with defaults for everything except the model path and classes.
    pub fn new(model: impl Into<PathBuf>, all_classes: Vec<String>) -> Self {
        Self {
            model: model.into(),
            all_classes,
            input_width: default_input_width(),
            input_height: default_input_height(),
            display_width: default_display_width(),
            display_height: default_display_height(),
            mean: default_mean(),
            std: default_std(),
            min_segment_pixels: default_min_segment_pixels(),
            overlay_alpha: default_overlay_alpha(),
            input_name: default_input_name(),
            output_name: default_output_name(),
            samples_dir: None,
        }
    }

    /// Read the document and resolve relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| SegError::FileSystem {
            path: path.to_path_buf(),
            operation: "read model config".to_string(),
            source: e,
        })?;
        let mut config: Self =
            serde_json::from_str(&content).map_err(|e| SegError::Configuration {
                message: format!("{}: {}", path.display(), e),
            })?;

        if let Some(base) = path.parent() {
            config.model = resolve(base, &config.model);
            config.samples_dir = config.samples_dir.map(|dir| resolve(base, &dir));
        }

        Ok(config)
    }

    /// Checks everything that does not need the model file itself.
    pub fn validate(&self) -> Result<()> {
        if self.all_classes.len() < 2 {
            return Err(SegError::validation(
                "all_classes",
                "must list background plus at least one class",
            ));
        }
        if self.input_width == 0 || self.input_height == 0 {
            return Err(SegError::validation("input size", "must be non-zero"));
        }
        if self.display_width == 0 || self.display_height == 0 {
            return Err(SegError::validation("display size", "must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.overlay_alpha) {
            return Err(SegError::validation("overlay_alpha", "must be within [0, 1]"));
        }
        if self.std.iter().any(|s| *s <= 0.0) {
            return Err(SegError::validation("std", "must be positive"));
        }
        Ok(())
    }

    /// `validate` plus an existence check on the model artifact.
    pub fn validate_with_model(&self) -> Result<()> {
        self.validate()?;
        if !self.model.exists() {
            return Err(SegError::Configuration {
                message: format!("model file does not exist: {}", self.model.display()),
            });
        }
        Ok(())
    }

    pub fn class_name(&self, class_id: u32) -> Option<&str> {
        self.all_classes.get(class_id as usize).map(String::as_str)
    }

    pub const fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    pub const fn display_size(&self) -> (u32, u32) {
        (self.display_width, self.display_height)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Parses a slider value; the page sends it as text.
pub fn parse_threshold(s: &str) -> Result<u8> {
    let value: i64 = s
        .trim()
        .parse()
        .map_err(|_| SegError::validation("threshold", format!("`{}` is not an integer", s)))?;
    if !(0..=100).contains(&value) {
        return Err(SegError::validation(
            "threshold",
            format!("{} is outside 0..=100", value),
        ));
    }
    Ok(value as u8)
}

fn check_threshold(s: &str) -> std::result::Result<u8, String> {
    parse_threshold(s).map_err(|e| e.to_string())
}

fn check_format(s: &str) -> std::result::Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn classes() -> Vec<String> {
        ["background", "shirt", "pants"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_threshold_parsing() {
        assert_eq!(parse_threshold("75").unwrap(), 75);
        assert_eq!(parse_threshold(" 0 ").unwrap(), 0);
        assert_eq!(parse_threshold("100").unwrap(), 100);
        assert!(parse_threshold("101").is_err());
        assert!(parse_threshold("-1").is_err());
        assert!(parse_threshold("abc").is_err());
    }

    #[test]
    fn test_defaults_match_demo_sizes() {
        let config = ModelConfig::new("model.onnx", classes());
        assert_eq!(config.input_size(), (362, 562));
        assert_eq!(config.display_size(), (336, 562));
        assert_eq!(config.class_name(1), Some("shirt"));
        assert_eq!(config.class_name(9), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ModelConfig::new("model.onnx", vec!["background".to_string()]);
        assert!(matches!(
            config.validate(),
            Err(SegError::Validation { .. })
        ));

        config.all_classes = classes();
        config.overlay_alpha = 1.5;
        assert!(config.validate().is_err());

        config.overlay_alpha = 0.5;
        config.std = [0.2, 0.0, 0.2];
        assert!(config.validate().is_err());

        config.std = default_std();
        assert!(matches!(
            config.validate_with_model(),
            Err(SegError::Configuration { .. })
        ));
    }

    #[test]
    fn test_load_resolves_relative_paths() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("segmentation.json");
        fs::write(
            &path,
            r#"{"model": "weights/model.onnx", "all_classes": ["background", "dress"], "samples_dir": "samples"}"#,
        )?;

        let config = ModelConfig::load(&path)?;
        assert_eq!(config.model, temp_dir.path().join("weights/model.onnx"));
        assert_eq!(config.samples_dir, Some(temp_dir.path().join("samples")));
        assert_eq!(config.min_segment_pixels, 64);
        assert_eq!(config.input_name, "input");
        Ok(())
    }

    #[test]
    fn test_load_rejects_malformed_document() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("segmentation.json");
        fs::write(&path, "{ not json")?;
        assert!(matches!(
            ModelConfig::load(&path),
            Err(SegError::Configuration { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["clothes-seg", "segment", "shirt.jpg", "-t", "40"]);
        match cli.command {
            Command::Segment { threshold, .. } => assert_eq!(threshold, 40),
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from(["clothes-seg", "segment", "shirt.jpg", "-t", "200"]).is_err());
        assert!(Cli::try_parse_from(["clothes-seg", "batch", "in", "--format", "xyz"]).is_err());
    }
}
