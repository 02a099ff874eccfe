use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clothes_seg_rs::config::{Cli, Command};
use clothes_seg_rs::server::{self, AppState};
use clothes_seg_rs::catalog::DEFAULT_SPLIT;
use clothes_seg_rs::{render, ModelConfig, OnnxModel, SegmentationModel, Segmenter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ModelConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;
    config.validate_with_model()?;

    match cli.command {
        Command::Serve { bind } => {
            let model = OnnxModel::new(&config, cli.device_id)?;
            let model: Arc<dyn SegmentationModel> = Arc::new(model);
            let state = Arc::new(AppState::new(Segmenter::new(model, config)?, cli.catalog));
            info!(
                categories = state.catalog().categories(DEFAULT_SPLIT).len(),
                "sample catalog ready"
            );
            server::serve(state, &bind).await
        }
        Command::Segment {
            input,
            output,
            threshold,
        } => {
            let segmenter = Segmenter::with_onnx_model(config, cli.device_id)?;
            let analysis = tokio::task::block_in_place(|| segmenter.segment_file(&input, threshold))?;

            let png = render::encode_png(&analysis.result.image)?;
            fs::write(&output, png)
                .with_context(|| format!("Failed to save image: {}", output.display()))?;
            info!(output = %output.display(), "result image written");

            println!("{}", serde_json::to_string_pretty(&analysis.report.summary)?);
            Ok(())
        }
        Command::Batch {
            input_dir,
            output_dir,
            format,
            threshold,
            num_threads,
        } => {
            if num_threads > 0 {
                ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build_global()?;
            }
            let segmenter = Segmenter::with_onnx_model(config, cli.device_id)?;
            let summary = tokio::task::block_in_place(|| {
                segmenter.process_directory(&input_dir, &output_dir, &format, threshold)
            })?;
            println!(
                "{} images segmented, {} failed",
                summary.processed, summary.failed
            );
            Ok(())
        }
    }
}
