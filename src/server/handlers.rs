use std::path::{Component, Path as FsPath, PathBuf};

use axum::extract::{Multipart, Path, Query, State};
use axum::response::{Html, Json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::pages::{self, ResultView, Sidebar};
use super::types::*;
use super::SharedState;
use crate::catalog::DEFAULT_SPLIT;
use crate::config::{parse_threshold, DEFAULT_THRESHOLD};
use crate::errors::SegError;
use crate::{render, Analysis, RESULT_FILE_NAME};

// ============================================================================
// Health Check
// ============================================================================

pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

// ============================================================================
// Pages
// ============================================================================

pub async fn index(
    State(state): State<SharedState>,
    Query(query): Query<IndexQuery>,
) -> Html<String> {
    let catalog = state.catalog();
    let categories = catalog.categories(DEFAULT_SPLIT);
    let selected = query
        .category
        .as_deref()
        .filter(|c| categories.iter().any(|known| known.eq_ignore_ascii_case(c)));
    let samples = selected
        .and_then(|c| catalog.available_images(DEFAULT_SPLIT, c))
        .unwrap_or_default();

    Html(pages::index(&Sidebar {
        categories: &categories,
        selected,
        samples,
        runnable: state.segmenter.config().samples_dir.is_some(),
    }))
}

pub async fn segment_upload(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Html<String>, PageError> {
    let upload = read_upload(multipart).await?;
    let input_base64 = STANDARD.encode(&upload.bytes);
    let image = render::decode(&upload.bytes, &upload.file_name)?;
    let analysis = run_segmentation(&state, image, upload.threshold).await?;

    info!(
        file = %upload.file_name,
        threshold = upload.threshold,
        segments = analysis.result.class_ids.len(),
        "upload segmented"
    );
    Ok(Html(render_result(
        &analysis,
        upload.threshold,
        &upload.mime,
        &input_base64,
    )?))
}

pub async fn api_segment(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<SegmentResponse>, ApiError> {
    let upload = read_upload(multipart).await?;
    let image = render::decode(&upload.bytes, &upload.file_name)?;
    let analysis = run_segmentation(&state, image, upload.threshold).await?;
    let image = ResultImage::png(
        RESULT_FILE_NAME,
        analysis.result.image.dimensions(),
        &analysis.result_png()?,
    );
    let display = ResultImage::png(
        RESULT_FILE_NAME,
        analysis.display_image.dimensions(),
        &analysis.display_png()?,
    );

    let Analysis { report, .. } = analysis;
    Ok(Json(SegmentResponse {
        threshold: upload.threshold,
        summary: report.summary,
        table: report.table,
        chart: report.chart,
        image,
        display,
    }))
}

// ============================================================================
// Sample catalog
// ============================================================================

pub async fn list_samples(
    State(state): State<SharedState>,
    Path(category): Path<String>,
) -> Result<Json<SamplesResponse>, ApiError> {
    let catalog = state.catalog();
    let images = catalog
        .available_images(DEFAULT_SPLIT, &category)
        .ok_or_else(|| ApiError::not_found(format!("unknown category `{}`", category)))?;

    Ok(Json(SamplesResponse {
        split: DEFAULT_SPLIT.to_string(),
        category: category.to_lowercase(),
        images: images.to_vec(),
    }))
}

pub async fn segment_sample(
    State(state): State<SharedState>,
    Path((category, id)): Path<(String, String)>,
    axum::Form(form): axum::Form<ThresholdForm>,
) -> Result<Html<String>, PageError> {
    let threshold = parse_threshold(&form.threshold)?;
    if !state.catalog().contains(DEFAULT_SPLIT, &category, &id) {
        return Err(ApiError::not_found(format!("no sample `{}` in `{}`", id, category)).into());
    }
    let samples_dir = state
        .segmenter
        .config()
        .samples_dir
        .clone()
        .ok_or_else(|| ApiError::not_found("no samples directory configured"))?;
    let path = sample_path(&samples_dir, &id)
        .ok_or_else(|| ApiError::bad_request(format!("invalid sample id `{}`", id)))?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| SegError::FileSystem {
        path: path.clone(),
        operation: "read sample".to_string(),
        source: e,
    })?;
    let image = render::decode(&bytes, &id)?;
    let analysis = run_segmentation(&state, image, threshold).await?;

    info!(sample = %id, threshold, "sample segmented");
    Ok(Html(render_result(
        &analysis,
        threshold,
        mime_for(&path),
        &STANDARD.encode(&bytes),
    )?))
}

/// Join a catalog identifier onto the samples directory, refusing anything
/// that would escape it.
fn sample_path(samples_dir: &FsPath, id: &str) -> Option<PathBuf> {
    let relative = FsPath::new(id);
    if relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Some(samples_dir.join(relative))
    } else {
        None
    }
}

fn mime_for(path: &FsPath) -> &'static str {
    image::ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream")
}

// ============================================================================
// Shared helpers
// ============================================================================

struct Upload {
    file_name: String,
    mime: String,
    bytes: Vec<u8>,
    threshold: u8,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut file = None;
    let mut threshold = DEFAULT_THRESHOLD;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                file = Some((file_name, mime, bytes.to_vec()));
            }
            Some("threshold") => {
                threshold = parse_threshold(&field.text().await?)?;
            }
            other => {
                warn!(field = ?other, "ignoring unexpected form field");
            }
        }
    }

    let (file_name, mime, bytes) =
        file.ok_or_else(|| ApiError::bad_request("missing `image` field"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("uploaded file is empty"));
    }
    Ok(Upload {
        file_name,
        mime,
        bytes,
        threshold,
    })
}

async fn run_segmentation(
    state: &SharedState,
    image: RgbImage,
    threshold: u8,
) -> Result<Analysis, ApiError> {
    let state = SharedState::clone(state);
    tokio::task::spawn_blocking(move || state.segmenter.segment(&image, threshold))
        .await
        .map_err(|e| {
            error!(error = %e, "inference task failed");
            ApiError::internal("inference task failed")
        })?
        .map_err(|e| {
            if !e.is_client_error() {
                error!(error = %e, "segmentation failed");
            }
            ApiError::from(e)
        })
}

fn render_result(
    analysis: &Analysis,
    threshold: u8,
    input_mime: &str,
    input_base64: &str,
) -> Result<String, ApiError> {
    let display_png = analysis.display_png()?;
    let download_png = analysis.result_png()?;
    let summary_json = serde_json::to_string_pretty(&analysis.report.summary)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(pages::result_page(&ResultView {
        threshold,
        input_mime,
        input_base64,
        display_base64: &STANDARD.encode(display_png),
        download_base64: &STANDARD.encode(download_png),
        report: &analysis.report,
        summary_json: &summary_json,
    }))
}
