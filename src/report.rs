//! Display-side reshaping of a segmentation result: score table, bar chart
//! and JSON tag summary.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::runner::SegmentationResult;

pub const TABLE_COLUMNS: [&str; 2] = ["Class Name", "Score"];

/// `0.8725` -> `"87.25%"`.
pub fn format_percent(score: f32) -> String {
    format!("{:.2}%", score * 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub class_name: String,
    pub score: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreTable {
    pub columns: [String; 2],
    pub rows: Vec<ScoreRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarChart {
    pub x: Vec<String>,
    pub y: Vec<f32>,
    pub xaxis_title: String,
    pub yaxis_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub class_name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSummary {
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub table: ScoreTable,
    pub chart: BarChart,
    pub summary: TagSummary,
}

impl Report {
    pub fn from_result(result: &SegmentationResult) -> Self {
        let names = class_names(result);

        let rows = names
            .iter()
            .zip(&result.scores)
            .map(|(name, score)| ScoreRow {
                class_name: name.clone(),
                score: format_percent(*score),
            })
            .collect();

        let tags = names
            .iter()
            .zip(&result.scores)
            .map(|(name, score)| Tag {
                class_name: name.clone(),
                confidence: *score,
            })
            .collect();

        Self {
            table: ScoreTable {
                columns: TABLE_COLUMNS.map(String::from),
                rows,
            },
            chart: BarChart {
                x: names,
                y: result.scores.clone(),
                xaxis_title: "Class".to_string(),
                yaxis_title: "Score".to_string(),
            },
            summary: TagSummary { tags },
        }
    }
}

/// Names in `class_ids` order, so every view lines up with `scores`.
fn class_names(result: &SegmentationResult) -> Vec<String> {
    result
        .class_ids
        .iter()
        .map(|id| {
            result
                .class_names
                .get(id)
                .cloned()
                .unwrap_or_else(|| format!("class {}", id))
        })
        .collect()
}

const CHART_WIDTH: f32 = 640.0;
const CHART_HEIGHT: f32 = 360.0;
const MARGIN_LEFT: f32 = 56.0;
const MARGIN_RIGHT: f32 = 16.0;
const MARGIN_TOP: f32 = 16.0;
const MARGIN_BOTTOM: f32 = 72.0;

impl BarChart {
    /// Inline SVG rendering. The y axis spans `[0, 1]`.
    pub fn to_svg(&self) -> String {
        let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
        let baseline = MARGIN_TOP + plot_height;

        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}" font-family="sans-serif" font-size="12">"#,
            w = CHART_WIDTH,
            h = CHART_HEIGHT
        );

        for tick in 0..=5 {
            let value = tick as f32 / 5.0;
            let y = baseline - value * plot_height;
            let _ = write!(
                svg,
                r##"<line x1="{x1}" y1="{y:.1}" x2="{x2}" y2="{y:.1}" stroke="#e5e5e5"/><text x="{tx}" y="{ty:.1}" text-anchor="end">{value:.1}</text>"##,
                x1 = MARGIN_LEFT,
                x2 = MARGIN_LEFT + plot_width,
                tx = MARGIN_LEFT - 6.0,
                ty = y + 4.0,
            );
        }

        if !self.x.is_empty() {
            let slot = plot_width / self.x.len() as f32;
            let bar_width = slot * 0.7;
            for (i, (name, score)) in self.x.iter().zip(&self.y).enumerate() {
                let height = score.clamp(0.0, 1.0) * plot_height;
                let x = MARGIN_LEFT + slot * i as f32 + (slot - bar_width) / 2.0;
                let _ = write!(
                    svg,
                    r##"<rect x="{x:.1}" y="{y:.1}" width="{bar_width:.1}" height="{height:.1}" fill="#636efa"><title>{name}: {score:.4}</title></rect><text x="{cx:.1}" y="{ly:.1}" text-anchor="middle">{name}</text>"##,
                    y = baseline - height,
                    name = escape_html(name),
                    cx = x + bar_width / 2.0,
                    ly = baseline + 16.0,
                );
            }
        }

        let _ = write!(
            svg,
            r##"<line x1="{x1}" y1="{b}" x2="{x2}" y2="{b}" stroke="#444"/><text x="{cx}" y="{xt}" text-anchor="middle">{xtitle}</text><text x="14" y="{cy}" text-anchor="middle" transform="rotate(-90 14 {cy})">{ytitle}</text></svg>"##,
            x1 = MARGIN_LEFT,
            x2 = MARGIN_LEFT + plot_width,
            b = baseline,
            cx = MARGIN_LEFT + plot_width / 2.0,
            xt = CHART_HEIGHT - 16.0,
            cy = MARGIN_TOP + plot_height / 2.0,
            xtitle = escape_html(&self.xaxis_title),
            ytitle = escape_html(&self.yaxis_title),
        );
        svg
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::collections::BTreeMap;

    fn result() -> SegmentationResult {
        SegmentationResult {
            image: RgbaImage::new(1, 1),
            class_ids: vec![3, 1],
            class_names: BTreeMap::from([(1, "shirt".to_string()), (3, "dress".to_string())]),
            scores: vec![0.9312, 0.8],
        }
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(0.8725), "87.25%");
        assert_eq!(format_percent(1.0), "100.00%");
        assert_eq!(format_percent(0.0), "0.00%");
    }

    #[test]
    fn test_table_follows_score_order() {
        let report = Report::from_result(&result());
        assert_eq!(report.table.columns, ["Class Name", "Score"].map(String::from));
        assert_eq!(
            report.table.rows,
            vec![
                ScoreRow {
                    class_name: "dress".into(),
                    score: "93.12%".into()
                },
                ScoreRow {
                    class_name: "shirt".into(),
                    score: "80.00%".into()
                },
            ]
        );
    }

    #[test]
    fn test_chart_and_summary() {
        let report = Report::from_result(&result());
        assert_eq!(report.chart.x, vec!["dress", "shirt"]);
        assert_eq!(report.chart.y, vec![0.9312, 0.8]);
        assert_eq!(report.chart.xaxis_title, "Class");
        assert_eq!(report.chart.yaxis_title, "Score");

        let json = serde_json::to_value(&report.summary).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "tags": [
                    {"class_name": "dress", "confidence": 0.9312_f32},
                    {"class_name": "shirt", "confidence": 0.8_f32},
                ]
            })
        );
    }

    #[test]
    fn test_empty_result() {
        let mut empty = result();
        empty.class_ids.clear();
        empty.class_names.clear();
        empty.scores.clear();

        let report = Report::from_result(&empty);
        assert!(report.table.rows.is_empty());
        assert!(report.summary.tags.is_empty());
        assert!(report.chart.to_svg().ends_with("</svg>"));
    }

    #[test]
    fn test_svg_escapes_labels() {
        let chart = BarChart {
            x: vec!["<b>shirt</b>".into()],
            y: vec![0.5],
            xaxis_title: "Class".into(),
            yaxis_title: "Score".into(),
        };
        let svg = chart.to_svg();
        assert!(svg.contains("&lt;b&gt;shirt&lt;/b&gt;"));
        assert_eq!(svg.matches("<rect").count(), 1);
    }
}
