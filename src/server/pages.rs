use std::fmt::Write as _;

use axum::http::StatusCode;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::config::DEFAULT_THRESHOLD;
use crate::report::{escape_html, Report};
use crate::RESULT_FILE_NAME;

const TITLE: &str = "Welcome to Clothes Segmentation Project!";

const DESCRIPTION: &str = "Either upload your own image or select from \
the sidebar to get a preconfigured image. The image you select or upload will be fed \
through the Deep Neural Network in real-time and the output will be displayed to the screen.";

const STYLE: &str = "body{font-family:sans-serif;margin:0;display:flex}\
aside{width:220px;padding:16px;background:#f0f2f6;min-height:100vh}\
main{flex:1;padding:24px 48px;max-width:760px}\
table{border-collapse:collapse;width:100%}\
td,th{border:1px solid #ddd;padding:6px 10px;text-align:left}\
pre{background:#f6f8fa;padding:12px;overflow:auto}\
img{max-width:100%}\
.error{color:#b00020}";

/// Everything but RFC 3986 unreserved characters.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, URL_COMPONENT).to_string()
}

/// `/samples/{category}/{id}` with every segment encoded; `/` inside the id
/// stays a separator.
fn sample_action(category: &str, id: &str) -> String {
    let id = id
        .split('/')
        .map(encode_component)
        .collect::<Vec<_>>()
        .join("/");
    format!("/samples/{}/{}", encode_component(&category.to_lowercase()), id)
}

/// What the sidebar shows.
pub struct Sidebar<'a> {
    pub categories: &'a [String],
    pub selected: Option<&'a str>,
    pub samples: &'a [String],
    /// Samples can only be run when a samples directory is configured.
    pub runnable: bool,
}

pub struct ResultView<'a> {
    pub threshold: u8,
    pub input_mime: &'a str,
    pub input_base64: &'a str,
    /// The resized overlay shown inline.
    pub display_base64: &'a str,
    /// The full-size overlay behind the download link.
    pub download_base64: &'a str,
    pub report: &'a Report,
    pub summary_json: &'a str,
}

fn layout(sidebar: Option<&Sidebar<'_>>, body: &str) -> String {
    let mut page = String::new();
    let _ = write!(
        page,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Clothes Segmentation</title>\
         <style>{}</style></head><body>",
        STYLE
    );
    if let Some(sidebar) = sidebar {
        page.push_str(&render_sidebar(sidebar));
    }
    let _ = write!(page, "<main>{}</main></body></html>", body);
    page
}

fn render_sidebar(sidebar: &Sidebar<'_>) -> String {
    let mut html = String::from("<aside><h3>Sample images</h3><ul>");
    for category in sidebar.categories {
        let _ = write!(
            html,
            "<li><a href=\"/?category={}\">{}</a></li>",
            encode_component(category),
            escape_html(category)
        );
    }
    html.push_str("</ul>");

    if let Some(selected) = sidebar.selected {
        let _ = write!(html, "<h4>{}</h4>", escape_html(selected));
        if sidebar.samples.is_empty() {
            html.push_str("<p>No images available.</p>");
        }
        for id in sidebar.samples {
            if sidebar.runnable {
                let _ = write!(
                    html,
                    "<form method=\"post\" action=\"{action}\">\
                     <input type=\"hidden\" class=\"sample-threshold\" name=\"threshold\" value=\"{th}\">\
                     <button type=\"submit\">{id}</button></form>",
                    action = escape_html(&sample_action(selected, id)),
                    id = escape_html(id),
                    th = DEFAULT_THRESHOLD
                );
            } else {
                let _ = write!(html, "<div>{}</div>", escape_html(id));
            }
        }
    }
    html.push_str("</aside>");
    html
}

fn intro(threshold: u8) -> String {
    format!(
        "<h1>{title}</h1><p>{description}</p>\
         <form method=\"post\" action=\"/segment\" enctype=\"multipart/form-data\">\
         <label>Threshold value <output id=\"thv\">{th}</output></label><br>\
         <input type=\"range\" name=\"threshold\" min=\"0\" max=\"100\" value=\"{th}\" \
         oninput=\"document.getElementById('thv').value=this.value;\
         document.querySelectorAll('.sample-threshold').forEach(e=>e.value=this.value)\"><br>\
         <label>Choose an image...</label><br>\
         <input type=\"file\" name=\"image\" accept=\"image/*\" required> \
         <button type=\"submit\">Segment</button></form>",
        title = TITLE,
        description = DESCRIPTION,
        th = threshold
    )
}

pub fn index(sidebar: &Sidebar<'_>) -> String {
    layout(Some(sidebar), &intro(DEFAULT_THRESHOLD))
}

pub fn result_page(view: &ResultView<'_>) -> String {
    let mut body = intro(view.threshold);

    let _ = write!(
        body,
        "<img src=\"data:{mime};base64,{input}\" alt=\"Input Image\"><p>Input Image</p>\
         <h2>Here is the result of segmentation:</h2>\
         <img src=\"data:image/png;base64,{display}\" alt=\"Clothes Segmentation\"><p>Clothes Segmentation</p>\
         <a download=\"{file}\" href=\"data:image/png;base64,{download}\">Download result image</a>",
        mime = escape_html(view.input_mime),
        input = view.input_base64,
        display = view.display_base64,
        download = view.download_base64,
        file = RESULT_FILE_NAME,
    );

    body.push_str("<h3>Analyses scores</h3><table><tr>");
    for column in &view.report.table.columns {
        let _ = write!(body, "<th>{}</th>", escape_html(column));
    }
    body.push_str("</tr>");
    for row in &view.report.table.rows {
        let _ = write!(
            body,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(&row.class_name),
            escape_html(&row.score)
        );
    }
    body.push_str("</table>");

    let _ = write!(
        body,
        "<h3>Chart view</h3>{}<h3>JSON view</h3><pre>{}</pre>",
        view.report.chart.to_svg(),
        escape_html(view.summary_json)
    );

    layout(None, &body)
}

pub fn error_page(status: StatusCode, message: &str) -> String {
    let body = format!(
        "<h1>{title}</h1><p class=\"error\">{status}: {message}</p><a href=\"/\">Back</a>",
        title = TITLE,
        status = status,
        message = escape_html(message)
    );
    layout(None, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_lists_categories() {
        let categories = vec!["Dress".to_string(), "Shirt".to_string()];
        let samples = vec!["test/shirt/1.jpg".to_string()];
        let page = index(&Sidebar {
            categories: &categories,
            selected: Some("Shirt"),
            samples: &samples,
            runnable: true,
        });

        assert!(page.contains(TITLE));
        assert!(page.contains("href=\"/?category=Dress\""));
        assert!(page.contains("action=\"/samples/shirt/test/shirt/1.jpg\""));
        assert!(page.contains("value=\"75\""));
    }

    #[test]
    fn test_sidebar_links_are_percent_encoded() {
        let categories = vec!["Tops & Tees".to_string()];
        let samples = vec!["tops/50% off #1.jpg".to_string()];
        let page = index(&Sidebar {
            categories: &categories,
            selected: Some("Tops & Tees"),
            samples: &samples,
            runnable: true,
        });

        assert!(page.contains("href=\"/?category=Tops%20%26%20Tees\""));
        assert!(page.contains("action=\"/samples/tops%20%26%20tees/tops/50%25%20off%20%231.jpg\""));
        assert!(page.contains(">Tops &amp; Tees</a>"));
        // sample runs pick up the slider value
        assert!(page.contains("class=\"sample-threshold\""));
        assert!(page.contains("querySelectorAll('.sample-threshold')"));
    }

    #[test]
    fn test_index_without_samples_dir() {
        let categories = vec!["Shirt".to_string()];
        let samples = vec!["test/shirt/1.jpg".to_string()];
        let page = index(&Sidebar {
            categories: &categories,
            selected: Some("Shirt"),
            samples: &samples,
            runnable: false,
        });
        assert!(!page.contains("/samples/shirt/"));
        assert!(page.contains("<div>test/shirt/1.jpg</div>"));
    }

    #[test]
    fn test_error_page_escapes_message() {
        let page = error_page(StatusCode::BAD_REQUEST, "<script>");
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("400 Bad Request"));
    }
}
