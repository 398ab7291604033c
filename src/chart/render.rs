use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use super::{build_option, ChartInput};
use crate::error::ChartError;

/// File written to the working directory when no path is given.
pub const DEFAULT_CHART_FILE: &str = "render.html";

const ECHARTS_CDN: &str = "https://cdn.jsdelivr.net/npm/echarts@5/dist/echarts.min.js";
const ECHARTS_GL_CDN: &str = "https://cdn.jsdelivr.net/npm/echarts-gl@2/dist/echarts-gl.min.js";
const CANVAS_WIDTH: &str = "1400px";
const CANVAS_HEIGHT: &str = "800px";

/// Render `input` as a standalone HTML page and write it to `path`, or to
/// `./render.html` when `path` is `None`.  Returns the path written.
pub fn render(input: &ChartInput, path: Option<&Path>) -> Result<PathBuf, ChartError> {
    let option = build_option(input)?;
    render_option(&input.title, &option, path)
}

/// Write any ECharts option (candles, 3D scatter, heatmap) as a page.
pub fn render_option(title: &str, option: &Value, path: Option<&Path>) -> Result<PathBuf, ChartError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir()?.join(DEFAULT_CHART_FILE),
    };

    let needs_gl = option.get("grid3D").is_some();
    let html = page(title, &serde_json::to_string(option)?, needs_gl);

    info!(path = %path.display(), title = %title, "writing chart");

    // Write to a sibling temp file, then rename, so a reader never sees half
    // a document.
    let tmp_path = path.with_extension("html.tmp");
    std::fs::write(&tmp_path, html)?;
    std::fs::rename(&tmp_path, &path)?;

    Ok(path)
}

fn page(title: &str, option_json: &str, needs_gl: bool) -> String {
    // "</" inside the inline script would end it early.
    let option_json = option_json.replace("</", "<\\/");
    let gl_script = if needs_gl {
        format!("<script src=\"{ECHARTS_GL_CDN}\"></script>\n")
    } else {
        String::new()
    };
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{ECHARTS_CDN}"></script>
{gl_script}</head>
<body>
<div id="chart" style="width:{CANVAS_WIDTH};height:{CANVAS_HEIGHT};"></div>
<script>
var chart = echarts.init(document.getElementById("chart"));
chart.setOption({option_json});
</script>
</body>
</html>
"#,
        title = escape_html(title),
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
