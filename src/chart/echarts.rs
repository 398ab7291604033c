use serde_json::{json, Value};

use super::{ChartInput, RenderKind, VOLUME};
use crate::error::ChartError;

const UP_COLOR: &str = "#14b143";
const DOWN_COLOR: &str = "#ef232a";

/// Candle panel height, percent of the canvas.
const PRICE_PANEL_HEIGHT: f64 = 49.0;
/// Top of the volume panel; bar-indicator panels stack below it.
const VOLUME_PANEL_TOP: f64 = 70.0;
const SUB_PANEL_HEIGHT: f64 = 9.0;
const SUB_PANEL_STEP: f64 = 10.0;

/// Initial zoom window, percent of the time axis.
const ZOOM_START: u32 = 98;
const ZOOM_END: u32 = 100;

/// Edge length of the 3D scatter box.
const GRID_3D_SIZE: u32 = 100;

/// Build the ECharts option object for `input`.
///
/// Grid 0 holds the candles plus every line indicator, grid 1 the volume
/// bars, and grids 2.. one bar indicator each.
pub fn build_option(input: &ChartInput) -> Result<Value, ChartError> {
    input.validate()?;

    let bar_panels: Vec<(&String, &Vec<Option<f64>>)> = input
        .extra_indicators()
        .filter(|(_, s)| s.kind == RenderKind::Bar)
        .map(|(name, s)| (name, &s.values))
        .collect();
    let line_overlays: Vec<(&String, &Vec<Option<f64>>)> = input
        .extra_indicators()
        .filter(|(_, s)| s.kind == RenderKind::Line)
        .map(|(name, s)| (name, &s.values))
        .collect();

    // Volume is always the first sub panel.
    let sub_panels = 1 + bar_panels.len();
    let grid_count = 1 + sub_panels;

    let mut grids = vec![json!({ "left": "8%", "right": "8%", "height": pct(PRICE_PANEL_HEIGHT) })];
    for i in 0..sub_panels {
        grids.push(json!({
            "left": "8%",
            "right": "8%",
            "top": pct(VOLUME_PANEL_TOP + SUB_PANEL_STEP * i as f64),
            "height": pct(SUB_PANEL_HEIGHT),
        }));
    }

    let x_axes: Vec<Value> = (0..grid_count)
        .map(|i| {
            json!({
                "type": "category",
                "gridIndex": i,
                "data": input.dates,
                "boundaryGap": true,
                "axisLine": { "onZero": false },
                "axisTick": { "show": false },
                "splitLine": { "show": false },
                "axisLabel": { "show": i == 0 },
                "splitNumber": 10,
            })
        })
        .collect();

    let y_axes: Vec<Value> = (0..grid_count)
        .map(|i| {
            json!({
                "gridIndex": i,
                "scale": true,
                "splitLine": { "show": i == 0 },
                "splitArea": { "show": true, "areaStyle": { "opacity": 1 } },
                "axisLabel": { "show": i == 0 },
            })
        })
        .collect();

    let candles: Vec<[f64; 4]> = input
        .open
        .iter()
        .zip(&input.close)
        .zip(&input.low)
        .zip(&input.high)
        .map(|(((&open, &close), &low), &high)| [open, close, low, high])
        .collect();

    let mut series = vec![json!({
        "name": input.title,
        "type": "candlestick",
        "xAxisIndex": 0,
        "yAxisIndex": 0,
        "data": candles,
        "itemStyle": {
            "color": UP_COLOR,
            "color0": DOWN_COLOR,
            "borderColor": UP_COLOR,
            "borderColor0": DOWN_COLOR,
        },
    })];

    for (name, values) in &line_overlays {
        series.push(json!({
            "name": name,
            "type": "line",
            "xAxisIndex": 0,
            "yAxisIndex": 0,
            "data": values,
            "smooth": true,
            "showSymbol": false,
            "lineStyle": { "opacity": 0.5 },
        }));
    }

    let volume = input.volume().map(|s| &s.values);
    series.push(json!({
        "name": VOLUME,
        "type": "bar",
        "xAxisIndex": 1,
        "yAxisIndex": 1,
        "data": volume,
        "label": { "show": false },
    }));

    for (offset, (name, values)) in bar_panels.iter().enumerate() {
        let grid = 2 + offset;
        series.push(json!({
            "name": name,
            "type": "bar",
            "xAxisIndex": grid,
            "yAxisIndex": grid,
            "data": values,
            "label": { "show": false },
        }));
    }

    let all_x: Vec<usize> = (0..grid_count).collect();

    Ok(json!({
        "animation": false,
        "title": { "text": input.title, "left": 0 },
        "legend": { "show": true, "top": 0, "left": "center" },
        "tooltip": {
            "trigger": "axis",
            "axisPointer": { "type": "cross" },
            "backgroundColor": "rgba(245, 245, 245, 0.8)",
            "borderWidth": 1,
            "borderColor": "#ccc",
            "textStyle": { "color": "#000" },
        },
        "axisPointer": {
            "link": [{ "xAxisIndex": "all" }],
            "label": { "backgroundColor": "#777" },
        },
        "brush": {
            "xAxisIndex": "all",
            "brushLink": "all",
            "outOfBrush": { "colorAlpha": 0.1 },
            "brushType": "lineX",
        },
        "grid": grids,
        "xAxis": x_axes,
        "yAxis": y_axes,
        "dataZoom": [
            { "type": "inside", "xAxisIndex": all_x, "start": ZOOM_START, "end": ZOOM_END },
            {
                "type": "slider",
                "show": true,
                "xAxisIndex": all_x,
                "top": "90%",
                "start": ZOOM_START,
                "end": ZOOM_END,
            },
        ],
        "series": series,
    }))
}

/// Build a 3D scatter option.  Points are `[x, y, z]`; colour follows `y`.
pub fn scatter3d_option(name: &str, axis_names: [&str; 3], points: &[[f64; 3]]) -> Value {
    let (min, max) = value_range(points.iter().map(|p| p[1]));
    let axis = |label: &str| json!({ "name": label, "type": "value" });

    json!({
        "title": { "text": name },
        "tooltip": {},
        "visualMap": [{
            "type": "continuous",
            "show": true,
            "calculable": true,
            "dimension": 1,
            "min": min,
            "max": max,
        }],
        "xAxis3D": axis(axis_names[0]),
        "yAxis3D": axis(axis_names[1]),
        "zAxis3D": axis(axis_names[2]),
        "grid3D": { "boxWidth": GRID_3D_SIZE, "boxHeight": GRID_3D_SIZE, "boxDepth": GRID_3D_SIZE },
        "series": [{
            "name": name,
            "type": "scatter3D",
            "data": points,
        }],
    })
}

/// Build a heatmap option.  Each cell is `(x index, y index, value)` into
/// `x_labels` and `y_labels`.
pub fn heatmap_option(
    title: &str,
    x_labels: &[String],
    y_name: &str,
    y_labels: &[String],
    cells: &[(usize, usize, f64)],
) -> Result<Value, ChartError> {
    if let Some(&(x, y, _)) = cells
        .iter()
        .find(|(x, y, _)| *x >= x_labels.len() || *y >= y_labels.len())
    {
        return Err(ChartError::CellOutOfRange { x, y });
    }

    let (min, max) = value_range(cells.iter().map(|c| c.2));
    let data: Vec<(usize, usize, f64)> = cells.to_vec();

    Ok(json!({
        "title": { "text": title },
        "tooltip": { "position": "top" },
        "xAxis": { "type": "category", "data": x_labels },
        "yAxis": { "type": "category", "data": y_labels },
        "visualMap": { "min": min, "max": max, "calculable": true, "orient": "horizontal", "left": "center" },
        "series": [{
            "name": y_name,
            "type": "heatmap",
            "data": data,
            "label": { "show": false },
        }],
    }))
}

fn pct(v: f64) -> String {
    format!("{v:.1}%")
}

/// Finite min and max of `values`, `(0, 0)` when there are none.
fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            None => Some((v, v)),
        })
        .unwrap_or((0.0, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::tests::sample_input;
    use crate::chart::IndicatorSeries;

    #[test]
    fn base_chart_has_price_and_volume_panels() {
        let option = build_option(&sample_input(3)).unwrap();

        assert_eq!(option["grid"].as_array().unwrap().len(), 2);
        assert_eq!(option["xAxis"].as_array().unwrap().len(), 2);

        let series = option["series"].as_array().unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0]["type"], "candlestick");
        assert_eq!(series[0]["data"][0], json!([100.0, 100.5, 99.0, 101.0]));
        assert_eq!(series[0]["itemStyle"]["color"], UP_COLOR);
        assert_eq!(series[1]["name"], VOLUME);
        assert_eq!(series[1]["xAxisIndex"], 1);
    }

    #[test]
    fn bar_indicators_get_their_own_panel() {
        let input = sample_input(2)
            .with_indicator("obv", IndicatorSeries::bar(vec![Some(1.0), Some(2.0)]))
            .with_indicator("rsi", IndicatorSeries::bar(vec![None, Some(55.0)]));
        let option = build_option(&input).unwrap();

        assert_eq!(option["grid"].as_array().unwrap().len(), 4);
        let series = option["series"].as_array().unwrap();
        let rsi = series.iter().find(|s| s["name"] == "rsi").unwrap();
        assert_eq!(rsi["xAxisIndex"], 3);
        assert_eq!(rsi["data"], json!([null, 55.0]));
    }

    #[test]
    fn line_indicators_overlay_the_candles() {
        let input = sample_input(2).with_indicator("ema", IndicatorSeries::line(vec![None, Some(100.2)]));
        let option = build_option(&input).unwrap();

        assert_eq!(option["grid"].as_array().unwrap().len(), 2);
        let ema = option["series"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["name"] == "ema")
            .unwrap();
        assert_eq!(ema["type"], "line");
        assert_eq!(ema["xAxisIndex"], 0);
    }

    #[test]
    fn zoom_spans_every_axis() {
        let input = sample_input(2).with_indicator("obv", IndicatorSeries::bar(vec![Some(1.0), Some(2.0)]));
        let option = build_option(&input).unwrap();

        for zoom in option["dataZoom"].as_array().unwrap() {
            assert_eq!(zoom["xAxisIndex"], json!([0, 1, 2]));
            assert_eq!(zoom["start"], 98);
            assert_eq!(zoom["end"], 100);
        }
    }

    #[test]
    fn volume_panel_sits_at_seventy_percent() {
        let option = build_option(&sample_input(3)).unwrap();
        assert_eq!(option["grid"][0]["height"], "49.0%");
        assert_eq!(option["grid"][1]["top"], "70.0%");
        assert_eq!(option["grid"][1]["height"], "9.0%");
    }

    #[test]
    fn bar_panels_stack_below_volume() {
        let input = sample_input(2)
            .with_indicator("obv", IndicatorSeries::bar(vec![Some(1.0), Some(2.0)]))
            .with_indicator("rsi", IndicatorSeries::bar(vec![None, Some(55.0)]));
        let option = build_option(&input).unwrap();

        let grids = option["grid"].as_array().unwrap();
        assert_eq!(grids[2]["top"], "80.0%");
        assert_eq!(grids[3]["top"], "90.0%");
        assert!(grids[1..].iter().all(|g| g["height"] == "9.0%"));
    }

    #[test]
    fn mismatched_price_arrays_are_an_error() {
        let mut input = sample_input(3);
        input.high.pop();
        assert!(matches!(
            build_option(&input),
            Err(ChartError::LengthMismatch { expected: 3, actual: 2, .. })
        ));
    }

    #[test]
    fn scatter3d_colours_by_y() {
        let points = [[1.0, -2.0, 3.0], [4.0, 5.0, 6.0], [0.0, 0.5, f64::NAN]];
        let option = scatter3d_option("returns", ["fast", "slow", "pnl"], &points);

        assert_eq!(option["series"][0]["type"], "scatter3D");
        assert_eq!(option["series"][0]["data"][1], json!([4.0, 5.0, 6.0]));
        assert_eq!(option["xAxis3D"]["name"], "fast");
        assert_eq!(option["zAxis3D"]["name"], "pnl");
        assert_eq!(option["visualMap"][0]["dimension"], 1);
        assert_eq!(option["visualMap"][0]["min"], -2.0);
        assert_eq!(option["visualMap"][0]["max"], 5.0);
        assert_eq!(option["grid3D"]["boxDepth"], 100);
    }

    #[test]
    fn heatmap_lists_cells_against_labels() {
        let x: Vec<String> = vec!["mon".into(), "tue".into()];
        let y: Vec<String> = vec!["BTC".into(), "ETH".into(), "SOL".into()];
        let option =
            heatmap_option("volume by day", &x, "volume", &y, &[(0, 2, 7.5), (1, 0, 1.0)]).unwrap();

        assert_eq!(option["xAxis"]["data"], json!(["mon", "tue"]));
        assert_eq!(option["yAxis"]["data"][2], "SOL");
        assert_eq!(option["series"][0]["type"], "heatmap");
        assert_eq!(option["series"][0]["data"][0], json!([0, 2, 7.5]));
        assert_eq!(option["visualMap"]["min"], 1.0);
        assert_eq!(option["visualMap"]["max"], 7.5);
    }

    #[test]
    fn heatmap_rejects_cell_outside_labels() {
        let x: Vec<String> = vec!["mon".into()];
        let y: Vec<String> = vec!["BTC".into()];
        let err = heatmap_option("t", &x, "v", &y, &[(0, 0, 1.0), (0, 1, 2.0)]).unwrap_err();
        assert!(matches!(err, ChartError::CellOutOfRange { x: 0, y: 1 }));
    }
}
