// =============================================================================
// Chart Composer - multi-panel OHLCV chart from parallel arrays
// =============================================================================
//
// Layout: candles on top with line indicators overlaid, a volume panel below,
// then one panel per bar indicator.  All panels share one zoomable time axis.
// 3D scatter and heatmap options go through the same page writer.
// =============================================================================

mod echarts;
mod render;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::collector::SnapshotResult;
use crate::error::ChartError;

pub use echarts::{build_option, heatmap_option, scatter3d_option};
pub use render::{render, render_option, DEFAULT_CHART_FILE};

/// Name of the mandatory volume series.
pub const VOLUME: &str = "volume";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderKind {
    Bar,
    Line,
}

/// One named value series drawn alongside the candles.  `None` entries are
/// rendered as gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub kind: RenderKind,
    pub values: Vec<Option<f64>>,
}

impl IndicatorSeries {
    pub fn bar(values: Vec<Option<f64>>) -> Self {
        Self {
            kind: RenderKind::Bar,
            values,
        }
    }

    pub fn line(values: Vec<Option<f64>>) -> Self {
        Self {
            kind: RenderKind::Line,
            values,
        }
    }
}

/// Everything the composer needs: a time axis, four parallel price arrays
/// and named indicators, one of which must be [`VOLUME`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChartInput {
    pub title: String,
    pub dates: Vec<String>,
    pub open: Vec<f64>,
    pub close: Vec<f64>,
    pub low: Vec<f64>,
    pub high: Vec<f64>,
    pub indicators: BTreeMap<String, IndicatorSeries>,
}

impl ChartInput {
    /// Turn one symbol's candles from a snapshot into parallel arrays, with
    /// volume as a bar series.
    pub fn from_snapshot(snapshot: &SnapshotResult, symbol: &str) -> Self {
        let records = snapshot.for_symbol(symbol);

        let mut input = Self {
            title: symbol.to_string(),
            ..Self::default()
        };
        let mut volume = Vec::with_capacity(records.len());
        for rec in records {
            input.dates.push(rec.timestamp.format(DATE_FORMAT).to_string());
            input.open.push(rec.open);
            input.close.push(rec.close);
            input.low.push(rec.low);
            input.high.push(rec.high);
            volume.push(Some(rec.volume));
        }
        input
            .indicators
            .insert(VOLUME.to_string(), IndicatorSeries::bar(volume));
        input
    }

    pub fn with_indicator(mut self, name: impl Into<String>, series: IndicatorSeries) -> Self {
        self.indicators.insert(name.into(), series);
        self
    }

    pub fn volume(&self) -> Option<&IndicatorSeries> {
        self.indicators.get(VOLUME)
    }

    /// Indicators other than volume, in name order.
    pub fn extra_indicators(&self) -> impl Iterator<Item = (&String, &IndicatorSeries)> {
        self.indicators.iter().filter(|(name, _)| name.as_str() != VOLUME)
    }

    /// Check the volume precondition and that every series spans the axis.
    pub fn validate(&self) -> Result<(), ChartError> {
        if self.volume().is_none() {
            return Err(ChartError::MissingVolume);
        }

        let expected = self.dates.len();
        let prices = [
            ("open", self.open.len()),
            ("close", self.close.len()),
            ("low", self.low.len()),
            ("high", self.high.len()),
        ];
        let series = self
            .indicators
            .iter()
            .map(|(name, s)| (name.as_str(), s.values.len()));

        for (name, actual) in prices.into_iter().chain(series) {
            if actual != expected {
                return Err(ChartError::LengthMismatch {
                    name: name.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}
