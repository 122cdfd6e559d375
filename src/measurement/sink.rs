//! Plot sink contract and the in-memory plot model.
//!
//! The measurement engine draws through [`SampleSink`] only; it never
//! knows whether a window, a file or a test is behind it. [`PlotModel`]
//! keeps the series in memory with bounded length and tracks their extents.

use std::collections::BTreeMap;
use tracing::debug;

/// Line width used for every measurement series.
pub const PEN_WIDTH: u32 = 3;

/// RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
}

impl Color {
    /// Colour from its components.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Series colours, cycled by step.
pub const PALETTE: [Color; 7] = [
    Color::rgb(0, 0, 255),
    Color::rgb(0, 255, 0),
    Color::rgb(0, 255, 255),
    Color::rgb(255, 0, 0),
    Color::rgb(255, 0, 255),
    Color::rgb(255, 255, 0),
    Color::rgb(255, 255, 255),
];

/// Colour of the series for `step`.
pub fn step_color(step: u32) -> Color {
    PALETTE[step as usize % PALETTE.len()]
}

/// How the points of a series are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Connected line
    Line,
    /// Isolated points
    Point,
}

/// Receiver of plotted points.
pub trait SampleSink: Send {
    /// Start a new series. An existing series with the same id is replaced.
    fn create_series(&mut self, id: u32, pen_width: u32, color: Color, symbol: SymbolKind, title: &str);

    /// Show or hide a series.
    fn show(&mut self, id: u32, visible: bool);

    /// Show or hide the title of a series in the legend.
    fn show_title(&mut self, id: u32, visible: bool);

    /// Add a point. Unknown ids and NaN `y` are ignored.
    fn append_point(&mut self, id: u32, x: f64, y: f64);

    /// Redraw after a batch of points.
    fn refresh(&mut self);
}

/// Inclusive bounds of the plotted data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extents {
    /// Smallest x
    pub x_min: f64,
    /// Largest x
    pub x_max: f64,
    /// Smallest y
    pub y_min: f64,
    /// Largest y
    pub y_max: f64,
}

impl Extents {
    fn of(points: &[(f64, f64)]) -> Option<Self> {
        let (&(x, y), rest) = points.split_first()?;
        let mut extents = Self {
            x_min: x,
            x_max: x,
            y_min: y,
            y_max: y,
        };
        for &(x, y) in rest {
            extents.include(x, y);
        }
        Some(extents)
    }

    fn include(&mut self, x: f64, y: f64) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
    }

    fn merge(self, other: Self) -> Self {
        Self {
            x_min: self.x_min.min(other.x_min),
            x_max: self.x_max.max(other.x_max),
            y_min: self.y_min.min(other.y_min),
            y_max: self.y_max.max(other.y_max),
        }
    }
}

/// One stored series.
#[derive(Debug, Clone)]
pub struct Series {
    /// Legend title
    pub title: String,
    /// Line width
    pub pen_width: u32,
    /// Colour
    pub color: Color,
    /// Drawing style
    pub symbol: SymbolKind,
    /// Visible in the plot
    pub visible: bool,
    /// Title shown in the legend
    pub title_visible: bool,
    points: Vec<(f64, f64)>,
    extents: Option<Extents>,
}

impl Series {
    /// Points in insertion order.
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Bounds of the stored points.
    pub fn extents(&self) -> Option<Extents> {
        self.extents
    }
}

/// In-memory plot with bounded series.
#[derive(Debug, Clone)]
pub struct PlotModel {
    max_points: usize,
    series: BTreeMap<u32, Series>,
    refreshes: u64,
}

impl PlotModel {
    /// Model keeping at most `max_points` per series.
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points: max_points.max(4),
            series: BTreeMap::new(),
            refreshes: 0,
        }
    }

    /// Series by id.
    pub fn series(&self, id: u32) -> Option<&Series> {
        self.series.get(&id)
    }

    /// Ids of all series, ascending.
    pub fn series_ids(&self) -> Vec<u32> {
        self.series.keys().copied().collect()
    }

    /// Total points over all series.
    pub fn point_count(&self) -> usize {
        self.series.values().map(|s| s.points.len()).sum()
    }

    /// Bounds over all visible series.
    pub fn extents(&self) -> Option<Extents> {
        self.series
            .values()
            .filter(|s| s.visible)
            .filter_map(|s| s.extents)
            .reduce(Extents::merge)
    }

    /// Number of `refresh` calls.
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }
}

impl SampleSink for PlotModel {
    fn create_series(&mut self, id: u32, pen_width: u32, color: Color, symbol: SymbolKind, title: &str) {
        debug!(id, title, "new series");
        self.series.insert(
            id,
            Series {
                title: title.to_string(),
                pen_width,
                color,
                symbol,
                visible: false,
                title_visible: false,
                points: Vec::new(),
                extents: None,
            },
        );
    }

    fn show(&mut self, id: u32, visible: bool) {
        if let Some(series) = self.series.get_mut(&id) {
            series.visible = visible;
        }
    }

    fn show_title(&mut self, id: u32, visible: bool) {
        if let Some(series) = self.series.get_mut(&id) {
            series.title_visible = visible;
        }
    }

    fn append_point(&mut self, id: u32, x: f64, y: f64) {
        if y.is_nan() {
            return;
        }
        let max_points = self.max_points;
        let Some(series) = self.series.get_mut(&id) else {
            return;
        };
        series.points.push((x, y));
        if series.points.len() > max_points {
            series.points.drain(..max_points / 4);
            series.extents = Extents::of(&series.points);
        } else {
            match series.extents.as_mut() {
                Some(extents) => extents.include(x, y),
                None => series.extents = Extents::of(&series.points),
            }
        }
    }

    fn refresh(&mut self) {
        self.refreshes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_series() -> PlotModel {
        let mut plot = PlotModel::new(8);
        plot.create_series(1, PEN_WIDTH, step_color(1), SymbolKind::Line, "Vg=0");
        plot.show(1, true);
        plot
    }

    #[test]
    fn test_palette_cycles() {
        assert_eq!(step_color(0), Color::rgb(0, 0, 255));
        assert_eq!(step_color(1), Color::rgb(0, 255, 0));
        assert_eq!(step_color(7), step_color(0));
        assert_eq!(step_color(13), Color::rgb(255, 255, 255));
    }

    #[test]
    fn test_ignores_nan_and_unknown_series() {
        let mut plot = model_with_series();
        plot.append_point(1, 0.0, f64::NAN);
        plot.append_point(2, 0.0, 1.0);
        assert_eq!(plot.point_count(), 0);
        assert!(plot.series(2).is_none());
    }

    #[test]
    fn test_extents_follow_points() {
        let mut plot = model_with_series();
        plot.append_point(1, 0.0, 1.0);
        plot.append_point(1, -1.0, 3.0);
        plot.append_point(1, 2.0, -0.5);
        let extents = plot.extents().unwrap();
        assert_eq!(extents.x_min, -1.0);
        assert_eq!(extents.x_max, 2.0);
        assert_eq!(extents.y_min, -0.5);
        assert_eq!(extents.y_max, 3.0);

        plot.show(1, false);
        assert!(plot.extents().is_none());
    }

    #[test]
    fn test_oldest_quarter_dropped_when_full() {
        let mut plot = model_with_series();
        for i in 0..9 {
            plot.append_point(1, i as f64, i as f64);
        }
        let series = plot.series(1).unwrap();
        assert_eq!(series.points().len(), 7);
        assert_eq!(series.points()[0], (2.0, 2.0));
        assert_eq!(series.extents().unwrap().x_min, 2.0);
    }

    #[test]
    fn test_create_replaces_series() {
        let mut plot = model_with_series();
        plot.append_point(1, 0.0, 1.0);
        plot.create_series(1, PEN_WIDTH, step_color(2), SymbolKind::Point, "Vg=1");
        let series = plot.series(1).unwrap();
        assert!(series.points().is_empty());
        assert_eq!(series.title, "Vg=1");
        assert_eq!(plot.series_ids(), vec![1]);
    }
}
