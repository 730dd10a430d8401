//! Visual feature extraction from a decoded chart

use serde::{Deserialize, Serialize};

use crate::config::ChartSettings;
use crate::error::{MarketError, Result};
use crate::types::SampleGrid;

/// Minimum drop between the two peaks of a double top (or rise for a bottom),
/// in normalised price units
const MIN_PATTERN_DEPTH: f64 = 0.05;

/// Slope (normalised price per chart width) below which a trend line is flat
const FLAT_SLOPE: f64 = 0.05;

/// Share of a level row's inked columns that must also carry ink off every
/// candidate level; rows below it are the price curve running flat
const MIN_SHARED_COLUMNS: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    DoubleTop,
    DoubleBottom,
}

impl PatternKind {
    /// Whether the pattern usually precedes a decline
    pub fn is_bearish(self) -> bool {
        matches!(self, Self::DoubleTop)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPattern {
    pub pattern: PatternKind,
    pub confidence: f64,
    /// Normalised horizontal positions (0 = left edge, 1 = right edge)
    pub start_x: f64,
    pub end_x: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Support,
    Resistance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyLevel {
    pub kind: LevelKind,
    /// Normalised vertical position (0 = bottom, 1 = top)
    pub price_position: f64,
    pub row: usize,
    /// Share of the row covered by ink
    pub strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendLine {
    pub direction: TrendDirection,
    pub slope: f64,
    pub start: Point,
    pub end: Point,
    /// Coefficient of determination of the fit
    pub r_squared: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeProfile {
    /// Ink share per horizontal band, lowest price band first
    pub bands: Vec<f64>,
    /// Centre of the densest band
    pub point_of_control: Option<f64>,
}

/// Everything the chart stage reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartFeatures {
    pub patterns: Vec<ChartPattern>,
    pub key_levels: Vec<KeyLevel>,
    pub trend_lines: Vec<TrendLine>,
    pub volume_profile: VolumeProfile,
}

/// Pattern, level, trend-line and profile detection over a grayscale chart
#[cfg_attr(test, mockall::automock)]
pub trait ChartFeatureExtractor: Send + Sync {
    fn extract(&self, grid: &SampleGrid) -> Result<ChartFeatures>;
}

/// Projection-based extractor for line charts on a light background
///
/// Rows mostly covered by ink are horizontal levels, unless that ink is the
/// only ink in its columns (a flat stretch of the curve). The price curve is
/// the topmost ink in each column once the levels are masked out.
#[derive(Debug, Clone)]
pub struct ProjectionExtractor {
    settings: ChartSettings,
}

impl ProjectionExtractor {
    pub fn new(settings: ChartSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    fn is_dark(&self, sample: u8) -> bool {
        sample < self.settings.dark_threshold
    }

    fn has_ink(&self, grid: &SampleGrid, x: usize, rows: impl IntoIterator<Item = usize>) -> bool {
        rows.into_iter().any(|y| self.is_dark(grid.get(x, y)))
    }

    fn row_density(&self, grid: &SampleGrid) -> Vec<f64> {
        (0..grid.height())
            .map(|y| {
                let dark = grid.row(y).iter().filter(|&&s| self.is_dark(s)).count();
                dark as f64 / grid.width() as f64
            })
            .collect()
    }

    /// Runs of adjacent dense rows
    fn candidate_rows(&self, density: &[f64]) -> Vec<(usize, usize)> {
        let mut runs = Vec::new();
        let mut start = None;
        for (y, &d) in density.iter().enumerate() {
            match (d >= self.settings.level_density, start) {
                (true, None) => start = Some(y),
                (false, Some(s)) => {
                    runs.push((s, y - 1));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push((s, density.len() - 1));
        }
        runs
    }

    /// Candidate runs that coexist with ink elsewhere in their columns
    fn level_rows(&self, grid: &SampleGrid, density: &[f64]) -> Vec<(usize, usize)> {
        let candidates = self.candidate_rows(density);
        let mut in_candidate = vec![false; grid.height()];
        for &(start, end) in &candidates {
            in_candidate[start..=end].iter_mut().for_each(|m| *m = true);
        }
        let shared: Vec<bool> = (0..grid.width())
            .map(|x| self.has_ink(grid, x, (0..grid.height()).filter(|&y| !in_candidate[y])))
            .collect();

        candidates
            .into_iter()
            .filter(|&(start, end)| {
                let columns: Vec<usize> = (0..grid.width())
                    .filter(|&x| self.has_ink(grid, x, start..=end))
                    .collect();
                let with_curve = columns.iter().filter(|&&x| shared[x]).count();
                !columns.is_empty()
                    && with_curve as f64 / columns.len() as f64 >= MIN_SHARED_COLUMNS
            })
            .collect()
    }

    /// Topmost non-level ink per column, as (normalised x, normalised price)
    fn trace(&self, grid: &SampleGrid, masked: &[bool]) -> Vec<Point> {
        (0..grid.width())
            .filter_map(|x| {
                (0..grid.height())
                    .find(|&y| !masked[y] && self.is_dark(grid.get(x, y)))
                    .map(|y| Point {
                        x: normalise(x, grid.width()),
                        y: 1.0 - normalise(y, grid.height()),
                    })
            })
            .collect()
    }

    fn volume_profile(&self, grid: &SampleGrid) -> VolumeProfile {
        let bands = self.settings.profile_bands.min(grid.height());
        let mut counts = vec![0usize; bands];
        for y in 0..grid.height() {
            // band 0 holds the bottom rows
            let band = (grid.height() - 1 - y) * bands / grid.height();
            counts[band] += grid.row(y).iter().filter(|&&s| self.is_dark(s)).count();
        }

        let total: usize = counts.iter().sum();
        if total == 0 {
            return VolumeProfile {
                bands: vec![0.0; bands],
                point_of_control: None,
            };
        }

        let shares: Vec<f64> = counts.iter().map(|&c| c as f64 / total as f64).collect();
        let densest = shares
            .iter()
            .enumerate()
            .fold(0, |best, (i, &s)| if s > shares[best] { i } else { best });

        VolumeProfile {
            point_of_control: Some((densest as f64 + 0.5) / bands as f64),
            bands: shares,
        }
    }
}

impl Default for ProjectionExtractor {
    fn default() -> Self {
        Self {
            settings: ChartSettings::default(),
        }
    }
}

impl ChartFeatureExtractor for ProjectionExtractor {
    fn extract(&self, grid: &SampleGrid) -> Result<ChartFeatures> {
        if grid.width() < 2 || grid.height() < 2 {
            return Err(MarketError::ImageDecode(format!(
                "chart too small to analyse ({}x{})",
                grid.width(),
                grid.height()
            )));
        }

        let density = self.row_density(grid);
        let runs = self.level_rows(grid, &density);
        let mut masked = vec![false; grid.height()];
        for &(start, end) in &runs {
            masked[start..=end].iter_mut().for_each(|m| *m = true);
        }

        let curve = self.trace(grid, &masked);
        let latest = curve.last().map(|p| p.y);

        let key_levels = runs
            .iter()
            .map(|&(start, end)| {
                let row = (start + end) / 2;
                let price_position = 1.0 - normalise(row, grid.height());
                let strength =
                    density[start..=end].iter().sum::<f64>() / (end - start + 1) as f64;
                let kind = match latest {
                    Some(price) if price_position > price => LevelKind::Resistance,
                    Some(_) => LevelKind::Support,
                    None if price_position > 0.5 => LevelKind::Resistance,
                    None => LevelKind::Support,
                };
                KeyLevel {
                    kind,
                    price_position,
                    row,
                    strength,
                }
            })
            .collect();

        let values: Vec<f64> = curve.iter().map(|p| p.y).collect();
        let mut patterns = Vec::new();
        if let Some(top) = double_extreme(&curve, &values, self.settings.pattern_tolerance) {
            patterns.push(top.into_pattern(PatternKind::DoubleTop));
        }
        let inverted: Vec<f64> = values.iter().map(|v| -v).collect();
        if let Some(bottom) = double_extreme(&curve, &inverted, self.settings.pattern_tolerance) {
            patterns.push(bottom.into_pattern(PatternKind::DoubleBottom));
        }

        Ok(ChartFeatures {
            patterns,
            key_levels,
            trend_lines: fit_trend_line(&curve, grid.height())
                .into_iter()
                .collect(),
            volume_profile: self.volume_profile(grid),
        })
    }
}

fn normalise(index: usize, extent: usize) -> f64 {
    if extent <= 1 {
        0.0
    } else {
        index as f64 / (extent - 1) as f64
    }
}

/// Least-squares line through the curve
///
/// A rise of less than two pixel rows across the chart is quantisation, not trend.
fn fit_trend_line(curve: &[Point], height: usize) -> Option<TrendLine> {
    if curve.len() < 2 {
        return None;
    }
    let n = curve.len() as f64;
    let mean_x = curve.iter().map(|p| p.x).sum::<f64>() / n;
    let mean_y = curve.iter().map(|p| p.y).sum::<f64>() / n;
    let sxx: f64 = curve.iter().map(|p| (p.x - mean_x).powi(2)).sum();
    let sxy: f64 = curve.iter().map(|p| (p.x - mean_x) * (p.y - mean_y)).sum();
    let syy: f64 = curve.iter().map(|p| (p.y - mean_y).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r_squared = if syy == 0.0 { 1.0 } else { (sxy * sxy) / (sxx * syy) };
    let flat = FLAT_SLOPE.max(2.0 / height.saturating_sub(1).max(1) as f64);
    let direction = if slope > flat {
        TrendDirection::Up
    } else if slope < -flat {
        TrendDirection::Down
    } else {
        TrendDirection::Flat
    };

    Some(TrendLine {
        direction,
        slope,
        start: Point {
            x: 0.0,
            y: intercept,
        },
        end: Point {
            x: 1.0,
            y: intercept + slope,
        },
        r_squared,
    })
}

struct Extremes {
    confidence: f64,
    start_x: f64,
    end_x: f64,
}

impl Extremes {
    fn into_pattern(self, pattern: PatternKind) -> ChartPattern {
        ChartPattern {
            pattern,
            confidence: self.confidence,
            start_x: self.start_x,
            end_x: self.end_x,
        }
    }
}

/// Two comparable interior peaks separated by a sufficiently deep valley
fn double_extreme(curve: &[Point], values: &[f64], tolerance: f64) -> Option<Extremes> {
    let n = values.len();
    let radius = (n / 20).max(1);
    if n < 4 * radius + 1 {
        return None;
    }

    let mut peaks: Vec<usize> = (radius..n - radius)
        .filter(|&i| {
            let window = &values[i - radius..=i + radius];
            let is_max = window.iter().all(|&v| v <= values[i]);
            is_max && values[i] > values[i - 1]
        })
        .collect();
    peaks.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));

    let first = *peaks.first()?;
    let second = *peaks
        .iter()
        .skip(1)
        .find(|&&p| p.abs_diff(first) >= 2 * radius)?;

    let (left, right) = (first.min(second), first.max(second));
    let diff = (values[left] - values[right]).abs();
    let floor = values[left..=right]
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    if diff > tolerance || floor > values[left].min(values[right]) - MIN_PATTERN_DEPTH {
        return None;
    }

    let confidence = if tolerance > 0.0 {
        1.0 - 0.5 * diff / tolerance
    } else {
        1.0
    };
    Some(Extremes {
        confidence,
        start_x: curve[left].x,
        end_x: curve[right].x,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 40;
    const H: usize = 21;

    /// White canvas with a one-pixel curve drawn from normalised prices
    fn draw(values: impl Fn(usize) -> f64) -> Vec<u8> {
        let mut samples = vec![255u8; W * H];
        for x in 0..W {
            let y = ((1.0 - values(x)) * (H - 1) as f64).round() as usize;
            samples[y * W + x] = 0;
        }
        samples
    }

    /// Rises to 0.8, dips to 0.4, back to 0.8, then falls away
    fn m_shape(x: usize) -> f64 {
        let x = x as f64;
        if x <= 10.0 {
            0.08 * x
        } else if x <= 20.0 {
            0.8 - 0.04 * (x - 10.0)
        } else if x <= 30.0 {
            0.4 + 0.04 * (x - 20.0)
        } else {
            0.8 - 0.08 * (x - 30.0)
        }
    }

    #[test]
    fn test_detects_double_top() {
        let grid = SampleGrid::new(W, H, draw(m_shape)).unwrap();
        let features = ProjectionExtractor::default().extract(&grid).unwrap();

        assert_eq!(features.patterns.len(), 1);
        let pattern = &features.patterns[0];
        assert_eq!(pattern.pattern, PatternKind::DoubleTop);
        assert!((pattern.confidence - 1.0).abs() < 1e-9);
        assert!((pattern.start_x - 10.0 / 39.0).abs() < 1e-9);
        assert!((pattern.end_x - 30.0 / 39.0).abs() < 1e-9);
    }

    #[test]
    fn test_rising_line_has_up_trend_and_no_patterns() {
        let grid = SampleGrid::new(W, H, draw(|x| x as f64 / (W - 1) as f64)).unwrap();
        let features = ProjectionExtractor::default().extract(&grid).unwrap();

        assert!(features.patterns.is_empty());
        assert_eq!(features.trend_lines.len(), 1);
        let line = &features.trend_lines[0];
        assert_eq!(line.direction, TrendDirection::Up);
        assert!((line.slope - 1.0).abs() < 0.05);
        assert!(line.r_squared > 0.95);
    }

    #[test]
    fn test_horizontal_line_becomes_key_level() {
        let mut samples = draw(|x| 0.1 + 0.001 * x as f64);
        let row = 5;
        samples[row * W..(row + 1) * W].fill(0);
        let grid = SampleGrid::new(W, H, samples).unwrap();
        let features = ProjectionExtractor::default().extract(&grid).unwrap();

        assert_eq!(features.key_levels.len(), 1);
        let level = &features.key_levels[0];
        assert_eq!(level.row, row);
        assert_eq!(level.kind, LevelKind::Resistance);
        assert!((level.strength - 1.0).abs() < 1e-9);
        // the level row is masked, so the curve stays flat
        assert_eq!(features.trend_lines[0].direction, TrendDirection::Flat);
    }

    #[test]
    fn test_flat_curve_is_not_a_level() {
        let grid = SampleGrid::new(W, H, draw(|_| 0.5)).unwrap();
        let features = ProjectionExtractor::default().extract(&grid).unwrap();

        assert!(features.key_levels.is_empty());
        assert_eq!(features.trend_lines[0].direction, TrendDirection::Flat);
        assert!((features.trend_lines[0].start.y - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = ChartSettings {
            profile_bands: 0,
            ..Default::default()
        };
        assert!(ProjectionExtractor::new(settings).is_err());
        assert!(ProjectionExtractor::new(ChartSettings::default()).is_ok());
    }

    #[test]
    fn test_volume_profile_on_blank_chart() {
        let grid = SampleGrid::new(W, H, vec![255; W * H]).unwrap();
        let features = ProjectionExtractor::default().extract(&grid).unwrap();

        assert!(features.trend_lines.is_empty());
        assert_eq!(features.volume_profile.bands.len(), 10);
        assert!(features.volume_profile.point_of_control.is_none());
    }

    #[test]
    fn test_volume_profile_peaks_where_ink_is() {
        let mut samples = vec![255u8; W * H];
        samples[(H - 1) * W..].fill(0);
        let grid = SampleGrid::new(W, H, samples).unwrap();
        let profile = ProjectionExtractor::default().extract(&grid).unwrap().volume_profile;

        assert!((profile.bands[0] - 1.0).abs() < 1e-9);
        assert_eq!(profile.point_of_control, Some(0.05));
    }

    #[test]
    fn test_rejects_degenerate_grid() {
        let grid = SampleGrid::new(1, 1, vec![0]).unwrap();
        assert!(ProjectionExtractor::default().extract(&grid).is_err());
    }
}
