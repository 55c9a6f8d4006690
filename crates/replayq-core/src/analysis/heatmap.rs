//! Spatial density grid over the positional timeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_GRID: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Bounds {
    const ZERO: Bounds = Bounds {
        min_x: 0.0,
        max_x: 0.0,
        min_y: 0.0,
        max_y: 0.0,
    };
}

/// Output of the heatmap stage, stored under the `heatmap` key.
///
/// `cells[row][col]`, row index follows y and column index follows x.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub width: usize,
    pub height: usize,
    pub bounds: Bounds,
    pub samples: u64,
    pub cells: Vec<Vec<u32>>,
}

impl Heatmap {
    fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bounds: Bounds::ZERO,
            samples: 0,
            cells: vec![vec![0; width]; height],
        }
    }

    /// Build a `width × height` grid from `telemetry["positions"]` (`[{x, y, ...}]`).
    ///
    /// Bounds come from the observed min/max. Entries without numeric `x`/`y` are
    /// skipped; no usable sample gives an all-zero grid.
    pub fn from_telemetry(telemetry: &Value, width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);

        let points: Vec<(f64, f64)> = telemetry
            .get("positions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|p| {
                let x = p.get("x").and_then(Value::as_f64)?;
                let y = p.get("y").and_then(Value::as_f64)?;
                (x.is_finite() && y.is_finite()).then_some((x, y))
            })
            .collect();

        let Some(&(first_x, first_y)) = points.first() else {
            return Self::empty(width, height);
        };

        let bounds = points.iter().fold(
            Bounds {
                min_x: first_x,
                max_x: first_x,
                min_y: first_y,
                max_y: first_y,
            },
            |b, &(x, y)| Bounds {
                min_x: b.min_x.min(x),
                max_x: b.max_x.max(x),
                min_y: b.min_y.min(y),
                max_y: b.max_y.max(y),
            },
        );

        let mut heatmap = Self::empty(width, height);
        heatmap.bounds = bounds;
        for &(x, y) in &points {
            let col = bucket(x, bounds.min_x, bounds.max_x, width);
            let row = bucket(y, bounds.min_y, bounds.max_y, height);
            heatmap.cells[row][col] += 1;
        }
        heatmap.samples = points.len() as u64;
        heatmap
    }

    pub fn total(&self) -> u64 {
        self.cells.iter().flatten().map(|c| u64::from(*c)).sum()
    }
}

/// Cell index of `v` in `[min, max]` split into `n` buckets; `max` lands in the last one.
fn bucket(v: f64, min: f64, max: f64, n: usize) -> usize {
    let span = max - min;
    if span <= 0.0 {
        return 0;
    }
    let idx = ((v - min) / span * n as f64).floor() as usize;
    idx.min(n - 1)
}
