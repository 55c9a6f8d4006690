//! Post-processing stages run on the parser payload before it is persisted.

pub mod heatmap;
pub mod heuristics;

pub use heatmap::{Bounds, DEFAULT_GRID, Heatmap};
pub use heuristics::{FightDetected, Heuristic, HeuristicSet, NoHealDetected};

use serde_json::Value;

use crate::error::PipelineError;

/// Heuristics plus heatmap, merged into the parsed payload.
pub struct Analyzer {
    heuristics: HeuristicSet,
    grid_width: usize,
    grid_height: usize,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(HeuristicSet::builtin())
    }
}

impl Analyzer {
    pub fn new(heuristics: HeuristicSet) -> Self {
        Self {
            heuristics,
            grid_width: DEFAULT_GRID,
            grid_height: DEFAULT_GRID,
        }
    }

    pub fn with_grid(mut self, width: usize, height: usize) -> Self {
        self.grid_width = width.max(1);
        self.grid_height = height.max(1);
        self
    }

    /// Add `heuristics` and `heatmap` keys to `payload` (overwriting parser keys of the
    /// same name). `payload` must be a JSON object.
    pub fn enrich(&self, mut payload: Value) -> Result<Value, PipelineError> {
        let flags = self.heuristics.evaluate(&payload);
        let heatmap = Heatmap::from_telemetry(&payload, self.grid_width, self.grid_height);
        let heatmap = serde_json::to_value(heatmap)
            .map_err(|e| PipelineError::Persistence(format!("heatmap encode: {e}")))?;

        let Some(object) = payload.as_object_mut() else {
            return Err(PipelineError::PermanentInput(
                "parser payload is not a JSON object".to_string(),
            ));
        };
        object.insert("heuristics".to_string(), flags);
        object.insert("heatmap".to_string(), heatmap);
        Ok(payload)
    }
}
