//! Frame-difference motion heatmap
//!
//! Each frame is downsampled to a fixed grid and compared against the previous
//! downsample. The grid is then folded into three vertical zones.

use crate::config::MotionConfig;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum per-cell difference: three channels of 255
const MAX_CELL_DELTA: f32 = 765.0;

/// Horizontal band of the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Left,
    Center,
    Right,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Zone::Left => "left",
            Zone::Center => "center",
            Zone::Right => "right",
        };
        f.write_str(name)
    }
}

/// Mean motion per vertical band
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Zones {
    pub left: f32,
    pub center: f32,
    pub right: f32,
}

/// Motion heatmap for one frame, row-major, values in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionField {
    pub grid: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub zones: Zones,
}

impl MotionField {
    /// All-zero field of the given size
    pub fn still(width: u32, height: u32) -> Self {
        Self {
            grid: vec![0.0; (width as usize) * (height as usize)],
            width,
            height,
            zones: Zones::default(),
        }
    }

    /// Zone with the highest mean motion. Ties go left, then center.
    pub fn dominant(&self) -> (Zone, f32) {
        let mut best = (Zone::Left, self.zones.left);
        if self.zones.center > best.1 {
            best = (Zone::Center, self.zones.center);
        }
        if self.zones.right > best.1 {
            best = (Zone::Right, self.zones.right);
        }
        best
    }

    pub fn cell(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.grid.get((y * self.width + x) as usize).copied()
    }
}

/// Motion analyzer holding a single-slot frame history
#[derive(Debug)]
pub struct MotionAnalyzer {
    config: MotionConfig,
    previous: Option<RgbImage>,
}

impl MotionAnalyzer {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    /// Compare `frame` against the previous one and remember it.
    pub fn analyze(&mut self, frame: &RgbImage) -> MotionField {
        let (gw, gh) = (self.config.grid_width, self.config.grid_height);

        if frame.width() == 0 || frame.height() == 0 || gw == 0 || gh == 0 {
            return MotionField::still(gw, gh);
        }

        let small = imageops::resize(frame, gw, gh, FilterType::Triangle);

        let field = match &self.previous {
            Some(prev) if prev.dimensions() == small.dimensions() => {
                let grid: Vec<f32> = small
                    .pixels()
                    .zip(prev.pixels())
                    .map(|(cur, old)| {
                        let delta: u32 = cur
                            .0
                            .iter()
                            .zip(old.0.iter())
                            .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs())
                            .sum();
                        delta as f32 / MAX_CELL_DELTA
                    })
                    .collect();
                let zones = fold_zones(&grid, gw, gh);
                MotionField {
                    grid,
                    width: gw,
                    height: gh,
                    zones,
                }
            }
            _ => MotionField::still(gw, gh),
        };

        self.previous = Some(small);
        field
    }

    /// Forget the retained frame
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn has_history(&self) -> bool {
        self.previous.is_some()
    }
}

impl Default for MotionAnalyzer {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

/// Average the grid into three bands of `width / 3` columns; leftover columns
/// belong to the right band.
fn fold_zones(grid: &[f32], width: u32, height: u32) -> Zones {
    let band = width / 3;
    let mut sums = [0.0f32; 3];
    let mut counts = [0u32; 3];

    for y in 0..height {
        for x in 0..width {
            let slot = if x < band {
                0
            } else if x < band * 2 {
                1
            } else {
                2
            };
            sums[slot] += grid[(y * width + x) as usize];
            counts[slot] += 1;
        }
    }

    let mean = |i: usize| {
        if counts[i] == 0 {
            0.0
        } else {
            sums[i] / counts[i] as f32
        }
    };

    Zones {
        left: mean(0),
        center: mean(1),
        right: mean(2),
    }
}
