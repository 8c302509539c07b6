use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized rectangle, each edge a fraction of image height or width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub ymin: f64,
    pub xmin: f64,
    pub ymax: f64,
    pub xmax: f64,
}

impl BoundingBox {
    pub const FULL: BoundingBox = BoundingBox {
        ymin: 0.0,
        xmin: 0.0,
        ymax: 1.0,
        xmax: 1.0,
    };

    pub fn new(ymin: f64, xmin: f64, ymax: f64, xmax: f64) -> Result<Self, String> {
        for (label, v) in [("ymin", ymin), ("xmin", xmin), ("ymax", ymax), ("xmax", xmax)] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(format!("{label} out of range [0,1]: {v}"));
            }
        }
        if ymin > ymax {
            return Err(format!("ymin {ymin} greater than ymax {ymax}"));
        }
        if xmin > xmax {
            return Err(format!("xmin {xmin} greater than xmax {xmax}"));
        }
        Ok(Self {
            ymin,
            xmin,
            ymax,
            xmax,
        })
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }
}

impl TryFrom<[f64; 4]> for BoundingBox {
    type Error = String;

    fn try_from(raw: [f64; 4]) -> Result<Self, Self::Error> {
        let [ymin, xmin, ymax, xmax] = raw;
        Self::new(ymin, xmin, ymax, xmax)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.ymin, b.xmin, b.ymax, b.xmax]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub name: String,
    pub description: String,
    pub box_2d: BoundingBox,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub objects: Vec<DetectedObject>,
}

impl AnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }
}

/// The two model variants offered to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ModelKind {
    /// gemini-2.5-flash: fast
    #[default]
    Flash,
    /// gemini-3-pro-preview: high accuracy
    Pro,
}

impl ModelKind {
    pub fn model_id(self) -> &'static str {
        match self {
            Self::Flash => "gemini-2.5-flash",
            Self::Pro => "gemini-3-pro-preview",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_id())
    }
}
