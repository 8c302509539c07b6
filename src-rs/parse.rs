use crate::error::AnalysisError;
use crate::model::{AnalysisResult, BoundingBox, DetectedObject};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};

/// Coordinates above 1 but within this bound are read as the provider's 0-1000 grid.
const PER_MILLE_SCALE: f64 = 1000.0;
/// Coordinates above this are grid values, not overshooting ratios.
const PER_MILLE_THRESHOLD: f64 = 2.0;

#[derive(Deserialize)]
struct RawDetection {
    name: String,
    description: String,
    box_2d: Vec<f64>,
}

/// Turns model response text into an `AnalysisResult`.
///
/// Accepts `{"objects": [...]}` or a bare array of objects. Boxes are
/// rescaled, clamped and reordered into a valid `BoundingBox`.
pub fn parse_response(text: Option<&str>) -> Result<AnalysisResult, AnalysisError> {
    let raw = text.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }

    let clean = strip_code_fence(raw);
    let value: Value = serde_json::from_str(clean).map_err(|e| {
        error!(error = %e, response = %clean, "response is not JSON");
        AnalysisError::MalformedResponse(format!("invalid JSON: {e}"))
    })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("objects") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(malformed(clean, format!("'objects' is not an array: {other}")));
            }
            None => return Err(malformed(clean, "missing 'objects' field".to_string())),
        },
        other => {
            return Err(malformed(clean, format!("unexpected top-level value: {other}")));
        }
    };

    let mut objects = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let det: RawDetection = serde_json::from_value(item)
            .map_err(|e| malformed(clean, format!("objects[{idx}]: {e}")))?;
        let coords: [f64; 4] = det.box_2d.as_slice().try_into().map_err(|_| {
            malformed(
                clean,
                format!("objects[{idx}].box_2d has {} entries, expected 4", det.box_2d.len()),
            )
        })?;
        if coords.iter().any(|v| !v.is_finite()) {
            return Err(malformed(clean, format!("objects[{idx}].box_2d is not finite")));
        }

        let (box_2d, adjusted) = normalize_box(coords);
        if adjusted {
            let fixed: [f64; 4] = box_2d.into();
            warn!(index = idx, raw = ?coords, fixed = ?fixed, "adjusted bounding box");
        }
        objects.push(DetectedObject {
            name: det.name,
            description: det.description,
            box_2d,
        });
    }

    Ok(AnalysisResult { objects })
}

fn malformed(response: &str, detail: String) -> AnalysisError {
    error!(detail = %detail, response = %response, "response does not match schema");
    AnalysisError::MalformedResponse(detail)
}

fn strip_code_fence(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Rescales 0-1000 boxes, clamps to [0,1] and swaps inverted edges.
/// Ratios that only overshoot slightly are clamped, not rescaled.
/// The flag is set when the result differs from the input.
pub fn normalize_box(raw: [f64; 4]) -> (BoundingBox, bool) {
    let mut v = raw;
    let largest = v.iter().copied().fold(f64::MIN, f64::max);
    if largest > PER_MILLE_THRESHOLD && largest <= PER_MILLE_SCALE {
        for c in &mut v {
            *c /= PER_MILLE_SCALE;
        }
    }
    for c in &mut v {
        *c = c.clamp(0.0, 1.0);
    }

    let [y0, x0, y1, x1] = v;
    let fixed = BoundingBox {
        ymin: y0.min(y1),
        xmin: x0.min(x1),
        ymax: y0.max(y1),
        xmax: x0.max(x1),
    };
    (fixed, <[f64; 4]>::from(fixed) != raw)
}
