use crate::error::AnalysisError;
use crate::geometry::{crop_rect, CropRect};
use crate::model::{BoundingBox, DetectedObject};
use crate::request::strip_data_uri_prefix;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use std::thread;
use tracing::{debug, warn};

/// Upper bound on concurrent crop threads.
pub const MAX_CROP_WORKERS: usize = 8;

/// Lossless crop of one detected object.
#[derive(Debug, Clone)]
pub struct CropImage {
    pub rect: CropRect,
    pub png: Vec<u8>,
}

impl CropImage {
    pub fn to_data_uri(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.png))
    }
}

#[derive(Debug, Clone)]
pub enum Thumbnail {
    Ready(CropImage),
    Placeholder { reason: String },
}

impl Thumbnail {
    fn placeholder(reason: impl Into<String>) -> Self {
        Self::Placeholder {
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// A detected object paired with its thumbnail slot.
#[derive(Debug, Clone)]
pub struct ObjectCard {
    pub index: usize,
    pub object: DetectedObject,
    pub thumbnail: Thumbnail,
}

/// Decodes a data URI (or bare base64) into an image.
pub fn decode_image(image: &str) -> Result<DynamicImage, AnalysisError> {
    let bytes = STANDARD
        .decode(strip_data_uri_prefix(image).trim())
        .map_err(|e| AnalysisError::Resource(format!("invalid base64 image data: {e}")))?;
    image::load_from_memory(&bytes)
        .map_err(|e| AnalysisError::Resource(format!("failed to decode image: {e}")))
}

/// Cuts the box out of the full-resolution image, no padding.
pub fn crop_object(image: &DynamicImage, b: &BoundingBox) -> Result<CropImage, AnalysisError> {
    let (w, h) = image.dimensions();
    let rect = crop_rect(b, w, h)
        .ok_or_else(|| AnalysisError::Resource("source image has no pixels".to_string()))?;
    let region = image.crop_imm(rect.x, rect.y, rect.width, rect.height);

    let mut png = Vec::new();
    region
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| AnalysisError::Resource(format!("failed to encode crop: {e}")))?;
    debug!(?rect, bytes = png.len(), "cropped object");
    Ok(CropImage { rect, png })
}

/// Crops in batches of at most `MAX_CROP_WORKERS` scoped threads; results
/// keep object order.
fn crop_all(image: &DynamicImage, objects: &[DetectedObject]) -> Vec<Thumbnail> {
    let mut thumbnails = Vec::with_capacity(objects.len());
    for (batch_idx, batch) in objects.chunks(MAX_CROP_WORKERS).enumerate() {
        thread::scope(|s| {
            let handles: Vec<_> = batch
                .iter()
                .map(|obj| s.spawn(move || crop_object(image, &obj.box_2d)))
                .collect();
            for (offset, handle) in handles.into_iter().enumerate() {
                let idx = batch_idx * MAX_CROP_WORKERS + offset;
                let thumbnail = match handle.join() {
                    Ok(Ok(crop)) => Thumbnail::Ready(crop),
                    Ok(Err(err)) => {
                        warn!(index = idx, error = %err, "crop skipped");
                        Thumbnail::placeholder(err.to_string())
                    }
                    Err(_) => {
                        warn!(index = idx, "crop worker panicked");
                        Thumbnail::placeholder("crop worker panicked")
                    }
                };
                thumbnails.push(thumbnail);
            }
        });
    }
    thumbnails
}

/// One card per object, decoding `source` first.
pub fn build_cards(source: &str, objects: &[DetectedObject]) -> Vec<ObjectCard> {
    build_cards_from(&decode_image(source), objects)
}

/// One card per object from an already decoded source. Each crop fills its
/// own slot; an undecodable source leaves every card as a placeholder.
pub fn build_cards_from(
    decoded: &Result<DynamicImage, AnalysisError>,
    objects: &[DetectedObject],
) -> Vec<ObjectCard> {
    let thumbnails: Vec<Thumbnail> = match decoded {
        Ok(image) => crop_all(image, objects),
        Err(err) => {
            warn!(error = %err, objects = objects.len(), "source image unreadable, cards left as placeholders");
            objects
                .iter()
                .map(|_| Thumbnail::placeholder(err.to_string()))
                .collect()
        }
    };

    objects
        .iter()
        .cloned()
        .zip(thumbnails)
        .enumerate()
        .map(|(index, (object, thumbnail))| ObjectCard {
            index,
            object,
            thumbnail,
        })
        .collect()
}
