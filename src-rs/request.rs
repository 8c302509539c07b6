use crate::error::AnalysisError;
use crate::model::ModelKind;
use serde_json::{json, Value};
use std::fmt;

pub const DEFAULT_TARGET: &str = "すべて";
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// One outbound call to the vision model.
#[derive(Clone)]
pub struct AnalysisRequest {
    pub api_key: String,
    pub model: ModelKind,
    pub mime_type: String,
    pub image_base64: String,
    pub prompt: String,
    pub response_schema: Value,
}

impl fmt::Debug for AnalysisRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRequest")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("mime_type", &self.mime_type)
            .field("image_base64_len", &self.image_base64.len())
            .field("prompt", &self.prompt)
            .finish()
    }
}

pub fn build_request(
    api_key: &str,
    model: ModelKind,
    image: &str,
    target: &str,
) -> Result<AnalysisRequest, AnalysisError> {
    if api_key.trim().is_empty() {
        return Err(AnalysisError::Configuration(
            "API key is not set".to_string(),
        ));
    }

    Ok(AnalysisRequest {
        api_key: api_key.trim().to_string(),
        model,
        mime_type: data_uri_mime(image).unwrap_or(DEFAULT_MIME_TYPE).to_string(),
        image_base64: strip_data_uri_prefix(image).to_string(),
        prompt: build_prompt(target),
        response_schema: response_schema(),
    })
}

/// `data:image/jpeg;base64,XXXX` -> `XXXX`. Strings without a comma pass through.
pub fn strip_data_uri_prefix(image: &str) -> &str {
    match image.split_once(',') {
        Some((_, payload)) if !payload.is_empty() => payload,
        _ => image,
    }
}

/// MIME type from a `data:<mime>;base64,` header, if there is one.
pub fn data_uri_mime(image: &str) -> Option<&str> {
    let (header, _) = image.split_once(',')?;
    let rest = header.strip_prefix("data:")?;
    let mime = rest.split(';').next()?.trim();
    if mime.is_empty() {
        None
    } else {
        Some(mime)
    }
}

pub fn build_prompt(target: &str) -> String {
    let target = match target.trim() {
        "" => DEFAULT_TARGET,
        t => t,
    };
    format!(
        "この画像に写っている「{target}」に関連する物体を検出してください。\n\
         各物体について、以下の情報を含むJSONを返してください：\n\
         1. box_2d: バウンディングボックス座標 [ymin, xmin, ymax, xmax] (0から1の範囲)。\n\
         2. name: 物体の名称（日本語）。\n\
         3. description: その物体の詳細な解説（日本語）。図鑑のようなトーンで、特徴や用途などを50文字〜100文字程度で説明してください。\n\
         \n\
         画像内に該当する物体がない場合は、空の配列を返してください。"
    )
}

/// Structured-output schema sent with every request.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "objects": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": {"type": "STRING"},
                        "description": {"type": "STRING"},
                        "box_2d": {
                            "type": "ARRAY",
                            "items": {"type": "NUMBER"},
                            "description": "ymin, xmin, ymax, xmax"
                        }
                    },
                    "required": ["name", "description", "box_2d"]
                }
            }
        },
        "required": ["objects"]
    })
}
