use crate::error::AnalysisError;
use crate::gemini::VisionClient;
use crate::model::{AnalysisResult, ModelKind};
use crate::parse::parse_response;
use crate::request::{build_request, DEFAULT_TARGET};
use std::fmt;
use tracing::{error, info};

pub const MSG_NO_OBJECTS: &str = "該当する物体が見つかりませんでした。";

/// What a call to `Session::analyze` ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzeOutcome {
    /// At least one object was detected.
    Detected(usize),
    /// The model answered but found nothing matching the target.
    NoObjects,
    /// The request failed; the message is also stored in `Session::error`.
    Failed(String),
    /// No image selected, nothing was sent.
    NoImage,
    /// An analysis is already outstanding.
    Busy,
}

/// Everything the user has entered plus the state of the last analysis.
/// Lives in memory only.
#[derive(Clone)]
pub struct Session {
    pub api_key: String,
    pub model: ModelKind,
    pub target: String,
    pub selected_image: Option<String>,
    pub is_analyzing: bool,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("target", &self.target)
            .field("has_image", &self.selected_image.is_some())
            .field("is_analyzing", &self.is_analyzing)
            .field("result", &self.result)
            .field("error", &self.error)
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: ModelKind::default(),
            target: DEFAULT_TARGET.to_string(),
            selected_image: None,
            is_analyzing: false,
            result: None,
            error: None,
        }
    }
}

impl Session {
    pub fn new(api_key: impl Into<String>, model: ModelKind, target: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model,
            target: target.into(),
            ..Self::default()
        }
    }

    /// A new image invalidates the previous result and error.
    pub fn select_image(&mut self, data_uri: impl Into<String>) {
        self.selected_image = Some(data_uri.into());
        self.result = None;
        self.error = None;
    }

    pub fn reset_image(&mut self) {
        self.selected_image = None;
        self.result = None;
        self.error = None;
        self.is_analyzing = false;
    }

    /// Runs one analysis of the selected image.
    ///
    /// The previous result is dropped before the call. Every failure ends up
    /// as a user message in `self.error`; the in-progress flag is always
    /// cleared on return.
    pub async fn analyze(&mut self, client: &dyn VisionClient) -> AnalyzeOutcome {
        if self.is_analyzing {
            return AnalyzeOutcome::Busy;
        }
        if self.api_key.trim().is_empty() {
            let err = AnalysisError::Configuration("API key is not set".to_string());
            self.error = Some(err.user_message());
            return AnalyzeOutcome::Failed(err.user_message());
        }
        let Some(image) = self.selected_image.clone() else {
            return AnalyzeOutcome::NoImage;
        };

        self.is_analyzing = true;
        self.error = None;
        self.result = None;

        let outcome = run_analysis(client, &self.api_key, self.model, &image, &self.target).await;
        self.is_analyzing = false;

        match outcome {
            Ok(result) => {
                info!(objects = result.len(), model = %self.model, "analysis finished");
                let outcome = if result.is_empty() {
                    AnalyzeOutcome::NoObjects
                } else {
                    AnalyzeOutcome::Detected(result.len())
                };
                self.result = Some(result);
                outcome
            }
            Err(err) => {
                error!(error = %err, "analysis failed");
                let message = err.user_message();
                self.error = Some(message.clone());
                AnalyzeOutcome::Failed(message)
            }
        }
    }
}

async fn run_analysis(
    client: &dyn VisionClient,
    api_key: &str,
    model: ModelKind,
    image: &str,
    target: &str,
) -> Result<AnalysisResult, AnalysisError> {
    let request = build_request(api_key, model, image, target)?;
    let text = client.generate_content(&request).await?;
    parse_response(text.as_deref())
}
