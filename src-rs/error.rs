use thiserror::Error;

pub const MSG_MISSING_API_KEY: &str = "APIキーを入力してください。";
pub const MSG_ANALYSIS_FAILED: &str = "画像の解析中にエラーが発生しました。";
pub const MSG_IMAGE_UNREADABLE: &str = "画像を読み込めませんでした。";

/// Failures on the analyze path: request building, the provider call,
/// response parsing and crop decoding.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("empty response from vision model")]
    EmptyResponse,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("image resource error: {0}")]
    Resource(String),
}

impl AnalysisError {
    /// Text shown to the user in place of the raw error.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(_) => MSG_MISSING_API_KEY.to_string(),
            Self::Transport(message) => {
                let message = message.trim();
                if message.is_empty() {
                    MSG_ANALYSIS_FAILED.to_string()
                } else {
                    message.to_string()
                }
            }
            Self::EmptyResponse | Self::MalformedResponse(_) => MSG_ANALYSIS_FAILED.to_string(),
            Self::Resource(_) => MSG_IMAGE_UNREADABLE.to_string(),
        }
    }
}

// The request URL carries the API key as a query parameter.
impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.without_url().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_keeps_provider_message() {
        let err = AnalysisError::Transport("API key not valid".to_string());
        assert_eq!(err.user_message(), "API key not valid");
    }

    #[test]
    fn blank_transport_message_falls_back_to_generic() {
        let err = AnalysisError::Transport("   ".to_string());
        assert_eq!(err.user_message(), MSG_ANALYSIS_FAILED);
    }

    #[test]
    fn parse_failures_hide_raw_detail() {
        let err = AnalysisError::MalformedResponse("expected value at line 1".to_string());
        assert_eq!(err.user_message(), MSG_ANALYSIS_FAILED);
        assert_eq!(AnalysisError::EmptyResponse.user_message(), MSG_ANALYSIS_FAILED);
    }
}
