/// Video detection request sent to the content script of the active tab

use crate::error::TransportError;
use serde::{Deserialize, Serialize};

/// Message name the content script listens for
pub const DETECT_VIDEO: &str = "detectVideo";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectRequest {
    pub message: String,
}

impl DetectRequest {
    pub fn detect_video() -> DetectRequest {
        DetectRequest {
            message: DETECT_VIDEO.to_string(),
        }
    }
}

/// Content script reply: `{"status":"success"}` or `{"status":"error","message":"..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DetectResponse {
    Success,
    Error { message: String },
}

#[allow(async_fn_in_trait)]
pub trait VideoDetector {
    async fn detect_video(&self) -> Result<DetectResponse, TransportError>;
}

#[cfg(target_arch = "wasm32")]
pub use chrome::ChromeDetector;

#[cfg(target_arch = "wasm32")]
mod chrome {
    use super::*;
    use crate::bridge;

    /// Sends the detection request to the active tab of the current window
    #[derive(Clone, Copy, Default)]
    pub struct ChromeDetector;

    impl VideoDetector for ChromeDetector {
        async fn detect_video(&self) -> Result<DetectResponse, TransportError> {
            let request = serde_wasm_bindgen::to_value(&DetectRequest::detect_video())
                .map_err(|e| TransportError::Bridge(format!("{:?}", e)))?;

            let response = bridge::sendToActiveTab(request)
                .await
                .map_err(|e| TransportError::Bridge(format!("{:?}", e)))?;

            serde_wasm_bindgen::from_value(response)
                .map_err(|e| TransportError::Decode(format!("{:?}", e)))
        }
    }
}
