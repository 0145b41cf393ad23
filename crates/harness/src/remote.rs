use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote end rejected command ({error}): {message}")]
    Protocol { error: String, message: String },
    #[error("page script failed: {0}")]
    Script(String),
    #[error("unexpected response shape: {0}")]
    Decode(String),
}

/// A browser page that can run scripts on behalf of the harness.
///
/// Async scripts receive a completion callback as their last argument and
/// settle with `{"ok": value}` or `{"error": message}`.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), RemoteError>;

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, RemoteError>;

    async fn execute_async(&self, script: &str, args: Vec<Value>) -> Result<Value, RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}

/// Unwrap the `{"ok": ..}` / `{"error": ..}` envelope async page scripts settle with.
pub fn settle_script_result(value: Value) -> Result<Value, RemoteError> {
    match value {
        Value::Object(mut map) => {
            if let Some(error) = map.remove("error") {
                let message = match error {
                    Value::String(message) => message,
                    other => other.to_string(),
                };
                return Err(RemoteError::Script(message));
            }
            map.remove("ok")
                .ok_or_else(|| RemoteError::Decode("script result has neither ok nor error".into()))
        }
        other => Err(RemoteError::Decode(format!("script result is not an object: {other}"))),
    }
}
