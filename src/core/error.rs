use thiserror::Error;

/// Errors that can cross the HTTP boundary of a generation request.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required field is missing or empty. The caller can fix this.
    #[error("{0}")]
    Validation(String),

    /// A credential or setting is missing. The operator has to fix this.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{service} error: {message}")]
    Upstream {
        service: &'static str,
        message: String,
        status: Option<u16>,
        transient: bool,
    },

    /// The model answered, but not with anything we could coerce into the expected shape.
    #[error("malformed model output: {message}")]
    Parse { message: String, raw: String },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        AppError::Configuration(message.into())
    }

    pub fn parse(message: impl Into<String>, raw: &str) -> Self {
        AppError::Parse {
            message: message.into(),
            raw: raw.to_string(),
        }
    }

    /// Builds an upstream error from an HTTP status. 5xx is transient, everything else is not.
    pub fn upstream_status(service: &'static str, status: u16, message: impl Into<String>) -> Self {
        AppError::Upstream {
            service,
            message: message.into(),
            status: Some(status),
            transient: status >= 500,
        }
    }

    /// Transport failures (connect, reset, timeout) are always worth another attempt.
    pub fn transport(service: &'static str, message: impl Into<String>) -> Self {
        AppError::Upstream {
            service,
            message: message.into(),
            status: None,
            transient: true,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Upstream { transient: true, .. })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            _ => 500,
        }
    }

    /// Server-side log line. Carries the raw model output for `Parse`.
    pub fn diagnostic(&self) -> String {
        match self {
            AppError::Parse { raw, .. } => format!("{}. Raw output: {}", self, raw),
            _ => self.to_string(),
        }
    }

    /// The message that is safe to hand back to a client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::Configuration(msg) => format!("Server configuration error: {}", msg),
            AppError::Upstream { service, message, .. } => {
                format!("{} request failed: {}", service, message)
            }
            AppError::Parse { .. } => {
                "The model returned output that could not be understood. Please try again."
                    .to_string()
            }
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl AppError {
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return AppError::upstream_status(service, status.as_u16(), err.to_string());
        }
        if err.is_timeout() {
            return AppError::transport(service, "request timed out");
        }
        AppError::transport(service, err.to_string())
    }
}
