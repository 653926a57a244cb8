//! Error types shared across Smilescope crates.

/// Top-level error type for Smilescope operations.
#[derive(Debug, thiserror::Error)]
pub enum SmilescopeError {
    /// The host refused or failed to list capture devices.
    #[error("Device enumeration failed: {message}")]
    DeviceEnumeration { message: String },

    /// Permission refused, device missing, or device busy.
    #[error("Camera access denied for {device_id}: {message}")]
    StreamAccessDenied { device_id: String, message: String },

    /// No stream satisfies the requested settings in any form.
    #[error("Stream constraints cannot be satisfied: {message}")]
    StreamConstraint { message: String },

    /// Another lifecycle operation is in flight.
    #[error("Camera session is busy; {operation} rejected until the current operation resolves")]
    SessionBusy { operation: &'static str },

    #[error("Camera is not streaming")]
    NotStreaming,

    #[error("No camera device available")]
    NoDevice,

    #[error("Camera session is already streaming")]
    AlreadyStreaming,

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Platform error: {message}")]
    Platform { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SmilescopeError.
pub type SmilescopeResult<T> = Result<T, SmilescopeError>;

/// Coarse classification used by callers to pick a user-facing affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceEnumeration,
    AccessDenied,
    Constraint,
    Busy,
    NotStreaming,
    NoDevice,
    InvalidState,
    Internal,
}

impl SmilescopeError {
    pub fn enumeration(msg: impl Into<String>) -> Self {
        Self::DeviceEnumeration {
            message: msg.into(),
        }
    }

    pub fn access_denied(device_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::StreamAccessDenied {
            device_id: device_id.into(),
            message: msg.into(),
        }
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::StreamConstraint {
            message: msg.into(),
        }
    }

    pub fn busy(operation: &'static str) -> Self {
        Self::SessionBusy { operation }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceEnumeration { .. } => ErrorKind::DeviceEnumeration,
            Self::StreamAccessDenied { .. } => ErrorKind::AccessDenied,
            Self::StreamConstraint { .. } => ErrorKind::Constraint,
            Self::SessionBusy { .. } => ErrorKind::Busy,
            Self::NotStreaming => ErrorKind::NotStreaming,
            Self::NoDevice => ErrorKind::NoDevice,
            Self::AlreadyStreaming => ErrorKind::InvalidState,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether the user can fix this by granting access, plugging in a
    /// camera, or relaxing settings.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AccessDenied | ErrorKind::NoDevice | ErrorKind::Constraint
        )
    }
}
