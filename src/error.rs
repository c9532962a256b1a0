use std::fmt;

#[derive(Debug)]
pub enum RenderError {
    /// Pixel format or dimension rejected before any native resource was
    /// acquired.
    InvalidConfig(String),

    /// Every construction strategy available for a mode failed.
    RenderingSubsystem(String),

    /// The accelerated path failed its capability or creatability check.
    BackendUnavailable(String),

    /// Capture, present or resize was requested with no live backend.
    NotInitialized,

    /// The operation is structurally disallowed for this object or backend.
    UnsupportedOperation(&'static str),

    /// A single present/resize call failed. Backends log and absorb this.
    TransientRender(String),

    InvalidTarget(String),

    /// Pixel operation between buffers that do not share a pixel format.
    FormatMismatch,

    BufferOverflow,

    Timeout,

    /// Control-channel peer failed the executable identity check.
    PeerRejected(String),

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderErrorClass {
    InvalidInput,
    Unsupported,
    Transient,
    Fatal,
}

impl RenderError {
    pub fn class(&self) -> RenderErrorClass {
        match self {
            Self::InvalidConfig(_) | Self::InvalidTarget(_) | Self::FormatMismatch => {
                RenderErrorClass::InvalidInput
            }
            Self::BackendUnavailable(_) | Self::UnsupportedOperation(_) | Self::NotInitialized => {
                RenderErrorClass::Unsupported
            }
            Self::TransientRender(_) | Self::Timeout => RenderErrorClass::Transient,
            Self::RenderingSubsystem(_)
            | Self::BufferOverflow
            | Self::PeerRejected(_)
            | Self::Platform(_) => RenderErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), RenderErrorClass::Transient)
    }

    /// Wrap a native failure that happened while an already-live backend
    /// was serving a single frame.
    pub(crate) fn transient(context: &str, err: &RenderError) -> Self {
        Self::TransientRender(format!("{context}: {err}"))
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(message) => write!(f, "invalid render configuration: {message}"),
            Self::RenderingSubsystem(message) => {
                write!(f, "rendering subsystem could not be created: {message}")
            }
            Self::BackendUnavailable(message) => {
                write!(f, "render backend is not available: {message}")
            }
            Self::NotInitialized => write!(
                f,
                "can't perform operation because the render coordinator is not initialized yet"
            ),
            Self::UnsupportedOperation(operation) => {
                write!(f, "operation is not supported: {operation}")
            }
            Self::TransientRender(message) => write!(f, "frame was not rendered: {message}"),
            Self::InvalidTarget(message) => write!(f, "invalid drawing surface: {message}"),
            Self::FormatMismatch => write!(f, "pixel formats of the two buffers differ"),
            Self::BufferOverflow => write!(f, "pixel buffer size overflow"),
            Self::Timeout => write!(f, "timed out waiting for a control connection"),
            Self::PeerRejected(message) => {
                write!(f, "control client rejected: {message}")
            }
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
