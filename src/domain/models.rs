use serde::{Deserialize, Serialize};

/// A peripheral surfaced by discovery. Only advertisements carrying a
/// non-empty local name become descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralDescriptor {
    pub id: String,
    pub name: String,
    pub signal_strength: Option<i16>,
}

/// Single-slot connection model: at most one peripheral at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected(PeripheralDescriptor),
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn peripheral(&self) -> Option<&PeripheralDescriptor> {
        match self {
            Self::Connected(device) => Some(device),
            _ => None,
        }
    }
}

/// Latest decoded sensor value. `NoValue` is distinct from a reading of zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TelemetryReading {
    #[default]
    NoValue,
    Value(f64),
}

impl TelemetryReading {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::NoValue => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }
}

/// Events pushed to the presentation layer by the session manager.
#[derive(Debug, Clone)]
pub enum AppEvent {
    DeviceFound(PeripheralDescriptor),
    ConnectionState(ConnectionState),
    Telemetry(TelemetryReading),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
