//! Base types shared by the streaming session and its transports.
//!
//! This module defines the error taxonomy, the monotonic lifecycle state
//! machine, speaker roles, and the observation events a session emits to
//! external consumers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

use crate::core::tools::ToolError;

use super::sonic::messages::CodecError;
use super::transport::TransportError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while driving a streaming session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The duplex channel could not be opened
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Operation is not valid in the current lifecycle state
    #[error("Invalid state: expected {expected}, found {found}")]
    InvalidState {
        expected: LifecycleState,
        found: LifecycleState,
    },

    /// Session is not active
    #[error("Session is not active (state: {0})")]
    NotActive(LifecycleState),

    /// Caller violated an ordering precondition
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Wire decode error
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The model broke the event protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A tool handler failed while running
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Lifecycle
// =============================================================================

/// Lifecycle of a streaming session.
///
/// Variants are ordered; a session only ever moves to a later variant.
/// `Failed` is the inactive state entered when the response receiver stops
/// on a fatal error, and still allows `close()` to run.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    #[default]
    Uninitialized = 0,
    Initializing = 1,
    Active = 2,
    Failed = 3,
    Closing = 4,
    Closed = 5,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Initializing,
            2 => LifecycleState::Active,
            3 => LifecycleState::Failed,
            4 => LifecycleState::Closing,
            _ => LifecycleState::Closed,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "Uninitialized"),
            LifecycleState::Initializing => write!(f, "Initializing"),
            LifecycleState::Active => write!(f, "Active"),
            LifecycleState::Failed => write!(f, "Failed"),
            LifecycleState::Closing => write!(f, "Closing"),
            LifecycleState::Closed => write!(f, "Closed"),
        }
    }
}

/// Lock-free cell holding a [`LifecycleState`] that only moves forward.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it is strictly later than the current state.
    ///
    /// Returns the state observed before the attempt, or `None` when the
    /// transition was refused.
    pub fn advance(&self, next: LifecycleState) -> Option<LifecycleState> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (next as u8 > current).then_some(next as u8)
            })
            .ok()
            .map(LifecycleState::from_u8)
    }

    /// Move from exactly `from` to `to`.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        from < to
            && self
                .0
                .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }
}

// =============================================================================
// Roles and Observation Events
// =============================================================================

/// Role attached to content segments on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpeakerRole {
    User,
    Assistant,
    System,
    Tool,
    /// Any role this crate does not know about
    #[serde(other)]
    Other,
}

impl fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeakerRole::User => write!(f, "USER"),
            SpeakerRole::Assistant => write!(f, "ASSISTANT"),
            SpeakerRole::System => write!(f, "SYSTEM"),
            SpeakerRole::Tool => write!(f, "TOOL"),
            SpeakerRole::Other => write!(f, "OTHER"),
        }
    }
}

/// Events published on a session's observation channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    /// Text the model produced or transcribed, tagged with its role
    Transcript { role: SpeakerRole, text: String },
    /// Every inbound message that parsed as JSON
    Event(serde_json::Value),
    /// Inbound payload that was not valid JSON
    Raw(String),
    /// The response receiver stopped; no further output will arrive
    Stopped { reason: String },
}
