//! Session states, inbound events, outbound replies and effects.
//!
//! [`SessionState`] is the closed set of conversation phases.  A session
//! task feeds [`SessionEvent`]s into a
//! [`SessionStateMachine`](super::SessionStateMachine), which answers with
//! [`Effect`]s: replies for the transport plus job submissions and
//! cancellations for the executor.

use std::fmt;

use crate::imaging::StylizedImage;
use crate::inference::JobError;
use crate::style::{StyleDescriptor, StyleExample, StyleId};

// ---------------------------------------------------------------------------
// JobToken
// ---------------------------------------------------------------------------

/// Correlates a submitted job with the session state that requested it.
///
/// Tokens are unique within one session; a completion whose token does not
/// match the session's current job is stale and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobToken(pub(crate) u64);

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Conversation phase of one session.
///
/// ```text
/// Idle ──restart──▶ AwaitingStyleSelection ──styleChosen(n)──▶ AwaitingPhoto
///                        ▲                                        │
///                        │                              photoReceived (valid)
///                        │                                        ▼
///                        └──────── jobSucceeded / jobFailed ── Processing
///
/// any state ──restart──▶ AwaitingStyleSelection   (cancels the in-flight job)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No conversation has been started yet.
    #[default]
    Idle,

    /// The style menu has been shown; waiting for a number.
    AwaitingStyleSelection,

    /// A style is selected; waiting for a photo.
    AwaitingPhoto { style: StyleDescriptor },

    /// A job is running for this session.
    Processing {
        style: StyleDescriptor,
        token: JobToken,
    },
}

impl SessionState {
    /// `true` while a job is in flight.
    ///
    /// ```
    /// use neural_style::session::SessionState;
    ///
    /// assert!(!SessionState::Idle.is_busy());
    /// assert!(!SessionState::AwaitingStyleSelection.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::Processing { .. })
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::AwaitingStyleSelection => "AwaitingStyleSelection",
            SessionState::AwaitingPhoto { .. } => "AwaitingPhoto",
            SessionState::Processing { .. } => "Processing",
        }
    }

    /// The style chosen for the current cycle, if any.
    pub fn selected_style(&self) -> Option<&StyleDescriptor> {
        match self {
            SessionState::AwaitingPhoto { style } | SessionState::Processing { style, .. } => {
                Some(style)
            }
            _ => None,
        }
    }

    pub fn job_token(&self) -> Option<JobToken> {
        match self {
            SessionState::Processing { token, .. } => Some(*token),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Everything a session reacts to, in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Start (or start over) the conversation.
    Restart,

    /// Raw user text naming a style number.
    StyleChosen(String),

    /// Raw uploaded photo bytes.
    PhotoReceived(Vec<u8>),

    /// The user asked for a sample image of every style.
    ShowExamples,

    /// A submitted job finished.  Delivered through the same queue as user
    /// events.
    JobFinished {
        token: JobToken,
        result: Result<StylizedImage, JobError>,
    },
}

impl SessionEvent {
    /// `StyleChosen` for a numeric choice.
    pub fn style(n: u32) -> Self {
        SessionEvent::StyleChosen(n.to_string())
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionEvent::Restart => "restart",
            SessionEvent::StyleChosen(_) => "styleChosen",
            SessionEvent::PhotoReceived(_) => "photoReceived",
            SessionEvent::ShowExamples => "showExamples",
            SessionEvent::JobFinished { .. } => "jobFinished",
        }
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Semantic outbound message; the transport decides how to render it.
#[derive(Debug, Clone)]
pub enum Reply {
    /// The available styles, after a restart.
    StyleMenu(Vec<StyleDescriptor>),

    /// One sample image per style that has one, in style order.
    Examples(Vec<StyleExample>),

    /// A style was accepted.
    StyleSelected(StyleDescriptor),

    /// The text was not a number between 1 and `available`.
    InvalidStyleInput { input: String, available: usize },

    /// A photo arrived before any style was chosen.
    ChooseStyleFirst,

    /// The upload is not an image in a supported format.
    UnsupportedImage,

    /// A job was queued for this session.
    ProcessingStarted,

    /// The session is busy; the event was ignored.
    WorkInProgress,

    /// The finished stylization.
    StylizedResult(StylizedImage),

    /// The job failed; the session is ready for a new style.
    JobFailed(JobError),

    /// Nothing has been started yet; the user must restart first.
    NotStarted,

    /// The style catalog could not be read.
    ServiceUnavailable(String),
}

// ---------------------------------------------------------------------------
// Effect
// ---------------------------------------------------------------------------

/// Side effect requested by the state machine, carried out by the session
/// task in order.
#[derive(Debug, Clone)]
pub enum Effect {
    Reply(Reply),

    /// Queue a job; its completion must come back as
    /// [`SessionEvent::JobFinished`] with the same token.
    Submit {
        token: JobToken,
        style: StyleId,
        photo: Vec<u8>,
    },

    /// Abandon a job.  Its result, if it still arrives, is stale.
    Cancel(JobToken),
}
