//! Per-session transition table.
//!
//! The machine is synchronous and owns no tasks: [`handle`] maps one event
//! to a new state plus a list of [`Effect`]s, and the session task that owns
//! the machine carries the effects out.  Style validation consults the
//! catalog; photo validation only reads the image header, so a photo whose
//! body turns out to be corrupt comes back from the job as a decode failure
//! and is answered the same way as a bad header.
//!
//! [`handle`]: SessionStateMachine::handle

use std::sync::Arc;

use super::state::{Effect, JobToken, Reply, SessionEvent, SessionState};
use crate::imaging::{ImagePipeline, StylizedImage};
use crate::inference::JobError;
use crate::style::{StyleCatalog, StyleDescriptor, StyleId};
use crate::transport::SessionKey;

pub struct SessionStateMachine {
    key: SessionKey,
    state: SessionState,
    catalog: Arc<StyleCatalog>,
    pipeline: ImagePipeline,
    next_token: u64,
}

impl std::fmt::Debug for SessionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateMachine")
            .field("key", &self.key)
            .field("state", &self.state.label())
            .finish_non_exhaustive()
    }
}

impl SessionStateMachine {
    pub fn new(key: SessionKey, catalog: Arc<StyleCatalog>, pipeline: ImagePipeline) -> Self {
        Self {
            key,
            state: SessionState::Idle,
            catalog,
            pipeline,
            next_token: 0,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Apply one event and return the effects to perform, in order.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        let before = self.state.label();
        let label = event.label();
        let effects = self.transition(event);
        log::debug!(
            "session: {} {before} --{label}--> {}",
            self.key,
            self.state.label()
        );
        effects
    }

    fn transition(&mut self, event: SessionEvent) -> Vec<Effect> {
        match event {
            SessionEvent::Restart => self.restart(),
            SessionEvent::JobFinished { token, result } => self.job_finished(token, result),
            _ if self.state.is_busy() => vec![Effect::Reply(Reply::WorkInProgress)],
            SessionEvent::StyleChosen(input) => self.style_chosen(&input),
            SessionEvent::PhotoReceived(bytes) => self.photo_received(bytes),
            SessionEvent::ShowExamples => self.show_examples(),
        }
    }

    /// Answered in every phase but `Processing`, including before the first
    /// restart.  The state is left as it was.
    fn show_examples(&self) -> Vec<Effect> {
        match self.catalog.examples() {
            Ok(examples) => vec![Effect::Reply(Reply::Examples(examples))],
            Err(e) => {
                log::warn!("session: {} cannot list examples: {e}", self.key);
                vec![Effect::Reply(Reply::ServiceUnavailable(e.to_string()))]
            }
        }
    }

    fn restart(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(token) = self.state.job_token() {
            log::info!("session: {} restart cancels {token}", self.key);
            effects.push(Effect::Cancel(token));
        }

        match self.catalog.list() {
            Ok(styles) => {
                self.state = SessionState::AwaitingStyleSelection;
                effects.push(Effect::Reply(Reply::StyleMenu(styles)));
            }
            Err(e) => {
                log::warn!("session: {} cannot list styles: {e}", self.key);
                self.state = SessionState::Idle;
                effects.push(Effect::Reply(Reply::ServiceUnavailable(e.to_string())));
            }
        }
        effects
    }

    fn style_chosen(&mut self, input: &str) -> Vec<Effect> {
        if matches!(self.state, SessionState::Idle) {
            return vec![Effect::Reply(Reply::NotStarted)];
        }

        let available = match self.catalog.count() {
            Ok(n) => n,
            Err(e) => return vec![Effect::Reply(Reply::ServiceUnavailable(e.to_string()))],
        };

        match self.resolve_style(input, available) {
            Some(style) => {
                self.state = SessionState::AwaitingPhoto {
                    style: style.clone(),
                };
                vec![Effect::Reply(Reply::StyleSelected(style))]
            }
            None => vec![Effect::Reply(Reply::InvalidStyleInput {
                input: input.to_string(),
                available,
            })],
        }
    }

    fn resolve_style(&self, input: &str, available: usize) -> Option<StyleDescriptor> {
        let n: u32 = input.trim().parse().ok()?;
        if n as usize > available {
            return None;
        }
        self.catalog.get(StyleId::new(n)?)
    }

    fn photo_received(&mut self, bytes: Vec<u8>) -> Vec<Effect> {
        let style = match &self.state {
            SessionState::Idle => return vec![Effect::Reply(Reply::NotStarted)],
            SessionState::AwaitingStyleSelection => {
                return vec![Effect::Reply(Reply::ChooseStyleFirst)]
            }
            SessionState::AwaitingPhoto { style } => style.clone(),
            SessionState::Processing { .. } => return vec![Effect::Reply(Reply::WorkInProgress)],
        };

        if let Err(e) = self.pipeline.probe(&bytes) {
            log::debug!("session: {} rejected upload: {e}", self.key);
            return vec![Effect::Reply(Reply::UnsupportedImage)];
        }

        self.next_token += 1;
        let token = JobToken(self.next_token);
        let id = style.id;
        self.state = SessionState::Processing { style, token };
        vec![
            Effect::Reply(Reply::ProcessingStarted),
            Effect::Submit {
                token,
                style: id,
                photo: bytes,
            },
        ]
    }

    fn job_finished(
        &mut self,
        token: JobToken,
        result: Result<StylizedImage, JobError>,
    ) -> Vec<Effect> {
        if self.state.job_token() != Some(token) {
            log::info!("session: {} discarding stale result of {token}", self.key);
            return Vec::new();
        }

        let style = match std::mem::take(&mut self.state) {
            SessionState::Processing { style, .. } => style,
            other => {
                self.state = other;
                return Vec::new();
            }
        };

        self.state = SessionState::AwaitingStyleSelection;
        match result {
            Ok(image) => vec![Effect::Reply(Reply::StylizedResult(image))],
            Err(e) if e.is_user_error() => {
                log::debug!("session: {} {token} could not decode the photo: {e}", self.key);
                self.state = SessionState::AwaitingPhoto { style };
                vec![Effect::Reply(Reply::UnsupportedImage)]
            }
            Err(e) => {
                log::warn!("session: {} {token} failed: {e}", self.key);
                vec![Effect::Reply(Reply::JobFailed(e))]
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
