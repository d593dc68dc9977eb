//! Trigger dispatch state machine
//!
//! Consumes transcripts from the pipeline and routes them to one of
//! the three actions. A pending one-shot trigger always wins over
//! background phrase matching; background matching is a filter, so
//! unmatched transcripts are simply discarded.

use std::sync::{Arc, Mutex};

use crate::audio::PlaybackController;
use crate::completion::CompletionEngine;
use crate::config::ListenConfig;
use crate::providers::Transcript;

use super::{CommandBuffer, SharedListenState, TriggerKind, WakeWordMatcher};

/// Matcher plus the configured phrase table; swapped atomically on reconfigure
#[derive(Debug, Clone)]
struct DispatchSettings {
    matcher: WakeWordMatcher,
    say: String,
    completion: String,
    command: String,
}

impl DispatchSettings {
    fn from_config(cfg: &ListenConfig) -> Self {
        Self {
            matcher: WakeWordMatcher::new(cfg.fuzzy_matching, cfg.fuzzy_threshold),
            say: cfg.trigger_say.clone(),
            completion: cfg.trigger_completion.clone(),
            command: cfg.trigger_command.clone(),
        }
    }

    fn phrase(&self, kind: TriggerKind) -> &str {
        match kind {
            TriggerKind::Say => &self.say,
            TriggerKind::Completion => &self.completion,
            TriggerKind::Command => &self.command,
        }
    }
}

/// Routes matched transcripts to playback, completion, or the command buffer
pub struct TriggerDispatcher {
    state: SharedListenState,
    commands: Arc<CommandBuffer>,
    playback: Option<Arc<PlaybackController>>,
    completion: Arc<CompletionEngine>,
    settings: Mutex<DispatchSettings>,
}

impl TriggerDispatcher {
    #[must_use]
    pub fn new(
        state: SharedListenState,
        commands: Arc<CommandBuffer>,
        playback: Option<Arc<PlaybackController>>,
        completion: Arc<CompletionEngine>,
        cfg: &ListenConfig,
    ) -> Self {
        Self {
            state,
            commands,
            playback,
            completion,
            settings: Mutex::new(DispatchSettings::from_config(cfg)),
        }
    }

    /// Swap in reconfigured phrases and matcher bounds
    pub fn apply_config(&self, cfg: &ListenConfig) {
        *self.lock_settings() = DispatchSettings::from_config(cfg);
    }

    /// Process one transcript
    ///
    /// Must run inside a tokio runtime; say and completion actions are
    /// spawned so a slow provider never stalls the dispatch loop.
    pub fn dispatch(&self, transcript: &Transcript) {
        let text = transcript.text.trim();
        if text.is_empty() {
            return;
        }

        // A pending one-shot consumes the next transcript unconditionally:
        // the phrase is stripped when present, otherwise the whole
        // transcript is the remainder.
        if let Some(kind) = self.state.take_pending() {
            let remainder = {
                let settings = self.lock_settings();
                settings
                    .matcher
                    .match_phrase(transcript, settings.phrase(kind))
                    .map_or_else(|| text.to_string(), |m| m.remainder)
            };
            tracing::info!(kind = %kind, "one-shot trigger consumed");
            self.perform(kind, remainder);
            return;
        }

        if !self.state.background_enabled() {
            return;
        }

        let best = {
            let settings = self.lock_settings();
            TriggerKind::ALL
                .into_iter()
                .filter_map(|kind| {
                    settings
                        .matcher
                        .match_phrase(transcript, settings.phrase(kind))
                        .map(|m| (kind, m))
                })
                .min_by_key(|(kind, m)| (m.start_word, kind.priority()))
        };

        match best {
            Some((kind, m)) => {
                tracing::info!(
                    kind = %kind,
                    distance = m.distance,
                    alt_index = m.alt_index,
                    "background trigger matched"
                );
                self.perform(kind, m.remainder);
            }
            None => tracing::trace!(transcript = %text, "no trigger matched, discarding"),
        }
    }

    /// Execute the action for a matched trigger
    ///
    /// Failures are logged and swallowed; one failed action never stops
    /// the pipeline.
    fn perform(&self, kind: TriggerKind, remainder: String) {
        if remainder.is_empty() {
            tracing::debug!(kind = %kind, "trigger matched with empty remainder, skipping");
            return;
        }

        match kind {
            TriggerKind::Say => {
                let Some(playback) = self.playback.clone() else {
                    tracing::warn!("audio output unavailable, dropping say action");
                    return;
                };
                tokio::spawn(async move {
                    if let Err(e) = playback.speak(&remainder, false).await {
                        tracing::error!(error = %e, "say action failed");
                    }
                });
            }
            TriggerKind::Completion => {
                let Some(playback) = self.playback.clone() else {
                    tracing::warn!("audio output unavailable, dropping completion action");
                    return;
                };
                let completion = Arc::clone(&self.completion);
                tokio::spawn(async move {
                    match completion.respond(&remainder).await {
                        Ok(reply) => {
                            if let Err(e) = playback.speak(&reply, false).await {
                                tracing::error!(error = %e, "completion playback failed");
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "completion action failed"),
                    }
                });
            }
            TriggerKind::Command => self.commands.push(remainder),
        }
    }

    fn lock_settings(&self) -> std::sync::MutexGuard<'_, DispatchSettings> {
        self.settings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
