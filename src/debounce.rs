//! Per-key debounce and repeat state machine
//!
//! Turns the raw (possibly noisy) key stream into "fire now" decisions.
//!
//! ```text
//!            PRESS (outside debounce window) / fire
//!   ┌──────┐ ─────────────────────────────────────► ┌────────┐
//!   │ IDLE │                                        │ ACTIVE │ ◄─┐ HOLD / fire
//!   └──────┘ ◄───────────────────────────────────── └────────┘ ──┘
//!            RELEASE, or no event within hold timeout
//! ```
//!
//! The debounce window only gates the initial press. Repeats from a held
//! button always fire so ramp-style controls such as volume stay responsive.
//!
//! The phase never changes a decision on its own: a press is always gated by
//! the window and a hold always fires. It records which keys are currently
//! held, and `expire_holds` is what returns a key whose release was lost.

use crate::input::{KeyAction, KeyEvent};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct DebounceSettings {
    pub debounce_window: Duration,
    pub hold_timeout: Duration,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(300),
            hold_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPhase {
    Idle,
    Active,
}

/// Timing state for one keycode
#[derive(Clone, Debug)]
pub struct KeyState {
    pub last_fired_at: Option<Instant>,
    pub last_event_at: Instant,
    pub phase: KeyPhase,
}

impl KeyState {
    pub fn is_held(&self) -> bool {
        self.phase == KeyPhase::Active
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireKind {
    /// Initial press that passed the debounce gate
    Press,
    /// Repeat from a held button
    Repeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FireDecision {
    pub keycode: u16,
    pub kind: FireKind,
    pub at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Fire(FireDecision),
    /// Press swallowed by the debounce window
    Suppressed { keycode: u16, elapsed: Duration },
    /// Event changed state only (release)
    Ignored,
}

pub struct DebounceEngine {
    settings: DebounceSettings,
    keys: HashMap<u16, KeyState>,
}

impl DebounceEngine {
    pub fn new(settings: DebounceSettings) -> Self {
        Self {
            settings,
            keys: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &DebounceSettings {
        &self.settings
    }

    pub fn key_state(&self, keycode: u16) -> Option<&KeyState> {
        self.keys.get(&keycode)
    }

    pub fn held_keys(&self) -> usize {
        self.keys.values().filter(|state| state.is_held()).count()
    }

    /// Returns held keys with no event within the hold timeout to idle
    pub fn expire_holds(&mut self, now: Instant) -> usize {
        let timeout = self.settings.hold_timeout;
        let mut expired = 0;
        for (keycode, state) in self.keys.iter_mut() {
            if state.phase == KeyPhase::Active
                && now.saturating_duration_since(state.last_event_at) > timeout
            {
                debug!("Key {} hold timed out", keycode);
                state.phase = KeyPhase::Idle;
                expired += 1;
            }
        }
        expired
    }

    pub fn process(&mut self, event: &KeyEvent) -> Decision {
        let now = event.timestamp;
        let state = self.keys.entry(event.keycode).or_insert(KeyState {
            last_fired_at: None,
            last_event_at: now,
            phase: KeyPhase::Idle,
        });
        state.last_event_at = now;

        match event.action {
            KeyAction::Press => {
                // A press while active means the release was lost
                state.phase = KeyPhase::Idle;

                if let Some(last) = state.last_fired_at {
                    let elapsed = now.saturating_duration_since(last);
                    if elapsed < self.settings.debounce_window {
                        debug!(
                            "Key {} debounced ({}ms)",
                            event.keycode,
                            elapsed.as_millis()
                        );
                        return Decision::Suppressed {
                            keycode: event.keycode,
                            elapsed,
                        };
                    }
                }

                state.phase = KeyPhase::Active;
                state.last_fired_at = Some(now);
                Decision::Fire(FireDecision {
                    keycode: event.keycode,
                    kind: FireKind::Press,
                    at: now,
                })
            }
            KeyAction::Hold => {
                // Holds are never debounced, even when resuming from idle
                state.phase = KeyPhase::Active;
                state.last_fired_at = Some(now);
                Decision::Fire(FireDecision {
                    keycode: event.keycode,
                    kind: FireKind::Repeat,
                    at: now,
                })
            }
            KeyAction::Release => {
                state.phase = KeyPhase::Idle;
                Decision::Ignored
            }
        }
    }
}
