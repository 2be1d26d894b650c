//! Overlay state driven by the verdict stream.
//!
//! The overlay reflects only the most recent verdict: any unsafe verdict
//! shows it, any safe verdict hides it. No timers, no debouncing.

mod overlay;

pub use overlay::{CommandOverlay, LogOverlay, OverlaySurface};

use serde::Serialize;

use crate::models::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum OverlayState {
    #[default]
    Hidden,
    Shown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: OverlayState,
    pub to: OverlayState,
}

pub struct AlertStateMachine<O: OverlaySurface> {
    state: OverlayState,
    surface: O,
}

impl<O: OverlaySurface> AlertStateMachine<O> {
    pub fn new(surface: O) -> Self {
        Self {
            state: OverlayState::Hidden,
            surface,
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    /// Feed one verdict. Returns the transition when the state changed.
    pub fn apply(&mut self, verdict: &Verdict) -> Option<Transition> {
        let target = if verdict.is_safe {
            OverlayState::Hidden
        } else {
            OverlayState::Shown
        };
        self.move_to(target)
    }

    /// Remove the overlay if shown. Safe to call repeatedly.
    pub fn teardown(&mut self) -> Option<Transition> {
        self.move_to(OverlayState::Hidden)
    }

    fn move_to(&mut self, target: OverlayState) -> Option<Transition> {
        if self.state == target {
            return None;
        }
        match target {
            OverlayState::Shown => self.surface.show(),
            OverlayState::Hidden => self.surface.hide(),
        }
        let transition = Transition {
            from: self.state,
            to: target,
        };
        self.state = target;
        Some(transition)
    }
}

impl<O: OverlaySurface> Drop for AlertStateMachine<O> {
    fn drop(&mut self) {
        self.teardown();
    }
}
