//! Pipeline state management

/// Element state machine
///
/// An element moves one step at a time between `Null` and `Playing`. The
/// transitions between adjacent states carry the lifecycle hooks:
/// - `Ready -> Paused`: activate (allocate the frame pool, reset the session)
/// - `Paused -> Playing`: start playing (latch a downstream buffer pool)
/// - `Playing -> Paused`: stop playing (release the latched pool)
/// - `Paused -> Ready`: deactivate (flush the engine, destroy the pool)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    /// Nothing allocated
    #[default]
    Null,

    /// Element exists but holds no session resources
    Ready,

    /// Session resources allocated, data accepted but frames not delivered
    Paused,

    /// Frames are delivered downstream
    Playing,
}

/// A single step between adjacent states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    NullToReady,
    ReadyToPaused,
    PausedToPlaying,
    PlayingToPaused,
    PausedToReady,
    ReadyToNull,
}

impl PipelineState {
    /// Check if this state transition is valid (adjacent states only)
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        self.transition_to(target).is_some()
    }

    /// The step from `self` to an adjacent `target`
    pub fn transition_to(&self, target: &PipelineState) -> Option<StateTransition> {
        use PipelineState::*;

        match (self, target) {
            (Null, Ready) => Some(StateTransition::NullToReady),
            (Ready, Paused) => Some(StateTransition::ReadyToPaused),
            (Paused, Playing) => Some(StateTransition::PausedToPlaying),
            (Playing, Paused) => Some(StateTransition::PlayingToPaused),
            (Paused, Ready) => Some(StateTransition::PausedToReady),
            (Ready, Null) => Some(StateTransition::ReadyToNull),
            _ => None,
        }
    }

    /// Next state on the way to `target`, `None` once there
    pub fn step_towards(&self, target: PipelineState) -> Option<PipelineState> {
        use PipelineState::*;

        let up = [Null, Ready, Paused, Playing];
        let index = up.iter().position(|s| s == self)?;
        if target > *self {
            up.get(index + 1).copied()
        } else if target < *self {
            index.checked_sub(1).map(|i| up[i])
        } else {
            None
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Null => "Null",
            PipelineState::Ready => "Ready",
            PipelineState::Paused => "Paused",
            PipelineState::Playing => "Playing",
        }
    }

    /// Check if a session is active (pool allocated)
    pub fn is_active(&self) -> bool {
        matches!(self, PipelineState::Paused | PipelineState::Playing)
    }

    /// Check if frames are delivered downstream
    pub fn is_playing(&self) -> bool {
        matches!(self, PipelineState::Playing)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
