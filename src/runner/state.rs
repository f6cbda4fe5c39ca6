use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Idle = 0,
    /// Prototypes registered; waiting for coordinator instructions.
    Ready = 1,
    /// Submitting clones to the pool.
    Hatching = 2,
    /// All clones submitted; the swarm is live.
    Running = 3,
    /// The swarm is stopped; a new hatch may arrive.
    Stopped = 4,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Idle => "IDLE",
            State::Ready => "READY",
            State::Hatching => "HATCHING",
            State::Running => "RUNNING",
            State::Stopped => "STOPPED",
        }
    }

    fn from_u8(value: u8) -> State {
        match value {
            1 => State::Ready,
            2 => State::Hatching,
            3 => State::Running,
            4 => State::Stopped,
            _ => State::Idle,
        }
    }
}

/// Atomic cell holding the runner state; transitions at decision points go
/// through [`StateCell::transition`] so racing actors cannot both win.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> State {
        State::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: State) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Compare-and-set; true when the transition won.
    pub(crate) fn transition(&self, from: State, to: State) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_only_wins_from_the_expected_state() {
        let cell = StateCell::new(State::Ready);
        if !cell.transition(State::Ready, State::Hatching) {
            panic!("Expected Ready -> Hatching to win");
        }
        if cell.transition(State::Ready, State::Running) {
            panic!("Stale transition should lose");
        }
        if cell.load() != State::Hatching {
            panic!("Unexpected state {:?}", cell.load());
        }
    }

    #[test]
    fn store_overwrites_unconditionally() {
        let cell = StateCell::new(State::Running);
        cell.store(State::Stopped);
        if cell.load() != State::Stopped {
            panic!("Unexpected state {:?}", cell.load());
        }
    }
}
