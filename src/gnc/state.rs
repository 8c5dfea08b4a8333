use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr};

/// Flight phases, in the only order they can be visited.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Display,
    EnumIter,
    FromRepr,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum FlightState {
    #[default]
    PreFlightGround = 0,
    PoweredFlight,
    Coasting,
    Apogee,
    DrogueDeploy,
    DrogueDescent,
    MainDeploy,
    MainDescent,
    PostFlightGround,
}

impl FlightState {
    pub fn is_in_flight(self) -> bool {
        !matches!(
            self,
            FlightState::PreFlightGround | FlightState::PostFlightGround
        )
    }
}

/// Single writer, many readers view of the current [`FlightState`].
///
/// The state is a single byte stored atomically, so readers on other tasks
/// never observe a partial update.
#[derive(Debug, Clone, Default)]
pub struct SharedFlightState {
    inner: Arc<AtomicU8>,
}

impl SharedFlightState {
    pub fn load(&self) -> FlightState {
        FlightState::from_repr(self.inner.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub(crate) fn store(&self, state: FlightState) {
        self.inner.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_order() {
        let states: Vec<FlightState> = FlightState::iter().collect();

        assert_eq!(states.first(), Some(&FlightState::PreFlightGround));
        assert_eq!(states.last(), Some(&FlightState::PostFlightGround));
        assert!(states.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_shared_state_across_threads() {
        let shared = SharedFlightState::default();
        assert_eq!(shared.load(), FlightState::PreFlightGround);

        let reader = shared.clone();
        shared.store(FlightState::DrogueDescent);

        let seen = thread::spawn(move || reader.load()).join().unwrap();
        assert_eq!(seen, FlightState::DrogueDescent);
    }
}
