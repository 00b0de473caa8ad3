pub mod config;
pub mod frame;
pub mod scenario;

pub use frame::{Frame, FrameError, MAX_DATAGRAM, MAX_FRAME, MAX_PAYLOAD, SEQ_MODULUS, next_seq};

pub use config::{ConfigError, SimConfig};
pub use scenario::{SimConfigOverride, TestAction, TestAssertion, TestScenario};
