//! Flow build lifecycle: state machine, orchestrator, and progress protocol.
//!
//! A build moves through `ABSENT → STARTED → IN_PROGRESS → {SUCCESS,
//! FAILURE}` per flow id, with the record held in the cache store under a
//! TTL. [`BuildStateMachine`] owns the transitions (including the atomic
//! check-and-begin gate that guarantees at most one active build per flow);
//! [`BuildOrchestrator`] drives compilation and narrates it as a stream of
//! [`StreamData`] frames.

pub mod orchestrator;
pub mod record;
pub mod state;
pub mod stream;

pub use orchestrator::{BuildError, BuildOrchestrator, InputKeysResponse, input_keys_response};
pub use record::{BuildRecord, BuildStatus, flow_data_key};
pub use state::{BuildGate, BuildStateMachine, InitOutcome};
pub use stream::{StreamData, StreamEventKind};
