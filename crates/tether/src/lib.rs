//! Tethered camera capture.
//!
//! - [`camera`]: the asynchronous device proxy contract and a simulated body
//! - [`session`]: the capture directory and its filename allocator
//! - [`automaton`]: the capture and live-view preview workflows
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether::{Automaton, CancelToken, NullPublisher, Session, SimulatedCamera};
//!
//! # async fn demo() -> Result<(), tether::TetherError> {
//! let automaton = Automaton::new(Arc::new(NullPublisher));
//! automaton.set_camera(Some(Arc::new(SimulatedCamera::new("Sim"))));
//! automaton.set_session(Some(Session::new("/tmp/shoot", "captureXXXXXX")?.into_shared()));
//!
//! automaton.capture(&CancelToken::new()).await?;
//! automaton.pump_events().await;
//! # Ok(())
//! # }
//! ```

pub mod automaton;
pub mod camera;
pub mod error;
pub mod session;
pub mod token;

pub use automaton::{Automaton, AutomatonEvent, AutomatonPublisher, NullPublisher, TaskKind, TaskOutcome};
pub use camera::{
    Camera, CameraCapabilities, CameraError, CameraEvent, CameraEvents, CameraFile, CameraIdentity,
    CameraOp, EventHub, SimCall, SimulatedCamera,
};
pub use error::TetherError;
pub use session::{Image, Session, SessionError, SessionEvent, SessionListener, SharedSession};
pub use token::{CancelToken, ConfirmToken};
