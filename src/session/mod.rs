//! Session state shared between the server, dispatcher and control interface

pub mod events;
pub mod state;

pub use events::{EventBus, HealthEvent};
pub use state::{LinkSnapshot, SessionState, SessionTags, UNSET_TAG};
