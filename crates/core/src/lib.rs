//! Core errors, constants and events for the `kiln` execution core.
//!
//! ## Key Components
//!
//! - **`errors`**: Defines the primary `Error` enum and `Result` type alias,
//!   centralizing all failure modes of the execution core.
//! - **`events`**: The invocation listener surface that observers implement.
//! - **`constants`**: Shared names for environment variables and the on-disk
//!   workspace layout.

pub mod constants;
pub mod errors;
pub mod events;

pub use self::{
    constants::*,
    errors::{BoxError, Error, Result},
    events::{
        EventLog, InvocationEvent, InvocationListener, NoopListener, TracingListener,
        WorkDescription,
    },
};
