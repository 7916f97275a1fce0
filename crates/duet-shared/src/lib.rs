//! # duet-shared
//!
//! Types shared by the Duet server and client: identifiers, the message and
//! user models, the REST/event-channel wire protocol and the error taxonomy
//! both sides agree on.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::ChatError;
pub use models::*;
pub use types::{MessageId, UserId};
