//! Transport Layer
//!
//! The engine talks to the server exclusively through [`ChatTransport`].
//! Concrete HTTP clients are provided by the embedding application.

mod r#trait;

pub use crate::event::EventStream;
pub use r#trait::ChatTransport;
