//! Empath Core
//!
//! Domain logic shared by the relay server and its client: the message and
//! error model, the wire protocol, the provider seams and the dispatcher that
//! ties them together.

pub mod dispatcher;
pub mod emotion;
pub mod error;
pub mod llm_client;
pub mod media;
pub mod message;
pub mod protocol;
