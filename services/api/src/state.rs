//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the dispatcher and its provider clients.

use crate::config::Config;
use empath_core::dispatcher::Dispatcher;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, config: Config) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            config: Arc::new(config),
        }
    }
}
