#![deny(unsafe_code)]

/// Terminal shell: command parsing, transcript rendering and the event loop.
pub mod app;
/// Chat controller and its supporting pieces.
pub mod chat;
/// Read-only client settings.
pub mod settings;
