//! SMTP wire primitives shared by the downstream listener and the upstream client.

pub mod dot;
pub mod smtp;

pub use dot::{DotStuffer, unstuff_line};
pub use smtp::{Command, Reply, Response, ResponseCode};
