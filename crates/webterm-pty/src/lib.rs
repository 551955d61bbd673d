// Unsafe is confined to `forkpty` and the post-fork `_exit` in `pty_process`.

//! Pty host for webterm sessions.
//!
//! [`Multiplex`] spawns shells on pseudo-terminals, drives each one through
//! a [`webterm_core::Terminal`] on a background poll loop, and hands the
//! resulting row updates and directive events to its owner over a channel.

pub mod config;
pub mod error;
#[cfg(unix)]
pub mod multiplex;
#[cfg(unix)]
pub mod pty_process;

pub use config::{DEFAULT_COPY_ENV, FALLBACK_SHELL, MultiplexConfig};
pub use error::{MultiplexError, Result};
#[cfg(unix)]
pub use multiplex::{Multiplex, SessionEvent};
#[cfg(unix)]
pub use pty_process::{PtyChild, ReadOutcome, try_reap};
