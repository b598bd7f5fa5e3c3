//! # Audio Module
//!
//! Per-guild queue and playback orchestration.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Management
//! - Ordered track list with a cursor, bounded history and loop modes
//! - Pure data structure, no I/O
//!
//! ### [`session`] - Sessions
//! - One session per guild: queue state, advance guard, shutdown token
//! - [`session::SessionRegistry`] creates sessions on first use
//!
//! ### [`transport`] - Output Seams
//! - [`transport::PlaybackTransport`] plays one resource and signals its end
//! - [`transport::Notifier`] posts status lines
//! - Songbird and Discord implementations of both
//!
//! ### [`player`] - Orchestrator
//! - Runs one advance loop per guild: pick next track, fetch, play, wait
//! - Implements the queue commands on top of the session state
//!
//! ## Concurrency
//!
//! Queue state sits behind a synchronous lock that is never held across an
//! `.await`. Advance cycles of one guild are serialized by its
//! [`session::AdvanceGuard`], so at most one playback is active per guild.
//! Guilds never block each other.

pub mod player;
pub mod queue;
pub mod session;
pub mod transport;
