//! An in-process event bus for loosely coupled components.
//!
//! Producers and subscribers never hold direct references to each other;
//! they meet at a named, typed [`Channel`](channel::Channel) owned by a
//! [`Registrar`]. A producer looks a channel up by name and signature and
//! invokes it; every subscriber registered under that name runs in
//! deterministic order, and — when the signature has a non-unit return — a
//! second *resolve* stage sees the aggregated results.
//!
//! ```
//! use conduit_bus::Registrar;
//!
//! let registrar = Registrar::new("sim");
//! let tick = registrar.lookup::<(), ()>("tick", "main");
//! tick.subscribe_void(|_| println!("tock"), "logger", 0);
//! tick.invoke(());
//! ```
//!
//! # Layout
//!
//! - [`Registrar`] — the name→channel directory; enforces that a name
//!   always maps to one signature ([`registrar`]).
//! - [`Channel`](channel::Channel) — the dispatch engine for one signature:
//!   ordered subscribers, reentrancy-safe mutation, return aggregation, a
//!   resolve stage ([`channel`]).
//! - [`ChannelInterface`] — the lightweight handle callers actually hold
//!   ([`interface`]).
//! - [`merge`] — N-way join over any number (up to [`MAX_JOINED_CHANNELS`])
//!   of channels of any signature; [`merge2`]/[`merge3`]/[`merge4`] are
//!   typed convenience wrappers over it for the common single-parameter
//!   case ([`optuple`]).
//! - [`StartupRegistry`] — deferred "wire this up once the registrar
//!   exists" actions ([`startup`]).
//! - [`DynValue`] and friends — the dynamically-typed surface a scripting
//!   collaborator calls through without the core depending on any
//!   particular scripting runtime ([`dynval`]).
//!
//! The bus is single-threaded by contract: every public type here holds
//! `Rc`/`RefCell` internals and is therefore `!Send + !Sync`. Sharing a
//! [`Registrar`] across threads is a compile error, not a runtime race.

mod channel;
mod dynval;
mod error;
mod interface;
mod names;
mod optuple;
mod registrar;
mod startup;

pub use channel::Channel;
pub use dynval::{DynArgs, DynValue, FromDynValue, IntoDynValue};
pub use error::{ConduitError, ConduitResult};
pub use interface::ChannelInterface;
pub use optuple::{merge, merge2, merge3, merge4, IntoJoinable, Joinable, Optuple, MAX_JOINED_CHANNELS};
pub use registrar::Registrar;
pub use startup::StartupRegistry;
