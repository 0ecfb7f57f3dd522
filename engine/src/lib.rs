//! Playback and event-loop engine of the clipbox random clip player.
//!
//! Everything here is hardware independent: the board hands over its pins, storage, audio
//! codec, console, network transport and reset line through the [`scheduler::Board`]
//! traits, then calls [`Jukebox::tick`] in a loop.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// Must come first so the logging macros are visible in every module below.
#[macro_use]
mod fmt;

pub mod catalog;
pub mod codec;
pub mod config;
pub mod console;
pub mod error;
pub mod input;
pub mod management;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod storage;

#[cfg(test)]
mod mock;

pub use catalog::{Catalog, ClipId};
pub use config::Config;
pub use scheduler::{Board, Devices, Event, Jukebox, Report, System};
