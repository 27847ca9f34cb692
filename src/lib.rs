//! Parlar: a full-duplex realtime voice assistant client.
//!
//! Captures microphone audio, streams it to a realtime speech model over a
//! WebSocket, plays the synthesized reply and lets the user interrupt
//! ("barge in") while the assistant is still speaking.
//!
//! ## Layout
//! - [`voice`]: the duplex coordination engine (queues, response
//!   lifecycle, barge-in, event dispatch, realtime client)
//! - [`audio`]: cpal device capture and playback
//! - [`config`]: configuration schema and loading
//! - [`commands`]: quit / interrupt command source

pub mod audio;
pub mod commands;
pub mod config;
pub mod voice;

pub use config::Config;
