//! kanata-focusd - switch kanata layers and virtual keys from KWin window focus.
//!
//! A listener script injected into KWin reports every window activation and
//! caption change over the session bus. Each report is matched against an
//! ordered rule list, and the resulting layer / virtual key changes are sent
//! to kanata over its TCP port, skipping anything already sent.

pub mod backend;
pub mod bridge;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod kanata;
pub mod matcher;
