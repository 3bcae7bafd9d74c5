// SPDX-License-Identifier: MIT

//! State carried between workflow nodes
//!
//! This module provides:
//! - `State` - ordered, append-only key/value store threaded through a run
//! - `StateError` - violations of the append-only law

mod store;

pub use store::{value_kind, State, StateError};
