// SPDX-License-Identifier: MIT

//! iev-engine - Intelligence -> Extraction -> Validation workflows
//!
//! Nodes run over an append-only `State` in a validated DAG. The canonical
//! pipeline reasons freely over an event, extracts a structured record with a
//! repair chain, and validates it against a schema.

pub mod error;
pub mod fabric;
pub mod llm;
pub mod node;
pub mod pipeline;
pub mod prompt;
pub mod repair;
pub mod schema;
pub mod state;
pub mod validation;
pub mod workflow;

pub use error::{ErrorKind, IevError, ProviderError, TopologyError};
pub use state::State;
pub use workflow::{FinalState, InvocationError, InvokeOptions, Workflow};
