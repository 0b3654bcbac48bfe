// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Server-side request reassembly and response generation.
//!
//! [`listener::Listener`] tasks receive request packets per interface and
//! feed the [`coordinator::ServerCoordinator`], which reassembles
//! multi-part requests in its table and answers complete ones through
//! [`responder::send_response`].

#![warn(missing_docs)]

pub mod config;
pub mod coordinator;
pub mod listener;
pub mod request;
pub mod responder;

pub use config::{ResolvedServerMode, ServerModeConfig};
pub use coordinator::ServerCoordinator;
pub use listener::Listener;
pub use request::Request;
