// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Client-side synchronization pipeline.
//!
//! One [`worker::ServerWorker`] per configured remote server paces Sync
//! (+ Follow-Up) requests and collects the four exchange timestamps into
//! [`sequence::Sequence`] records. Completed sequences run through the
//! per-server [`filter`] chain into the [`calculation`] window; the
//! [`selection`] stage classifies servers into truechimers and
//! falsetickers and picks the best ones, whose measurements the
//! [`adjustment`] stage turns into clock corrections. The
//! [`coordinator::ClientCoordinator`] drives the whole pipeline.

#![warn(missing_docs)]

pub mod adjustment;
pub mod calculation;
pub mod config;
pub mod coordinator;
pub mod filter;
pub mod ledger;
pub mod selection;
pub mod sequence;
pub mod worker;

pub use adjustment::Adjuster;
pub use config::{ClientModeConfig, ResolvedClientMode};
pub use coordinator::ClientCoordinator;
pub use selection::{SelectionMethod, Selector};
pub use sequence::Sequence;
pub use worker::{ServerState, ServerWorker, WorkerConfig};
