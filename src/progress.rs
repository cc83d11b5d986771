// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::sync::RefreshSummary;
use crate::worker::RunMode;

/// Events emitted during a synchronization run for progress reporting
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A run picked its channels
    RunStarted { mode: RunMode, due_channels: usize },

    /// A channel is about to be fetched
    ChannelStarted {
        channel_id: i64,
        url: String,
        /// Position of this channel in the run
        index: usize,
        total: usize,
    },

    /// A channel's feed was fetched and reconciled
    ChannelCompleted {
        channel_id: i64,
        url: String,
        summary: RefreshSummary,
    },

    /// A channel failed; the run moves on
    ChannelFailed {
        channel_id: i64,
        url: String,
        error: String,
    },

    /// The run finished its batch
    RunCompleted {
        channels: usize,
        episodes: usize,
        failed: usize,
    },
}

/// Trait for reporting progress events during synchronization.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests, quiet mode and the daemon.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}
