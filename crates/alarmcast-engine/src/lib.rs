// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery engine: the alarm processor and the loops that drive it.
//!
//! [`AlarmProcessor`] delivers one alarm across its channels.
//! [`QueueConsumer`] feeds it from the alarm queue, [`DeadLetterReprocessor`]
//! replays failures, and [`WorkerRegistry`] tracks consumer liveness.

pub mod consumer;
pub mod processor;
pub mod reprocessor;
pub mod shutdown;
pub mod workers;

pub use consumer::{PollResult, QueueConsumer};
pub use processor::{
    AlarmProcessor, AlarmProcessorBuilder, ChannelReport, ChannelStatus, ProcessOutcome,
    ProcessReport, MOCK_PROVIDER,
};
pub use reprocessor::{CycleReport, DeadLetterReprocessor};
pub use shutdown::{drain, install_signal_handler};
pub use workers::{worker_id, SweepReport, WorkerRegistry};
