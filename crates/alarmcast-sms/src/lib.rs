// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SMS channel for the alarmcast delivery engine.
//!
//! [`ModemPool`] picks a modem per message (device, service, fallback tiers)
//! and accounts quota and health; [`SmsSender`] adapts it to the
//! [`ChannelSender`](alarmcast_core::ChannelSender) seam; [`HttpModemGateway`]
//! talks to the modems.

pub mod gateway;
pub mod pool;
pub mod sender;

pub use gateway::{HttpModemGateway, ModemGateway};
pub use pool::{breaker_name, ModemPool, Reservation, SelectionTier, SmsReceipt};
pub use sender::SmsSender;
