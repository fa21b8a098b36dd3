// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event source trait for at-least-once message sources.

use async_trait::async_trait;

use crate::error::BuildscribeError;
use crate::traits::adapter::PluginAdapter;
use crate::types::Delivery;

/// A source of raw log events with at-least-once delivery.
///
/// A delivery that is neither acked nor nacked is considered in flight.
/// Nacked deliveries are handed out again later.
#[async_trait]
pub trait EventSource: PluginAdapter {
    /// Waits for the next delivery. `Ok(None)` means the source is exhausted.
    async fn receive(&self) -> Result<Option<Delivery>, BuildscribeError>;

    /// Confirms that the delivery was durably recorded (or dead-lettered).
    async fn ack(&self, delivery: &Delivery) -> Result<(), BuildscribeError>;

    /// Rejects the delivery so that it will be redelivered.
    async fn nack(&self, delivery: &Delivery) -> Result<(), BuildscribeError>;
}
