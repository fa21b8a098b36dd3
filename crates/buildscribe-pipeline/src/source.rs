// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Newline-delimited JSON event source with at-least-once redelivery.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use buildscribe_core::types::{AdapterType, Delivery, HealthStatus};
use buildscribe_core::{BuildscribeError, EventSource, PluginAdapter};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

type LineReader = Split<Box<dyn AsyncBufRead + Unpin + Send>>;

#[derive(Default)]
struct Pending {
    next_id: u64,
    in_flight: HashMap<u64, Delivery>,
    redeliver: VecDeque<Delivery>,
    eof: bool,
}

/// Reads one JSON event per line from any async reader.
///
/// Lines are split on raw bytes; invalid UTF-8 is replaced rather than
/// failing the read, so a corrupt line is rejected at validation like any
/// other malformed event.
///
/// Nacked deliveries are handed out again, ahead of unread lines, until
/// they exceed `max_redeliveries`; then they are dead-lettered. The source
/// is exhausted once the reader hit EOF and nothing is in flight.
pub struct NdjsonSource {
    name: String,
    lines: tokio::sync::Mutex<LineReader>,
    pending: Mutex<Pending>,
    changed: Notify,
    max_redeliveries: u32,
    dead_lettered: AtomicU64,
}

impl NdjsonSource {
    pub fn new(
        name: impl Into<String>,
        reader: Box<dyn AsyncBufRead + Unpin + Send>,
        max_redeliveries: u32,
    ) -> Self {
        Self {
            name: name.into(),
            lines: tokio::sync::Mutex::new(reader.split(b'\n')),
            pending: Mutex::new(Pending {
                next_id: 1,
                ..Pending::default()
            }),
            changed: Notify::new(),
            max_redeliveries,
            dead_lettered: AtomicU64::new(0),
        }
    }

    /// Reads events from standard input.
    pub fn stdin(max_redeliveries: u32) -> Self {
        Self::new(
            "stdin",
            Box::new(BufReader::new(tokio::io::stdin())),
            max_redeliveries,
        )
    }

    /// Reads events from a file.
    pub async fn open(path: &Path, max_redeliveries: u32) -> Result<Self, BuildscribeError> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            BuildscribeError::Config(format!("cannot open input `{}`: {e}", path.display()))
        })?;
        info!(path = %path.display(), "reading events from file");
        Ok(Self::new(
            path.display().to_string(),
            Box::new(BufReader::new(file)),
            max_redeliveries,
        ))
    }

    /// Deliveries dropped after exhausting their redelivery budget.
    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    fn pending(&self) -> Result<std::sync::MutexGuard<'_, Pending>, BuildscribeError> {
        self.pending
            .lock()
            .map_err(|_| BuildscribeError::Internal("event source state poisoned".to_string()))
    }

    /// Next queued redelivery, or whether the source is drained.
    fn poll_pending(&self) -> Result<(Option<Delivery>, bool), BuildscribeError> {
        let mut pending = self.pending()?;
        if let Some(delivery) = pending.redeliver.pop_front() {
            pending.in_flight.insert(delivery.id, delivery.clone());
            return Ok((Some(delivery), false));
        }
        Ok((None, pending.eof && pending.in_flight.is_empty()))
    }

    /// Decodes one raw line, dropping a trailing carriage return.
    fn decode(&self, mut bytes: Vec<u8>) -> String {
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                warn!(source = %self.name, error = %e, "line is not valid UTF-8");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        }
    }

    fn issue(&self, payload: String) -> Result<Delivery, BuildscribeError> {
        let mut pending = self.pending()?;
        let delivery = Delivery {
            id: pending.next_id,
            payload,
            attempt: 1,
        };
        pending.next_id += 1;
        pending.in_flight.insert(delivery.id, delivery.clone());
        Ok(delivery)
    }
}

#[async_trait]
impl PluginAdapter for NdjsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Source
    }

    async fn health_check(&self) -> Result<HealthStatus, BuildscribeError> {
        let pending = self.pending()?;
        if pending.redeliver.is_empty() {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Degraded(format!(
                "{} deliveries awaiting redelivery",
                pending.redeliver.len()
            )))
        }
    }

    async fn shutdown(&self) -> Result<(), BuildscribeError> {
        Ok(())
    }
}

#[async_trait]
impl EventSource for NdjsonSource {
    async fn receive(&self) -> Result<Option<Delivery>, BuildscribeError> {
        loop {
            let notified = self.changed.notified();
            match self.poll_pending()? {
                (Some(delivery), _) => return Ok(Some(delivery)),
                (None, true) => return Ok(None),
                (None, false) => {}
            }

            let eof = self.pending()?.eof;
            if eof {
                // Only acks and nacks can make progress now.
                notified.await;
                continue;
            }

            let mut lines = self.lines.lock().await;
            tokio::select! {
                line = lines.next_segment() => match line {
                    Ok(Some(bytes)) => {
                        let line = self.decode(bytes);
                        if line.trim().is_empty() {
                            continue;
                        }
                        return self.issue(line).map(Some);
                    }
                    Ok(None) => {
                        debug!(source = %self.name, "input exhausted");
                        self.pending()?.eof = true;
                    }
                    Err(e) => {
                        return Err(BuildscribeError::Internal(format!(
                            "failed to read from {}: {e}",
                            self.name
                        )));
                    }
                },
                _ = notified => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BuildscribeError> {
        self.pending()?.in_flight.remove(&delivery.id);
        self.changed.notify_one();
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), BuildscribeError> {
        {
            let mut pending = self.pending()?;
            if pending.in_flight.remove(&delivery.id).is_none() {
                return Ok(());
            }
            if delivery.attempt > self.max_redeliveries {
                self.dead_lettered.fetch_add(1, Ordering::Relaxed);
                error!(
                    source = %self.name,
                    delivery = delivery.id,
                    attempts = delivery.attempt,
                    excerpt = excerpt(&delivery.payload),
                    "delivery dead-lettered after exhausting redeliveries"
                );
            } else {
                warn!(
                    source = %self.name,
                    delivery = delivery.id,
                    attempt = delivery.attempt,
                    "delivery nacked, scheduling redelivery"
                );
                pending.redeliver.push_back(Delivery {
                    attempt: delivery.attempt + 1,
                    ..delivery.clone()
                });
            }
        }
        self.changed.notify_one();
        Ok(())
    }
}

/// First 120 characters of a payload, for logs.
pub(crate) fn excerpt(payload: &str) -> String {
    payload.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn source(input: &'static str, max_redeliveries: u32) -> NdjsonSource {
        NdjsonSource::new("test", Box::new(BufReader::new(input.as_bytes())), max_redeliveries)
    }

    #[tokio::test]
    async fn reads_lines_and_skips_blanks() {
        let source = source("{\"a\":1}\n\n{\"a\":2}\n", 3);
        let first = source.receive().await.unwrap().unwrap();
        let second = source.receive().await.unwrap().unwrap();
        assert_eq!(first.payload, "{\"a\":1}");
        assert_eq!(second.payload, "{\"a\":2}");
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(first.attempt, 1);

        source.ack(&first).await.unwrap();
        source.ack(&second).await.unwrap();
        assert!(source.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_redelivers_before_new_lines() {
        let source = source("one\ntwo\n", 3);
        let one = source.receive().await.unwrap().unwrap();
        source.nack(&one).await.unwrap();

        let again = source.receive().await.unwrap().unwrap();
        assert_eq!(again.id, one.id);
        assert_eq!(again.attempt, 2);
        source.ack(&again).await.unwrap();

        let two = source.receive().await.unwrap().unwrap();
        assert_eq!(two.payload, "two");
        source.ack(&two).await.unwrap();
        assert!(source.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn exhausted_redeliveries_are_dead_lettered() {
        let source = source("poison\n", 1);
        let first = source.receive().await.unwrap().unwrap();
        source.nack(&first).await.unwrap();
        let second = source.receive().await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        source.nack(&second).await.unwrap();

        assert_eq!(source.dead_lettered(), 1);
        assert!(logs_contain("dead-lettered after exhausting redeliveries"));
        assert!(source.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn waits_for_in_flight_before_exhaustion() {
        let source = std::sync::Arc::new(source("only\n", 2));
        let delivery = source.receive().await.unwrap().unwrap();

        let waiter = {
            let source = source.clone();
            tokio::spawn(async move { source.receive().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        source.nack(&delivery).await.unwrap();
        let redelivered = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(redelivered.payload, "only");
        source.ack(&redelivered).await.unwrap();
        assert!(source.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn invalid_utf8_line_is_delivered_not_fatal() {
        let input: &'static [u8] = b"\xff\xfe garbage\r\n{\"a\":1}\r\n";
        let source = NdjsonSource::new("test", Box::new(BufReader::new(input)), 0);

        let corrupt = source.receive().await.unwrap().unwrap();
        assert!(corrupt.payload.ends_with(" garbage"));
        assert!(logs_contain("not valid UTF-8"));
        source.ack(&corrupt).await.unwrap();

        let valid = source.receive().await.unwrap().unwrap();
        assert_eq!(valid.payload, "{\"a\":1}");
        source.ack(&valid).await.unwrap();
        assert!(source.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn opens_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        std::fs::write(&path, "{}\n").unwrap();
        let source = NdjsonSource::open(&path, 0).await.unwrap();
        assert_eq!(source.adapter_type(), AdapterType::Source);
        assert!(source.receive().await.unwrap().is_some());

        let missing = NdjsonSource::open(&dir.path().join("missing"), 0).await;
        assert!(matches!(missing, Err(BuildscribeError::Config(_))));
    }
}
