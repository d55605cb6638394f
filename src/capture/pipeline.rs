//! Capture pipeline
//!
//! Drives one page view: page events feed the collector, each quiet-period
//! flush goes through the extractor, and non-empty deltas leave as
//! `conversation_scraped` messages in flush order. Address changes that
//! reveal a real conversation id leave as `conversation_id_detected`.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::capture::classifier::TurnClassifier;
use crate::capture::collector::BatchCollector;
use crate::capture::extractor::PairExtractor;
use crate::capture::node::PageNode;
use crate::identity::{real_conversation_id, PageIdentity};
use crate::message::PageMessage;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Message channel closed")]
    ChannelClosed,
}

impl Serialize for CaptureError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<T> From<mpsc::error::SendError<T>> for CaptureError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        CaptureError::ChannelClosed
    }
}

/// Something that happened on the observed page
#[derive(Debug, Clone)]
pub enum PageEvent {
    /// Nodes inserted by one mutation callback
    Inserted(Vec<PageNode>),
    /// The page address changed without a reload
    Navigated(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    pub flushes: usize,
    pub turns: usize,
    pub promotions: usize,
}

pub struct CapturePipeline {
    identity: PageIdentity,
    collector: BatchCollector,
    extractor: PairExtractor,
    outbox: mpsc::Sender<PageMessage>,
    stats: CaptureStats,
}

impl CapturePipeline {
    pub fn new(identity: PageIdentity, quiet_period: Duration, outbox: mpsc::Sender<PageMessage>) -> Self {
        let extractor = PairExtractor::for_service(identity.service);
        Self::with_extractor(identity, quiet_period, extractor, outbox)
    }

    pub fn with_classifier(
        identity: PageIdentity,
        quiet_period: Duration,
        classifier: Box<dyn TurnClassifier>,
        outbox: mpsc::Sender<PageMessage>,
    ) -> Self {
        Self::with_extractor(identity, quiet_period, PairExtractor::new(classifier), outbox)
    }

    fn with_extractor(
        identity: PageIdentity,
        quiet_period: Duration,
        extractor: PairExtractor,
        outbox: mpsc::Sender<PageMessage>,
    ) -> Self {
        Self {
            identity,
            collector: BatchCollector::new(quiet_period),
            extractor,
            outbox,
            stats: CaptureStats::default(),
        }
    }

    pub fn identity(&self) -> &PageIdentity {
        &self.identity
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Attach the collector; false if this page view is already observed
    pub fn attach(&mut self) -> bool {
        self.collector.attach()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.collector.deadline()
    }

    pub async fn handle_event(&mut self, event: PageEvent, now: Instant) -> Result<(), CaptureError> {
        match event {
            PageEvent::Inserted(nodes) => {
                self.collector.observe(nodes, now);
                Ok(())
            }
            PageEvent::Navigated(address) => self.follow_navigation(&address).await,
        }
    }

    async fn follow_navigation(&mut self, address: &str) -> Result<(), CaptureError> {
        let Some((service, conversation_id)) = real_conversation_id(address) else {
            return Ok(());
        };
        if service != self.identity.service || conversation_id == self.identity.conversation_id {
            return Ok(());
        }

        if self.identity.temporary {
            info!(
                service = %service,
                temporary = %self.identity.conversation_id,
                real = %conversation_id,
                "Real conversation id detected"
            );
            self.outbox
                .send(PageMessage::ConversationIdDetected {
                    service,
                    conversation_id: conversation_id.clone(),
                })
                .await?;
            self.stats.promotions += 1;
        } else {
            info!(
                service = %service,
                from = %self.identity.conversation_id,
                to = %conversation_id,
                "Page switched conversation"
            );
            // Pending nodes belong to the conversation being left
            if let Some(batch) = self.collector.take() {
                self.emit(batch).await?;
            }
        }

        self.identity = PageIdentity {
            service,
            conversation_id,
            temporary: false,
        };
        Ok(())
    }

    /// Flush if the quiet period has elapsed. Returns the number of turns sent.
    pub async fn flush_due(&mut self, now: Instant) -> Result<usize, CaptureError> {
        match self.collector.poll(now) {
            Some(batch) => self.emit(batch).await,
            None => Ok(0),
        }
    }

    /// Extract one batch and send its delta under the current identity
    async fn emit(&mut self, batch: Vec<PageNode>) -> Result<usize, CaptureError> {
        self.stats.flushes += 1;

        let delta = self.extractor.extract(&batch);
        if delta.is_empty() {
            debug!(nodes = batch.len(), "Flush produced no complete turns");
            return Ok(0);
        }

        let count = delta.len();
        info!(
            service = %self.identity.service,
            conversation_id = %self.identity.conversation_id,
            turns = count,
            "Captured conversation delta"
        );
        self.outbox
            .send(PageMessage::ConversationScraped {
                service: self.identity.service,
                conversation_id: self.identity.conversation_id.clone(),
                data: delta.into_turns(),
            })
            .await?;
        self.stats.turns += count;
        Ok(count)
    }

    /// Run until the event source closes. An armed quiet period still runs
    /// out before returning.
    pub async fn run(mut self, mut events: mpsc::Receiver<PageEvent>) -> Result<CaptureStats, CaptureError> {
        self.attach();

        loop {
            let deadline = self.collector.deadline();
            let quiet = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, Instant::now()).await?,
                    None => break,
                },
                _ = quiet => {
                    self.flush_due(Instant::now()).await?;
                }
            }
        }

        if let Some(deadline) = self.collector.deadline() {
            sleep_until(deadline).await;
            self.flush_due(deadline).await?;
        }

        debug!(flushes = self.stats.flushes, turns = self.stats.turns, "Capture finished");
        Ok(self.stats)
    }
}
