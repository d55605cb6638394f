//! Coordination side of the capture channel
//!
//! Consumes `PageMessage`s in arrival order. Scraped deltas are uploaded
//! through the `UploadCoordinator`; id detections promote the active
//! temporary key so that nothing is uploaded under it afterwards.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::identity::{Service, SessionKey};
use crate::message::PageMessage;
use crate::turn::ConversationDelta;
use crate::upload::{UploadCoordinator, UploadResult};

pub struct Coordinator {
    uploader: UploadCoordinator,
    /// Conversation each service's page is currently on
    active: HashMap<Service, SessionKey>,
    /// Temporary key → real key it was promoted to
    promotions: HashMap<SessionKey, SessionKey>,
}

impl Coordinator {
    pub fn new(uploader: UploadCoordinator) -> Self {
        Self {
            uploader,
            active: HashMap::new(),
            promotions: HashMap::new(),
        }
    }

    pub fn set_active(&mut self, key: SessionKey) {
        debug!(key = %key, "Active conversation set");
        self.active.insert(key.service, key);
    }

    pub fn active(&self, service: Service) -> Option<&SessionKey> {
        self.active.get(&service)
    }

    /// Key a message should be filed under after promotions
    pub fn resolve(&self, key: &SessionKey) -> SessionKey {
        self.promotions.get(key).cloned().unwrap_or_else(|| key.clone())
    }

    /// Handle one message. Returns the upload outcome for scraped deltas.
    pub async fn handle(&mut self, message: PageMessage) -> Option<UploadResult> {
        let key = message.key();
        match message {
            PageMessage::ConversationScraped { service, data, .. } => {
                let key = self.resolve(&key);
                self.active.entry(service).or_insert_with(|| key.clone());
                Some(self.uploader.upload(&key, &ConversationDelta::new(data)).await)
            }
            PageMessage::ConversationIdDetected { .. } => {
                self.promote(key).await;
                None
            }
        }
    }

    async fn promote(&mut self, real: SessionKey) {
        let Some(current) = self.active.get(&real.service).cloned() else {
            debug!(key = %real, "Id detected with no active conversation");
            self.active.insert(real.service, real);
            return;
        };
        if !current.is_temporary() || current == real {
            self.active.insert(real.service, real);
            return;
        }

        match self.uploader.cache().rekey(&current, &real).await {
            Ok(moved) => {
                info!(from = %current, to = %real, moved, "Temporary conversation promoted");
                // Earlier promotions that landed on the temporary key follow it
                for target in self.promotions.values_mut() {
                    if *target == current {
                        *target = real.clone();
                    }
                }
                self.promotions.insert(current, real.clone());
                self.active.insert(real.service, real);
            }
            Err(e) => {
                error!(from = %current, to = %real, error = %e, "Failed to promote session key");
            }
        }
    }

    /// Drain `messages` until the sender side closes, reporting each upload
    /// outcome in order. Returns the number of uploads attempted.
    pub async fn run<F>(mut self, mut messages: mpsc::Receiver<PageMessage>, mut on_result: F) -> usize
    where
        F: FnMut(UploadResult),
    {
        let mut uploads = 0;
        while let Some(message) = messages.recv().await {
            if let Some(result) = self.handle(message).await {
                uploads += 1;
                on_result(result);
            }
        }
        debug!(uploads, "Coordinator finished");
        uploads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SessionCache;
    use crate::turn::ConversationTurn;
    use crate::upload::tests::{record, FakeBackend};
    use std::sync::Arc;

    const TEMP: &str = "new-conversation-1700000000000";

    fn scraped(conversation_id: &str, prompt: &str) -> PageMessage {
        PageMessage::ConversationScraped {
            service: Service::ChatGpt,
            conversation_id: conversation_id.to_string(),
            data: vec![ConversationTurn::new(prompt, "ok")],
        }
    }

    fn detected(conversation_id: &str) -> PageMessage {
        PageMessage::ConversationIdDetected {
            service: Service::ChatGpt,
            conversation_id: conversation_id.to_string(),
        }
    }

    async fn setup(cached: &SessionKey) -> (Arc<FakeBackend>, SessionCache, Coordinator) {
        let backend = Arc::new(FakeBackend::default());
        let cache = SessionCache::in_memory();
        cache.put(cached, &record("s1", cached)).await.unwrap();
        let coordinator = Coordinator::new(UploadCoordinator::new(backend.clone(), cache.clone()));
        (backend, cache, coordinator)
    }

    #[tokio::test]
    async fn test_detection_rekeys_active_temporary_key() {
        let temp = SessionKey::new(Service::ChatGpt, TEMP);
        let real = SessionKey::new(Service::ChatGpt, "abc123");
        let (_, cache, mut coordinator) = setup(&temp).await;
        let before = cache.get(&temp).await;
        coordinator.set_active(temp.clone());

        assert!(coordinator.handle(detected("abc123")).await.is_none());

        assert!(cache.get(&temp).await.is_none());
        assert_eq!(cache.get(&real).await, before);
        assert_eq!(coordinator.active(Service::ChatGpt), Some(&real));
    }

    #[tokio::test]
    async fn test_late_temporary_delta_uploads_under_real_id() {
        let temp = SessionKey::new(Service::ChatGpt, TEMP);
        let (backend, _, mut coordinator) = setup(&temp).await;

        coordinator.handle(scraped(TEMP, "first")).await.unwrap();
        coordinator.handle(detected("abc123")).await;
        let result = coordinator.handle(scraped(TEMP, "late")).await.unwrap();

        assert!(result.success);
        let uploads = backend.uploads.lock();
        assert_eq!(uploads[0].1, TEMP);
        assert_eq!(uploads[1].1, "abc123");
    }

    #[tokio::test]
    async fn test_detection_on_real_key_does_not_rekey() {
        let real = SessionKey::new(Service::ChatGpt, "abc");
        let (_, cache, mut coordinator) = setup(&real).await;
        coordinator.set_active(real.clone());

        coordinator.handle(detected("other")).await;
        assert!(cache.get(&real).await.is_some());
        assert!(cache.get(&SessionKey::new(Service::ChatGpt, "other")).await.is_none());
    }

    #[tokio::test]
    async fn test_run_reports_results_in_order() {
        let real = SessionKey::new(Service::ChatGpt, "abc");
        let (backend, _, coordinator) = setup(&real).await;
        backend.upload_statuses.lock().push_back(500);

        let (tx, rx) = mpsc::channel(8);
        tx.send(scraped("abc", "one")).await.unwrap();
        tx.send(scraped("abc", "two")).await.unwrap();
        tx.send(scraped("missing", "three")).await.unwrap();
        drop(tx);

        let mut results = Vec::new();
        let count = coordinator.run(rx, |r| results.push(r)).await;

        assert_eq!(count, 3);
        let outcomes: Vec<bool> = results.iter().map(|r| r.success).collect();
        assert_eq!(outcomes, vec![false, true, false]);
        assert_eq!(backend.uploads.lock().len(), 1);
    }
}
