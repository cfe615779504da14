use crate::domain::message::{Candidate, Message};
use crate::error::Result;
use crate::services::broadcast::{Broadcaster, StreamEvent};
use crate::services::merge::{self, IgnoreReason, MergeOutcome};
use crate::storage::{Appended, MessageStore};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Inserted(Message),
    Replaced(Message),
    Ignored(IgnoreReason),
}

impl IngestOutcome {
    /// Whether the store changed and a broadcast went out.
    #[must_use]
    pub const fn committed(&self) -> bool {
        matches!(self, Self::Inserted(_) | Self::Replaced(_))
    }
}

/// Reconcile-and-commit path shared by the poll synchronizer and the webhook
/// receiver.
///
/// The merge decision and the store write are not a single transaction, so
/// each conversation gets a narrow critical section: producers serialize per
/// `(connection, counterparty)` and stay fully concurrent across
/// conversations. The store's fingerprint constraint backstops anything that
/// slips through.
#[derive(Debug, Clone)]
pub struct IngestService {
    store: Arc<dyn MessageStore>,
    broadcaster: Broadcaster,
    locks: Arc<DashMap<(Uuid, String), Arc<Mutex<()>>>>,
}

impl IngestService {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster, locks: Arc::new(DashMap::new()) }
    }

    /// Runs one candidate through the merge engine and commits the outcome.
    ///
    /// # Errors
    /// Returns `AppError::Database` if a store operation fails; duplicate
    /// suppression is an `Ok` outcome, never an error.
    #[tracing::instrument(
        skip(self, candidate),
        fields(connection_id = %candidate.connection_id, counterparty = %candidate.counterparty)
    )]
    pub async fn ingest(&self, candidate: Candidate) -> Result<IngestOutcome> {
        let key = (candidate.connection_id, candidate.counterparty.clone());
        let lock = Arc::clone(
            self.locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).value(),
        );

        let outcome = {
            let _guard = lock.lock().await;
            self.reconcile_and_commit(candidate).await
        };
        drop(lock);

        // Reclaim the lock entry once no other producer holds it. Our own
        // clone must be gone first or the count never reaches one.
        self.locks.remove_if(&key, |_, entry| Arc::strong_count(entry) == 1);

        let outcome = outcome?;
        match &outcome {
            IngestOutcome::Inserted(message) => {
                self.broadcaster.publish(StreamEvent::MessageInserted { message: message.clone() });
                self.touch(message);
            }
            IngestOutcome::Replaced(message) => {
                self.broadcaster.publish(StreamEvent::MessageReplaced { message: message.clone() });
                self.touch(message);
            }
            IngestOutcome::Ignored(reason) => {
                tracing::debug!(reason = reason.as_str(), "Candidate ignored");
            }
        }

        Ok(outcome)
    }

    async fn reconcile_and_commit(&self, candidate: Candidate) -> Result<IngestOutcome> {
        let known = self.store.list_by_conversation(candidate.connection_id, &candidate.counterparty).await?;

        match merge::reconcile(&candidate, &known) {
            MergeOutcome::Insert => match self.store.append(candidate).await? {
                Appended::Inserted(message) => Ok(IngestOutcome::Inserted(message)),
                // Another producer committed the same event between our
                // merge decision and the write.
                Appended::DuplicateFingerprint => Ok(IngestOutcome::Ignored(IgnoreReason::DuplicateContent)),
            },
            MergeOutcome::Replace { existing } => {
                let message = self.store.replace(existing, candidate).await?;
                Ok(IngestOutcome::Replaced(message))
            }
            MergeOutcome::Ignore(reason) => Ok(IngestOutcome::Ignored(reason)),
        }
    }

    fn touch(&self, message: &Message) {
        self.broadcaster.publish(StreamEvent::ConversationTouched {
            connection_id: message.connection_id,
            counterparty: message.counterparty.clone(),
        });
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    #[must_use]
    pub const fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }
}
