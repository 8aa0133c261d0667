//! Bazaar event directory.

use chrono::{DateTime, Utc};
use thiserror::Error;

use claim_store::{BazaarStore, EventRecord, StoreError};
use common::EventId;

/// Errors that can occur during event operations.
#[derive(Debug, Error)]
pub enum EventError {
    /// Event does not exist.
    #[error("event not found: {0}")]
    NotFound(EventId),

    /// Commission outside 0-100.
    #[error("commission must be between 0 and 100, got {0}")]
    InvalidCommission(u8),

    /// A time window closes before it opens.
    #[error("invalid {0}: it must start before it ends")]
    InvalidWindow(&'static str),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parameters for creating a bazaar event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub registration_opens_at: DateTime<Utc>,
    pub registration_closes_at: DateTime<Utc>,
    /// After this instant sellers can no longer edit their articles.
    pub article_edit_deadline: Option<DateTime<Utc>>,
    pub commission_percent: u8,
}

/// Creates and looks up bazaar events.
///
/// Each event is an isolated namespace: seller numbers, label lookups, and
/// claims never cross event boundaries.
pub struct EventDirectory<S> {
    store: S,
}

impl<S: BazaarStore> EventDirectory<S> {
    /// Creates a new directory over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates a new bazaar event after validating its windows and
    /// commission.
    #[tracing::instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create_event(&self, new: NewEvent) -> Result<EventRecord, EventError> {
        if new.commission_percent > 100 {
            return Err(EventError::InvalidCommission(new.commission_percent));
        }
        if new.starts_at >= new.ends_at {
            return Err(EventError::InvalidWindow("event window"));
        }
        if new.registration_opens_at >= new.registration_closes_at {
            return Err(EventError::InvalidWindow("registration window"));
        }

        let record = EventRecord {
            id: EventId::new(),
            name: new.name,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            registration_opens_at: new.registration_opens_at,
            registration_closes_at: new.registration_closes_at,
            article_edit_deadline: new.article_edit_deadline,
            commission_percent: new.commission_percent,
        };
        self.store.insert_event(record.clone()).await?;

        tracing::info!(event_id = %record.id, "created bazaar event");
        Ok(record)
    }

    /// Looks up an event by id.
    #[tracing::instrument(skip(self))]
    pub async fn event(&self, id: EventId) -> Result<EventRecord, EventError> {
        self.store.event(id).await?.ok_or(EventError::NotFound(id))
    }
}
