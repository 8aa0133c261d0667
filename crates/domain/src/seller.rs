//! Seller registration.

use thiserror::Error;

use claim_store::{BazaarStore, SellerRecord, SellerRole, StoreError};
use common::{EventId, SellerId, UserId};

use crate::clock::{Clock, SystemClock};

/// Errors that can occur during seller operations.
#[derive(Debug, Error)]
pub enum SellerError {
    /// Seller does not exist.
    #[error("seller not found: {0}")]
    NotFound(SellerId),

    /// The event to register for does not exist.
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// The event's registration window is not open.
    #[error("registration for event {0} is closed")]
    RegistrationClosed(EventId),

    /// Two registrations raced for the same seller number; this one lost.
    #[error("seller number {seller_number} is already taken in event {event_id}")]
    DuplicateSellerNumber {
        event_id: EventId,
        seller_number: u32,
    },

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Registers sellers for events and allocates their seller numbers.
pub struct SellerDirectory<S, C = SystemClock> {
    store: S,
    clock: C,
}

impl<S: BazaarStore> SellerDirectory<S, SystemClock> {
    /// Creates a new directory over the given store, using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: BazaarStore, C: Clock> SellerDirectory<S, C> {
    /// Creates a new directory with an explicit clock.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// Registers a user as a seller of an event.
    ///
    /// Allocates the next free seller number within the event. Concurrent
    /// registrations may race for the same number; the store's unique
    /// constraint is the final arbiter, and the loser surfaces
    /// [`SellerError::DuplicateSellerNumber`] without an internal retry.
    #[tracing::instrument(skip(self))]
    pub async fn register_seller(
        &self,
        event_id: EventId,
        user_id: UserId,
        role: SellerRole,
        can_bill: bool,
    ) -> Result<SellerRecord, SellerError> {
        let event = self
            .store
            .event(event_id)
            .await?
            .ok_or(SellerError::EventNotFound(event_id))?;

        let now = self.clock.now();
        if now < event.registration_opens_at || now > event.registration_closes_at {
            return Err(SellerError::RegistrationClosed(event_id));
        }

        let seller_number = self
            .store
            .max_seller_number(event_id)
            .await?
            .map_or(1, |n| n + 1);

        let record = SellerRecord {
            id: SellerId::new(),
            event_id,
            user_id,
            seller_number,
            role,
            can_bill,
        };
        self.store
            .insert_seller(record.clone())
            .await
            .map_err(|e| match e {
                StoreError::DuplicateSellerNumber {
                    event_id,
                    seller_number,
                } => SellerError::DuplicateSellerNumber {
                    event_id,
                    seller_number,
                },
                e => SellerError::Store(e),
            })?;

        tracing::info!(seller_id = %record.id, seller_number, "registered seller");
        Ok(record)
    }

    /// Looks up a seller by id.
    #[tracing::instrument(skip(self))]
    pub async fn seller(&self, id: SellerId) -> Result<SellerRecord, SellerError> {
        self.store
            .seller(id)
            .await?
            .ok_or(SellerError::NotFound(id))
    }
}
