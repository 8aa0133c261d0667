//! Shared fixtures for unit tests.

use chrono::{Duration, Utc};

use claim_store::{
    ArticleRecord, BazaarStore, EventRecord, MemoryStore, SellerRecord, SellerRole,
};
use common::{ArticleId, EventId, Money, SellerId, UserId};

pub(crate) struct Seeded {
    pub store: MemoryStore,
    pub event: EventRecord,
    pub seller: SellerRecord,
    pub article: ArticleRecord,
}

pub(crate) fn event_record() -> EventRecord {
    let now = Utc::now();
    EventRecord {
        id: EventId::new(),
        name: "Spring Bazaar".to_string(),
        starts_at: now + Duration::days(7),
        ends_at: now + Duration::days(9),
        registration_opens_at: now - Duration::days(30),
        registration_closes_at: now + Duration::days(5),
        article_edit_deadline: Some(now + Duration::days(6)),
        commission_percent: 10,
    }
}

pub(crate) fn seller_record(event_id: EventId, seller_number: u32) -> SellerRecord {
    SellerRecord {
        id: SellerId::new(),
        event_id,
        user_id: UserId::new(),
        seller_number,
        role: SellerRole::Standard,
        can_bill: true,
    }
}

pub(crate) fn article_record(
    seller: &SellerRecord,
    label_number: u32,
    cents: i64,
) -> ArticleRecord {
    ArticleRecord {
        id: ArticleId::new(),
        seller_id: seller.id,
        event_id: seller.event_id,
        label_number,
        name: format!("article {label_number}"),
        size: None,
        price: Money::from_cents(cents),
    }
}

/// One event with one seller (number 12) holding one article
/// (label 7, 3.50 €).
pub(crate) async fn seed() -> Seeded {
    let store = MemoryStore::new();
    let event = event_record();
    store.insert_event(event.clone()).await.unwrap();
    let seller = seller_record(event.id, 12);
    store.insert_seller(seller.clone()).await.unwrap();
    let article = article_record(&seller, 7, 350);
    store.insert_article(article.clone()).await.unwrap();
    Seeded {
        store,
        event,
        seller,
        article,
    }
}
