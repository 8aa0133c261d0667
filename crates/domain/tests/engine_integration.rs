//! End-to-end engine tests over the in-memory store.
//!
//! These exercise the full path a real bazaar day takes — event setup,
//! seller registration, article submission, checkout, billing — plus the
//! concurrency properties the claim ledger must hold.

use std::sync::Arc;
use std::sync::Once;

use chrono::{Duration, Utc};

use domain::{
    ArticleRegistry, BillingError, BillingManager, CheckoutError, CheckoutManager, EventDirectory,
    MemoryStore, Money, NewEvent, SellerDirectory, SellerRole, SessionStatus, UserId,
};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

fn upcoming_event(commission_percent: u8) -> NewEvent {
    let now = Utc::now();
    NewEvent {
        name: "Winter Bazaar".to_string(),
        starts_at: now + Duration::days(7),
        ends_at: now + Duration::days(9),
        registration_opens_at: now - Duration::days(1),
        registration_closes_at: now + Duration::days(5),
        article_edit_deadline: Some(now + Duration::days(6)),
        commission_percent,
    }
}

struct Bazaar {
    store: MemoryStore,
    events: EventDirectory<MemoryStore>,
    sellers: SellerDirectory<MemoryStore>,
    registry: ArticleRegistry<MemoryStore>,
    checkouts: CheckoutManager<MemoryStore>,
    billings: BillingManager<MemoryStore>,
}

fn bazaar() -> Bazaar {
    init_tracing();
    let store = MemoryStore::new();
    Bazaar {
        events: EventDirectory::new(store.clone()),
        sellers: SellerDirectory::new(store.clone()),
        registry: ArticleRegistry::new(store.clone()),
        checkouts: CheckoutManager::new(store.clone()),
        billings: BillingManager::new(store.clone()),
        store,
    }
}

#[tokio::test]
async fn full_bazaar_day() {
    let bazaar = bazaar();

    // Organizer sets up the event; a seller registers and submits articles.
    let event = bazaar
        .events
        .create_event(upcoming_event(10))
        .await
        .unwrap();
    let seller = bazaar
        .sellers
        .register_seller(event.id, UserId::new(), SellerRole::Standard, true)
        .await
        .unwrap();
    assert_eq!(seller.seller_number, 1);

    let jacket = bazaar
        .registry
        .create_article(seller.id, "jacket", Some("116".into()), Money::from_cents(350))
        .await
        .unwrap();
    let trousers = bazaar
        .registry
        .create_article(seller.id, "trousers", None, Money::from_cents(700))
        .await
        .unwrap();

    // A buyer brings both articles to a register. One is scanned, one is
    // typed in from the tag.
    let checkout = bazaar
        .checkouts
        .create(event.id, UserId::new())
        .await
        .unwrap();
    bazaar
        .checkouts
        .add_article(checkout.id, jacket.id)
        .await
        .unwrap();
    let typed = bazaar
        .checkouts
        .add_article_by_label(checkout.id, seller.seller_number, trousers.label_number)
        .await
        .unwrap();
    assert_eq!(typed, trousers.id);

    let total = bazaar.checkouts.compute_total(checkout.id).await.unwrap();
    assert_eq!(total.article_count, 2);
    assert_eq!(total.total, Money::from_cents(1050));

    let completed = bazaar.checkouts.complete(checkout.id).await.unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);

    // After the event the seller is reconciled: both sold articles are
    // collected into one billing and paid out minus 10% commission.
    let billing = bazaar
        .billings
        .create(event.id, seller.id, UserId::new())
        .await
        .unwrap();
    bazaar
        .billings
        .add_article(billing.id, jacket.id)
        .await
        .unwrap();
    bazaar
        .billings
        .add_article(billing.id, trousers.id)
        .await
        .unwrap();

    let settled = bazaar.billings.complete(billing.id).await.unwrap();
    assert_eq!(settled.total, Some(Money::from_cents(1050)));
    assert_eq!(settled.payout, Some(Money::from_cents(945)));
}

#[tokio::test]
async fn two_events_do_not_share_a_namespace() {
    let bazaar = bazaar();

    let spring = bazaar
        .events
        .create_event(upcoming_event(10))
        .await
        .unwrap();
    let autumn = bazaar
        .events
        .create_event(upcoming_event(15))
        .await
        .unwrap();

    let spring_seller = bazaar
        .sellers
        .register_seller(spring.id, UserId::new(), SellerRole::Standard, false)
        .await
        .unwrap();
    let autumn_seller = bazaar
        .sellers
        .register_seller(autumn.id, UserId::new(), SellerRole::Standard, false)
        .await
        .unwrap();

    // Identical tag numbers in both events.
    assert_eq!(spring_seller.seller_number, autumn_seller.seller_number);
    let spring_article = bazaar
        .registry
        .create_article(spring_seller.id, "boots", None, Money::from_cents(500))
        .await
        .unwrap();
    let autumn_article = bazaar
        .registry
        .create_article(autumn_seller.id, "boots", None, Money::from_cents(900))
        .await
        .unwrap();
    assert_eq!(spring_article.label_number, autumn_article.label_number);

    // A register of the autumn event resolves the tag to the autumn article
    // and cannot claim the spring one by id.
    let checkout = bazaar
        .checkouts
        .create(autumn.id, UserId::new())
        .await
        .unwrap();
    let resolved = bazaar
        .checkouts
        .add_article_by_label(checkout.id, 1, 1)
        .await
        .unwrap();
    assert_eq!(resolved, autumn_article.id);

    let result = bazaar
        .checkouts
        .add_article(checkout.id, spring_article.id)
        .await;
    assert!(matches!(result, Err(CheckoutError::ArticleNotFound(_))));
}

#[tokio::test]
async fn concurrent_registers_sell_an_article_once() {
    let bazaar = bazaar();

    let event = bazaar
        .events
        .create_event(upcoming_event(10))
        .await
        .unwrap();
    let seller = bazaar
        .sellers
        .register_seller(event.id, UserId::new(), SellerRole::Standard, false)
        .await
        .unwrap();
    let article = bazaar
        .registry
        .create_article(seller.id, "bicycle", None, Money::from_cents(2500))
        .await
        .unwrap();

    // Eight terminals scan the same tag at once.
    let manager = Arc::new(CheckoutManager::new(bazaar.store.clone()));
    let mut checkouts = Vec::new();
    for _ in 0..8 {
        checkouts.push(manager.create(event.id, UserId::new()).await.unwrap());
    }

    let mut handles = Vec::new();
    for checkout in &checkouts {
        let manager = manager.clone();
        let checkout_id = checkout.id;
        let article_id = article.id;
        handles.push(tokio::spawn(async move {
            manager.add_article(checkout_id, article_id).await
        }));
    }

    let mut winners = Vec::new();
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners.push(()),
            Err(CheckoutError::AlreadyBooked { .. }) => losers += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(losers, 7);
}

#[tokio::test]
async fn cancelled_checkout_returns_articles_to_the_floor() {
    let bazaar = bazaar();

    let event = bazaar
        .events
        .create_event(upcoming_event(10))
        .await
        .unwrap();
    let seller = bazaar
        .sellers
        .register_seller(event.id, UserId::new(), SellerRole::Standard, false)
        .await
        .unwrap();
    let article = bazaar
        .registry
        .create_article(seller.id, "puzzle", None, Money::from_cents(150))
        .await
        .unwrap();

    let first = bazaar
        .checkouts
        .create(event.id, UserId::new())
        .await
        .unwrap();
    bazaar
        .checkouts
        .add_article(first.id, article.id)
        .await
        .unwrap();

    // Buyer walks away; the register cancels and another one sells it.
    assert_eq!(bazaar.checkouts.cancel(first.id).await.unwrap(), 1);

    let second = bazaar
        .checkouts
        .create(event.id, UserId::new())
        .await
        .unwrap();
    bazaar
        .checkouts
        .add_article(second.id, article.id)
        .await
        .unwrap();
    bazaar.checkouts.complete(second.id).await.unwrap();
}

#[tokio::test]
async fn complete_and_cancel_race_has_one_winner() {
    let bazaar = bazaar();

    let event = bazaar
        .events
        .create_event(upcoming_event(10))
        .await
        .unwrap();
    let seller = bazaar
        .sellers
        .register_seller(event.id, UserId::new(), SellerRole::Standard, false)
        .await
        .unwrap();
    let article = bazaar
        .registry
        .create_article(seller.id, "scooter", None, Money::from_cents(1500))
        .await
        .unwrap();

    let manager = Arc::new(CheckoutManager::new(bazaar.store.clone()));
    let checkout = manager.create(event.id, UserId::new()).await.unwrap();
    manager.add_article(checkout.id, article.id).await.unwrap();

    let complete = {
        let manager = manager.clone();
        let id = checkout.id;
        tokio::spawn(async move { manager.complete(id).await.map(|_| ()) })
    };
    let cancel = {
        let manager = manager.clone();
        let id = checkout.id;
        tokio::spawn(async move { manager.cancel(id).await.map(|_| ()) })
    };

    let outcomes = [complete.await.unwrap(), cancel.await.unwrap()];
    let won = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(won, 1, "exactly one finalizer must win: {outcomes:?}");
    for outcome in outcomes {
        if let Err(e) = outcome {
            assert!(
                matches!(
                    e,
                    CheckoutError::Conflict(_) | CheckoutError::Finalized { .. }
                ),
                "loser must see the race, got: {e}"
            );
        }
    }

    // Whatever won, the session ended in exactly one terminal state.
    let stored = manager.checkout(checkout.id).await.unwrap();
    assert!(stored.status.is_terminal());
}

#[tokio::test]
async fn sold_then_billed_exactly_once() {
    let bazaar = bazaar();

    let event = bazaar
        .events
        .create_event(upcoming_event(10))
        .await
        .unwrap();
    let seller = bazaar
        .sellers
        .register_seller(event.id, UserId::new(), SellerRole::Standard, true)
        .await
        .unwrap();
    let article = bazaar
        .registry
        .create_article(seller.id, "raincoat", None, Money::from_cents(600))
        .await
        .unwrap();

    let checkout = bazaar
        .checkouts
        .create(event.id, UserId::new())
        .await
        .unwrap();
    bazaar
        .checkouts
        .add_article(checkout.id, article.id)
        .await
        .unwrap();
    bazaar.checkouts.complete(checkout.id).await.unwrap();

    let first = bazaar
        .billings
        .create(event.id, seller.id, UserId::new())
        .await
        .unwrap();
    bazaar
        .billings
        .add_article(first.id, article.id)
        .await
        .unwrap();
    bazaar.billings.complete(first.id).await.unwrap();

    let second = bazaar
        .billings
        .create(event.id, seller.id, UserId::new())
        .await
        .unwrap();
    let result = bazaar.billings.add_article(second.id, article.id).await;
    assert!(matches!(result, Err(BillingError::AlreadyBilled { .. })));
}

#[tokio::test]
async fn article_locked_while_in_an_open_checkout() {
    let bazaar = bazaar();

    let event = bazaar
        .events
        .create_event(upcoming_event(10))
        .await
        .unwrap();
    let seller = bazaar
        .sellers
        .register_seller(event.id, UserId::new(), SellerRole::Standard, false)
        .await
        .unwrap();
    let article = bazaar
        .registry
        .create_article(seller.id, "wagon", None, Money::from_cents(2000))
        .await
        .unwrap();

    let checkout = bazaar
        .checkouts
        .create(event.id, UserId::new())
        .await
        .unwrap();
    bazaar
        .checkouts
        .add_article(checkout.id, article.id)
        .await
        .unwrap();

    let result = bazaar
        .registry
        .update_article(article.id, "wagon", None, Money::from_cents(2500))
        .await;
    assert!(matches!(result, Err(domain::RegistryError::Locked(_))));

    // Once the buyer backs out, the seller can edit again.
    bazaar.checkouts.cancel(checkout.id).await.unwrap();
    bazaar
        .registry
        .update_article(article.id, "wagon", None, Money::from_cents(2500))
        .await
        .unwrap();
}
