use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};
use uuid::Uuid;

use claim_store::{
    ArticleRecord, BazaarStore, ClaimKind, EventRecord, MemoryStore, SellerRecord, SellerRole,
};
use common::{ArticleId, EventId, Money, SellerId, UserId};

async fn seeded_store(article_count: u32) -> (MemoryStore, Vec<ArticleId>) {
    let store = MemoryStore::new();
    let now = Utc::now();
    let event = EventRecord {
        id: EventId::new(),
        name: "bench".to_string(),
        starts_at: now,
        ends_at: now,
        registration_opens_at: now,
        registration_closes_at: now,
        article_edit_deadline: None,
        commission_percent: 10,
    };
    store.insert_event(event.clone()).await.unwrap();
    let seller = SellerRecord {
        id: SellerId::new(),
        event_id: event.id,
        user_id: UserId::new(),
        seller_number: 1,
        role: SellerRole::Standard,
        can_bill: true,
    };
    store.insert_seller(seller.clone()).await.unwrap();

    let mut ids = Vec::new();
    for label in 1..=article_count {
        let article = ArticleRecord {
            id: ArticleId::new(),
            seller_id: seller.id,
            event_id: event.id,
            label_number: label,
            name: format!("article {label}"),
            size: None,
            price: Money::from_cents(350),
        };
        ids.push(article.id);
        store.insert_article(article).await.unwrap();
    }
    (store, ids)
}

fn bench_try_claim(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, ids) = rt.block_on(seeded_store(1));
    let article_id = ids[0];

    c.bench_function("claim_store/try_claim_contended", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .try_claim(ClaimKind::Checkout, article_id, Uuid::new_v4(), Utc::now())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_claim_release_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, ids) = rt.block_on(seeded_store(1));
    let article_id = ids[0];
    let session = Uuid::new_v4();

    c.bench_function("claim_store/claim_release_cycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .try_claim(ClaimKind::Checkout, article_id, session, Utc::now())
                    .await
                    .unwrap();
                store
                    .release_claim(ClaimKind::Checkout, article_id, session)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_claim_lines(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, ids) = rt.block_on(seeded_store(50));
    let session = Uuid::new_v4();
    rt.block_on(async {
        for id in &ids {
            store
                .try_claim(ClaimKind::Checkout, *id, session, Utc::now())
                .await
                .unwrap();
        }
    });

    c.bench_function("claim_store/claim_lines_50_articles", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .claim_lines_for_session(ClaimKind::Checkout, session)
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_try_claim,
    bench_claim_release_cycle,
    bench_claim_lines
);
criterion_main!(benches);
