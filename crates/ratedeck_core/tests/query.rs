//! Paginated queries through a full storage context.

use ratedeck_core::query::{execute_query, sort_records};
use ratedeck_core::{BulkOptions, Config, Filter, QuerySpec, SortDirection, SortSpec, StorageContext};
use ratedeck_storage::{InMemoryEngine, ScanRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct DeckRow {
    npanxx: String,
    npa: String,
    state: String,
    inter_rate: f64,
    intra_rate: Option<f64>,
}

fn deck(n: usize) -> Vec<Value> {
    let states = ["NJ", "ny", "CA", "tx", "Wa"];
    let carriers = [json!("Verizon"), json!("att"), Value::Null, json!("Lumen"), json!("ATT"), json!(42)];
    (0..n)
        .map(|i| {
            let npa = 201 + (i % 40);
            let intra = if i % 7 == 0 { Value::Null } else { json!((i % 11) as f64 / 100.0) };
            json!({
                "npanxx": format!("{npa}{:03}", i % 1000),
                "npa": npa.to_string(),
                "state": states[i % states.len()],
                "inter_rate": (i % 13) as f64 / 100.0,
                "intra_rate": intra,
                "carrier": carriers[i % carriers.len()].clone(),
            })
        })
        .collect()
}

async fn loaded(n: usize) -> StorageContext {
    let ctx = StorageContext::new(Arc::new(InMemoryEngine::new()), Config::default()).unwrap();
    ctx.pipeline()
        .bulk_store("rate_decks", "deck_a", deck(n), BulkOptions::replace())
        .await
        .unwrap();
    ctx
}

#[tokio::test]
async fn total_is_invariant_under_paging() {
    let ctx = loaded(1_000).await;
    let lease = ctx.connections().lease("rate_decks").await.unwrap();
    let filter = Filter::new().range("inter_rate", Some(0.05), Some(0.10));

    let mut totals = Vec::new();
    for page_size in [25, 100, 500] {
        for page in [1, 2, 40] {
            let spec = QuerySpec::new("deck_a", page_size).filter(filter.clone()).page(page);
            let result = execute_query(&lease, &spec).await.unwrap();
            assert!(result.items.len() <= page_size);
            totals.push(result.total_matching);
        }
    }
    assert!(totals.windows(2).all(|w| w[0] == w[1]));
    assert!(totals[0] > 0);
}

#[tokio::test]
async fn fallback_sort_matches_oracle_on_every_page() {
    let ctx = loaded(300).await;
    let lease = ctx.connections().lease("rate_decks").await.unwrap();
    // No index on carrier, so every page is sorted in memory.
    let sort = SortSpec::desc("carrier");
    let filter = Filter::new().one_of("state", ["NJ", "ny", "tx"]);

    let mut oracle = lease
        .scan("deck_a", ScanRequest::all().filter(filter.to_record_filter()))
        .await
        .unwrap();
    sort_records(&mut oracle, &sort);

    let mut paged = Vec::new();
    for page in 1..=4 {
        let spec = QuerySpec::new("deck_a", 50)
            .filter(filter.clone())
            .sort(sort.clone())
            .page(page);
        paged.extend(execute_query(&lease, &spec).await.unwrap().items);
    }
    assert_eq!(paged, oracle);
}

#[tokio::test]
async fn facade_end_to_end() {
    let ctx = loaded(240).await;
    let facade = ctx.query_facade::<DeckRow>("rate_decks", "deck_a");
    facade.initialize().await.unwrap();
    assert_eq!(facade.total_pages(), 3);

    facade.set_sort("state", SortDirection::Asc).await;
    let first = facade.items();
    assert_eq!(first[0].state, "CA");

    facade.set_filters(Filter::new().eq("npa", "201")).await;
    assert_eq!(facade.total_matching(), 6);
    assert_eq!(facade.current_page(), 1);
    assert!(facade.items().iter().all(|row| row.npa == "201"));

    assert!(!facade.go_to_last_page().await);
    facade.clear_filters().await;
    assert!(facade.go_to_last_page().await);
    assert_eq!(facade.current_page(), 3);
    assert_eq!(facade.items().len(), 40);
}

#[tokio::test]
async fn facade_survives_unavailable_store() {
    let ctx = loaded(10).await;
    let facade = ctx.query_facade::<DeckRow>("rate_decks", "deck_missing");

    let page = facade.fetch_page(1).await;
    assert!(page.items.is_empty());
    assert_eq!(facade.total_pages(), 1);
    assert!(facade.error().is_none());
}
