//! Query command implementation.

use super::input::read_json_lines;
use ratedeck_core::{
    BulkOptions, BulkReport, Config, CoreResult, Filter, SortDirection, StorageContext,
};
use ratedeck_storage::InMemoryEngine;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Database the rate deck is loaded into.
pub const DECK_DB: &str = "rate_decks";
/// Store the rate deck is loaded into.
pub const DECK_STORE: &str = "deck";

/// Filter, sort and paging options for one query.
#[derive(Debug, Default)]
pub struct QueryOptions {
    /// Exact matches.
    pub equals: Vec<(String, String)>,
    /// Case-insensitive substring matches.
    pub contains: Vec<(String, String)>,
    /// Numeric lower bounds.
    pub min: Vec<(String, f64)>,
    /// Numeric upper bounds.
    pub max: Vec<(String, f64)>,
    /// Sort field.
    pub sort: Option<String>,
    /// Sort descending.
    pub descending: bool,
    /// Page as typed.
    pub page: String,
    /// Records per page.
    pub page_size: Option<usize>,
}

/// One page of query output.
#[derive(Debug, Serialize)]
pub struct QueryOutput {
    /// 1-based page shown.
    pub page: usize,
    /// Page count.
    pub total_pages: usize,
    /// Records matching the filter.
    pub total_matching: usize,
    /// Records on this page.
    pub items: Vec<Value>,
}

/// Parses `field=value`.
pub fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected field=value, got {raw:?}")),
    }
}

/// Parses `field=number`.
pub fn parse_bound(raw: &str) -> Result<(String, f64), String> {
    let (field, value) = parse_pair(raw)?;
    let bound = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("expected a number for {field}, got {value:?}"))?;
    Ok((field, bound))
}

/// Builds the record filter for `options`.
///
/// Exact matches accept the value as text or, when it parses, as a number.
pub fn build_filter(options: &QueryOptions) -> Filter {
    let mut filter = Filter::new();
    for (field, value) in &options.equals {
        let mut accepted = vec![Value::String(value.clone())];
        if let Ok(number) = serde_json::from_str::<serde_json::Number>(value.trim()) {
            accepted.push(Value::Number(number));
        }
        filter = filter.one_of(field.clone(), accepted);
    }
    for (field, needle) in &options.contains {
        filter = filter.contains_ci(field.clone(), needle);
    }
    for (field, bound) in &options.min {
        filter = filter.range(field.clone(), Some(*bound), None);
    }
    for (field, bound) in &options.max {
        filter = filter.range(field.clone(), None, Some(*bound));
    }
    filter
}

/// Replaces the rate deck with `rows`.
///
/// Deck rows are small, so they go in light batches.
pub async fn load_deck(ctx: &StorageContext, rows: Vec<Value>) -> CoreResult<BulkReport> {
    ctx.pipeline()
        .bulk_store(DECK_DB, DECK_STORE, rows, BulkOptions::replace().light())
        .await
}

/// Loads `rows` and runs `options` through a query facade.
pub async fn query_rows(
    rows: Vec<Value>,
    config: Config,
    options: &QueryOptions,
) -> Result<QueryOutput, Box<dyn std::error::Error>> {
    let ctx = StorageContext::new(Arc::new(InMemoryEngine::new()), config)?;
    let report = load_deck(&ctx, rows).await?;
    tracing::info!(rows = report.rows_written, batches = report.batches, "rate deck loaded");

    let facade = ctx.query_facade::<Value>(DECK_DB, DECK_STORE);
    facade.initialize().await?;
    if let Some(size) = options.page_size {
        facade.set_page_size(size).await?;
    }
    let filter = build_filter(options);
    if !filter.is_empty() {
        facade.set_filters(filter).await;
    }
    if let Some(key) = &options.sort {
        let direction = if options.descending {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        facade.set_sort(key.as_str(), direction).await;
    }
    if !facade.handle_direct_page_input(&options.page).await {
        tracing::debug!(page = %options.page, current = facade.current_page(), "page unchanged");
    }

    let snapshot = facade.snapshot();
    ctx.shutdown();
    if let Some(message) = snapshot.error {
        return Err(message.into());
    }
    Ok(QueryOutput {
        page: snapshot.current_page,
        total_pages: snapshot.total_pages,
        total_matching: snapshot.total_matching,
        items: snapshot.items,
    })
}

/// Runs the query command.
pub async fn run(
    input: &Path,
    config: Config,
    options: &QueryOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = read_json_lines(input)?;
    let output = query_rows(rows, config, options).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "Page {} of {} ({} matching)",
        output.page, output.total_pages, output.total_matching
    );
    for item in &output.items {
        println!("{item}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn deck() -> Vec<Value> {
        (0..30)
            .map(|i| {
                json!({
                    "npanxx": format!("{}{:03}", 200 + i % 3, i),
                    "npa": format!("{}", 200 + i % 3),
                    "state": if i % 2 == 0 { "NJ" } else { "NY" },
                    "inter_rate": f64::from(i) / 100.0,
                })
            })
            .collect()
    }

    fn config() -> Config {
        Config::new().min_filter_display(Duration::ZERO)
    }

    #[test]
    fn pairs_need_a_field() {
        assert_eq!(parse_pair("npa=201").unwrap(), ("npa".into(), "201".into()));
        assert_eq!(parse_pair("state=").unwrap(), ("state".into(), String::new()));
        assert!(parse_pair("=201").is_err());
        assert!(parse_pair("201").is_err());
        assert!(parse_bound("inter_rate=abc").is_err());
        assert_eq!(parse_bound("inter_rate= 0.5").unwrap().1, 0.5);
    }

    #[test]
    fn equals_accepts_text_and_numbers() {
        let options = QueryOptions {
            equals: vec![("npa".into(), "201".into())],
            ..QueryOptions::default()
        };
        let filter = build_filter(&options);
        assert!(filter.matches(&json!({"npa": "201"})));
        assert!(filter.matches(&json!({"npa": 201})));
        assert!(!filter.matches(&json!({"npa": "202"})));
    }

    #[tokio::test]
    async fn query_pages_filtered_rows() {
        let options = QueryOptions {
            equals: vec![("state".into(), "NJ".into())],
            max: vec![("inter_rate".into(), 0.2)],
            sort: Some("inter_rate".into()),
            descending: true,
            page: "2".into(),
            page_size: Some(5),
            ..QueryOptions::default()
        };
        let output = query_rows(deck(), config().default_page_size(5), &options)
            .await
            .unwrap();

        assert_eq!(output.total_matching, 11);
        assert_eq!(output.total_pages, 3);
        assert_eq!(output.page, 2);
        assert_eq!(output.items.len(), 5);
        assert_eq!(output.items[0]["inter_rate"], json!(0.1));
    }

    #[tokio::test]
    async fn deck_loads_in_light_batches() {
        let ctx = StorageContext::new(
            Arc::new(InMemoryEngine::new()),
            config().batch_size(100).light_batch_size(8),
        )
        .unwrap();
        let report = load_deck(&ctx, deck()).await.unwrap();

        assert_eq!(report.rows_written, 30);
        assert_eq!(report.batches, 4);
    }

    #[tokio::test]
    async fn unknown_page_size_is_rejected() {
        let options = QueryOptions {
            page: "1".into(),
            page_size: Some(7),
            ..QueryOptions::default()
        };
        assert!(query_rows(deck(), config(), &options).await.is_err());
    }
}
