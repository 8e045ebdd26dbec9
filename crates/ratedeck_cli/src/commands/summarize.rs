//! Summarize command implementation.

use super::input::read_json_lines;
use ratedeck_core::{Config, LergAggregate, LergRecord, StorageContext};
use ratedeck_storage::InMemoryEngine;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Parses LERG rows, skipping the ones without an area code.
pub fn parse_records(rows: &[Value]) -> (Vec<LergRecord>, usize) {
    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for (index, row) in rows.iter().enumerate() {
        match LergRecord::from_value(row) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "skipping LERG row");
                skipped += 1;
            }
        }
    }
    (records, skipped)
}

/// Runs the summarize command.
pub async fn run(
    input: &Path,
    config: Config,
    region: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = read_json_lines(input)?;
    let (records, skipped) = parse_records(&rows);

    let ctx = StorageContext::new(Arc::new(InMemoryEngine::new()), config)?;
    let report = ctx.store_lerg(&records, true).await?;
    tracing::info!(rows = report.rows_written, batches = report.batches, skipped, "LERG loaded");

    let summary = ctx.lerg_summary(false).await?;
    ctx.shutdown();

    match (region, format) {
        (Some(region), "json") => {
            let npas = summary.npas_for_region(&region.to_uppercase()).cloned().unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&npas)?);
        }
        (Some(region), _) => {
            let region = region.to_uppercase();
            match summary.npas_for_region(&region) {
                Some(npas) => {
                    println!("{region}: {} area codes", npas.len());
                    for npa in npas {
                        println!("  {npa}");
                    }
                }
                None => println!("{region}: no area codes"),
            }
        }
        (None, "json") => println!("{}", serde_json::to_string_pretty(&*summary)?),
        (None, _) => print_text(&summary, skipped),
    }

    Ok(())
}

fn print_text(summary: &LergAggregate, skipped: usize) {
    println!("=== LERG Summary ===");
    println!();
    println!("Records:       {}", summary.record_count);
    println!("Skipped:       {skipped}");
    println!("Area codes:    {}", summary.distinct_npas());
    println!();

    println!("Countries:");
    for (country, npas) in &summary.country_npas {
        println!("  {country:<4} {:>5} area codes", npas.len());
    }
    println!();

    println!("Regions:");
    for (region, npas) in &summary.region_npas {
        println!("  {region:<4} {:>5} area codes", npas.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rows_without_npa_are_skipped() {
        let rows = vec![
            json!({"npa": "201", "state": "nj", "country": "us"}),
            json!({"state": "NY", "country": "US"}),
            json!({"npa": 604, "state": "BC", "country": "CA"}),
        ];
        let (records, skipped) = parse_records(&rows);

        assert_eq!(skipped, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].state, "NJ");
        assert_eq!(records[1].npa, "604");
    }
}
