//! Pricing sync from an external per-token pricing document.
//!
//! The document is JSON keyed by model name, with per-token costs and a
//! `mode` marker. Only chat-mode entries with at least one non-zero price
//! are kept; costs are scaled to the per-million-token convention the model
//! records use.

use std::collections::HashMap;

use anyhow::Context as _;
use serde::Deserialize;
use store::PricingUpdate;

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    input_cost_per_token: Option<f64>,
    #[serde(default)]
    output_cost_per_token: Option<f64>,
    #[serde(default)]
    mode: Option<String>,
}

/// Fetch and filter the pricing document.
pub async fn fetch_pricing(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<PricingUpdate>> {
    let response = client
        .get(url)
        .send()
        .await
        .context("failed to request pricing document")?;

    if !response.status().is_success() {
        anyhow::bail!("pricing document request failed with status {}", response.status());
    }

    let document: HashMap<String, serde_json::Value> = response
        .json()
        .await
        .context("failed to parse pricing document")?;

    Ok(parse_document(document))
}

fn parse_document(document: HashMap<String, serde_json::Value>) -> Vec<PricingUpdate> {
    let mut updates = Vec::new();

    for (model, value) in document {
        // Documents carry non-model bookkeeping entries; skip anything that
        // does not look like a pricing record.
        let Ok(entry) = serde_json::from_value::<RawEntry>(value) else {
            continue;
        };

        if entry.mode.as_deref() != Some("chat") {
            continue;
        }

        let input = entry.input_cost_per_token.unwrap_or(0.0);
        let output = entry.output_cost_per_token.unwrap_or(0.0);

        if input == 0.0 && output == 0.0 {
            continue;
        }

        updates.push(PricingUpdate {
            model,
            input_cost_per_million: input * 1_000_000.0,
            output_cost_per_million: output * 1_000_000.0,
        });
    }

    updates
}
