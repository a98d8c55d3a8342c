use crate::domain::decision::{AssetType, UniverseRow};
use crate::ingest::csv::{normalize_header, parse_numeric, split_csv_row};
use crate::text::normalize_text_key;
use anyhow::bail;
use std::collections::{BTreeMap, BTreeSet};

const EXPOSURE_PREFIX: &str = "exp_";
const DEFAULT_MAX_POSITION_PCT: f64 = 0.05;
const DEFAULT_LIQUIDITY_CLASS: &str = "daily";

#[derive(Debug, Clone)]
pub struct ParsedUniverse {
    pub rows: Vec<UniverseRow>,
    pub warnings: Vec<String>,
}

fn parse_tags(value: &str) -> Vec<String> {
    value
        .split(['|', ',', ';'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a universe CSV into typed exposure rows. Rows that cannot carry
/// signal (duplicates, bad asset types, all-zero exposures) are dropped
/// with warnings; structural problems with the table are fatal.
pub fn parse_universe_csv(csv_text: &str) -> anyhow::Result<ParsedUniverse> {
    let lines: Vec<&str> = csv_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 2 {
        bail!("universe CSV must include a header and at least one data row");
    }

    let headers: Vec<String> = split_csv_row(lines[0])
        .iter()
        .map(|h| normalize_header(h))
        .collect();
    let index_of = |names: &[&str]| headers.iter().position(|h| names.contains(&h.as_str()));

    let exposure_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.starts_with(EXPOSURE_PREFIX))
        .map(|(i, h)| (i, h.clone()))
        .collect();
    if exposure_cols.is_empty() {
        bail!("universe CSV must include at least one exp_* exposure column");
    }

    let Some(symbol_idx) = index_of(&["symbol"]) else {
        bail!("universe CSV missing one of required columns: symbol, company_name, asset_type, liquidity_class");
    };
    let (Some(name_idx), Some(asset_type_idx), Some(liquidity_idx)) = (
        index_of(&["company_name", "companyname"]),
        index_of(&["asset_type", "assettype"]),
        index_of(&["liquidity_class", "liquidityclass"]),
    ) else {
        bail!("universe CSV missing one of required columns: symbol, company_name, asset_type, liquidity_class");
    };
    let region_idx = index_of(&["region"]);
    let currency_idx = index_of(&["currency"]);
    let max_pos_idx = index_of(&["max_position_pct", "maxpositionpct"]);
    let tags_idx = index_of(&["tags"]);

    let cell = |cells: &[String], idx: usize| cells.get(idx).cloned().unwrap_or_default();

    let mut seen = BTreeSet::new();
    let mut warnings = Vec::new();
    let mut rows = Vec::new();

    for line in &lines[1..] {
        let cells = split_csv_row(line);

        let symbol = cell(&cells, symbol_idx).to_uppercase();
        if symbol.is_empty() {
            continue;
        }
        if !seen.insert(normalize_text_key(&symbol)) {
            warnings.push(format!("Duplicate symbol dropped: {symbol}"));
            continue;
        }

        let asset_type = match cell(&cells, asset_type_idx).to_uppercase().as_str() {
            "EQUITY" => AssetType::Equity,
            "ETF" => AssetType::Etf,
            _ => {
                warnings.push(format!("Invalid asset_type for {symbol}; row skipped."));
                continue;
            }
        };

        let mut vector = BTreeMap::new();
        for (idx, header) in &exposure_cols {
            let value = parse_numeric(&cell(&cells, *idx)).unwrap_or(0.0);
            vector.insert(header.clone(), value.clamp(-1.0, 1.0));
        }
        if vector.values().all(|v| *v == 0.0) {
            warnings.push(format!("All-zero exposures dropped: {symbol}"));
            continue;
        }

        let max_position_default_pct = max_pos_idx
            .and_then(|idx| parse_numeric(&cell(&cells, idx)))
            .map(|raw| if raw > 1.0 { raw / 100.0 } else { raw })
            .map(|pct| pct.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_MAX_POSITION_PCT);

        let company_name = {
            let name = cell(&cells, name_idx);
            if name.is_empty() { symbol.clone() } else { name }
        };
        let liquidity_class = {
            let class = cell(&cells, liquidity_idx);
            if class.is_empty() {
                DEFAULT_LIQUIDITY_CLASS.to_string()
            } else {
                class
            }
        };

        rows.push(UniverseRow {
            symbol,
            company_name,
            asset_type,
            region: region_idx.map(|idx| cell(&cells, idx)).filter(|v| !v.is_empty()),
            currency: currency_idx.map(|idx| cell(&cells, idx)).filter(|v| !v.is_empty()),
            liquidity_class,
            max_position_default_pct,
            tags: tags_idx.map(|idx| parse_tags(&cell(&cells, idx))).unwrap_or_default(),
            exposure_vector: vector,
        });
    }

    if rows.is_empty() {
        bail!("universe CSV did not produce any valid rows");
    }

    Ok(ParsedUniverse { rows, warnings })
}
