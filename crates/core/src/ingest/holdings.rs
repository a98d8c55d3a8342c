use crate::domain::analyze::{HoldingConstraint, HoldingInput, HoldingPurpose, Sensitivity};
use crate::ingest::csv::{normalize_header, parse_header_date, parse_numeric, split_csv_row};
use anyhow::bail;

const NAME_ALIASES: &[&str] = &["name", "holding", "holdingname", "assetname", "holding_name", "asset_name"];
const TICKER_ALIASES: &[&str] = &["ticker", "symbol"];
const WEIGHT_ALIASES: &[&str] = &["weight", "allocation", "portfolio_weight", "portfolioweight"];
const WEIGHT_PCT_ALIASES: &[&str] = &[
    "weightpct",
    "weight_pct",
    "weight_percent",
    "weightpercentage",
    "allocationpct",
    "allocation_pct",
];
const AMOUNT_ALIASES: &[&str] = &[
    "amount",
    "value",
    "marketvalue",
    "market_value",
    "positionvalue",
    "position_value",
    "gbpamount",
    "amountgbp",
    "valuegbp",
    "holdingvalue",
    "holding_value",
];
const SENSITIVITY_ALIASES: &[&str] = &["sensitivity", "exposuresensitivity", "exposure_sensitivity"];
const CONSTRAINT_ALIASES: &[&str] = &["constraint", "capitalconstraint", "capital_constraint"];
const PURPOSE_ALIASES: &[&str] = &["purpose", "bucketpurpose", "bucket_purpose"];
const TAGS_ALIASES: &[&str] = &["tags", "exposuretags", "exposure_tags"];

fn parse_decimal_weight(value: f64) -> f64 {
    // Percent entries like 40 become 0.40.
    if value > 1.0 {
        value / 100.0
    } else {
        value
    }
}

fn parse_sensitivity(raw: &str) -> Sensitivity {
    match raw.trim().to_uppercase().as_str() {
        "LOW" => Sensitivity::Low,
        "HIGH" => Sensitivity::High,
        _ => Sensitivity::Med,
    }
}

fn parse_constraint(raw: &str) -> HoldingConstraint {
    match raw.trim().to_uppercase().as_str() {
        "LOCKED" => HoldingConstraint::Locked,
        "SEMI_LOCKED" => HoldingConstraint::SemiLocked,
        _ => HoldingConstraint::Free,
    }
}

fn parse_purpose(raw: &str) -> HoldingPurpose {
    match raw.trim().to_uppercase().as_str() {
        "TAX" => HoldingPurpose::Tax,
        "SPEND_0_12M" => HoldingPurpose::Spend0To12m,
        "SPEND_12_36M" => HoldingPurpose::Spend12To36m,
        "LIFESTYLE_DRAWDOWN" => HoldingPurpose::LifestyleDrawdown,
        _ => HoldingPurpose::LongTermGrowth,
    }
}

fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(['|', ';', ','])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a holdings scenario out of a spreadsheet-style CSV export:
/// alias-matched columns, a preferred latest-dated amount column, summary
/// and grand-total sentinel rows truncating the table, and amount-derived
/// weights when no explicit weight column carries values.
pub fn parse_holdings_csv(csv_text: &str) -> anyhow::Result<Vec<HoldingInput>> {
    let lines: Vec<&str> = csv_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        bail!("holdings CSV is empty");
    }

    let rows: Vec<Vec<String>> = lines.iter().map(|l| split_csv_row(l)).collect();

    // Exports often carry banner rows above the real header.
    let Some(header_row_index) = rows.iter().position(|row| {
        row.iter()
            .any(|cell| NAME_ALIASES.contains(&normalize_header(cell).as_str()))
    }) else {
        bail!("holdings CSV must include a `name` column");
    };

    let headers: Vec<String> = rows[header_row_index]
        .iter()
        .map(|h| normalize_header(h))
        .collect();
    let index_of = |aliases: &[&str]| headers.iter().position(|h| aliases.contains(&h.as_str()));

    let Some(name_idx) = index_of(NAME_ALIASES) else {
        bail!("holdings CSV must include a `name` column");
    };
    let ticker_idx = index_of(TICKER_ALIASES);
    let weight_idx = index_of(WEIGHT_ALIASES);
    let weight_pct_idx = index_of(WEIGHT_PCT_ALIASES);
    let amount_idx = index_of(AMOUNT_ALIASES);
    let sensitivity_idx = index_of(SENSITIVITY_ALIASES);
    let constraint_idx = index_of(CONSTRAINT_ALIASES);
    let purpose_idx = index_of(PURPOSE_ALIASES);
    let tags_idx = index_of(TAGS_ALIASES);

    // A column headed by a date is a point-in-time amount; the latest one
    // wins over any generic amount column.
    let latest_date_column = rows[header_row_index]
        .iter()
        .enumerate()
        .filter_map(|(idx, header)| parse_header_date(header).map(|date| (date, idx)))
        .max_by_key(|(date, _)| *date)
        .map(|(_, idx)| idx);
    let chosen_amount_column = latest_date_column.or(amount_idx);

    let cell = |cells: &[String], idx: usize| cells.get(idx).cloned().unwrap_or_default();
    let opt_cell = |cells: &[String], idx: Option<usize>| idx.map(|i| cell(cells, i));

    let mut staged: Vec<(HoldingInput, Option<f64>)> = Vec::new();
    for cells in &rows[header_row_index + 1..] {
        let name = cell(cells, name_idx);
        let normalized_name = normalize_header(&name);
        let second_cell = normalize_header(&cell(cells, 1));

        // Spreadsheet exports end with summary blocks; stop at the sentinel.
        if normalized_name == "summary"
            || normalized_name == "grandtotal"
            || (normalized_name == "bucket" && second_cell.starts_with("sumof"))
        {
            break;
        }
        if name.is_empty() || normalized_name == "bucket" {
            continue;
        }
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        let parsed_weight = opt_cell(cells, weight_idx).as_deref().and_then(parse_numeric);
        let parsed_weight_pct = opt_cell(cells, weight_pct_idx).as_deref().and_then(parse_numeric);
        let parsed_amount = opt_cell(cells, chosen_amount_column)
            .as_deref()
            .and_then(parse_numeric);

        let weight = parsed_weight
            .or(parsed_weight_pct)
            .map(parse_decimal_weight);

        staged.push((
            HoldingInput {
                name,
                ticker: opt_cell(cells, ticker_idx).filter(|t| !t.is_empty()),
                weight,
                sensitivity: parse_sensitivity(&opt_cell(cells, sensitivity_idx).unwrap_or_default()),
                constraint: parse_constraint(&opt_cell(cells, constraint_idx).unwrap_or_default()),
                purpose: parse_purpose(&opt_cell(cells, purpose_idx).unwrap_or_default()),
                exposure_tags: opt_cell(cells, tags_idx)
                    .map(|raw| parse_tags(&raw))
                    .unwrap_or_default(),
            },
            parsed_amount,
        ));
    }

    if staged.is_empty() {
        bail!("no valid holding rows found in CSV");
    }

    let has_explicit_weight = staged.iter().any(|(h, _)| h.weight.is_some());
    let has_amounts = staged.iter().any(|(_, amount)| amount.unwrap_or(0.0) > 0.0);

    if !has_explicit_weight && has_amounts {
        let total: f64 = staged
            .iter()
            .filter_map(|(_, amount)| amount.filter(|a| *a > 0.0))
            .sum();
        if total <= 0.0 {
            bail!("CSV amount column found, but total amount is zero");
        }
        for (holding, amount) in &mut staged {
            if let Some(amount) = amount.filter(|a| *a > 0.0) {
                holding.weight = Some((amount / total * 1e6).round() / 1e6);
            }
        }
    }

    Ok(staged.into_iter().map(|(holding, _)| holding).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alias_headers_and_enums() {
        let csv = "Holding Name,Symbol,Allocation,Sensitivity,Constraint,Purpose,Exposure Tags\n\
                   Infra Fund,INFR,0.6,HIGH,LOCKED,TAX,ai|compute\n\
                   SaaS Fund,SAAS,0.4,,,,";
        let holdings = parse_holdings_csv(csv).unwrap();
        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].name, "Infra Fund");
        assert_eq!(holdings[0].ticker.as_deref(), Some("INFR"));
        assert_eq!(holdings[0].weight, Some(0.6));
        assert_eq!(holdings[0].sensitivity, Sensitivity::High);
        assert_eq!(holdings[0].constraint, HoldingConstraint::Locked);
        assert_eq!(holdings[0].purpose, HoldingPurpose::Tax);
        assert_eq!(holdings[0].exposure_tags, vec!["ai", "compute"]);
        // Blanks fall back to MED/FREE/LONG_TERM_GROWTH.
        assert_eq!(holdings[1].sensitivity, Sensitivity::Med);
        assert_eq!(holdings[1].constraint, HoldingConstraint::Free);
        assert_eq!(holdings[1].purpose, HoldingPurpose::LongTermGrowth);
    }

    #[test]
    fn percent_weights_are_reinterpreted() {
        let csv = "name,weight\nA,60\nB,40";
        let holdings = parse_holdings_csv(csv).unwrap();
        assert_eq!(holdings[0].weight, Some(0.6));
        assert_eq!(holdings[1].weight, Some(0.4));
    }

    #[test]
    fn derives_weights_from_amounts_when_no_weight_column() {
        let csv = "name,amount\nA,£6,000\nB,£4,000";
        // The thousands separator splits cells; quote the amounts instead.
        let csv = csv.replace("£6,000", "\"£6,000\"").replace("£4,000", "\"£4,000\"");
        let holdings = parse_holdings_csv(&csv).unwrap();
        assert_eq!(holdings[0].weight, Some(0.6));
        assert_eq!(holdings[1].weight, Some(0.4));
    }

    #[test]
    fn prefers_latest_dated_amount_column() {
        let csv = "name,01/01/2026,01/02/2026\nA,100,300\nB,100,100";
        let holdings = parse_holdings_csv(csv).unwrap();
        assert_eq!(holdings[0].weight, Some(0.75));
        assert_eq!(holdings[1].weight, Some(0.25));
    }

    #[test]
    fn skips_banner_rows_above_the_header() {
        let csv = "My Portfolio Export\n,,\nname,weight\nA,0.5\nB,0.5";
        let holdings = parse_holdings_csv(csv).unwrap();
        assert_eq!(holdings.len(), 2);
    }

    #[test]
    fn summary_sentinel_truncates_the_table() {
        let csv = "name,amount\nA,600\nB,400\nGrand Total,1000\nGhost,1";
        let holdings = parse_holdings_csv(csv).unwrap();
        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].weight, Some(0.6));
    }

    #[test]
    fn bucket_sum_row_truncates_the_table() {
        let csv = "name,amount\nA,600\nBucket,Sum of amounts\nGhost,1";
        let holdings = parse_holdings_csv(csv).unwrap();
        assert_eq!(holdings.len(), 1);
    }

    #[test]
    fn explicit_weights_suppress_amount_derivation() {
        let csv = "name,weight,amount\nA,0.7,100\nB,0.3,900";
        let holdings = parse_holdings_csv(csv).unwrap();
        assert_eq!(holdings[0].weight, Some(0.7));
        assert_eq!(holdings[1].weight, Some(0.3));
    }

    #[test]
    fn missing_name_column_is_fatal() {
        let err = parse_holdings_csv("ticker,weight\nAAA,0.5").unwrap_err();
        assert!(err.to_string().contains("`name` column"));
    }

    #[test]
    fn all_rows_filtered_is_fatal() {
        let err = parse_holdings_csv("name,weight\nGrand Total,1").unwrap_err();
        assert!(err.to_string().contains("no valid holding rows"));
    }
}
