use chrono::NaiveDate;

/// Splits one CSV line on commas, honoring double-quoted cells and escaped
/// quotes. Cells come back trimmed.
pub fn split_csv_row(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

/// Canonical header form: lowercase, `[a-z0-9_]` only. "Company Name" and
/// "company_name" both survive as recognizable keys.
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter_map(|ch| {
            let ch = ch.to_ascii_lowercase();
            (ch.is_ascii_alphanumeric() || ch == '_').then_some(ch)
        })
        .collect()
}

/// Permissive numeric cell parsing for spreadsheet exports: currency
/// symbols, thousands separators and percent signs are stripped.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|ch| !matches!(ch, '£' | '$' | '€' | ',' | '%') && !ch.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Date-shaped header cells mark amount-by-date columns in exported
/// portfolio tables.
pub fn parse_header_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    None
}
