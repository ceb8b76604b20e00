use chrono::NaiveDate;
use serde_json::Value;

use crate::cli::args::{CliArgs, Command};

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{value}', expected YYYY-MM-DD"))
}

/// Splits a `KEY=VALUE` argument. The value is taken as JSON when it parses
/// as such (numbers, booleans, arrays), otherwise as a plain string.
pub fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid assignment '{raw}', expected KEY=VALUE"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid assignment '{raw}', empty key"));
    }
    let parsed = match serde_json::from_str::<Value>(value.trim()) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Array(_) | Value::Object(_))) => v,
        _ => Value::String(value.to_string()),
    };
    Ok((key.to_string(), parsed))
}

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if let Some(page_size) = args.page_size {
        if page_size == 0 {
            return Err("invalid --page-size, expected positive integer".to_string());
        }
    }
    if let Some(timeout) = args.timeout {
        if timeout == 0 {
            return Err("invalid --timeout, expected positive integer".to_string());
        }
    }
    match &args.command {
        Command::List {
            from_date,
            to_date,
            pattern,
            page,
            limit,
            ..
        } => {
            let from = match from_date.as_deref() {
                Some(raw) => Some(parse_date(raw).map_err(|e| format!("invalid --from-date: {e}"))?),
                None => None,
            };
            let to = match to_date.as_deref() {
                Some(raw) => Some(parse_date(raw).map_err(|e| format!("invalid --to-date: {e}"))?),
                None => None,
            };
            if let (Some(from), Some(to)) = (from, to) {
                if from > to {
                    return Err("--from-date is after --to-date".to_string());
                }
            }
            if let Some(raw) = pattern.as_deref() {
                regex::Regex::new(raw).map_err(|e| format!("invalid --match '{raw}': {e}"))?;
            }
            if page == &Some(0) {
                return Err("invalid --page, pages start at 1".to_string());
            }
            if limit == &Some(0) {
                return Err("invalid --limit, expected positive integer".to_string());
            }
        }
        Command::Create { fields, files, .. } | Command::Update { fields, files, .. } => {
            for raw in fields {
                parse_assignment(raw)?;
            }
            for raw in files {
                let (_, value) = parse_assignment(raw)?;
                if !matches!(value, Value::String(_)) {
                    return Err(format!("invalid --file '{raw}', expected KEY=PATH"));
                }
            }
        }
        _ => {}
    }
    Ok(())
}
