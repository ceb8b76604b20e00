use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;

use crate::record::Record;

pub const DEFAULT_PAGE_SIZE: usize = 10;

pub const DEFAULT_DATE_FIELD: &str = "createdAt";

/// Fixed-size client-side pagination over an already-filtered collection.
#[derive(Clone, Copy, Debug)]
pub struct Pager {
    page_size: usize,
}

impl Pager {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total_pages(&self, len: usize) -> usize {
        len.div_ceil(self.page_size)
    }

    /// Clamps a requested page to `[1, total_pages]`. An empty collection
    /// still reports page 1 so the caller never ends up on page 0.
    pub fn clamp(&self, page: usize, len: usize) -> usize {
        page.clamp(1, self.total_pages(len).max(1))
    }

    pub fn slice<'a, T>(&self, items: &'a [T], page: usize) -> &'a [T] {
        let page = self.clamp(page, items.len());
        let start = (page - 1) * self.page_size;
        if start >= items.len() {
            return &[];
        }
        let end = (start + self.page_size).min(items.len());
        &items[start..end]
    }
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

/// Client-side narrowing of a loaded collection. Every criterion is
/// conjunctive; an empty filter matches everything. Applying the same filter
/// twice is a no-op by construction (it never mutates the records).
#[derive(Clone, Debug, Default)]
pub struct ClientFilter {
    pub search: Option<String>,
    pub pattern: Option<Regex>,
    pub category: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub date_field: Option<String>,
}

impl ClientFilter {
    pub fn is_empty(&self) -> bool {
        self.search.is_none()
            && self.pattern.is_none()
            && self.category.is_none()
            && self.from_date.is_none()
            && self.to_date.is_none()
    }

    fn string_fields(record: &Record) -> impl Iterator<Item = &str> {
        record.fields().values().filter_map(|v| match v {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        })
    }

    fn matches_search(&self, record: &Record) -> bool {
        let Some(needle) = self.search.as_deref() else {
            return true;
        };
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        Self::string_fields(record).any(|s| s.to_lowercase().contains(&needle))
    }

    fn matches_pattern(&self, record: &Record) -> bool {
        let Some(re) = self.pattern.as_ref() else {
            return true;
        };
        Self::string_fields(record).any(|s| re.is_match(s))
    }

    fn matches_category(&self, record: &Record) -> bool {
        let Some(category) = self.category.as_deref() else {
            return true;
        };
        match record.get("category") {
            Some(Value::String(s)) => s.eq_ignore_ascii_case(category),
            _ => false,
        }
    }

    fn record_date(&self, record: &Record) -> Option<NaiveDate> {
        let field = self.date_field.as_deref().unwrap_or(DEFAULT_DATE_FIELD);
        let raw = match record.get(field) {
            Some(Value::String(s)) => s.as_str(),
            _ => return None,
        };
        // Timestamps come back as RFC 3339 or as a plain date; the date part
        // is always the first ten characters either way.
        let date_part = raw.get(..10).unwrap_or(raw);
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
    }

    fn matches_dates(&self, record: &Record) -> bool {
        if self.from_date.is_none() && self.to_date.is_none() {
            return true;
        }
        let Some(date) = self.record_date(record) else {
            return false;
        };
        if let Some(from) = self.from_date {
            if date < from {
                return false;
            }
        }
        if let Some(to) = self.to_date {
            if date > to {
                return false;
            }
        }
        true
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.matches_search(record)
            && self.matches_pattern(record)
            && self.matches_category(record)
            && self.matches_dates(record)
    }
}

pub fn apply<'a>(records: &'a [Record], filter: &ClientFilter) -> Vec<&'a Record> {
    if filter.is_empty() {
        return records.iter().collect();
    }
    records.iter().filter(|r| filter.matches(r)).collect()
}
