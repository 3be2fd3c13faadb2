//! Local, keyword-driven query resolution. No I/O, never fails: the worst
//! outcome is `None`, which tells the caller nothing was recognized.

use crate::dataset::Dataset;
use crate::query::{Filter, Operator, ResolvedQuery, SortDirection, SortSpec};
use crate::schema::{Column, ColumnType};
use crate::value::Value;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::debug;

/// Synonym families, keyed by column key.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("age", &["years", "year", "old", "older", "younger"]),
    ("salary", &["pay", "income", "earnings", "compensation", "wage"]),
    ("name", &["person", "employee", "staff", "worker"]),
    ("department", &["dept", "team", "division", "unit", "group"]),
    ("position", &["role", "job", "title", "designation"]),
    ("performance", &["rating", "score", "evaluation", "review"]),
];

const STOPWORDS: &[&str] = &["the", "a", "an", "all", "any", "each", "my", "our", "their", "order", "sorted"];

/// Max gap in bytes between a column mention and the phrase it qualifies.
const MENTION_WINDOW: usize = 16;

/// Distinct values kept per column in the value index.
const VALUE_INDEX_CAP: usize = 5000;

const NUM: &str = r"(-?\d+(?:\.\d+)?)";

static COMPARISONS: LazyLock<Vec<(Regex, Operator)>> = LazyLock::new(|| {
    let phrase = |words: &str| Regex::new(&format!(r"(?i)\b(?:{words})\s+{NUM}")).expect("static regex");
    // inclusive phrases first; a later match overlapping an earlier one is dropped
    vec![
        (
            phrase("(?:greater|more|higher) than or equal to|no less than|not less than|at least"),
            Operator::Ge,
        ),
        (
            phrase("(?:less|lesser|lower) than or equal to|no more than|not more than|at most"),
            Operator::Le,
        ),
        (phrase("over|above|greater than|more than|higher than|older than"), Operator::Gt),
        (phrase("under|below|less than|lesser than|lower than|younger than"), Operator::Lt),
        (phrase("equal to|exactly|equals|is"), Operator::Eq),
    ]
});

static BETWEEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\bbetween\s+{NUM}\s+(?:and|to)\s+{NUM}")).expect("static regex")
});

static CONTAINS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:contains|containing|with|having|includes|including|in)\s+(?:(?:the|a|an)\s+)?(?:"([^"]+)"|'([^']+)'|([\w@.\-]+))"#,
    )
    .expect("static regex")
});

static EXTREMUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(highest|maximum|max|largest|lowest|minimum|min|smallest)\b").expect("static regex")
});

static SORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:sort|sorted|order|ordered)\s+by\s+(\w+)").expect("static regex"));

static DESCENDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:desc|descending|highest first|largest first)\b").expect("static regex"));

#[derive(Debug, Clone, Copy)]
struct Mention {
    column: usize,
    start: usize,
    end: usize,
}

impl Mention {
    fn distance(&self, start: usize, end: usize) -> usize {
        if self.end <= start {
            start - self.end
        } else if self.start >= end {
            self.start - end
        } else {
            0
        }
    }
}

pub struct HeuristicParser {
    columns: Vec<Column>,
    terms: Vec<Vec<String>>,
    value_index: HashMap<String, BTreeSet<String>>,
}

impl HeuristicParser {
    pub fn new(schema: &[Column]) -> Self {
        let terms = schema.iter().map(column_terms).collect();
        Self { columns: schema.to_vec(), terms, value_index: HashMap::new() }
    }

    /// Index distinct text values of string columns so `contains` clauses can
    /// be placed on the column that actually holds the value.
    pub fn with_value_index(mut self, dataset: &Dataset) -> Self {
        for col in self.columns.iter().filter(|c| c.column_type == ColumnType::String) {
            let mut seen = BTreeSet::new();
            for row in dataset.rows() {
                if seen.len() >= VALUE_INDEX_CAP {
                    break;
                }
                let v = row.get(&col.key);
                if !v.is_null() {
                    seen.insert(v.as_text().to_lowercase());
                }
            }
            self.value_index.insert(col.key.clone(), seen);
        }
        self
    }

    pub fn resolve(&self, query: &str) -> Option<ResolvedQuery> {
        let lowered = query.to_ascii_lowercase(); // same byte offsets as `query`
        let mentions = self.find_mentions(&lowered);
        let mut filters = Vec::new();

        let mut claimed: Vec<(usize, usize, Filter)> = Vec::new();
        for (re, op) in COMPARISONS.iter() {
            for caps in re.captures_iter(query) {
                let (Some(whole), Some(n)) = (caps.get(0), caps.get(1)) else { continue };
                let (start, end) = (whole.start(), whole.end());
                if claimed.iter().any(|(s, e, _)| start < *e && *s < end) {
                    continue;
                }
                let Some(col) = self.numeric_column(&mentions, start, end) else { continue };
                claimed.push((start, end, Filter::new(col, op.clone(), parse_number(n.as_str()))));
            }
        }
        claimed.sort_by_key(|(start, _, _)| *start);
        filters.extend(claimed.into_iter().map(|(_, _, f)| f));

        for caps in BETWEEN.captures_iter(query) {
            let (Some(whole), Some(lo), Some(hi)) = (caps.get(0), caps.get(1), caps.get(2)) else { continue };
            if let Some(col) = self.numeric_column(&mentions, whole.start(), whole.end()) {
                filters.push(Filter::new(col, Operator::Ge, parse_number(lo.as_str())));
                filters.push(Filter::new(col, Operator::Le, parse_number(hi.as_str())));
            }
        }

        for caps in CONTAINS.captures_iter(query) {
            let Some(term) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else { continue };
            if self.is_noise(term.as_str()) {
                continue;
            }
            match self.text_column(&mentions, term.as_str(), term.start(), term.end()) {
                Some(col) => filters.push(Filter::new(col, Operator::Contains, term.as_str())),
                None => debug!(value = term.as_str(), "no column for contains clause"),
            }
        }

        // extremum clauses go last so they apply to the already-narrowed rows
        for caps in EXTREMUM.captures_iter(query) {
            let Some(word) = caps.get(1) else { continue };
            let op = match word.as_str().to_ascii_lowercase().as_str() {
                "highest" | "maximum" | "max" | "largest" => Operator::Max,
                _ => Operator::Min,
            };
            if let Some(col) = self.numeric_column(&mentions, word.start(), word.end()) {
                filters.push(Filter::new(col, op, Value::Null));
            }
        }

        let sort = SORT.captures_iter(query).last().and_then(|caps| {
            let target = caps.get(1)?;
            let column = mentions
                .iter()
                .filter(|m| m.start == target.start())
                .max_by_key(|m| m.end)
                .map(|m| self.columns[m.column].key.clone())?;
            let direction = if DESCENDING.is_match(&query[target.end()..]) {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            Some(SortSpec { column, direction })
        });

        if !filters.is_empty() || sort.is_some() {
            debug!(query, filters = filters.len(), sorted = sort.is_some(), "resolved locally");
            return Some(ResolvedQuery { filters, sort, analysis: None });
        }
        if !mentions.is_empty() {
            // recognized but unconstrained
            return Some(ResolvedQuery::default());
        }
        None
    }

    fn find_mentions(&self, lowered: &str) -> Vec<Mention> {
        let mut out = Vec::new();
        for (column, terms) in self.terms.iter().enumerate() {
            for term in terms {
                for (start, _) in lowered.match_indices(term.as_str()) {
                    let boundary = lowered[..start]
                        .chars()
                        .next_back()
                        .map_or(true, |c| !c.is_alphanumeric());
                    if boundary {
                        out.push(Mention { column, start, end: start + term.len() });
                    }
                }
            }
        }
        out.sort_by_key(|m| (m.start, m.column));
        out
    }

    /// Nearest mentioned number column, else the first number column.
    fn numeric_column(&self, mentions: &[Mention], start: usize, end: usize) -> Option<&str> {
        let nearby = mentions
            .iter()
            .filter(|m| self.columns[m.column].column_type == ColumnType::Number)
            .filter(|m| m.distance(start, end) <= MENTION_WINDOW)
            .min_by_key(|m| m.distance(start, end))
            .map(|m| &self.columns[m.column]);
        nearby
            .or_else(|| self.columns.iter().find(|c| c.column_type == ColumnType::Number))
            .map(|c| c.key.as_str())
    }

    /// Column whose indexed values contain `needle`, else the nearest
    /// mentioned string column, else any mentioned string column.
    fn text_column(&self, mentions: &[Mention], needle: &str, start: usize, end: usize) -> Option<&str> {
        let needle_lc = needle.to_lowercase();
        let indexed = self.columns.iter().find(|c| {
            self.value_index
                .get(&c.key)
                .is_some_and(|vals| vals.iter().any(|v| v.contains(&needle_lc)))
        });
        if let Some(col) = indexed {
            return Some(col.key.as_str());
        }
        let strings: Vec<&Mention> = mentions
            .iter()
            .filter(|m| self.columns[m.column].column_type == ColumnType::String)
            .filter(|m| m.distance(start, end) > 0)
            .collect();
        strings
            .iter()
            .filter(|m| m.distance(start, end) <= MENTION_WINDOW)
            .min_by_key(|m| m.distance(start, end))
            .or_else(|| strings.first())
            .map(|m| self.columns[m.column].key.as_str())
    }

    /// Captured words that are numbers, stopwords, or column names themselves.
    fn is_noise(&self, word: &str) -> bool {
        let lw = word.to_lowercase();
        lw.parse::<f64>().is_ok()
            || STOPWORDS.contains(&lw.as_str())
            || self
                .terms
                .iter()
                .flatten()
                .any(|t| lw == *t || lw.strip_suffix('s') == Some(t.as_str()))
    }
}

/// Key, label, and synonyms, lower-cased.
fn column_terms(col: &Column) -> Vec<String> {
    let key = col.key.to_lowercase();
    let mut terms = vec![key.clone(), col.label.to_lowercase()];
    if let Some((_, syns)) = SYNONYMS.iter().find(|(k, _)| *k == key) {
        terms.extend(syns.iter().map(|s| s.to_string()));
    }
    terms.retain(|t| !t.is_empty());
    terms.sort();
    terms.dedup();
    terms
}

fn parse_number(s: &str) -> Value {
    s.parse::<f64>().map(Value::Number).unwrap_or_else(|_| Value::from(s))
}

/// Resolve `query` against `schema` without touching the network.
pub fn resolve_locally(query: &str, schema: &[Column]) -> Option<ResolvedQuery> {
    HeuristicParser::new(schema).resolve(query)
}
