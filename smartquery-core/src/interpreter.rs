//! Applies a [`ResolvedQuery`] to rows.
//!
//! Filters run in array order, each narrowing the set left by the previous
//! one, so a `max`/`min` clause sees only the rows that survived the clauses
//! listed before it. Sorting, when present, runs last.

use crate::dataset::Row;
use crate::query::{Filter, Operator, ResolvedQuery, SortDirection, SortSpec};
use crate::value::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn apply(rows: &[Arc<Row>], resolved: &ResolvedQuery) -> Vec<Arc<Row>> {
    let mut current: Vec<Arc<Row>> = rows.to_vec();
    for filter in &resolved.filters {
        let before = current.len();
        current = apply_filter(current, filter);
        debug!(
            column = %filter.column,
            operator = %filter.operator,
            value = %filter.value,
            before,
            after = current.len(),
            "applied filter"
        );
    }
    if let Some(sort) = &resolved.sort {
        sort_rows(&mut current, sort);
    }
    current
}

fn apply_filter(rows: Vec<Arc<Row>>, filter: &Filter) -> Vec<Arc<Row>> {
    match &filter.operator {
        Operator::Max => keep_extremum(rows, &filter.column, Ordering::Greater),
        Operator::Min => keep_extremum(rows, &filter.column, Ordering::Less),
        Operator::Unknown(op) => {
            warn!(operator = %op, column = %filter.column, "ignoring unknown operator");
            rows
        }
        op => rows
            .into_iter()
            .filter(|r| matches(r.get(&filter.column), op, &filter.value))
            .collect(),
    }
}

/// Whether a single cell satisfies `op target`.
///
/// Comparison operators use numeric (then date) ordering when both sides
/// coerce; otherwise `==`/`!=` compare case-insensitive text. An ordering
/// operator against a plain-text target has no meaning and passes the row.
pub fn matches(value: &Value, op: &Operator, target: &Value) -> bool {
    match op {
        Operator::Contains => lower(value).contains(&lower(target)),
        Operator::StartsWith => lower(value).starts_with(&lower(target)),
        Operator::EndsWith => lower(value).ends_with(&lower(target)),
        Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le | Operator::Eq | Operator::Ne => {
            if let Some(ord) = value.compare(target) {
                return ordering_holds(ord, op);
            }
            match op {
                Operator::Eq => lower(value) == lower(target),
                Operator::Ne => lower(value) != lower(target),
                // typed target but the cell can't be compared: the row fails
                _ => target.as_number().is_none() && target.as_date().is_none(),
            }
        }
        Operator::Max | Operator::Min | Operator::Unknown(_) => true,
    }
}

fn ordering_holds(ord: Ordering, op: &Operator) -> bool {
    match op {
        Operator::Gt => ord == Ordering::Greater,
        Operator::Lt => ord == Ordering::Less,
        Operator::Ge => ord != Ordering::Less,
        Operator::Le => ord != Ordering::Greater,
        Operator::Eq => ord == Ordering::Equal,
        Operator::Ne => ord != Ordering::Equal,
        _ => true,
    }
}

fn lower(v: &Value) -> String {
    v.as_text().to_lowercase()
}

/// Keep every row tied for the extremum of `column` over `rows`.
/// Numbers win over dates, dates over text; a column with nothing
/// comparable leaves the rows untouched.
fn keep_extremum(rows: Vec<Arc<Row>>, column: &str, want: Ordering) -> Vec<Arc<Row>> {
    let pick = |acc: Option<f64>, n: f64| match acc {
        Some(best) if n.partial_cmp(&best) != Some(want) => Some(best),
        _ => Some(n),
    };
    if let Some(best) = rows.iter().filter_map(|r| r.get(column).as_number()).fold(None, pick) {
        return rows.into_iter().filter(|r| r.get(column).as_number() == Some(best)).collect();
    }
    let dates = rows.iter().filter_map(|r| r.get(column).as_date());
    let best_date = if want == Ordering::Greater { dates.max() } else { dates.min() };
    if let Some(best) = best_date {
        return rows.into_iter().filter(|r| r.get(column).as_date() == Some(best)).collect();
    }
    let texts = rows.iter().map(|r| r.get(column)).filter(|v| !v.is_null()).map(lower);
    let best_text = if want == Ordering::Greater { texts.max() } else { texts.min() };
    match best_text {
        Some(best) => rows
            .into_iter()
            .filter(|r| !r.get(column).is_null() && lower(r.get(column)) == best)
            .collect(),
        None => {
            warn!(column, "extremum over a column with no values; ignoring");
            rows
        }
    }
}

/// Stable sort; nulls always sort last regardless of direction.
pub fn sort_rows(rows: &mut [Arc<Row>], sort: &SortSpec) {
    rows.sort_by_cached_key(|r| {
        let key = r.get(&sort.column).sort_key();
        let is_null = r.get(&sort.column).is_null();
        (is_null, Directed(key, sort.direction))
    });
}

#[derive(PartialEq, Eq)]
struct Directed(crate::value::SortKey, SortDirection);

impl PartialOrd for Directed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Directed {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.1 {
            SortDirection::Asc => self.0.cmp(&other.0),
            SortDirection::Desc => other.0.cmp(&self.0),
        }
    }
}
