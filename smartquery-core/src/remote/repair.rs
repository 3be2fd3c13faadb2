//! Turning untrusted model text into a schema-valid [`ResolvedQuery`].

use crate::query::{Filter, Operator, ResolvedQuery, SortDirection, SortSpec};
use crate::schema::{find_column, Column};
use crate::value::Value;
use serde_json::{Map, Value as Json};
use smartquery_common::ResolutionError;
use tracing::warn;

/// Pull the JSON payload out of a response: a ```json fence, then a bare
/// ``` fence, then the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> &str {
    let fenced = |marker: &str| {
        text.split_once(marker).map(|(_, rest)| {
            rest.split_once("```").map_or(rest, |(body, _)| body).trim()
        })
    };
    if let Some(body) = fenced("```json") {
        return body;
    }
    if let Some(body) = fenced("```") {
        return body;
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text.trim(),
    }
}

pub fn parse_response(text: &str, schema: &[Column]) -> Result<ResolvedQuery, ResolutionError> {
    let payload = extract_json(text);
    let raw: Json = serde_json::from_str(payload)
        .map_err(|e| ResolutionError::MalformedResponse(format!("{e}: {}", preview(payload))))?;
    let Json::Object(obj) = raw else {
        return Err(ResolutionError::MalformedResponse("expected a JSON object".into()));
    };

    let mut filters = Vec::new();
    match obj.get("filters") {
        None | Some(Json::Null) => {}
        Some(Json::Array(items)) => {
            for item in items {
                parse_filter(item, schema, &mut filters);
            }
        }
        Some(_) => {
            return Err(ResolutionError::MalformedResponse("`filters` is not an array".into()));
        }
    }

    let sort = obj
        .get("sort")
        .or_else(|| obj.get("sorting"))
        .and_then(|s| parse_sort(s, schema));

    let analysis = obj
        .get("analysis")
        .and_then(Json::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);

    Ok(ResolvedQuery { filters, sort, analysis })
}

fn parse_filter(item: &Json, schema: &[Column], out: &mut Vec<Filter>) {
    let Some(obj) = item.as_object() else {
        warn!(%item, "dropping non-object filter");
        return;
    };
    let (Some(column), Some(op)) = (str_field(obj, "column"), str_field(obj, "operator")) else {
        warn!(%item, "dropping filter without column/operator");
        return;
    };
    let Some(key) = canonical_column(column, schema) else {
        warn!(column, "dropping filter on unknown column");
        return;
    };
    let value = obj.get("value").unwrap_or(&Json::Null);

    if op.trim().eq_ignore_ascii_case("between") {
        match value.as_array().map(Vec::as_slice) {
            Some([lo, hi]) => {
                out.push(Filter::new(key, Operator::Ge, Value::from(lo)));
                out.push(Filter::new(key, Operator::Le, Value::from(hi)));
            }
            _ => warn!(column = key, "dropping between filter without a two-element range"),
        }
        return;
    }
    out.push(Filter::new(key, Operator::parse(op), Value::from(value)));
}

fn parse_sort(raw: &Json, schema: &[Column]) -> Option<SortSpec> {
    let obj = raw.as_object()?;
    let column = str_field(obj, "column")?;
    let Some(key) = canonical_column(column, schema) else {
        warn!(column, "dropping sort on unknown column");
        return None;
    };
    let direction = str_field(obj, "direction")
        .map(SortDirection::parse)
        .unwrap_or_default();
    Some(SortSpec { column: key.to_string(), direction })
}

fn str_field<'a>(obj: &'a Map<String, Json>, name: &str) -> Option<&'a str> {
    obj.get(name).and_then(Json::as_str)
}

/// Exact key, else a case-insensitive match on key or label.
fn canonical_column<'a>(name: &str, schema: &'a [Column]) -> Option<&'a str> {
    let name = name.trim();
    find_column(schema, name)
        .or_else(|| {
            schema
                .iter()
                .find(|c| c.key.eq_ignore_ascii_case(name) || c.label.eq_ignore_ascii_case(name))
        })
        .map(|c| c.key.as_str())
}

fn preview(s: &str) -> String {
    s.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn schema() -> Vec<Column> {
        vec![
            Column::new("name", "Name", ColumnType::String),
            Column::new("age", "Age", ColumnType::Number),
            Column::new("salary", "Salary", ColumnType::Number),
        ]
    }

    #[test]
    fn strips_json_fence() {
        let text = "Sure!\n```json\n{\"filters\": []}\n```\nanything else?";
        assert_eq!(extract_json(text), "{\"filters\": []}");
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(extract_json("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn slices_between_braces() {
        assert_eq!(extract_json("Here you go: {\"a\":{\"b\":2}} hope it helps"), "{\"a\":{\"b\":2}}");
    }

    #[test]
    fn prose_is_malformed() {
        let err = parse_response("I think you want the older employees.", &schema()).unwrap_err();
        assert!(matches!(err, ResolutionError::MalformedResponse(_)));
    }

    #[test]
    fn non_object_is_malformed() {
        let err = parse_response("[1, 2]", &schema()).unwrap_err();
        assert!(matches!(err, ResolutionError::MalformedResponse(_)));
    }

    #[test]
    fn missing_filters_default_empty() {
        let q = parse_response(r#"{"analysis": " nothing to filter "}"#, &schema()).unwrap();
        assert!(q.filters.is_empty());
        assert_eq!(q.analysis.as_deref(), Some("nothing to filter"));
    }

    #[test]
    fn unknown_columns_are_dropped() {
        let q = parse_response(
            r#"{"filters":[{"column":"shoe_size","operator":">","value":9},
                           {"column":"Age","operator":"greater_than","value":"30"}],
                "sort":{"column":"height","direction":"desc"}}"#,
            &schema(),
        )
        .unwrap();
        assert_eq!(q.filters, vec![Filter::new("age", Operator::Gt, "30")]);
        assert!(q.sort.is_none());
    }

    #[test]
    fn between_expands_and_sorting_alias() {
        let q = parse_response(
            r#"```json
            {"filters":[{"column":"salary","operator":"between","value":[1000, 2000]}],
             "sorting":{"column":"name","direction":"DESC"}}
            ```"#,
            &schema(),
        )
        .unwrap();
        assert_eq!(
            q.filters,
            vec![
                Filter::new("salary", Operator::Ge, 1000i64),
                Filter::new("salary", Operator::Le, 2000i64),
            ]
        );
        assert_eq!(q.sort, Some(SortSpec { column: "name".into(), direction: SortDirection::Desc }));
    }

    #[test]
    fn unknown_operator_survives_parsing() {
        let q = parse_response(r#"{"filters":[{"column":"name","operator":"like","value":"J%"}]}"#, &schema())
            .unwrap();
        assert_eq!(q.filters[0].operator, Operator::Unknown("like".into()));
    }
}
