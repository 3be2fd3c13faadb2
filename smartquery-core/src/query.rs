use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Contains,
    StartsWith,
    EndsWith,
    Max,
    Min,
    /// Anything unrecognized; evaluated as a pass-through.
    Unknown(String),
}

impl Operator {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            ">" | "gt" | "greater_than" => Operator::Gt,
            "<" | "lt" | "less_than" => Operator::Lt,
            ">=" | "gte" | "greater_than_or_equal" => Operator::Ge,
            "<=" | "lte" | "less_than_or_equal" => Operator::Le,
            "==" | "=" | "eq" | "equals" => Operator::Eq,
            "!=" | "<>" | "ne" | "not_equals" => Operator::Ne,
            "contains" => Operator::Contains,
            "starts_with" | "startswith" => Operator::StartsWith,
            "ends_with" | "endswith" => Operator::EndsWith,
            "max" => Operator::Max,
            "min" => Operator::Min,
            _ => Operator::Unknown(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::Max => "max",
            Operator::Min => "min",
            Operator::Unknown(s) => s,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Operator::parse(&s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self { column: column.into(), operator, value: value.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "desc" | "descending" => SortDirection::Desc,
            _ => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Normalized output of either resolver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResolvedQuery {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub analysis: Option<String>,
}

impl ResolvedQuery {
    pub fn is_unconstrained(&self) -> bool {
        self.filters.is_empty() && self.sort.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_canonical_operators() {
        assert_eq!(Operator::parse("greater_than"), Operator::Gt);
        assert_eq!(Operator::parse("equals"), Operator::Eq);
        assert_eq!(Operator::parse(" >= "), Operator::Ge);
        assert_eq!(Operator::parse("MAX"), Operator::Max);
        assert_eq!(Operator::parse("like"), Operator::Unknown("like".into()));
    }

    #[test]
    fn filters_default_to_empty() {
        let q: ResolvedQuery = serde_json::from_str(r#"{"analysis":"nothing"}"#).unwrap();
        assert!(q.filters.is_empty());
        assert!(q.sort.is_none());
        assert!(q.is_unconstrained());
    }

    #[test]
    fn operator_round_trips_through_its_wire_spelling() {
        let f = Filter::new("age", Operator::Ge, 30i64);
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, r#"{"column":"age","operator":">=","value":30}"#);
    }
}
