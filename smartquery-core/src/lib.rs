pub mod dataset;
pub mod engine;
pub mod heuristic;
pub mod history;
pub mod interpreter;
pub mod query;
pub mod remote;
pub mod schema;
pub mod stats;
pub mod throttle;
pub mod value;

pub use dataset::{Dataset, Row};
pub use engine::{QueryEngine, QueryFailure, QueryOutcome};
pub use heuristic::{resolve_locally, HeuristicParser};
pub use history::{HistoryEntry, QueryHistory, ResolutionSource};
pub use query::{Filter, Operator, ResolvedQuery, SortDirection, SortSpec};
pub use remote::{CompletionProvider, RemoteResolver};
pub use schema::{Column, ColumnType};
pub use smartquery_common::{ResolutionError, Result, SmartQueryError};
pub use stats::{column_statistics, ColumnSummary, NumericSummary};
pub use throttle::{RateLimitState, RateLimiter, RetryPolicy};
pub use value::Value;
