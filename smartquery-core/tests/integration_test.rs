use arrow::array::{ArrayRef, BooleanArray, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parquet::arrow::ArrowWriter;
use smartquery_core::{
    ColumnType, CompletionProvider, Dataset, QueryEngine, QueryFailure, RateLimiter, RemoteResolver,
    ResolutionError, ResolutionSource, RetryPolicy, Value,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PEOPLE: &str = r#"[{"name":"John","age":30,"department":"Engineering"},
                        {"name":"Jane","age":25,"department":"Marketing"}]"#;

fn people() -> Dataset {
    Dataset::from_json_str(PEOPLE).unwrap()
}

/// Replies with the same text every time, after an optional delay.
struct FakeProvider {
    reply: Result<String, ResolutionError>,
    delay: Duration,
    calls: AtomicU32,
}

impl FakeProvider {
    fn new(reply: Result<&str, ResolutionError>) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.map(str::to_string),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        })
    }

    fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            delay,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.reply.clone()
    }
}

fn engine_spaced(provider: Arc<FakeProvider>, min_interval: Duration) -> QueryEngine {
    let remote = RemoteResolver::new(provider, RateLimiter::new(min_interval), RetryPolicy::default());
    QueryEngine::new(people()).with_remote(remote)
}

// The limiter waits on the wall clock, so tests on paused time run ungated.
fn engine_with(provider: Arc<FakeProvider>) -> QueryEngine {
    engine_spaced(provider, Duration::ZERO)
}

fn names(rows: &[Arc<smartquery_core::Row>]) -> Vec<String> {
    rows.iter().map(|r| r.get("name").as_text()).collect()
}

#[tokio::test]
async fn scenario_a_heuristic_age_filter() {
    let provider = FakeProvider::new(Ok("{}"));
    let engine = engine_with(provider.clone());
    let out = engine.submit_query("show employees over 28").await.unwrap();
    assert_eq!(names(&out.rows), vec!["John"]);
    assert_eq!(out.source, ResolutionSource::Heuristic);
    assert_eq!(provider.calls(), 0);
    assert_eq!(engine.history().len(), 1);
}

#[tokio::test]
async fn scenario_b_empty_query_resets() {
    let engine = QueryEngine::new(people());
    engine.submit_query("age over 28").await.unwrap();
    let out = engine.submit_query("").await.unwrap();
    assert_eq!(out.rows.len(), 2);
    let history = engine.history();
    assert_eq!(history[0].result_count, 2);
    assert_eq!(history[0].source, ResolutionSource::Reset);
    assert_eq!(history[1].result_count, 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_c_prose_reply_falls_back() {
    let provider = FakeProvider::new(Ok("I'd look at the senior folks, honestly."));
    let engine = engine_with(provider.clone());
    match engine.submit_query("who deserves a raise").await {
        Err(QueryFailure::Resolution { error, fallback }) => {
            assert!(matches!(error, ResolutionError::MalformedResponse(_)));
            assert_eq!(fallback.len(), 2);
        }
        other => panic!("expected a resolution failure, got {other:?}"),
    }
    assert_eq!(provider.calls(), 1);
    assert!(engine.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn remote_resolution_is_recorded() {
    let reply = r#"```json
{"filters":[{"column":"department","operator":"==","value":"marketing"}],
 "analysis":"Marketing staff"}
```"#;
    let engine = engine_with(FakeProvider::new(Ok(reply)));
    let out = engine.submit_query("who does the campaigns").await.unwrap();
    assert_eq!(names(&out.rows), vec!["Jane"]);
    assert_eq!(out.source, ResolutionSource::Remote);
    let entry = &engine.history()[0];
    assert_eq!(entry.analysis.as_deref(), Some("Marketing staff"));
    assert_eq!(entry.result_count, 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_quota_errors_exhaust_retries() {
    let provider = FakeProvider::new(Err(ResolutionError::RateLimited("429 Too Many Requests".into())));
    let engine = engine_with(provider.clone());
    let start = tokio::time::Instant::now();
    let err = engine.submit_query("who deserves a raise").await.unwrap_err();
    let QueryFailure::Resolution { error, .. } = err else {
        panic!("expected resolution failure");
    };
    assert_eq!(error, ResolutionError::RateLimitExceeded { attempts: 3 });
    assert!(error.user_message().contains("Rate limit exceeded"));
    assert_eq!(provider.calls(), 3);
    assert!(start.elapsed() >= Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn newer_query_supersedes_slow_remote() {
    let provider = FakeProvider::slow(r#"{"filters":[]}"#, Duration::from_secs(1));
    let engine = engine_with(provider);
    let (slow, fast) = futures::join!(engine.submit_query("who deserves a raise"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.submit_query("age over 28").await
    });
    assert!(matches!(slow, Err(QueryFailure::Superseded)));
    assert_eq!(names(&fast.unwrap().rows), vec!["John"]);
    let history = engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].query, "age over 28");
}

#[tokio::test(start_paused = true)]
async fn superseded_query_stops_retrying() {
    let provider = FakeProvider::new(Err(ResolutionError::RateLimited("429 Too Many Requests".into())));
    let engine = engine_with(provider.clone());
    let (first, second) = futures::join!(engine.submit_query("who deserves a raise"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.submit_query("who runs the campaigns").await
    });
    assert!(matches!(first, Err(QueryFailure::Superseded)));
    assert!(matches!(
        second,
        Err(QueryFailure::Resolution { error: ResolutionError::RateLimitExceeded { attempts: 3 }, .. })
    ));
    // one call from the first query, three from the second
    assert_eq!(provider.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn closed_session_stops_retrying() {
    let provider = FakeProvider::new(Err(ResolutionError::RateLimited("429 Too Many Requests".into())));
    let engine = engine_with(provider.clone());
    let (pending, ()) = futures::join!(engine.submit_query("who deserves a raise"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.close();
    });
    assert!(matches!(pending, Err(QueryFailure::Cancelled)));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn remote_calls_are_spaced() {
    let provider = FakeProvider::new(Ok(r#"{"filters":[]}"#));
    let engine = engine_spaced(provider.clone(), Duration::from_millis(150));
    let start = std::time::Instant::now();
    engine.submit_query("who deserves a raise").await.unwrap();
    engine.submit_query("who runs the campaigns").await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(120));
    assert_eq!(provider.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn close_cancels_in_flight_attempt() {
    let provider = FakeProvider::slow(r#"{"filters":[]}"#, Duration::from_secs(1));
    let engine = engine_with(provider);
    let (pending, ()) = futures::join!(engine.submit_query("who deserves a raise"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.close();
    });
    assert!(matches!(pending, Err(QueryFailure::Cancelled)));
    assert!(engine.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn debounce_keeps_only_latest() {
    let engine = QueryEngine::new(people());
    let (first, second) = futures::join!(
        engine.submit_debounced("age over 20"),
        engine.submit_debounced("age over 28")
    );
    assert!(matches!(first, Err(QueryFailure::Superseded)));
    assert_eq!(names(&second.unwrap().rows), vec!["John"]);
    assert_eq!(engine.history().len(), 1);
}

#[tokio::test]
async fn heuristic_only_never_calls_out() {
    let engine = QueryEngine::new(people());
    assert!(!engine.remote_available());
    let err = engine.submit_query("who deserves a raise").await.unwrap_err();
    assert!(matches!(
        err,
        QueryFailure::Resolution { error: ResolutionError::UnrecognizedQuery, .. }
    ));
}

fn write_parquet(path: &std::path::Path) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("name", DataType::Utf8, true),
        Field::new("age", DataType::Int32, true),
        Field::new("active", DataType::Boolean, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec![Some("alice"), Some("bob"), None])),
        Arc::new(Int32Array::from(vec![Some(34), None, Some(51)])),
        Arc::new(BooleanArray::from(vec![Some(true), Some(false), None])),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

#[tokio::test]
async fn parquet_dataset_is_queryable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.parquet");
    write_parquet(&path);

    let ds = Dataset::load(path.to_str().unwrap()).unwrap();
    assert_eq!(ds.len(), 3);
    let types: Vec<ColumnType> = ds.columns().iter().map(|c| c.column_type).collect();
    assert_eq!(types, vec![ColumnType::String, ColumnType::Number, ColumnType::Boolean]);
    assert_eq!(ds.rows()[1].get("age"), &Value::Null);
    assert_eq!(ds.rows()[0].get("active"), &Value::Bool(true));

    let engine = QueryEngine::new(ds);
    let out = engine.submit_query("age over 40").await.unwrap();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0].get("age"), &Value::Number(51.0));
}

#[test]
fn directory_and_glob_sources_concatenate() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.json"), r#"[{"name":"Ann","age":41}]"#).unwrap();
    std::fs::write(dir.path().join("b.json"), r#"[{"name":"Bob","age":37,"team":"Ops"}]"#).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let ds = Dataset::load(dir.path().to_str().unwrap()).unwrap();
    assert_eq!(ds.len(), 2);
    assert_eq!(ds.rows()[0].get("name"), &Value::from("Ann"));
    assert!(ds.columns().iter().any(|c| c.key == "team"));

    let pattern = format!("{}/b*.json", dir.path().display());
    assert_eq!(Dataset::load(&pattern).unwrap().len(), 1);
    assert!(Dataset::load(&format!("{}/*.csv", dir.path().display())).is_err());
}
