//! Retry layer driven by scripted failures, no network involved.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use sc_domain::error::Error;
use sc_domain::stream::Fragment;
use sc_providers::scripted::ScriptError;
use sc_providers::{ChatRequest, LlmProvider, RetryPolicy, RetryingProvider, ScriptStep, ScriptedProvider};

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: true,
    }
}

async fn drain(provider: &dyn LlmProvider) -> Result<Vec<Fragment>, Error> {
    let mut stream = provider
        .stream_completion(ChatRequest::default(), CancellationToken::new())
        .await?;
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.push(item?);
    }
    Ok(out)
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let inner = Arc::new(ScriptedProvider::new(vec![
        ScriptStep::failure("Overloaded", Some(529)),
        ScriptStep::failure("bad gateway", Some(502)),
        ScriptStep::text("hello"),
    ]));
    let provider = RetryingProvider::new(inner.clone(), fast_policy(3));

    let fragments = drain(&provider).await.unwrap();
    assert_eq!(fragments, vec![Fragment::content("hello")]);
    assert_eq!(inner.requests().len(), 3);
}

#[tokio::test]
async fn gives_up_after_the_attempt_budget() {
    let inner = Arc::new(ScriptedProvider::new(vec![
        ScriptStep::failure("rate limit", Some(429)),
        ScriptStep::failure("rate limit", Some(429)),
        ScriptStep::failure("rate limit", Some(429)),
        ScriptStep::text("never reached"),
    ]));
    let provider = RetryingProvider::new(inner.clone(), fast_policy(2));

    let err = drain(&provider).await.unwrap_err();
    assert!(err.to_string().contains("rate limit"));
    assert_eq!(inner.requests().len(), 3);
    assert_eq!(inner.remaining(), 1);
}

#[tokio::test]
async fn non_retryable_errors_surface_immediately() {
    let inner = Arc::new(ScriptedProvider::new(vec![
        ScriptStep::failure("invalid api key", Some(401)),
        ScriptStep::text("unused"),
    ]));
    let provider = RetryingProvider::new(inner.clone(), fast_policy(3));

    assert!(drain(&provider).await.is_err());
    assert_eq!(inner.requests().len(), 1);
}

#[tokio::test]
async fn retry_after_hint_is_honoured() {
    let inner = Arc::new(ScriptedProvider::new(vec![
        ScriptStep {
            error: Some(ScriptError {
                message: "slow down".into(),
                status: Some(429),
                retry_after_ms: Some(60),
            }),
            ..Default::default()
        },
        ScriptStep::text("ok"),
    ]));
    let policy = RetryPolicy {
        max_delay: Duration::from_secs(5),
        ..fast_policy(1)
    };
    let provider = RetryingProvider::new(inner, policy);

    let started = std::time::Instant::now();
    drain(&provider).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn errors_after_first_fragment_are_not_retried() {
    let inner = Arc::new(ScriptedProvider::new(vec![
        ScriptStep {
            fragments: vec![Fragment::content("partial")],
            error: Some(ScriptError {
                message: "premature close".into(),
                status: None,
                retry_after_ms: None,
            }),
            delay_ms: 0,
        },
        ScriptStep::text("retry"),
    ]));
    let provider = RetryingProvider::new(inner.clone(), fast_policy(3));

    let err = drain(&provider).await.unwrap_err();
    assert!(err.to_string().contains("premature close"));
    assert_eq!(inner.requests().len(), 1);
}
