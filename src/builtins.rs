//! Invokables available to definitions run from the command line.

use statechart_core::{invokable_fn, DataValue, Invokable, InvokableResult, Payload};
use statechart_loader::Loader;
use std::sync::Arc;
use std::time::Duration;

/// Succeeds with its input.
pub fn echo() -> Arc<dyn Invokable> {
    invokable_fn(|input: Payload| async move { InvokableResult::success(input) })
}

/// Fails with its input.
pub fn fail() -> Arc<dyn Invokable> {
    invokable_fn(|input: Payload| async move {
        let cause = input
            .get("error")
            .and_then(DataValue::as_str)
            .unwrap_or("failed")
            .to_string();
        InvokableResult::Failure {
            data: input,
            cause: Some(cause),
        }
    })
}

/// Waits `input.ms` milliseconds, then succeeds with its input.
pub fn sleep() -> Arc<dyn Invokable> {
    invokable_fn(|input: Payload| async move {
        let ms = input
            .get("ms")
            .and_then(DataValue::as_f64)
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .unwrap_or(0.0);
        tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        InvokableResult::success(input)
    })
}

/// Registers the built-in invokables on a loader.
pub fn register(loader: Loader) -> Loader {
    loader
        .with_invokable("echo", echo())
        .with_invokable("fail", fail())
        .with_invokable("sleep", sleep())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(entries: &[(&str, DataValue)]) -> Payload {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_echo() {
        let input = payload(&[("n", DataValue::Int(1))]);
        let result = echo().execute(input.clone()).await;
        assert_eq!(result, InvokableResult::success(input));
    }

    #[tokio::test]
    async fn test_fail_keeps_input_as_data() {
        let input = payload(&[("error", DataValue::from("nope"))]);
        match fail().execute(input.clone()).await {
            InvokableResult::Failure { data, cause } => {
                assert_eq!(data, input);
                assert_eq!(cause.as_deref(), Some("nope"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sleep_waits() {
        let input = payload(&[("ms", DataValue::Int(20))]);
        let started = std::time::Instant::now();
        let result = sleep().execute(input).await;
        assert!(result.is_success());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_register() {
        let loader = register(Loader::new());
        let definition = loader
            .from_str(
                r#"{ "initial": "a", "states": { "a": { "invoke": { "src": "sleep" } } } }"#,
            )
            .unwrap();
        assert!(definition.state("a").unwrap().invoke.is_some());
    }
}
