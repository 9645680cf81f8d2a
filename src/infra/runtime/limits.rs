use std::time::Duration;

use crate::infra::config::HttpConfig;

/// Build a reqwest client with the configured timeouts.
pub fn make_http_client_with(cfg: &HttpConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
        .timeout(Duration::from_millis(cfg.timeout_ms))
        .build()
}

/// Client without an overall request timeout, for long-lived streamed bodies.
pub fn make_streaming_client_with(cfg: &HttpConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
        .build()
}

/// Exponential backoff for async ops. Only errors accepted by `should_retry`
/// are retried; anything else returns immediately.
pub async fn retry_async<T, E, Fut, F, P>(mut attempts: u32, should_retry: P, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut try_num: u32 = 0;
    let mut delay_ms: u64 = 50;
    loop {
        match op(try_num).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempts == 0 || !should_retry(&e) {
                    return Err(e);
                }
                attempts -= 1;
                tracing::debug!(attempt = try_num, delay_ms, "retrying after failure");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(1_000);
                try_num += 1;
            }
        }
    }
}

/// Bound `fut` by `ms` milliseconds, naming `what` in the timeout error.
pub async fn with_deadline<T, Fut>(what: &str, ms: u64, fut: Fut) -> Result<T, crate::core::error::GatewayError>
where
    Fut: std::future::Future<Output = Result<T, crate::core::error::GatewayError>>,
{
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(res) => res,
        Err(_) => Err(crate::core::error::GatewayError::Timeout { what: what.to_owned(), ms }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GatewayError;

    #[tokio::test]
    async fn it_retries_then_succeeds() {
        let mut calls = 0;
        let res: Result<i32, i32> = retry_async(3, |_| true, move |_| {
            calls += 1;
            let c = calls;
            async move {
                if c < 3 {
                    Err(-1)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(res.unwrap(), 42);
    }

    #[tokio::test]
    async fn it_stops_on_permanent_errors() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let res: Result<i32, i32> = retry_async(5, |e| *e != 400, |_| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(400) }
        })
        .await;
        assert_eq!(res, Err(400));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_reports_what_timed_out() {
        let res: Result<(), GatewayError> = with_deadline("tool get-weather", 10, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = res.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { ms: 10, .. }));
        assert!(err.to_string().contains("get-weather"));
    }

    #[test]
    fn builds_clients_from_config() {
        let cfg = HttpConfig::default();
        assert!(make_http_client_with(&cfg).is_ok());
        assert!(make_streaming_client_with(&cfg).is_ok());
    }
}
