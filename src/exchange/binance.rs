//! Binance-style REST client.
//!
//! Every attempt goes through the same pipeline: take a token from the
//! bucket, (re-)sign if the endpoint mutates state, send, classify the
//! outcome, and let the [`RetryPolicy`] decide whether to wait and try again.
//! Reads race every wait against the shutdown signal. Orders do not: once an
//! order leaves the caller it runs to completion, since the exchange may
//! already have executed it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::rate_limit::TokenBucket;
use super::retry::{parse_retry_after, RetryDecision, RetryPolicy};
use super::signer::{Signer, API_KEY_HEADER};
use super::{ApiError, Exchange, ExchangeInfo, OrderResponse, ServerTime, TickerPrice};
use crate::shutdown::Shutdown;
use crate::types::{PriceSnapshot, Side};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const MAINNET_BASE_URL: &str = "https://api.binance.com/api/v3";
pub const TESTNET_BASE_URL: &str = "https://testnet.binance.vision/api/v3";

const PATH_TIME: &str = "/time";
const PATH_TICKER_PRICE: &str = "/ticker/price";
const PATH_EXCHANGE_INFO: &str = "/exchangeInfo";
const PATH_ORDER: &str = "/order";

/// Longest error body kept on an [`ApiError`].
const MAX_BODY_EXCERPT: usize = 512;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BinanceClient {
    http: Client,
    base_url: String,
    signer: Signer,
    limiter: TokenBucket,
    retry: RetryPolicy,
    shutdown: Shutdown,
}

impl BinanceClient {
    pub fn new(
        base_url: impl Into<String>,
        signer: Signer,
        limiter: TokenBucket,
        retry: RetryPolicy,
        timeout: Duration,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build exchange HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
            limiter,
            retry,
            shutdown,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One logical request: admission, retries and cancellation included.
    ///
    /// `shutdown` abandons the request at the next wait or while a response
    /// is outstanding.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
        shutdown: &Shutdown,
    ) -> Result<T, ApiError> {
        let cancelled = || ApiError::Cancelled {
            path: path.to_string(),
        };
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            self.limiter
                .acquire(shutdown)
                .await
                .map_err(|_| cancelled())?;

            let outcome = tokio::select! {
                biased;
                _ = shutdown.wait() => return Err(cancelled()),
                res = self.send_once(&method, path, params, signed) => res,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match self.retry.decide(attempt, &err) {
                RetryDecision::GiveUp => return Err(err),
                RetryDecision::Exhausted => {
                    warn!(path, attempts = attempt, error = %err, "Retries exhausted");
                    return Err(ApiError::ExhaustedRetries {
                        path: path.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                RetryDecision::RetryAfter(wait) => {
                    warn!(
                        path,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Transient exchange error, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.wait() => return Err(cancelled()),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);

        let builder = if signed {
            // Fresh timestamp per attempt so retries stay inside recvWindow.
            let timestamp = chrono::Utc::now().timestamp_millis();
            let payload = self
                .signer
                .signed_query(params, timestamp)
                .map_err(|source| ApiError::Signing {
                    path: path.to_string(),
                    source,
                })?;
            if *method == Method::GET {
                self.http
                    .request(method.clone(), format!("{url}?{payload}"))
                    .header(API_KEY_HEADER, self.signer.api_key())
            } else {
                self.http
                    .request(method.clone(), &url)
                    .header(API_KEY_HEADER, self.signer.api_key())
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(payload)
            }
        } else {
            self.http.request(method.clone(), &url).query(params)
        };

        debug!(%method, path, signed, "Exchange request");

        let resp = builder.send().await.map_err(|source| ApiError::Network {
            path: path.to_string(),
            source,
        })?;

        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await.map_err(|source| ApiError::Network {
                path: path.to_string(),
                source,
            })?;
            return serde_json::from_str(&body).map_err(|e| ApiError::Decode {
                path: path.to_string(),
                message: e.to_string(),
            });
        }

        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body: String = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(MAX_BODY_EXCERPT)
            .collect();

        Err(classify(path, status, retry_after, body))
    }
}

/// Map a non-2xx status onto the error taxonomy.
fn classify(path: &str, status: StatusCode, retry_after: Option<u64>, body: String) -> ApiError {
    let path = path.to_string();
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
        ApiError::RateLimited {
            path,
            status,
            retry_after,
        }
    } else if status.is_server_error() {
        ApiError::Server { path, status, body }
    } else {
        ApiError::Client { path, status, body }
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn server_time(&self) -> Result<i64, ApiError> {
        let time: ServerTime = self
            .request(Method::GET, PATH_TIME, &[], false, &self.shutdown)
            .await?;
        Ok(time.server_time)
    }

    async fn ticker_prices(&self) -> Result<PriceSnapshot, ApiError> {
        let tickers: Vec<TickerPrice> = self
            .request(Method::GET, PATH_TICKER_PRICE, &[], false, &self.shutdown)
            .await?;
        Ok(PriceSnapshot::from_tickers(tickers))
    }

    async fn exchange_info(&self) -> Result<ExchangeInfo, ApiError> {
        self.request(Method::GET, PATH_EXCHANGE_INFO, &[], false, &self.shutdown)
            .await
    }

    async fn create_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResponse, ApiError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
        ];
        // Never cancelled: a dropped response would hide a filled order.
        self.request(Method::POST, PATH_ORDER, &params, true, &Shutdown::never())
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use axum::extract::State;
    use axum::http::{HeaderMap, HeaderValue, Uri};
    use axum::Router;
    use rust_decimal_macros::dec;
    use secrecy::SecretString;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    const SECRET: &str = "test-secret";
    const API_KEY: &str = "test-key";

    #[derive(Clone)]
    struct Scripted {
        status: StatusCode,
        retry_after: Option<&'static str>,
        body: String,
    }

    fn reply(status: StatusCode, body: &str) -> Scripted {
        Scripted {
            status,
            retry_after: None,
            body: body.to_string(),
        }
    }

    #[derive(Debug, Clone)]
    struct Hit {
        at: Instant,
        path: String,
        api_key: Option<String>,
        body: String,
    }

    #[derive(Default)]
    struct Script {
        responses: Mutex<VecDeque<Scripted>>,
        repeat_last: Mutex<Option<Scripted>>,
        hits: Mutex<Vec<Hit>>,
        latency: Mutex<Duration>,
    }

    impl Script {
        fn hits(&self) -> Vec<Hit> {
            self.hits.lock().unwrap().clone()
        }
    }

    async fn scripted_handler(
        State(script): State<Arc<Script>>,
        uri: Uri,
        headers: HeaderMap,
        body: String,
    ) -> (StatusCode, HeaderMap, String) {
        script.hits.lock().unwrap().push(Hit {
            at: Instant::now(),
            path: uri.path().to_string(),
            api_key: headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });

        let latency = *script.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let next = script
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| script.repeat_last.lock().unwrap().clone())
            .unwrap_or_else(|| reply(StatusCode::NOT_FOUND, "script exhausted"));

        let mut out = HeaderMap::new();
        if let Some(v) = next.retry_after {
            out.insert(RETRY_AFTER, HeaderValue::from_static(v));
        }
        (next.status, out, next.body)
    }

    async fn serve(script: Arc<Script>) -> SocketAddr {
        let app = Router::new().fallback(scripted_handler).with_state(script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn client(base_url: String, unit: Duration, shutdown: Shutdown) -> BinanceClient {
        BinanceClient::new(
            base_url,
            Signer::new(
                SecretString::new(API_KEY.into()),
                SecretString::new(SECRET.into()),
                5000,
            ),
            TokenBucket::new(1000.0, 100),
            RetryPolicy::new(3, unit),
            Duration::from_secs(5),
            shutdown,
        )
        .unwrap()
    }

    fn gaps(hits: &[Hit]) -> Vec<Duration> {
        hits.windows(2).map(|w| w[1].at - w[0].at).collect()
    }

    #[tokio::test]
    async fn test_ticker_prices_decode_into_snapshot() {
        let script = Arc::new(Script::default());
        script.responses.lock().unwrap().push_back(reply(
            StatusCode::OK,
            r#"[{"symbol":"BTCUSDT","price":"30000.00"},{"symbol":"ETHUSDT","price":"1800.00"}]"#,
        ));
        let addr = serve(script.clone()).await;
        let c = client(format!("http://{addr}"), Duration::from_millis(10), Shutdown::never());

        let snap = c.ticker_prices().await.unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.price_decimal("ETHUSDT").unwrap(), dec!(1800));
        assert_eq!(script.hits()[0].path, "/ticker/price");
    }

    #[tokio::test]
    async fn test_retry_after_waits_exactly_the_directed_units() {
        let unit = Duration::from_millis(25);
        let script = Arc::new(Script::default());
        {
            let mut r = script.responses.lock().unwrap();
            for _ in 0..2 {
                r.push_back(Scripted {
                    status: StatusCode::TOO_MANY_REQUESTS,
                    retry_after: Some("2"),
                    body: String::new(),
                });
            }
            r.push_back(reply(StatusCode::OK, r#"{"serverTime":1700000000000}"#));
        }
        let addr = serve(script.clone()).await;
        let c = client(format!("http://{addr}"), unit, Shutdown::never());

        assert_eq!(c.server_time().await.unwrap(), 1_700_000_000_000);

        let hits = script.hits();
        assert_eq!(hits.len(), 3);
        for gap in gaps(&hits) {
            // Two units each time, not the 1/2 exponential sequence.
            assert!(gap >= unit * 2, "{gap:?}");
            assert!(gap < unit * 4, "{gap:?}");
        }
    }

    #[tokio::test]
    async fn test_server_errors_back_off_exponentially_then_exhaust() {
        let unit = Duration::from_millis(20);
        let script = Arc::new(Script::default());
        *script.repeat_last.lock().unwrap() =
            Some(reply(StatusCode::INTERNAL_SERVER_ERROR, "boom"));
        let addr = serve(script.clone()).await;
        let c = client(format!("http://{addr}"), unit, Shutdown::never());

        let err = c.exchange_info().await.unwrap_err();
        match &err {
            ApiError::ExhaustedRetries { attempts, last, path } => {
                assert_eq!(*attempts, 4);
                assert_eq!(path, "/exchangeInfo");
                assert!(matches!(**last, ApiError::Server { .. }));
            }
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }

        let hits = script.hits();
        assert_eq!(hits.len(), 4);
        let g = gaps(&hits);
        assert!(g[0] >= unit, "{g:?}");
        assert!(g[1] >= unit * 2, "{g:?}");
        assert!(g[2] >= unit * 4, "{g:?}");
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let script = Arc::new(Script::default());
        *script.repeat_last.lock().unwrap() = Some(reply(
            StatusCode::BAD_REQUEST,
            r#"{"code":-1013,"msg":"Filter failure: LOT_SIZE"}"#,
        ));
        let addr = serve(script.clone()).await;
        let c = client(format!("http://{addr}"), Duration::from_millis(10), Shutdown::never());

        let err = c
            .create_order("BTCUSDT", Side::Sell, dec!(0.001))
            .await
            .unwrap_err();
        match err {
            ApiError::Client { status, body, .. } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert!(body.contains("LOT_SIZE"));
            }
            other => panic!("expected Client, got {other:?}"),
        }
        assert_eq!(script.hits().len(), 1);
    }

    #[tokio::test]
    async fn test_order_is_signed_form_post() {
        let script = Arc::new(Script::default());
        script.responses.lock().unwrap().push_back(reply(
            StatusCode::OK,
            r#"{"symbol":"BTCUSDT","orderId":42,"executedQty":"0.00100000","cummulativeQuoteQty":"30.00000000","transactTime":1700000000123,"status":"FILLED","side":"SELL"}"#,
        ));
        let addr = serve(script.clone()).await;
        let c = client(format!("http://{addr}"), Duration::from_millis(10), Shutdown::never());

        let order = c
            .create_order("BTCUSDT", Side::Sell, dec!(0.00100000))
            .await
            .unwrap();
        assert_eq!(order.order_id, 42);
        assert_eq!(order.executed_qty, "0.00100000");

        let hit = &script.hits()[0];
        assert_eq!(hit.path, "/order");
        assert_eq!(hit.api_key.as_deref(), Some(API_KEY));

        let (canonical, signature) = hit.body.rsplit_once("&signature=").unwrap();
        assert!(canonical.starts_with("quantity=0.001&recvWindow=5000&side=SELL&symbol=BTCUSDT&timestamp="));
        assert!(canonical.ends_with("&type=MARKET"));
        let verifier = Signer::new(
            SecretString::new(String::new()),
            SecretString::new(SECRET.into()),
            5000,
        );
        assert_eq!(signature, verifier.sign_payload(canonical).unwrap());
    }

    #[tokio::test]
    async fn test_backoff_is_cancelled_by_shutdown() {
        let script = Arc::new(Script::default());
        *script.repeat_last.lock().unwrap() = Some(reply(StatusCode::BAD_GATEWAY, ""));
        let addr = serve(script.clone()).await;
        let (trigger, shutdown) = shutdown::channel();
        let c = Arc::new(client(
            format!("http://{addr}"),
            Duration::from_secs(30),
            shutdown,
        ));

        let pending = {
            let c = c.clone();
            tokio::spawn(async move { c.server_time().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.trigger();

        let res = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("request should stop promptly")
            .unwrap();
        assert!(matches!(res, Err(ApiError::Cancelled { .. })));
        assert_eq!(script.hits().len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_order_survives_shutdown() {
        let script = Arc::new(Script::default());
        *script.latency.lock().unwrap() = Duration::from_millis(300);
        script.responses.lock().unwrap().push_back(reply(
            StatusCode::OK,
            r#"{"symbol":"BTCUSDT","orderId":7,"executedQty":"0.01","cummulativeQuoteQty":"300.0","transactTime":1700000000123,"status":"FILLED","side":"SELL"}"#,
        ));
        let addr = serve(script.clone()).await;
        let (trigger, shutdown) = shutdown::channel();
        let c = Arc::new(client(
            format!("http://{addr}"),
            Duration::from_millis(10),
            shutdown,
        ));

        let pending = {
            let c = c.clone();
            tokio::spawn(async move { c.create_order("BTCUSDT", Side::Sell, dec!(0.01)).await })
        };
        tokio::time::sleep(Duration::from_millis(80)).await;
        trigger.trigger();

        let order = pending.await.unwrap().unwrap();
        assert_eq!(order.order_id, 7);
        assert_eq!(order.status, "FILLED");
        assert_eq!(script.hits().len(), 1);
    }

    #[tokio::test]
    async fn test_order_after_shutdown_is_still_sent() {
        let script = Arc::new(Script::default());
        script.responses.lock().unwrap().push_back(reply(
            StatusCode::OK,
            r#"{"symbol":"ETHUSDT","orderId":8,"executedQty":"0.15","cummulativeQuoteQty":"300.0","transactTime":1700000000456,"status":"FILLED","side":"BUY"}"#,
        ));
        let addr = serve(script.clone()).await;
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();
        let c = client(format!("http://{addr}"), Duration::from_millis(10), shutdown);

        assert!(matches!(
            c.server_time().await,
            Err(ApiError::Cancelled { .. })
        ));
        let order = c
            .create_order("ETHUSDT", Side::Buy, dec!(0.15))
            .await
            .unwrap();
        assert_eq!(order.order_id, 8);
        let paths: Vec<String> = script.hits().into_iter().map(|h| h.path).collect();
        assert_eq!(paths, ["/order"]);
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried_as_network() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let c = client(format!("http://{addr}"), Duration::from_millis(1), Shutdown::never());
        match c.server_time().await.unwrap_err() {
            ApiError::ExhaustedRetries { attempts, last, .. } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, ApiError::Network { .. }));
            }
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(
            classify("/x", StatusCode::IM_A_TEAPOT, None, String::new()),
            ApiError::RateLimited { .. }
        ));
        assert!(matches!(
            classify("/x", StatusCode::SERVICE_UNAVAILABLE, None, String::new()),
            ApiError::Server { .. }
        ));
        assert!(matches!(
            classify("/x", StatusCode::UNAUTHORIZED, None, String::new()),
            ApiError::Client { .. }
        ));
    }
}
