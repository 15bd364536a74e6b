use std::{collections::BTreeMap, convert::Infallible, time::Duration};

use rama::{
    Service,
    http::{
        Body, HeaderMap, Request, Response, StatusCode,
        body::util::BodyExt as _,
        header::{CONTENT_LENGTH, COOKIE, HOST},
        headers::ContentType,
        service::web::response::{Headers, IntoResponse},
    },
    telemetry::tracing,
};
use serde::Serialize;

use crate::config::ServerConfig;

/// Responds to every request with a JSON description of that request.
#[derive(Debug)]
pub(super) struct EchoHttpServer {
    base_latency: f64,
    jitter: f64,
    error_rate: f32,
    status: StatusCode,
}

#[derive(Debug, Serialize)]
struct EchoPayload {
    method: String,
    path: String,
    query: BTreeMap<String, Vec<String>>,
    headers: BTreeMap<String, Vec<String>>,
    cookies: BTreeMap<String, String>,
    body: String,
    proto: String,
    host: String,
    request_uri: String,
    content_length: Option<u64>,
}

impl EchoHttpServer {
    pub(super) fn new(cfg: &ServerConfig) -> Self {
        let status = cfg
            .status
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK);

        Self {
            base_latency: cfg.base_latency.unwrap_or_default(),
            jitter: cfg.jitter.unwrap_or_default(),
            error_rate: cfg.error_rate.unwrap_or_default().clamp(0., 1.),
            status,
        }
    }

    fn compute_delay(&self) -> Duration {
        let base = self.base_latency.max(0.0);
        let jitter = self.jitter.max(0.0);

        if jitter == 0.0 {
            return Duration::from_secs_f64(base);
        }

        let span = jitter * 2.0;
        let u: f64 = rand::random();
        let delta = (u * span) - jitter;

        Duration::from_secs_f64((base + delta).max(0.0))
    }

    fn pick_error(&self) -> bool {
        self.error_rate > 0. && rand::random::<f32>() < self.error_rate
    }
}

fn decode_query(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Some(query) = query else {
        return params;
    };

    match serde_html_form::from_str::<Vec<(String, String)>>(query) {
        Ok(pairs) => {
            for (key, value) in pairs {
                params.entry(key).or_default().push(value);
            }
        }
        Err(err) => tracing::debug!("ignore undecodable query '{query}': {err}"),
    }
    params
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        map.entry(name.as_str().to_owned())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (!name.is_empty()).then(|| (name.to_owned(), value.to_owned()))
        })
        .collect()
}

impl Service<Request> for EchoHttpServer {
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        let delay = self.compute_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.pick_error() {
            return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }

        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();

        let mut payload = EchoPayload {
            method: req.method().to_string(),
            path: req.uri().path().to_owned(),
            query: decode_query(req.uri().query()),
            headers: collect_headers(req.headers()),
            cookies: parse_cookies(req.headers()),
            body: String::new(),
            proto: format!("{:?}", req.version()),
            host,
            request_uri: req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_else(|| "/".to_owned()),
            content_length: req
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
        };

        payload.body = match req.into_body().collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
            Err(err) => {
                tracing::debug!("failed to read request body: {err}");
                return Ok(StatusCode::BAD_REQUEST.into_response());
            }
        };

        Ok(match serde_json::to_vec(&payload) {
            Ok(body) => (
                self.status,
                Headers::single(ContentType::json()),
                Body::from(body),
            )
                .into_response(),
            Err(err) => {
                tracing::error!("failed to encode echo payload: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use rama::http::Method;

    use super::*;

    async fn echo(svc: &EchoHttpServer, req: Request) -> (StatusCode, serde_json::Value) {
        let resp = svc.serve(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_echo_describes_request() {
        let svc = EchoHttpServer::new(&ServerConfig::default());
        let req = Request::builder()
            .method(Method::POST)
            .uri("http://example.test/echo?a=1&a=2&b=x%20y")
            .header(HOST, "example.test")
            .header(COOKIE, "session=abc; theme=dark")
            .header(CONTENT_LENGTH, "5")
            .header("x-trace", "one")
            .header("x-trace", "two")
            .body(Body::from("hello"))
            .unwrap();

        let (status, v) = echo(&svc, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["method"], "POST");
        assert_eq!(v["path"], "/echo");
        assert_eq!(v["query"]["a"], serde_json::json!(["1", "2"]));
        assert_eq!(v["query"]["b"], serde_json::json!(["x y"]));
        assert_eq!(v["headers"]["x-trace"], serde_json::json!(["one", "two"]));
        assert_eq!(v["cookies"]["session"], "abc");
        assert_eq!(v["cookies"]["theme"], "dark");
        assert_eq!(v["body"], "hello");
        assert_eq!(v["proto"], "HTTP/1.1");
        assert_eq!(v["host"], "example.test");
        assert_eq!(v["request_uri"], "/echo?a=1&a=2&b=x%20y");
        assert_eq!(v["content_length"], 5);
    }

    #[tokio::test]
    async fn test_status_override() {
        let svc = EchoHttpServer::new(&ServerConfig {
            status: Some(503),
            ..Default::default()
        });
        let req = Request::builder()
            .uri("http://example.test/")
            .body(Body::empty())
            .unwrap();

        let (status, v) = echo(&svc, req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(v["method"], "GET");
        assert_eq!(v["content_length"], serde_json::Value::Null);
        assert_eq!(v["host"], "example.test");
    }

    #[tokio::test]
    async fn test_error_rate_of_one_always_fails() {
        let svc = EchoHttpServer::new(&ServerConfig {
            error_rate: Some(1.),
            ..Default::default()
        });
        for _ in 0..10 {
            let req = Request::builder()
                .uri("http://example.test/")
                .body(Body::empty())
                .unwrap();
            let (status, _) = echo(&svc, req).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn test_compute_delay_within_jitter() {
        let svc = EchoHttpServer::new(&ServerConfig {
            base_latency: Some(0.010),
            jitter: Some(0.005),
            ..Default::default()
        });
        for _ in 0..100 {
            let delay = svc.compute_delay();
            assert!(delay >= Duration::from_millis(4), "{delay:?}");
            assert!(delay <= Duration::from_millis(16), "{delay:?}");
        }
    }

    #[test]
    fn test_parse_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, "a=1; b=2".parse().unwrap());
        headers.append(COOKIE, "c=3;broken; =x".parse().unwrap());

        let cookies = parse_cookies(&headers);
        assert_eq!(
            cookies,
            BTreeMap::from([
                ("a".to_owned(), "1".to_owned()),
                ("b".to_owned(), "2".to_owned()),
                ("c".to_owned(), "3".to_owned()),
            ])
        );
    }
}
