//! HTTP probing on top of the poll engine

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use super::poll_until;
use crate::error::Result;

/// Status and body of one GET
#[derive(Clone, PartialEq, Eq)]
pub struct ObservedResponse {
    pub status: StatusCode,
    pub body: String,
}

impl fmt::Debug for ObservedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bodies of error pages can be large; keep timeout messages readable
        let body: String = self.body.chars().take(200).collect();
        write!(f, "status {} body {:?}", self.status.as_u16(), body)
    }
}

/// Predicate over an observed response
#[derive(Clone)]
pub struct ResponseCondition {
    description: String,
    check: Arc<dyn Fn(&ObservedResponse) -> bool + Send + Sync>,
}

impl ResponseCondition {
    pub fn new(
        description: impl Into<String>,
        check: impl Fn(&ObservedResponse) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    pub fn status_code_is(code: u16) -> Self {
        Self::new(format!("status code is {}", code), move |resp| {
            resp.status.as_u16() == code
        })
    }

    pub fn body_contains(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(format!("body contains {:?}", text), move |resp| {
            resp.body.contains(&text)
        })
    }

    /// Conjunction of `conditions`
    pub fn all(conditions: Vec<ResponseCondition>) -> Self {
        let description = conditions
            .iter()
            .map(|c| c.description.as_str())
            .collect::<Vec<_>>()
            .join(" and ");
        Self::new(description, move |resp| conditions.iter().all(|c| c.matches(resp)))
    }

    pub fn matches(&self, resp: &ObservedResponse) -> bool {
        (self.check)(resp)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for ResponseCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResponseCondition")
            .field(&self.description)
            .finish()
    }
}

/// One GET, no retries
pub async fn get_once(client: &Client, url: &str) -> Result<ObservedResponse> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    Ok(ObservedResponse { status, body })
}

/// Poll `GET url` until `condition` holds or `timeout` elapses.
///
/// Transport errors (connection refused while the subject is still binding
/// its port, resets, per-request timeouts) count as unsatisfied attempts.
pub async fn get_request(
    client: &Client,
    url: &str,
    timeout: Duration,
    interval: Duration,
    condition: &ResponseCondition,
) -> Result<ObservedResponse> {
    debug!(url = %url, condition = %condition.description(), ?timeout, "Polling endpoint");

    let outcome = poll_until(
        || get_once(client, url),
        |resp| condition.matches(resp),
        timeout,
        interval,
    )
    .await;

    outcome.into_result(&format!("GET {} ({})", url, condition.description()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> ObservedResponse {
        ObservedResponse {
            status: StatusCode::from_u16(status).unwrap(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_status_code_is() {
        let cond = ResponseCondition::status_code_is(404);
        assert!(cond.matches(&response(404, "404 page not found")));
        assert!(!cond.matches(&response(200, "")));
        assert_eq!(cond.description(), "status code is 404");
    }

    #[test]
    fn test_all_requires_every_condition() {
        let cond = ResponseCondition::all(vec![
            ResponseCondition::status_code_is(200),
            ResponseCondition::body_contains("Hostname:"),
        ]);
        assert!(cond.matches(&response(200, "Hostname: 4f2a\nIP: 172.17.0.3")));
        assert!(!cond.matches(&response(200, "bad gateway")));
        assert!(!cond.matches(&response(502, "Hostname: 4f2a")));
        assert_eq!(
            cond.description(),
            "status code is 200 and body contains \"Hostname:\""
        );
    }

    #[test]
    fn test_debug_truncates_body() {
        let long = "x".repeat(1000);
        let rendered = format!("{:?}", response(500, &long));
        assert!(rendered.starts_with("status 500"));
        assert!(rendered.len() < 300);
    }

    #[tokio::test]
    async fn test_refused_connection_times_out() {
        // Reserve a port, then free it so nothing is listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = Client::new();
        let err = get_request(
            &client,
            &format!("http://127.0.0.1:{}/", port),
            Duration::from_millis(200),
            Duration::from_millis(50),
            &ResponseCondition::status_code_is(404),
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("error:"));
    }
}
