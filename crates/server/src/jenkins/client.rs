//! Jenkins REST client.
//!
//! Triggers parameterized builds, follows the queue item until a build
//! number is assigned and polls the build until it finishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatops_core::DeployType;
use reqwest::{Client, StatusCode, redirect};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::error::JenkinsError;
use super::types::{BuildInfo, BuildOutcome, PollTiming, QueueItem};
use crate::config::JenkinsConfig;
use crate::services::orchestrator::Builder;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Consecutive failed status polls before monitoring gives up.
const MAX_MONITOR_FAILURES: u32 = 10;

/// Longest wait for a queued build, applied when the requested timeout
/// cannot be represented as a deadline.
const MAX_START_WAIT: Duration = Duration::from_secs(86_400);

/// Jenkins API client.
#[derive(Clone)]
pub struct JenkinsClient {
    inner: Arc<JenkinsClientInner>,
}

struct JenkinsClientInner {
    client: Client,
    base_url: Url,
    user: String,
    token: SecretString,
    timing: PollTiming,
}

impl std::fmt::Debug for JenkinsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JenkinsClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("user", &self.inner.user)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl JenkinsClient {
    /// Create a new Jenkins client.
    ///
    /// Redirects are not followed so the queue item `Location` of a trigger
    /// response stays visible.
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid or the HTTP client cannot be
    /// built.
    pub fn new(
        base_url: &str,
        user: impl Into<String>,
        token: SecretString,
        timing: PollTiming,
    ) -> Result<Self, JenkinsError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| JenkinsError::Config(format!("invalid Jenkins URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(JenkinsError::Config(
                "Jenkins URL cannot be a base".to_string(),
            ));
        }

        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            inner: Arc::new(JenkinsClientInner {
                client,
                base_url,
                user: user.into(),
                token,
                timing,
            }),
        })
    }

    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the client cannot be built.
    pub fn from_config(config: &JenkinsConfig) -> Result<Self, JenkinsError> {
        Self::new(
            &config.url,
            config.user.clone(),
            config.token.clone(),
            PollTiming {
                build_poll: config.build_poll_interval,
                ..PollTiming::default()
            },
        )
    }

    /// URL below the Jenkins root. Folder jobs (`team/api`) expand to
    /// `/job/team/job/api`.
    fn url(&self, job: Option<&str>, tail: &[&str]) -> Result<Url, JenkinsError> {
        let mut url = self.inner.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| JenkinsError::Config("Jenkins URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            for part in job.into_iter().flat_map(|j| j.split('/')) {
                if !part.is_empty() {
                    segments.push("job").push(part);
                }
            }
            segments.extend(tail);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, JenkinsError> {
        let response = self
            .inner
            .client
            .get(url)
            .basic_auth(&self.inner.user, Some(self.inner.token.expose_secret()))
            .send()
            .await
            .map_err(|e| JenkinsError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(JenkinsError::Response(format!("HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| JenkinsError::Response(e.to_string()))
    }

    /// Queue a parameterized build and return its queue item id.
    ///
    /// Sends `BRANCH`, `DEPLOY_TYPE` and `IMAGE_VERSION` (the branch). Failed
    /// attempts are retried with the configured backoff.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once retries are exhausted.
    #[instrument(skip(self), fields(job = %job, branch = %branch, deploy_type = %deploy_type))]
    pub async fn trigger_build(
        &self,
        job: &str,
        branch: &str,
        deploy_type: DeployType,
    ) -> Result<u64, JenkinsError> {
        let parameters = serde_json::json!({
            "parameter": [
                {"name": "BRANCH", "value": branch},
                {"name": "DEPLOY_TYPE", "value": deploy_type.as_str()},
                {"name": "IMAGE_VERSION", "value": branch},
            ]
        })
        .to_string();
        let url = self.url(Some(job), &["build"])?;

        let backoff = &self.inner.timing.trigger_backoff;
        let mut attempt = 0;
        loop {
            match self.try_trigger(url.clone(), &parameters).await {
                Ok(queue_id) => {
                    info!(queue_id, "Build queued");
                    return Ok(queue_id);
                }
                Err(e) => match backoff.get(attempt) {
                    Some(delay) => {
                        warn!(error = %e, attempt, "Build trigger failed, retrying");
                        tokio::time::sleep(*delay).await;
                        attempt += 1;
                    }
                    None => {
                        error!(error = %e, "Build trigger failed");
                        return Err(e);
                    }
                },
            }
        }
    }

    async fn try_trigger(&self, url: Url, parameters: &str) -> Result<u64, JenkinsError> {
        let response = self
            .inner
            .client
            .post(url)
            .basic_auth(&self.inner.user, Some(self.inner.token.expose_secret()))
            .form(&[("json", parameters)])
            .send()
            .await
            .map_err(|e| JenkinsError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::FOUND {
            return Err(JenkinsError::Trigger(format!(
                "Jenkins returned status code: {}",
                status.as_u16()
            )));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                JenkinsError::Trigger(format!(
                    "Jenkins did not return Location header (status: {})",
                    status.as_u16()
                ))
            })?;

        parse_queue_id(location)
    }

    /// Poll a queue item until it has a build number.
    ///
    /// Transient poll failures are logged and retried until `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `JenkinsError::StartTimeout` past the deadline and
    /// `JenkinsError::Cancelled` if the item is cancelled.
    #[instrument(skip(self))]
    pub async fn wait_for_build_start(
        &self,
        queue_id: u64,
        timeout: Duration,
    ) -> Result<u64, JenkinsError> {
        let url = self.url(None, &["queue", "item", &queue_id.to_string(), "api", "json"])?;
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + MAX_START_WAIT);

        loop {
            match self.get_json::<QueueItem>(url.clone()).await {
                Ok(item) if item.cancelled => return Err(JenkinsError::Cancelled(queue_id)),
                Ok(QueueItem {
                    executable: Some(executable),
                    ..
                }) => {
                    debug!(build_number = executable.number, "Build started");
                    return Ok(executable.number);
                }
                Ok(item) => debug!(why = ?item.why, "Build still queued"),
                Err(e) => warn!(error = %e, "Failed to get queue item"),
            }

            if tokio::time::Instant::now()
                .checked_add(self.inner.timing.queue_poll)
                .is_none_or(|next| next > deadline)
            {
                return Err(JenkinsError::StartTimeout(queue_id));
            }
            tokio::time::sleep(self.inner.timing.queue_poll).await;
        }
    }

    /// Poll a build until Jenkins reports it is no longer building.
    ///
    /// There is no wall-clock limit; monitoring ends when the build does, or
    /// after repeated consecutive poll failures.
    ///
    /// # Errors
    ///
    /// Returns `JenkinsError::Monitor` when polling keeps failing.
    #[instrument(skip(self))]
    pub async fn monitor_build(
        &self,
        job: &str,
        build_number: u64,
    ) -> Result<BuildOutcome, JenkinsError> {
        let url = self.url(Some(job), &[&build_number.to_string(), "api", "json"])?;
        let mut failures = 0;

        loop {
            match self.get_json::<BuildInfo>(url.clone()).await {
                Ok(build) if !build.building => {
                    let outcome = BuildOutcome {
                        result: build.result.unwrap_or_else(|| "UNKNOWN".to_string()),
                        duration: Duration::from_millis(build.duration),
                    };
                    info!(result = %outcome.result, "Build finished");
                    return Ok(outcome);
                }
                Ok(_) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "Failed to poll build status");
                    if failures >= MAX_MONITOR_FAILURES {
                        return Err(JenkinsError::Monitor(e.to_string()));
                    }
                }
            }

            tokio::time::sleep(self.inner.timing.build_poll).await;
        }
    }
}

#[async_trait]
impl Builder for JenkinsClient {
    async fn trigger(
        &self,
        job: &str,
        branch: &str,
        deploy_type: DeployType,
    ) -> Result<u64, JenkinsError> {
        self.trigger_build(job, branch, deploy_type).await
    }

    async fn wait_for_start(&self, queue_id: u64, timeout: Duration) -> Result<u64, JenkinsError> {
        self.wait_for_build_start(queue_id, timeout).await
    }

    async fn monitor_until_done(
        &self,
        job: &str,
        build_number: u64,
    ) -> Result<BuildOutcome, JenkinsError> {
        self.monitor_build(job, build_number).await
    }
}

/// Extract the id from `.../queue/item/{id}/`.
fn parse_queue_id(location: &str) -> Result<u64, JenkinsError> {
    if !location.contains("/queue/item/") {
        return Err(JenkinsError::MissingQueueId(location.to_string()));
    }

    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| JenkinsError::MissingQueueId(location.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn fast_timing() -> PollTiming {
        PollTiming {
            queue_poll: Duration::from_millis(10),
            build_poll: Duration::from_millis(10),
            trigger_backoff: vec![Duration::from_millis(10)],
        }
    }

    fn client(server: &MockServer) -> JenkinsClient {
        JenkinsClient::new(
            &server.base_url(),
            "ci",
            SecretString::from("api-token"),
            fast_timing(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_queue_id() {
        assert_eq!(
            parse_queue_id("http://jenkins/queue/item/123/").unwrap(),
            123
        );
        assert_eq!(parse_queue_id("/queue/item/7").unwrap(), 7);
        assert!(matches!(
            parse_queue_id("http://jenkins/job/api/"),
            Err(JenkinsError::MissingQueueId(_))
        ));
        assert!(parse_queue_id("http://jenkins/queue/item/abc/").is_err());
    }

    #[test]
    fn test_folder_job_url() {
        let server = MockServer::start();
        let url = client(&server)
            .url(Some("team/api-prod"), &["build"])
            .unwrap();
        assert!(url.path().ends_with("/job/team/job/api-prod/build"));
    }

    #[tokio::test]
    async fn test_trigger_build() {
        let server = MockServer::start();
        let trigger = server.mock(|when, then| {
            when.method(POST)
                .path("/job/api-prod/build")
                .header_exists("authorization")
                .body_includes("json=")
                .body_includes("DEPLOY_TYPE");
            then.status(201)
                .header("Location", format!("{}/queue/item/42/", server.base_url()));
        });

        let queue_id = client(&server)
            .trigger_build("api-prod", "master", DeployType::Gray)
            .await
            .unwrap();

        assert_eq!(queue_id, 42);
        trigger.assert();
    }

    #[tokio::test]
    async fn test_trigger_build_retries_then_fails() {
        let server = MockServer::start();
        let trigger = server.mock(|when, then| {
            when.method(POST).path("/job/api-prod/build");
            then.status(500);
        });

        let result = client(&server)
            .trigger_build("api-prod", "master", DeployType::Deploy)
            .await;

        assert!(matches!(result, Err(JenkinsError::Trigger(_))));
        trigger.assert_calls(2);
    }

    #[tokio::test]
    async fn test_wait_for_build_start() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/queue/item/42/api/json");
            then.status(200)
                .json_body(json!({"cancelled": false, "executable": {"number": 17}}));
        });

        let number = client(&server)
            .wait_for_build_start(42, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(number, 17);
    }

    #[tokio::test]
    async fn test_wait_for_build_start_with_unbounded_timeout() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/queue/item/43/api/json");
            then.status(200)
                .json_body(json!({"cancelled": false, "executable": {"number": 18}}));
        });

        let number = client(&server)
            .wait_for_build_start(43, Duration::MAX)
            .await
            .unwrap();

        assert_eq!(number, 18);
    }

    #[tokio::test]
    async fn test_wait_for_build_start_timeout_and_cancel() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/queue/item/1/api/json");
            then.status(200)
                .json_body(json!({"why": "Waiting for next available executor"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/queue/item/2/api/json");
            then.status(200).json_body(json!({"cancelled": true}));
        });

        let client = client(&server);
        assert!(matches!(
            client
                .wait_for_build_start(1, Duration::from_millis(50))
                .await,
            Err(JenkinsError::StartTimeout(1))
        ));
        assert!(matches!(
            client.wait_for_build_start(2, Duration::from_secs(1)).await,
            Err(JenkinsError::Cancelled(2))
        ));
    }

    #[tokio::test]
    async fn test_monitor_build() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/job/api-prod/17/api/json");
            then.status(200).json_body(json!({
                "building": false,
                "result": "SUCCESS",
                "duration": 65_000
            }));
        });

        let outcome = client(&server).monitor_build("api-prod", 17).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.duration, Duration::from_secs(65));
    }

    #[tokio::test]
    async fn test_monitor_build_gives_up() {
        let server = MockServer::start();
        let status = server.mock(|when, then| {
            when.method(GET).path("/job/api-prod/17/api/json");
            then.status(404);
        });

        let result = client(&server).monitor_build("api-prod", 17).await;

        assert!(matches!(result, Err(JenkinsError::Monitor(_))));
        status.assert_calls(MAX_MONITOR_FAILURES as usize);
    }
}
