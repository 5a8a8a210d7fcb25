use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use url::Url;

use job_location_core::{
    types::decode_job, BusinessEntry, JobEntry, JobLocationPatch, JobRecord,
};

use crate::retry::RetryPolicy;
use crate::store::{Page, PageRequest, RecordStore};
use crate::RecordsError;

/// HTTP client for the job/business persistence API.
#[derive(Clone)]
pub struct RecordsClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    retry: RetryPolicy,
}

impl RecordsClient {
    /// Creates a client rooted at `base_url` (which should end with `/`).
    pub fn new(base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            token: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Sends `Authorization: Bearer <token>` on every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_page<T>(
        &self,
        collection: &str,
        page: PageRequest<'_>,
    ) -> Result<Page<T>, RecordsError>
    where
        T: DeserializeOwned,
    {
        let mut url = self.base_url.join(collection)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &page.limit.to_string());
            if let Some(cursor) = page.cursor {
                query.append_pair("cursor", cursor);
            }
        }

        let response = self.request(Method::GET, url).send().await?;
        parse_json::<ListResponse<T>>(response).await.map(Page::from)
    }

    async fn fetch_job(&self, id: &str) -> Result<Option<JobRecord>, RecordsError> {
        let url = self.job_url(id)?;
        let response = self.request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value: Value = parse_json(response).await?;
        decode_job(value)
            .map(Some)
            .map_err(|err| RecordsError::Decode(err.to_string()))
    }

    async fn send_patch(&self, id: &str, patch: &JobLocationPatch) -> Result<(), RecordsError> {
        let url = self.job_url(id)?;
        let response = self.request(Method::PATCH, url).json(patch).send().await?;
        ensure_success(response).await
    }

    fn job_url(&self, id: &str) -> Result<Url, RecordsError> {
        let mut url = self.base_url.join("jobs/")?;
        url.path_segments_mut()
            .map_err(|_| RecordsError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl RecordStore for RecordsClient {
    async fn list_businesses(
        &self,
        page: PageRequest<'_>,
    ) -> Result<Page<BusinessEntry>, RecordsError> {
        let raw: Page<Value> = self
            .retry
            .run("list_businesses", move || self.fetch_page("businesses", page))
            .await?;
        Ok(raw.map(BusinessEntry::from_value))
    }

    async fn list_jobs(&self, page: PageRequest<'_>) -> Result<Page<JobEntry>, RecordsError> {
        let raw: Page<Value> = self
            .retry
            .run("list_jobs", move || self.fetch_page("jobs", page))
            .await?;
        Ok(raw.map(JobEntry::from_value))
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, RecordsError> {
        self.retry.run("get_job", move || self.fetch_job(id)).await
    }

    async fn patch_job(&self, id: &str, patch: &JobLocationPatch) -> Result<(), RecordsError> {
        self.retry
            .run("patch_job", move || self.send_patch(id, patch))
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    data: Vec<T>,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl<T> From<ListResponse<T>> for Page<T> {
    fn from(value: ListResponse<T>) -> Self {
        Self {
            data: value.data,
            cursor: value.next_cursor.filter(|cursor| !cursor.is_empty()),
        }
    }
}

async fn ensure_success(response: Response) -> Result<(), RecordsError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(RecordsError::Status { status, body });
    }
    Ok(())
}

async fn parse_json<T>(response: Response) -> Result<T, RecordsError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(RecordsError::Status { status, body });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| RecordsError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use httpmock::Method as MockMethod;
    use job_location_core::LocationRecord;
    use serde_json::json;
    use std::time::Duration;

    fn client(server: &MockServer) -> RecordsClient {
        RecordsClient::new(
            Url::parse(&server.url("/api/")).expect("url"),
            Client::builder().build().expect("client"),
        )
        .with_token("secret-token")
        .with_retry(RetryPolicy::exponential(2, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn list_businesses_parses_page_and_cursor() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/businesses")
                    .query_param("limit", "50")
                    .header("Authorization", "Bearer secret-token");
                then.status(200).json_body(json!({
                    "data": [
                        {
                            "_id": "biz-1",
                            "name": "Grand Hotel",
                            "location": { "city": "Kota", "country": "India" }
                        },
                        { "id": "biz-2" }
                    ],
                    "nextCursor": "c-2"
                }));
            })
            .await;

        let page = client(&server)
            .list_businesses(PageRequest::first(50))
            .await
            .expect("list businesses");
        mock.assert_async().await;

        assert_eq!(page.data.len(), 2);
        assert_eq!(page.cursor.as_deref(), Some("c-2"));
        let BusinessEntry::Record(first) = &page.data[0] else {
            panic!("expected a record, got {:?}", page.data[0]);
        };
        assert_eq!(first.id, "biz-1");
        assert!(first.location_source().is_some());
        assert!(matches!(
            &page.data[1],
            BusinessEntry::Record(second) if second.location.is_none()
        ));
    }

    #[tokio::test]
    async fn list_businesses_keeps_malformed_entries_alongside_valid_ones() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/businesses");
                then.status(200).json_body(json!({
                    "data": [
                        { "_id": "biz-1", "location": { "city": "Kota" } },
                        { "_id": "biz-2", "location": "unparseable" },
                        { "name": "no identifier" }
                    ]
                }));
            })
            .await;

        let page = client(&server)
            .list_businesses(PageRequest::first(10))
            .await
            .expect("page decodes despite bad entries");

        assert!(matches!(&page.data[0], BusinessEntry::Record(business) if business.id == "biz-1"));
        assert!(matches!(
            &page.data[1],
            BusinessEntry::Malformed { id: Some(id), .. } if id == "biz-2"
        ));
        assert!(matches!(&page.data[2], BusinessEntry::Malformed { id: None, .. }));
    }

    #[tokio::test]
    async fn list_jobs_sends_cursor_and_keeps_malformed_entries() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/jobs")
                    .query_param("limit", "2")
                    .query_param("cursor", "c-1");
                then.status(200).json_body(json!({
                    "data": [
                        { "_id": "job-1", "business": "biz-1" },
                        { "_id": "job-2", "location": 17 }
                    ],
                    "nextCursor": null
                }));
            })
            .await;

        let page = client(&server)
            .list_jobs(PageRequest::after("c-1", 2))
            .await
            .expect("list jobs");

        assert_eq!(page.cursor, None);
        assert!(matches!(&page.data[0], JobEntry::Record(job) if job.id == "job-1"));
        assert!(matches!(
            &page.data[1],
            JobEntry::Malformed { id: Some(id), .. } if id == "job-2"
        ));
    }

    #[tokio::test]
    async fn patch_job_sends_only_location_fields() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(MockMethod::PATCH)
                    .path("/api/jobs/job-1")
                    .header("Authorization", "Bearer secret-token")
                    .json_body(json!({
                        "location": { "city": "Kota" },
                        "businessAddress": "Kota"
                    }));
                then.status(204);
            })
            .await;

        let patch = JobLocationPatch {
            location: Some(LocationRecord {
                city: Some("Kota".into()),
                ..LocationRecord::default()
            }),
            business_address: Some("Kota".into()),
        };
        client(&server)
            .patch_job("job-1", &patch)
            .await
            .expect("patch job");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_job_returns_none_for_missing_job() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/jobs/gone");
                then.status(404).body("not found");
            })
            .await;

        let job = client(&server).get_job("gone").await.expect("get job");
        assert_eq!(job, None);
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surfaced() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/businesses");
                then.status(503).body("maintenance");
            })
            .await;

        let err = client(&server)
            .list_businesses(PageRequest::first(10))
            .await
            .expect_err("should fail");
        mock.assert_hits_async(3).await;
        match err {
            RecordsError::Status { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejected_patch_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(MockMethod::PATCH).path("/api/jobs/job-9");
                then.status(422).body("location is read-only");
            })
            .await;

        let err = client(&server)
            .patch_job("job-9", &JobLocationPatch::default())
            .await
            .expect_err("should fail");
        mock.assert_hits_async(1).await;
        assert!(matches!(err, RecordsError::Status { status, .. } if status == StatusCode::UNPROCESSABLE_ENTITY));
    }
}
