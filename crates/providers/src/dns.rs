use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::{
    check_status, parse_json, DnsProvider, DnsRecordType, DnsTarget, ProviderError, RecordRef,
};

/// Automatic TTL.
const RECORD_TTL: u32 = 1;

/// Client for a Cloudflare v4 style DNS API scoped to a single zone.
#[derive(Clone)]
pub struct DnsProviderClient {
    http: Client,
    base_url: Url,
    api_token: String,
    zone_id: String,
}

impl DnsProviderClient {
    pub fn new(
        api_token: impl Into<String>,
        zone_id: impl Into<String>,
        base_url: Url,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            api_token: api_token.into(),
            zone_id: zone_id.into(),
        }
    }

    async fn list_records(&self, hostname: &str) -> Result<Vec<RecordRef>, ProviderError> {
        let mut url = self.records_url()?;
        url.query_pairs_mut().append_pair("name", hostname);

        let response = self.authorized_request(Method::GET, url).send().await?;
        let records = parse_json::<Envelope<Vec<ApiRecord>>>(response)
            .await?
            .into_result()?;

        Ok(records.into_iter().filter_map(ApiRecord::into_ref).collect())
    }

    async fn write_record(
        &self,
        method: Method,
        url: Url,
        hostname: &str,
        target: &DnsTarget,
    ) -> Result<RecordRef, ProviderError> {
        let body = RecordBody {
            record_type: target.record_type.as_str(),
            name: hostname,
            content: &target.content,
            ttl: RECORD_TTL,
            proxied: false,
        };
        let response = self
            .authorized_request(method, url)
            .json(&body)
            .send()
            .await?;

        parse_json::<Envelope<ApiRecord>>(response)
            .await?
            .into_result()?
            .into_ref()
            .ok_or_else(|| ProviderError::Decode("record type not A or CNAME".into()))
    }

    fn records_url(&self) -> Result<Url, ProviderError> {
        Ok(self
            .base_url
            .join(&format!("zones/{}/dns_records", self.zone_id))?)
    }

    fn record_url(&self, record_id: &str) -> Result<Url, ProviderError> {
        Ok(self
            .base_url
            .join(&format!("zones/{}/dns_records/{record_id}", self.zone_id))?)
    }

    fn authorized_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.api_token))
    }
}

#[async_trait]
impl DnsProvider for DnsProviderClient {
    async fn verify_credential(&self) -> Result<bool, ProviderError> {
        let url = self.base_url.join("user/tokens/verify")?;
        let response = self.authorized_request(Method::GET, url).send().await?;

        match parse_json::<Envelope<TokenStatus>>(response).await {
            Ok(envelope) => Ok(envelope.into_result()?.status == "active"),
            Err(ProviderError::Auth { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn ensure_record(
        &self,
        hostname: &str,
        target: &DnsTarget,
    ) -> Result<RecordRef, ProviderError> {
        let existing = self.list_records(hostname).await?;

        if let Some(record) = existing.iter().find(|record| target.matches(record)) {
            return Ok(record.clone());
        }

        if let Some(stale) = existing.first() {
            let url = self.record_url(&stale.id)?;
            let record = self.write_record(Method::PATCH, url, hostname, target).await?;
            info!(
                stage = "dns",
                hostname,
                record_id = %record.id,
                previous = %stale.content,
                "corrected dns record"
            );
            return Ok(record);
        }

        let url = self.records_url()?;
        let record = self.write_record(Method::POST, url, hostname, target).await?;
        info!(
            stage = "dns",
            hostname,
            record_id = %record.id,
            record_type = target.record_type.as_str(),
            "created dns record"
        );
        Ok(record)
    }

    async fn find_records(&self, hostname: &str) -> Result<Vec<RecordRef>, ProviderError> {
        self.list_records(hostname).await
    }

    async fn delete_record(&self, record_id: &str) -> Result<(), ProviderError> {
        let url = self.record_url(record_id)?;
        let response = self.authorized_request(Method::DELETE, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, ProviderError> {
        if !self.success {
            let messages: Vec<String> = self
                .errors
                .into_iter()
                .map(|err| format!("{}: {}", err.code, err.message))
                .collect();
            return Err(ProviderError::Decode(format!(
                "provider reported failure: {}",
                messages.join(", ")
            )));
        }
        self.result
            .ok_or_else(|| ProviderError::Decode("response carried no result".into()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct TokenStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ApiRecord {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    content: String,
}

impl ApiRecord {
    fn into_ref(self) -> Option<RecordRef> {
        Some(RecordRef {
            record_type: DnsRecordType::parse(&self.record_type)?,
            id: self.id,
            name: self.name,
            content: self.content,
        })
    }
}

#[derive(Debug, Serialize)]
struct RecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorClass;
    use httpmock::prelude::*;
    use httpmock::Method;
    use serde_json::json;
    use std::time::Duration;

    fn client(server: &MockServer) -> DnsProviderClient {
        DnsProviderClient::new(
            "dns-token",
            "zone-1",
            Url::parse(&server.url("/client/v4/")).expect("url"),
            Client::builder().build().expect("client"),
        )
    }

    fn record(id: &str, record_type: &str, content: &str) -> serde_json::Value {
        json!({
            "id": id,
            "type": record_type,
            "name": "blog.example.com",
            "content": content,
            "ttl": 1,
            "proxied": false
        })
    }

    #[tokio::test]
    async fn ensure_record_creates_missing_record() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        let lookup = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/client/v4/zones/zone-1/dns_records")
                    .query_param("name", "blog.example.com")
                    .header("Authorization", "Bearer dns-token");
                then.status(200)
                    .json_body(json!({ "success": true, "errors": [], "result": [] }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/client/v4/zones/zone-1/dns_records")
                    .json_body(json!({
                        "type": "CNAME",
                        "name": "blog.example.com",
                        "content": "cname.vercel-dns.com",
                        "ttl": 1,
                        "proxied": false
                    }));
                then.status(200).json_body(json!({
                    "success": true,
                    "errors": [],
                    "result": record("rec-1", "CNAME", "cname.vercel-dns.com")
                }));
            })
            .await;

        let record = client
            .ensure_record("blog.example.com", &DnsTarget::cname("cname.vercel-dns.com"))
            .await
            .expect("ensure record");
        lookup.assert_async().await;
        create.assert_async().await;

        assert_eq!(record.id, "rec-1");
        assert_eq!(record.record_type, DnsRecordType::Cname);
    }

    #[tokio::test]
    async fn ensure_record_reuses_matching_record() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/client/v4/zones/zone-1/dns_records");
                then.status(200).json_body(json!({
                    "success": true,
                    "errors": [],
                    "result": [record("rec-1", "CNAME", "cname.vercel-dns.com")]
                }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/client/v4/zones/zone-1/dns_records");
                then.status(200);
            })
            .await;

        let record = client
            .ensure_record("blog.example.com", &DnsTarget::cname("cname.vercel-dns.com"))
            .await
            .expect("ensure record");
        create.assert_hits_async(0).await;
        assert_eq!(record.id, "rec-1");
    }

    #[tokio::test]
    async fn leftover_record_does_not_hide_ours() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/client/v4/zones/zone-1/dns_records");
                then.status(200).json_body(json!({
                    "success": true,
                    "errors": [],
                    "result": [
                        record("rec-old", "A", "1.2.3.4"),
                        record("rec-ours", "A", "76.76.21.21")
                    ]
                }));
            })
            .await;
        let writes = server
            .mock_async(|when, then| {
                when.path_contains("/dns_records").method(POST);
                then.status(200);
            })
            .await;

        let target = DnsTarget::a("76.76.21.21");
        let ensured = client
            .ensure_record("blog.example.com", &target)
            .await
            .expect("ensure record");
        assert_eq!(ensured.id, "rec-ours");
        writes.assert_hits_async(0).await;

        let found = client
            .find_records("blog.example.com")
            .await
            .expect("find records");
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|record| target.matches(record)));
    }

    #[tokio::test]
    async fn ensure_record_patches_stale_content() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/client/v4/zones/zone-1/dns_records");
                then.status(200).json_body(json!({
                    "success": true,
                    "errors": [],
                    "result": [record("rec-1", "CNAME", "old.example.net")]
                }));
            })
            .await;
        let patch = server
            .mock_async(|when, then| {
                when.method(Method::PATCH)
                    .path("/client/v4/zones/zone-1/dns_records/rec-1");
                then.status(200).json_body(json!({
                    "success": true,
                    "errors": [],
                    "result": record("rec-1", "CNAME", "cname.vercel-dns.com")
                }));
            })
            .await;

        let record = client
            .ensure_record("blog.example.com", &DnsTarget::cname("cname.vercel-dns.com"))
            .await
            .expect("ensure record");
        patch.assert_async().await;
        assert_eq!(record.content, "cname.vercel-dns.com");
    }

    #[tokio::test]
    async fn verify_credential_reports_inactive_and_rejected_tokens() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        let mut inactive = server
            .mock_async(|when, then| {
                when.method(GET).path("/client/v4/user/tokens/verify");
                then.status(200).json_body(json!({
                    "success": true,
                    "errors": [],
                    "result": { "id": "tok", "status": "disabled" }
                }));
            })
            .await;
        assert!(!client.verify_credential().await.expect("verify"));
        inactive.delete_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/client/v4/user/tokens/verify");
                then.status(401).json_body(json!({
                    "success": false,
                    "errors": [{ "code": 1000, "message": "Invalid API Token" }],
                    "result": null
                }));
            })
            .await;
        assert!(!client.verify_credential().await.expect("verify"));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after_hint() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/client/v4/zones/zone-1/dns_records");
                then.status(429).header("Retry-After", "3").body("slow down");
            })
            .await;

        let err = client
            .find_records("blog.example.com")
            .await
            .expect_err("should error");
        assert_eq!(err.class(), ErrorClass::Transient);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn deleting_missing_record_succeeds() {
        let server = MockServer::start_async().await;
        let client = client(&server);

        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/client/v4/zones/zone-1/dns_records/rec-gone");
                then.status(404).body("not found");
            })
            .await;

        client.delete_record("rec-gone").await.expect("delete");
        delete.assert_async().await;
    }
}
