use super::{HttpRequest, HttpResponse, Transport};
use async_trait::async_trait;

/// Production transport over `reqwest` with rustls.
pub struct ReqwestTransport {
    pub client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("paddock/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, req: &HttpRequest) -> anyhow::Result<HttpResponse> {
        let mut builder = self
            .client
            .get(&req.url)
            .query(&req.query)
            .timeout(req.timeout)
            .header("Accept", "application/json, text/csv;q=0.9, text/plain;q=0.8");
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        // A body cut off mid-stream is a network error, not an empty payload.
        let body = resp.text().await?;
        Ok(HttpResponse { status, body })
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}
