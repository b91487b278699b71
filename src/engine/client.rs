use crate::error::{JobError, JobResult};
use crate::model::{ClientConfig, JobRequest};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

/// Raw response body of a job stream.
pub type ByteStream = BoxStream<'static, JobResult<Bytes>>;

/// Opens the job stream. The HTTP implementation is [`HttpTransport`]; tests
/// substitute scripted streams.
pub trait JobTransport: Send + Sync + 'static {
    fn open<'a>(&'a self, request: &'a JobRequest) -> BoxFuture<'a, JobResult<ByteStream>>;
}

#[derive(Clone)]
pub struct HttpTransport {
    pub http: reqwest::Client,
    pub url: reqwest::Url,
}

impl HttpTransport {
    pub fn new(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(&cfg.stream_url())?;
        // No overall timeout: the server decides when the stream ends.
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(cfg.connect_timeout)
            .build()?;
        Ok(Self { http, url })
    }
}

impl JobTransport for HttpTransport {
    fn open<'a>(&'a self, request: &'a JobRequest) -> BoxFuture<'a, JobResult<ByteStream>> {
        async move {
            debug!(url = %self.url, main = %request.main, "opening job stream");
            let resp = self
                .http
                .post(self.url.clone())
                .header(CONTENT_TYPE, "application/json")
                .header(ACCEPT, "text/event-stream")
                .json(request)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(JobError::Transport(format!("HTTP error! status: {status}")));
            }

            let body = resp
                .bytes_stream()
                .map(|chunk| chunk.map_err(JobError::from))
                .boxed();
            Ok(body)
        }
        .boxed()
    }
}
