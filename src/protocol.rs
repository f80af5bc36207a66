//! JSON-lines request/response protocol
//!
//! Each request is one JSON object per line, tagged by its `type` field:
//!
//! ```json
//! {"type":"search","query":"ownership rules","limit":5,"pathPrefix":"notes/"}
//! {"type":"reindexAll"}
//! {"type":"clearIndex"}
//! {"type":"status"}
//! ```
//!
//! Every request gets exactly one response line. Failures are reported as
//! `{"type":"error","code":...,"message":...,"results":[]}`.

use crate::EngineError;
use crate::engine::{Engine, EngineStatus, SearchResult};
use crate::types::IndexReport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Error code for lines that are not a valid request.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    Search {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_prefix: Option<String>,
    },
    ReindexAll,
    ClearIndex,
    Status,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    SearchResults {
        results: Vec<SearchResult>,
    },
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<IndexReport>,
    },
    Status(EngineStatus),
    Error {
        code: String,
        message: String,
        retryable: bool,
        /// Always empty; lets clients read `results` unconditionally
        results: Vec<SearchResult>,
    },
}

impl Response {
    pub fn error(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
            retryable,
            results: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<EngineError> for Response {
    fn from(error: EngineError) -> Self {
        Self::error(error.status_code(), error.to_string(), error.is_retryable())
    }
}

impl Engine {
    /// Answer one protocol request.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Search {
                query,
                limit,
                path_prefix,
            } => match self.search(&query, limit, path_prefix.as_deref()).await {
                Ok(results) => Response::SearchResults { results },
                Err(e) => {
                    warn!(error = %e, "search failed");
                    e.into()
                }
            },
            Request::ReindexAll => Response::Ack {
                report: Some(self.reindex_all().await),
            },
            Request::ClearIndex => match self.clear_index() {
                Ok(()) => Response::Ack { report: None },
                Err(e) => e.into(),
            },
            Request::Status => Response::Status(self.status()),
        }
    }
}

/// Serves the protocol for an engine that may still be starting up.
///
/// Requests that arrive before [`attach`](Self::attach) are answered with
/// `INDEX_UNAVAILABLE`.
#[derive(Debug, Default)]
pub struct ProtocolServer {
    engine: OnceCell<Arc<Engine>>,
}

impl ProtocolServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server with an engine that is already open.
    pub fn with_engine(engine: Arc<Engine>) -> Self {
        Self {
            engine: OnceCell::new_with(Some(engine)),
        }
    }

    /// Make the engine available. Returns false if one was already attached.
    pub fn attach(&self, engine: Arc<Engine>) -> bool {
        self.engine.set(engine).is_ok()
    }

    pub fn engine(&self) -> Option<&Arc<Engine>> {
        self.engine.get()
    }

    /// Answer one raw request line.
    pub async fn handle_line(&self, line: &str) -> Response {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => return Response::error(INVALID_REQUEST, e.to_string(), false),
        };
        debug!(?request, "protocol request");

        match self.engine.get() {
            Some(engine) => engine.handle(request).await,
            None => EngineError::IndexUnavailable.into(),
        }
    }

    /// Read requests line by line until EOF, writing one response per line.
    ///
    /// Blank lines are skipped.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = self.handle_line(line).await;
            let mut encoded = serde_json::to_vec(&response).map_err(std::io::Error::other)?;
            encoded.push(b'\n');
            writer.write_all(&encoded).await?;
            writer.flush().await?;
        }

        Ok(())
    }
}
