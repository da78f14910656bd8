//! Remote call client port.
//!
//! The client owns HTTP, authentication and response parsing. Retry with
//! backoff is layered on top by the mission adapters' scheduled client so
//! every attempt passes through the request scheduler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::domain::errors::RemoteError;

/// Verbs used against the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
        };
        f.write_str(s)
    }
}

/// A remote endpoint relative to the client's base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub method: HttpMethod,
    /// Path relative to the configured base URL.
    pub path: String,
}

impl Endpoint {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
        }
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Patch,
            path: path.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Client for the remote fleet service.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Perform one remote call and return the decoded JSON body.
    async fn call(&self, endpoint: &Endpoint, payload: Option<Value>) -> Result<Value, RemoteError>;
}
