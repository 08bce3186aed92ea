//! 🔌 Backends — where the real I/O happens.
//!
//! 🚰 An object store does exactly two things for us: it pages through keys, and it
//! hands over an object's bytes. Everything else (credentials, regions, retries, the
//! eternal mystery of IAM) lives behind this trait where the rest of the crate can't see it.
//!
//! 🧠 Knowledge graph:
//! - `ObjectStore`: the capability trait. `list_page` + `get_object`. That's the contract.
//! - `S3ObjectStore`: aws-sdk-s3 over the wire. Config co-located in `s3.rs`.
//! - `InMemoryObjectStore`: a bucket in a BTreeMap, for tests and local dev. Can be told
//!   to fail on purpose, and keeps count of how many bodies are open.
//!
//! 🦆 The duck has no AWS credentials. The duck has never needed them.

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

pub mod in_mem;
pub mod s3;

pub use in_mem::InMemoryObjectStore;
pub use s3::{S3ClientConfig, S3ObjectStore};

/// 🧠 The boxed async reader an object body arrives as. We erase the concrete type
/// because every store has its own opinion of what a byte stream is.
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

/// 📄 One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys on this page, in listing order.
    pub keys: Vec<String>,
    /// `None` means the listing is exhausted.
    pub next_continuation_token: Option<String>,
}

/// 🪣 An object that has been fetched and is ready to be read.
pub struct FetchedObject {
    pub body: ObjectBody,
    /// What the store claims the content is. Advisory only. Stores lie.
    pub content_type: Option<String>,
}

impl std::fmt::Debug for FetchedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedObject")
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// 🚰 The object-store capability.
///
/// # Contract
/// - `list_page` returns one page of keys under `prefix` plus a continuation token.
///   Pass the token back in to get the next page. No token, no more pages.
/// - `get_object` returns the object's byte stream. Dropping the body releases it.
#[async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    /// 📡 Fetch one page of keys.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<String>,
    ) -> Result<ListPage>;

    /// 📦 Open an object's byte stream.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<FetchedObject>;
}
