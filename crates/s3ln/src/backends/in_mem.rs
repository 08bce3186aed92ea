//! # Previously, on s3ln...
//!
//! 🎬 The bucket was trapped in us-east-1, behind a credential chain nobody could
//! remember. Someone needed a bucket that lived entirely in RAM, gone the moment you
//! blink. That someone was this module.
//!
//! `InMemoryObjectStore` keeps objects in a `BTreeMap`, so listings come back in key
//! order, the same way S3 does it. It pages with a configurable page size, it can be
//! told to fail listing, specific fetches, or a body halfway through reading it, and it
//! counts open bodies so tests can check that every exit path lets go of its stream.
//!
//! ⚠️ This is for tests and local development. If you're deploying this to prod,
//! please also deploy a therapist.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};

use crate::backends::{FetchedObject, ListPage, ObjectBody, ObjectStore};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Arc<Vec<u8>>,
    content_type: Option<String>,
}

/// 📊 Shared open-body bookkeeping. Every body handed out bumps `open`; dropping it
/// brings it back down. `peak` remembers the worst moment.
#[derive(Debug, Default)]
struct BodyGauge {
    open: AtomicUsize,
    peak: AtomicUsize,
    opened_total: AtomicUsize,
}

/// 📦 A bucket (or several) that lives in RAM.
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<(String, String), StoredObject>>>,
    failing_keys: Arc<RwLock<HashSet<String>>>,
    // 🔌 key → bytes served before the connection "drops"
    failing_bodies: Arc<RwLock<HashMap<String, usize>>>,
    fail_listing: bool,
    page_size: usize,
    gauge: Arc<BodyGauge>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// 🚀 An empty store with S3's default page size.
    pub fn new() -> Self {
        Self {
            objects: Arc::default(),
            failing_keys: Arc::default(),
            failing_bodies: Arc::default(),
            fail_listing: false,
            page_size: DEFAULT_PAGE_SIZE,
            gauge: Arc::default(),
        }
    }

    /// 📄 Smaller pages, so pagination actually gets exercised.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// 💀 Every listing call fails from now on.
    pub fn with_failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// 📥 Put an object. Overwrites, like the real thing.
    pub fn insert(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        self.insert_with_content_type(bucket, key, bytes, None);
    }

    pub fn insert_with_content_type(
        &self,
        bucket: &str,
        key: &str,
        bytes: impl Into<Vec<u8>>,
        content_type: Option<&str>,
    ) {
        let the_object = StoredObject {
            bytes: Arc::new(bytes.into()),
            content_type: content_type.map(str::to_string),
        };
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((bucket.to_string(), key.to_string()), the_object);
    }

    /// 💀 Fetching this key fails from now on, in any bucket.
    pub fn fail_fetch(&self, key: &str) {
        self.failing_keys
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string());
    }

    /// 🔌 Reading this key's body serves `n_bytes`, then fails like a reset connection.
    pub fn fail_body_after(&self, key: &str, n_bytes: usize) {
        self.failing_bodies
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), n_bytes);
    }

    /// 📊 Bodies handed out and not yet dropped.
    pub fn open_bodies(&self) -> usize {
        self.gauge.open.load(Ordering::SeqCst)
    }

    /// 📈 The most bodies that were ever open at once.
    pub fn peak_open_bodies(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    /// 🔢 How many bodies were handed out in total.
    pub fn bodies_opened(&self) -> usize {
        self.gauge.opened_total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        if self.fail_listing {
            bail!("cannot retrieve objects");
        }

        let the_prefix = prefix.unwrap_or_default();
        let the_objects = self
            .objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // 🧠 the continuation token is simply the last key of the previous page
        let mut the_keys: Vec<String> = the_objects
            .keys()
            .filter(|(b, key)| b == bucket && key.starts_with(the_prefix))
            .filter(|(_, key)| continuation_token.as_deref().is_none_or(|after| key.as_str() > after))
            .map(|(_, key)| key.clone())
            .take(self.page_size + 1)
            .collect();

        let the_next_token = if the_keys.len() > self.page_size {
            the_keys.truncate(self.page_size);
            the_keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage {
            keys: the_keys,
            next_continuation_token: the_next_token,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        let the_key_is_cursed = self
            .failing_keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(key);
        if the_key_is_cursed {
            bail!("injected fetch failure for {key}");
        }

        let the_object = self
            .objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: s3://{bucket}/{key}"))?;

        let the_cutoff = self
            .failing_bodies
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .copied();
        let mut the_bytes = the_object.bytes.as_ref().clone();
        if let Some(n_bytes) = the_cutoff {
            the_bytes.truncate(n_bytes);
        }

        let the_body: ObjectBody = Box::new(TrackedBody::new(
            Cursor::new(the_bytes),
            the_cutoff.is_some(),
            self.gauge.clone(),
        ));

        Ok(FetchedObject {
            body: the_body,
            content_type: the_object.content_type,
        })
    }
}

/// 🔒 A body that reports in when it's opened and when it's dropped.
struct TrackedBody {
    inner: Cursor<Vec<u8>>,
    /// Hitting the end of `inner` is an error instead of EOF.
    resets_at_end: bool,
    gauge: Arc<BodyGauge>,
}

impl TrackedBody {
    fn new(inner: Cursor<Vec<u8>>, resets_at_end: bool, gauge: Arc<BodyGauge>) -> Self {
        let the_open_now = gauge.open.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(the_open_now, Ordering::SeqCst);
        gauge.opened_total.fetch_add(1, Ordering::SeqCst);
        Self {
            inner,
            resets_at_end,
            gauge,
        }
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.gauge.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for TrackedBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let the_filled_before = buf.filled().len();
        let the_poll = Pin::new(&mut this.inner).poll_read(cx, buf);

        let the_wire_went_quiet = matches!(the_poll, Poll::Ready(Ok(())))
            && buf.filled().len() == the_filled_before
            && buf.remaining() > 0;
        if this.resets_at_end && the_wire_went_quiet {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        the_poll
    }
}
