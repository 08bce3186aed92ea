//! 📡 ObjectLister — pages through a bucket and keeps the keys that match a pattern.
//!
//! The listing is narrowed with the pattern's literal prefix, then every key that comes
//! back is matched locally. All-or-nothing: one bad page and the whole listing fails,
//! no partial results.

use tracing::{debug, trace};

use crate::backends::ObjectStore;
use crate::error::IngestError;
use crate::pattern;

/// 🚀 List every key in `bucket` that matches `pattern`, in listing order.
///
/// Duplicates, if the store ever produced them, are kept as-is.
pub async fn list_files<S>(store: &S, bucket: &str, pattern: &str) -> Result<Vec<String>, IngestError>
where
    S: ObjectStore + ?Sized,
{
    let the_prefix = pattern::dir_prefix(pattern);
    let the_listing_prefix = (!the_prefix.is_empty()).then_some(the_prefix.as_str());

    debug!(
        "📡 listing files on bucket: {:?} with prefix: {:?} that follows pattern: {:?}",
        bucket, the_prefix, pattern
    );

    let mut the_matches = Vec::new();
    let mut the_token: Option<String> = None;

    loop {
        let the_page = store
            .list_page(bucket, the_listing_prefix, the_token.take())
            .await
            .map_err(|source| IngestError::Listing {
                bucket: bucket.to_string(),
                pattern: pattern.to_string(),
                source: source.into(),
            })?;

        for key in the_page.keys {
            let the_verdict = pattern::matches(pattern, &key);
            trace!(
                "🔍 object key: {:?} matches with pattern: {:?} result: {}",
                key, pattern, the_verdict
            );
            if the_verdict {
                the_matches.push(key);
            }
        }

        match the_page.next_continuation_token {
            Some(token) => the_token = Some(token),
            None => break,
        }
    }

    debug!(
        "✅ found: {} file(s) on bucket: {:?} that follows pattern: {:?}",
        the_matches.len(),
        bucket,
        pattern
    );
    Ok(the_matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryObjectStore;

    fn the_usual_bucket() -> InMemoryObjectStore {
        let the_store = InMemoryObjectStore::new().with_page_size(1);
        for key in ["a.log", "b.log", "c.txt"] {
            the_store.insert("bucket", key, "x");
        }
        the_store
    }

    #[tokio::test]
    async fn the_one_where_globs_pick_the_logs() {
        let the_store = the_usual_bucket();
        let the_files = list_files(&the_store, "bucket", "*.log").await.unwrap();
        assert_eq!(the_files, vec!["a.log", "b.log"]);
    }

    #[tokio::test]
    async fn the_one_where_a_literal_finds_exactly_itself() {
        let the_store = the_usual_bucket();
        let the_files = list_files(&the_store, "bucket", "c.txt").await.unwrap();
        assert_eq!(the_files, vec!["c.txt"]);
    }

    #[tokio::test]
    async fn the_one_where_listing_twice_gives_the_same_answer() {
        let the_store = the_usual_bucket();
        let the_first = list_files(&the_store, "bucket", "*.log").await.unwrap();
        let the_second = list_files(&the_store, "bucket", "*.log").await.unwrap();
        assert_eq!(the_first, the_second);
    }

    #[tokio::test]
    async fn the_one_where_the_prefix_and_double_star_team_up() {
        let the_store = InMemoryObjectStore::new().with_page_size(2);
        for key in [
            "logs/2024/01/app.gz",
            "logs/2024/02/app.gz",
            "logs/2024/02/app.txt",
            "logs/app.gz",
            "other/2024/app.gz",
        ] {
            the_store.insert("bucket", key, "x");
        }

        let the_files = list_files(&the_store, "bucket", "logs/**/*.gz").await.unwrap();
        assert_eq!(
            the_files,
            vec!["logs/2024/01/app.gz", "logs/2024/02/app.gz", "logs/app.gz"]
        );
    }

    #[tokio::test]
    async fn the_one_where_nothing_matches_and_that_is_fine() {
        let the_store = InMemoryObjectStore::new();
        let the_files = list_files(&the_store, "bucket", "*.log").await.unwrap();
        assert!(the_files.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_a_listing_failure_takes_everything_down() {
        let the_store = InMemoryObjectStore::new().with_failing_listing();
        let the_error = list_files(&the_store, "bucket", "*.log").await.unwrap_err();

        assert!(matches!(the_error, IngestError::Listing { .. }));
        let the_cause = std::error::Error::source(&the_error).map(|cause| cause.to_string());
        assert_eq!(the_cause.as_deref(), Some("cannot retrieve objects"));
    }
}
