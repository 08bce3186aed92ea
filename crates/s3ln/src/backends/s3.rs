//! 🪣📡 S3 object store — the aws-sdk-s3 flavored implementation of [`ObjectStore`].
//!
//! COLD OPEN — EXT. DATA CENTER — 3:47 AM
//!
//! The on-call engineer stared at the terminal. "We need every `*.gz` under `logs/2024/`,"
//! they whispered. "Line by line. By morning." The cursor blinked. The S3ObjectStore
//! blinked back, paged through forty thousand keys, and did not complain once.
//!
//! 🧠 Knowledge graph:
//! - `S3ClientConfig`: region, endpoint override, static keys, assume-role knobs, and the
//!   instance-metadata toggle. Co-located with the backend that uses it.
//! - Path-style addressing is always on. S3-compatible servers (MinIO & friends) insist.
//! - Region `minio` is the compatibility mode: the endpoint is used verbatim, and it must exist.
//! - With `ec2_imds_enabled = false` (the default) neither the credential chain nor the
//!   region lookup asks the instance metadata service. Env, profile, web identity and
//!   container creds still work; an unset region comes from env, then profile.
//! - Transport: `ListObjectsV2` pages with continuation tokens, `GetObject` body →
//!   `ByteStream::into_async_read()` → boxed `AsyncRead`.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use aws_config::meta::credentials::CredentialsProviderChain;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::DisplayErrorContext;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::backends::{FetchedObject, ListPage, ObjectBody, ObjectStore};

/// 🧪 The magic region string that flips on S3-compatible-server mode.
const MINIO_REGION: &str = "minio";

/// 🔧 How to reach the bucket and who to be when we get there.
///
/// Every field is optional. An empty config means "whatever the environment says",
/// which is the AWS SDK's favorite answer to every question.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct S3ClientConfig {
    /// 🌎 AWS region. `minio` turns on compatibility mode.
    #[serde(default)]
    pub region: Option<String>,
    /// 🔗 Endpoint override, for LocalStack, MinIO, or the server under someone's desk.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 🔑 Static credentials. Only used when both halves are present.
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// 🎭 Assume-role. Only used when the ARN is present.
    #[serde(default)]
    pub assume_role_arn: Option<String>,
    #[serde(default)]
    pub assume_role_session_name: Option<String>,
    #[serde(default)]
    pub assume_role_external_id: Option<String>,
    #[serde(default)]
    pub assume_role_duration_secs: Option<u64>,
    /// 🖥️ Let the credential chain ask the EC2 instance metadata service.
    #[serde(default)]
    pub ec2_imds_enabled: bool,
}

impl S3ClientConfig {
    fn static_credentials(&self) -> Option<(&str, &str)> {
        match (self.access_key.as_deref(), self.secret_key.as_deref()) {
            (Some(access), Some(secret)) if !access.is_empty() && !secret.is_empty() => {
                Some((access, secret))
            }
            _ => None,
        }
    }

    fn is_minio(&self) -> bool {
        self.region.as_deref() == Some(MINIO_REGION)
    }

    fn region_source(&self) -> RegionSource<'_> {
        match self.region.as_deref().filter(|r| !r.is_empty()) {
            Some(region) => RegionSource::Configured(region),
            None if self.ec2_imds_enabled => RegionSource::SdkDefault,
            None => RegionSource::EnvThenProfile,
        }
    }
}

/// 🌎 Where the region comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionSource<'a> {
    Configured(&'a str),
    /// The SDK's own chain, instance metadata included.
    SdkDefault,
    /// Env vars, then the profile file. Never instance metadata.
    EnvThenProfile,
}

/// 🪣 S3ObjectStore — lists and fetches through aws-sdk-s3.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// 🚀 Build a client from config.
    ///
    /// 💀 Fails if: minio mode without an endpoint. Credential problems don't show up here,
    /// they show up on the first request, because the SDK resolves credentials lazily.
    pub async fn new(config: &S3ClientConfig) -> Result<Self> {
        if config.is_minio() && config.endpoint.as_deref().unwrap_or_default().is_empty() {
            bail!(
                "💀 Region '{MINIO_REGION}' needs an endpoint. We can't guess where your MinIO lives. \
                 Set storage.endpoint to something like http://localhost:9000."
            );
        }

        let the_base_config = load_sdk_config(config).await;

        let mut the_s3_config =
            aws_sdk_s3::config::Builder::from(&the_base_config).force_path_style(true);

        if let Some(role_arn) = config.assume_role_arn.as_deref().filter(|arn| !arn.is_empty()) {
            debug!("🎭 assuming role {}", role_arn);
            let mut the_role = aws_config::sts::AssumeRoleProvider::builder(role_arn);
            if let Some(session_name) = config.assume_role_session_name.as_deref() {
                the_role = the_role.session_name(session_name);
            }
            if let Some(external_id) = config.assume_role_external_id.as_deref() {
                the_role = the_role.external_id(external_id);
            }
            if let Some(duration_secs) = config.assume_role_duration_secs {
                the_role = the_role.session_length(Duration::from_secs(duration_secs));
            }
            let the_provider = the_role.configure(&the_base_config).build().await;
            the_s3_config = the_s3_config.credentials_provider(the_provider);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(the_s3_config.build()),
        })
    }

    /// 🔧 Wrap an already-built client. Handy when the caller has opinions about config.
    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

/// 🔧 Region, endpoint and credential chain, layered the way the config asks.
async fn load_sdk_config(config: &S3ClientConfig) -> SdkConfig {
    let mut the_loader = aws_config::defaults(BehaviorVersion::latest());

    match config.region_source() {
        RegionSource::Configured(region) => {
            if config.is_minio() {
                debug!("🧪 minio compatibility mode: endpoint used verbatim, path-style addressing");
            }
            the_loader = the_loader.region(Region::new(region.to_string()));
        }
        RegionSource::EnvThenProfile => {
            // 🔒 the default region chain also ends at IMDS. Same deal as the credentials below.
            let the_chain = RegionProviderChain::first_try(
                aws_config::environment::EnvironmentVariableRegionProvider::new(),
            )
            .or_else(aws_config::profile::ProfileFileRegionProvider::builder().build());
            the_loader = the_loader.region(the_chain);
        }
        RegionSource::SdkDefault => {}
    }

    if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
        the_loader = the_loader.endpoint_url(endpoint);
    }

    if let Some((access_key, secret_key)) = config.static_credentials() {
        the_loader = the_loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "s3ln-static",
        ));
    } else if !config.ec2_imds_enabled {
        // 🔒 the default chain ends at IMDS, which hangs for a while off-EC2.
        // Same chain minus that last stop.
        let the_chain = CredentialsProviderChain::first_try(
            "Environment",
            aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
        )
        .or_else(
            "Profile",
            aws_config::profile::ProfileFileCredentialsProvider::builder().build(),
        )
        .or_else(
            "WebIdentityToken",
            aws_config::web_identity_token::WebIdentityTokenCredentialsProvider::builder().build(),
        )
        .or_else(
            "EcsContainer",
            aws_config::ecs::EcsCredentialsProvider::builder().build(),
        );
        the_loader = the_loader.credentials_provider(the_chain);
    }

    the_loader.load().await
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let the_response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix.map(str::to_string))
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|err| anyhow!("{}", DisplayErrorContext(err)))
            .with_context(|| {
                format!(
                    "💀 ListObjectsV2 failed for s3://{}/{}. Check: bucket name, region, endpoint, credentials.",
                    bucket,
                    prefix.unwrap_or_default()
                )
            })?;

        let the_keys: Vec<String> = the_response
            .contents()
            .iter()
            .filter_map(|object| object.key())
            // 🗂️ directory markers and empty keys are not objects, they're furniture
            .filter(|key| !key.is_empty() && !key.ends_with('/'))
            .map(str::to_string)
            .collect();

        trace!("🪣 listed {} keys from s3://{}", the_keys.len(), bucket);

        let the_next_token = if the_response.is_truncated().unwrap_or(false) {
            the_response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            keys: the_keys,
            next_continuation_token: the_next_token,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        let the_response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| anyhow!("{}", DisplayErrorContext(err)))
            .with_context(|| {
                format!(
                    "💀 GetObject failed for s3://{bucket}/{key}. Check: key path, IAM permissions, bucket policy, KMS key access."
                )
            })?;

        let the_content_type = the_response.content_type().map(str::to_string);
        // 🔗 ByteStream → AsyncRead, boxed for type erasure. One vtable hop per read,
        // against a network round trip. Nobody will notice.
        let the_body: ObjectBody = Box::new(the_response.body.into_async_read());

        Ok(FetchedObject {
            body: the_body,
            content_type: the_content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_an_empty_config_trusts_the_environment() {
        let the_config: S3ClientConfig = serde_json::from_str("{}")
            .expect("💀 an empty storage config should parse. Everything has a default.");

        assert!(the_config.region.is_none());
        assert!(the_config.endpoint.is_none());
        assert!(!the_config.ec2_imds_enabled);
        assert!(the_config.static_credentials().is_none());
    }

    #[test]
    fn the_one_where_half_a_key_pair_is_no_key_pair() {
        let the_config = S3ClientConfig {
            access_key: Some("AKIA...".to_string()),
            ..Default::default()
        };
        assert!(the_config.static_credentials().is_none());

        let the_config = S3ClientConfig {
            access_key: Some("AKIA".to_string()),
            secret_key: Some("shh".to_string()),
            ..Default::default()
        };
        assert_eq!(the_config.static_credentials(), Some(("AKIA", "shh")));
    }

    #[test]
    fn the_one_where_assume_role_knobs_deserialize() {
        let the_config: S3ClientConfig = serde_json::from_str(
            r#"{
                "region": "eu-west-1",
                "assume_role_arn": "arn:aws:iam::123456789012:role/reader",
                "assume_role_session_name": "s3ln",
                "assume_role_duration_secs": 900,
                "ec2_imds_enabled": true
            }"#,
        )
        .expect("💀 assume-role config should parse");

        assert_eq!(the_config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(the_config.assume_role_duration_secs, Some(900));
        assert!(the_config.ec2_imds_enabled);
        assert!(!the_config.is_minio());
    }

    #[test]
    fn the_one_where_the_region_never_asks_the_instance_unless_allowed() {
        let the_config = S3ClientConfig::default();
        assert_eq!(the_config.region_source(), RegionSource::EnvThenProfile);

        let the_config = S3ClientConfig {
            region: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(the_config.region_source(), RegionSource::EnvThenProfile);

        let the_config = S3ClientConfig {
            ec2_imds_enabled: true,
            ..Default::default()
        };
        assert_eq!(the_config.region_source(), RegionSource::SdkDefault);

        let the_config = S3ClientConfig {
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        };
        assert_eq!(the_config.region_source(), RegionSource::Configured("eu-west-1"));
    }

    #[tokio::test]
    async fn the_one_where_minio_without_an_endpoint_is_refused() {
        let the_config = S3ClientConfig {
            region: Some("minio".to_string()),
            ..Default::default()
        };

        let the_result = S3ObjectStore::new(&the_config).await;
        assert!(
            the_result.is_err(),
            "minio mode without an endpoint should fail before any request is made"
        );
    }
}
