use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use oci_spec::image::{Digest, ImageIndex, ImageManifest};
use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};

use crate::{oci::Reference, OcirunError, OcirunResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Base URL for the Docker Registry v2 API.
const DOCKER_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// The service name used during token authentication.
const DOCKER_AUTH_SERVICE: &str = "registry.docker.io";

/// Endpoint for acquiring authentication tokens.
const DOCKER_AUTH_REALM: &str = "https://auth.docker.io/token";

const DOCKER_MANIFEST_MIME_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DOCKER_MANIFEST_LIST_MIME_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
const DOCKER_IMAGE_BLOB_MIME_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Per-request timeout for registry HTTP calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The platform a manifest is selected for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// Architecture, e.g. `amd64`.
    pub architecture: String,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            os: crate::config::DEFAULT_OS.to_string(),
            architecture: crate::config::DEFAULT_ARCHITECTURE.to_string(),
        }
    }
}

/// A client for the Docker Registry HTTP API v2.
///
/// Handles bearer-token authentication, manifest-list resolution to a
/// platform manifest, and layer download into the image store directory.
#[derive(Debug)]
pub struct RegistryClient {
    client: ClientWithMiddleware,
    artifacts_dir: PathBuf,
    token_cache: Mutex<Option<(String, String)>>,
}

/// Authentication material returned by the token service.
#[derive(Debug, Serialize, Deserialize)]
struct DockerAuthMaterial {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    expires_in: u32,
    #[serde(default = "Utc::now")]
    #[allow(dead_code)]
    issued_at: DateTime<Utc>,
}

/// Either a manifest list or a single platform manifest, since some
/// registries short-circuit and return the latter directly.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestOrIndex {
    Index(ImageIndex),
    Manifest(Box<ImageManifest>),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RegistryClient {
    /// Creates a new client storing downloaded layers under `artifacts_dir`.
    pub fn new(artifacts_dir: PathBuf) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(
            Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("building the http client"),
        )
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();

        Self {
            client,
            artifacts_dir,
            token_cache: Mutex::new(None),
        }
    }

    async fn auth_token(&self, repository: &str) -> OcirunResult<String> {
        if let Some((cached_repo, token)) = self.token_cache.lock().unwrap().clone() {
            if cached_repo == repository {
                return Ok(token);
            }
        }

        let response = self
            .client
            .get(DOCKER_AUTH_REALM)
            .query(&[
                ("service", DOCKER_AUTH_SERVICE),
                (
                    "scope",
                    &format!("repository:{}:pull", repository),
                ),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OcirunError::AuthFailed(format!(
                "token service returned {}",
                response.status()
            )));
        }

        let material: DockerAuthMaterial = response.json().await?;
        let token = if !material.token.is_empty() {
            material.token
        } else {
            material.access_token
        };

        *self.token_cache.lock().unwrap() = Some((repository.to_string(), token.clone()));
        Ok(token)
    }

    fn map_status(status: StatusCode, context: &str) -> OcirunError {
        match status {
            StatusCode::UNAUTHORIZED => {
                OcirunError::AuthFailed(format!("unauthorized: {context}"))
            }
            StatusCode::NOT_FOUND => OcirunError::NotFound(context.to_string()),
            _ => OcirunError::ProtocolError {
                status: status.as_u16(),
                body: context.to_string(),
            },
        }
    }

    /// Resolves `reference` to the platform manifest matching `platform`.
    pub async fn fetch_manifest(
        &self,
        reference: &Reference,
        platform: &Platform,
    ) -> OcirunResult<ImageManifest> {
        let repository = reference.repository();
        let token = self.auth_token(repository).await?;

        let response = self
            .client
            .get(format!(
                "{DOCKER_REGISTRY_URL}/v2/{repository}/manifests/{}",
                reference.tag()
            ))
            .bearer_auth(&token)
            .header("Accept", DOCKER_MANIFEST_LIST_MIME_TYPE)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::map_status(
                status,
                &format!("{repository}:{}", reference.tag()),
            ));
        }

        let parsed: ManifestOrIndex = response.json().await?;
        let index = match parsed {
            ManifestOrIndex::Manifest(manifest) => return Ok(*manifest),
            ManifestOrIndex::Index(index) => index,
        };

        let selected = index
            .manifests()
            .iter()
            .find(|m| {
                m.platform().as_ref().is_some_and(|p| {
                    p.os().to_string() == platform.os
                        && p.architecture().to_string() == platform.architecture
                })
            })
            .ok_or_else(|| OcirunError::PlatformUnavailable {
                os: platform.os.clone(),
                architecture: platform.architecture.clone(),
            })?;

        let response = self
            .client
            .get(format!(
                "{DOCKER_REGISTRY_URL}/v2/{repository}/manifests/{}",
                selected.digest()
            ))
            .bearer_auth(&token)
            .header("Accept", DOCKER_MANIFEST_MIME_TYPE)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::map_status(status, selected.digest().to_string().as_str()));
        }

        Ok(response.json().await?)
    }

    /// Returns `true` if the registry reports the blob as absent via `HEAD`.
    async fn blob_missing(&self, repository: &str, digest: &Digest, token: &str) -> OcirunResult<bool> {
        let response = self
            .client
            .head(format!("{DOCKER_REGISTRY_URL}/v2/{repository}/blobs/{digest}"))
            .bearer_auth(token)
            .send()
            .await?;

        Ok(response.status() == StatusCode::NOT_FOUND)
    }

    async fn download_blob(
        &self,
        repository: &str,
        digest: &Digest,
        token: &str,
        destination: &Path,
    ) -> OcirunResult<()> {
        let response = self
            .client
            .get(format!("{DOCKER_REGISTRY_URL}/v2/{repository}/blobs/{digest}"))
            .bearer_auth(token)
            .header("Accept", DOCKER_IMAGE_BLOB_MIME_TYPE)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::map_status(status, digest.to_string().as_str()));
        }

        let tmp_path = destination.with_extension("tmp");
        let mut file = File::create(&tmp_path).await?;
        let mut stream = response.bytes_stream();
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        fs::rename(&tmp_path, destination).await?;
        Ok(())
    }

    /// Builds the on-disk filename for the `idx`-th (0-based) layer.
    fn layer_filename(idx: usize, digest: &Digest) -> String {
        format!("layer_{:03}_{}.tar.gz", idx + 1, digest.to_string().replace(':', "_"))
    }

    /// Pulls `reference`, writing each layer under
    /// `<artifacts>/<flat_name>/layer_NNN_<digest-safe>.tar.gz`.
    ///
    /// Already-present layers are skipped; layers the registry reports
    /// missing via `HEAD` are skipped with a logged warning rather than
    /// failing the pull.
    pub async fn pull(&self, reference: &Reference, platform: &Platform) -> OcirunResult<PathBuf> {
        let manifest = self.fetch_manifest(reference, platform).await?;
        let image_dir = self.artifacts_dir.join(reference.flat_name());
        fs::create_dir_all(&image_dir).await?;

        let repository = reference.repository();
        let token = self.auth_token(repository).await?;

        for (idx, layer) in manifest.layers().iter().enumerate() {
            let digest = layer.digest();
            let destination = image_dir.join(Self::layer_filename(idx, digest));

            if destination.exists() {
                continue;
            }

            if self.blob_missing(repository, digest, &token).await? {
                tracing::warn!(%digest, "registry reports layer blob missing, skipping");
                continue;
            }

            self.download_blob(repository, digest, &token, &destination)
                .await?;
        }

        Ok(image_dir)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_platform_default_matches_config() {
        let platform = Platform::default();
        assert_eq!(platform.os, crate::config::DEFAULT_OS);
        assert_eq!(platform.architecture, crate::config::DEFAULT_ARCHITECTURE);
    }

    #[test]
    fn test_layer_filename_is_1_indexed_and_zero_padded() {
        let digest = Digest::from_str("sha256:abcd1234").unwrap();
        assert_eq!(
            RegistryClient::layer_filename(0, &digest),
            "layer_001_sha256_abcd1234.tar.gz"
        );
        assert_eq!(
            RegistryClient::layer_filename(11, &digest),
            "layer_012_sha256_abcd1234.tar.gz"
        );
    }

    #[test]
    fn test_map_status_distinguishes_auth_and_not_found() {
        assert!(matches!(
            RegistryClient::map_status(StatusCode::UNAUTHORIZED, "x"),
            OcirunError::AuthFailed(_)
        ));
        assert!(matches!(
            RegistryClient::map_status(StatusCode::NOT_FOUND, "x"),
            OcirunError::NotFound(_)
        ));
        assert!(matches!(
            RegistryClient::map_status(StatusCode::BAD_REQUEST, "x"),
            OcirunError::ProtocolError { status: 400, .. }
        ));
    }
}
