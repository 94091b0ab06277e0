use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CartoonApiConfig;
use crate::error::CartoonError;
use crate::fallback::FallbackPools;
use crate::generation::{
    GenerationBackend, GenerationRequest, ImageSource, resolve_asset,
};
use crate::object_store::{ObjectStore, generate_object_key};
use crate::qr;
use crate::storage::LocalImageStorage;

/// Outcome of one optional pipeline step. `Failed` means the step ran and
/// degraded its field; `Skipped` means an upstream condition made it moot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome<T> {
    Skipped,
    Failed,
    Done(T),
}

impl<T> StepOutcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            StepOutcome::Done(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            StepOutcome::Done(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepOutcome::Skipped)
    }
}

/// Terminal output of a successful generation run. Immutable once
/// returned; the optional steps record attempted-but-failed separately
/// from not-attempted.
#[derive(Clone, Debug)]
pub struct ResultBundle {
    pub local_url: String,
    pub size_bytes: u64,
    pub object_key: StepOutcome<String>,
    pub presigned_url: StepOutcome<String>,
    pub qr_code: StepOutcome<String>,
}

impl ResultBundle {
    pub fn into_response(self) -> CartoonResponse {
        CartoonResponse {
            local_url: self.local_url,
            r2_object_key: self.object_key.into_value(),
            presigned_url: self.presigned_url.into_value(),
            qr_code_base64: self.qr_code.into_value(),
            file_size: self.size_bytes,
        }
    }
}

/// 对外的序列化结果，缺省字段直接省略而不是空串。
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartoonResponse {
    pub local_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r2_object_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_base64: Option<String>,
    pub file_size: u64,
}

/// What the caller ultimately receives: a generated bundle, or a
/// placeholder photo when generation could not produce a usable image.
#[derive(Clone, Debug)]
pub enum CartoonOutcome {
    Generated(ResultBundle),
    Fallback { photo_path: String },
}

/// 卡通图片生成管线。
///
/// Submit -> poll -> download -> dual persist -> presign -> QR, each
/// downstream step only attempted if its upstream succeeded. Anything up
/// to the mandatory local write is fatal; later failures degrade the
/// bundle field by field.
pub struct CartoonPipeline {
    backend: Arc<dyn GenerationBackend>,
    http: Client,
    storage: Arc<LocalImageStorage>,
    object_store: Option<Arc<dyn ObjectStore>>,
    model: String,
    style_index: i32,
    poll_interval: Duration,
    poll_budget: Duration,
    presign_expiry: Duration,
    qr_size: u32,
}

impl CartoonPipeline {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        storage: Arc<LocalImageStorage>,
        object_store: Option<Arc<dyn ObjectStore>>,
        config: &CartoonApiConfig,
        presign_expiry: Duration,
    ) -> Self {
        Self {
            backend,
            http: Client::new(),
            storage,
            object_store,
            model: config.model.clone(),
            style_index: config.style_index,
            poll_interval: config.poll_interval,
            poll_budget: config.poll_budget,
            presign_expiry,
            qr_size: qr::SHARE_SIZE,
        }
    }

    /// Generates a cartoon rendering, or falls back to a placeholder photo
    /// matched to the gender signal. Never surfaces a generation error.
    pub async fn cartoonize(
        &self,
        source: Option<ImageSource>,
        gender: Option<&str>,
        pools: &FallbackPools,
    ) -> CartoonOutcome {
        let Some(source) = source else {
            debug!("no source image, selecting fallback photo");
            return CartoonOutcome::Fallback {
                photo_path: pools.pick(gender),
            };
        };
        match self.generate(source).await {
            Ok(bundle) => CartoonOutcome::Generated(bundle),
            Err(err) => {
                warn!(error = %err, "cartoon generation failed, using fallback photo");
                CartoonOutcome::Fallback {
                    photo_path: pools.pick(gender),
                }
            }
        }
    }

    /// Runs the full pipeline. Errors here are fatal for the generation
    /// feature; callers wanting the fallback behavior go through
    /// [`cartoonize`](Self::cartoonize).
    pub async fn generate(&self, image: ImageSource) -> Result<ResultBundle, CartoonError> {
        let image = self.localize_source(image).await;
        let request = GenerationRequest {
            image,
            style_index: self.style_index,
            model: self.model.clone(),
        };

        let outcome = self.backend.submit(&request).await?;
        let deadline = Instant::now() + self.poll_budget;
        let asset_url =
            resolve_asset(self.backend.as_ref(), outcome, self.poll_interval, deadline).await?;

        let bytes = self.download_asset(&asset_url).await?;
        self.persist(bytes).await
    }

    /// 本地URL直接读盘，转成base64提交，公网URL原样传给生成服务。
    async fn localize_source(&self, image: ImageSource) -> ImageSource {
        let ImageSource::Url(url) = &image else {
            return image;
        };
        if !self.storage.is_local_url(url) {
            return image;
        }
        let Some(path) = self.storage.path_for_local_url(url) else {
            return image;
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => ImageSource::Bytes(bytes),
            Err(err) => {
                debug!(url = %url, error = %err, "local source not readable, submitting URL as-is");
                image
            }
        }
    }

    /// Downloads the generated asset byte-exact. The upstream URL is
    /// signed over its exact query-string bytes, so it is passed through
    /// without re-encoding.
    async fn download_asset(&self, url: &str) -> Result<Vec<u8>, CartoonError> {
        debug!(url = %url, "downloading generated asset");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| CartoonError::Download(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CartoonError::Download(format!("HTTP {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| CartoonError::Download(err.to_string()))?;
        if bytes.is_empty() {
            return Err(CartoonError::Download("下载的图片数据为空".to_string()));
        }
        Ok(bytes.to_vec())
    }

    /// Mandatory local write, then best-effort object-store upload,
    /// presigned link, and QR code.
    async fn persist(&self, bytes: Vec<u8>) -> Result<ResultBundle, CartoonError> {
        let file_name = format!("cartoon_{}.jpeg", Uuid::new_v4());
        self.storage.save(&file_name, &bytes).await?;
        let local_url = self.storage.url_for(&file_name);
        info!(file = %file_name, "cartoon image saved locally");

        let mut bundle = ResultBundle {
            local_url,
            size_bytes: bytes.len() as u64,
            object_key: StepOutcome::Skipped,
            presigned_url: StepOutcome::Skipped,
            qr_code: StepOutcome::Skipped,
        };

        let Some(store) = &self.object_store else {
            return Ok(bundle);
        };

        let key = generate_object_key();
        match store.put(bytes, &key, "image/jpeg").await {
            Ok(info) => {
                bundle.object_key = StepOutcome::Done(info.key);
            }
            Err(err) => {
                warn!(key = %key, error = %err, "object store upload failed, continuing with local copy");
                bundle.object_key = StepOutcome::Failed;
                return Ok(bundle);
            }
        }

        let presigned = match store.presign(&key, self.presign_expiry).await {
            Ok(url) => url,
            Err(err) => {
                warn!(key = %key, error = %err, "presigned URL issuance failed, continuing without link");
                bundle.presigned_url = StepOutcome::Failed;
                return Ok(bundle);
            }
        };
        bundle.presigned_url = StepOutcome::Done(presigned.clone());

        match qr::encode_data_uri(&presigned, self.qr_size, self.qr_size) {
            Ok(data_uri) => {
                bundle.qr_code = StepOutcome::Done(data_uri);
            }
            Err(err) => {
                warn!(error = %err, "QR encoding failed, continuing without QR code");
                bundle.qr_code = StepOutcome::Failed;
            }
        }

        Ok(bundle)
    }
}
