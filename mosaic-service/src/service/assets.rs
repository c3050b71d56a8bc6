//! Per-asset processing.
//!
//! Every asset of a request is decoded on its own blocking task, all of them
//! concurrently. A failure is recorded against that asset only; siblings run
//! to completion and the outcomes come back in upload order.

use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{DecodeError, ExtractionError, ImageError, ServiceError};
use crate::ingestion;
use crate::models::{AssetBytes, AssetFailure, AssetKind, ExtractedContent, UploadedAsset};
use crate::prompt::CaptionedImage;
use crate::vision::{self, captioning::ImageCaptioner};

/// What became of one uploaded asset
#[derive(Debug)]
pub enum AssetOutcome {
    Image(CaptionedImage),
    Document(ExtractedContent),
    Failed {
        failure: AssetFailure,
        error: ServiceError,
    },
}

/// Outcomes split by kind, each list in upload order
#[derive(Debug, Default)]
pub struct ProcessedAssets {
    pub images: Vec<CaptionedImage>,
    pub documents: Vec<ExtractedContent>,
    pub failures: Vec<AssetFailure>,
    /// Error of the first failed asset, in upload order
    pub first_error: Option<ServiceError>,
}

impl From<Vec<AssetOutcome>> for ProcessedAssets {
    fn from(outcomes: Vec<AssetOutcome>) -> Self {
        let mut processed = ProcessedAssets::default();
        for outcome in outcomes {
            match outcome {
                AssetOutcome::Image(image) => processed.images.push(image),
                AssetOutcome::Document(document) => processed.documents.push(document),
                AssetOutcome::Failed { failure, error } => {
                    processed.failures.push(failure);
                    if processed.first_error.is_none() {
                        processed.first_error = Some(error);
                    }
                }
            }
        }
        processed
    }
}

type PendingAsset = JoinHandle<Result<AssetOutcome, ServiceError>>;

/// Decode, caption and extract every asset
pub async fn process_assets(
    assets: Vec<UploadedAsset>,
    captioner: Arc<dyn ImageCaptioner>,
) -> ProcessedAssets {
    let mut pending: Vec<(String, AssetKind, PendingAsset)> = Vec::with_capacity(assets.len());

    for asset in assets {
        let filename = asset.filename.clone();
        let kind = asset.kind;
        let captioner = Arc::clone(&captioner);
        let handle = tokio::spawn(async move { process_one(asset, captioner).await });
        pending.push((filename, kind, handle));
    }

    let mut outcomes = Vec::with_capacity(pending.len());
    for (filename, kind, handle) in pending {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(panicked(&filename, kind, &e.to_string())),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                let failure = AssetFailure {
                    filename: filename.clone(),
                    kind,
                    code: error.error_code().to_string(),
                    message: error.to_string(),
                };
                warn!(filename = %filename, kind = %kind, code = %failure.code, error = %error, "Asset failed");
                metrics::counter!(
                    "mosaic_asset_failures_total",
                    "kind" => kind.to_string(),
                    "code" => failure.code.clone()
                )
                .increment(1);
                AssetOutcome::Failed { failure, error }
            }
        };
        outcomes.push(outcome);
    }

    ProcessedAssets::from(outcomes)
}

async fn process_one(
    asset: UploadedAsset,
    captioner: Arc<dyn ImageCaptioner>,
) -> Result<AssetOutcome, ServiceError> {
    match asset.kind {
        AssetKind::Image => {
            let filename = asset.filename.clone();
            let image = tokio::task::spawn_blocking(move || vision::normalize(&asset))
                .await
                .map_err(|e| panicked(&filename, AssetKind::Image, &e.to_string()))??;
            let caption = captioner.caption(&image).await?;
            debug!(filename = %filename, captioner = captioner.name(), "Image ready");
            Ok(AssetOutcome::Image(CaptionedImage { image, caption }))
        }
        AssetKind::Document => {
            let filename = asset.filename.clone();
            let content = tokio::task::spawn_blocking(move || {
                let data = match &asset.bytes {
                    AssetBytes::Binary(data) => data.clone(),
                    AssetBytes::Base64(payload) => {
                        let compact: String =
                            payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                        match vision::LENIENT_BASE64.decode(compact) {
                            Ok(decoded) => Bytes::from(decoded),
                            Err(e) => {
                                return Err(ExtractionError::Decode {
                                    filename: asset.filename.clone(),
                                    source: DecodeError::Malformed {
                                        message: format!("invalid base64 payload: {}", e),
                                    },
                                });
                            }
                        }
                    }
                };
                ingestion::extract_document(&asset.filename, &asset.media_type, &data)
            })
            .await
            .map_err(|e| panicked(&filename, AssetKind::Document, &e.to_string()))??;
            Ok(AssetOutcome::Document(content))
        }
    }
}

/// A decoder task that died is reported like any other decode failure
fn panicked(filename: &str, kind: AssetKind, message: &str) -> ServiceError {
    match kind {
        AssetKind::Image => ServiceError::Image(ImageError::InvalidImage {
            filename: filename.to_string(),
            reason: format!("decoder crashed: {}", message),
        }),
        AssetKind::Document => ServiceError::Extraction(ExtractionError::Decode {
            filename: filename.to_string(),
            source: DecodeError::Malformed {
                message: format!("decoder crashed: {}", message),
            },
        }),
    }
}
