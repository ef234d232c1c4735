//! Collaborators used when the host injects none.
//!
//! With `desktop-shims` these are the `bridge-desktop` tools configured from
//! [`CatalogConfig`]. Without it every required collaborator must be
//! injected, and a missing one is [`CoreError::CapabilityMissing`].

use bridge_traits::{Converter, CredentialProvider, ExifRewriter, PhotoService, TagReader};
use core_runtime::config::CatalogConfig;
use std::sync::Arc;

#[cfg(not(feature = "desktop-shims"))]
use crate::error::CoreError;
use crate::error::Result;

#[cfg(feature = "desktop-shims")]
pub(crate) fn tag_reader(config: &CatalogConfig) -> Result<Arc<dyn TagReader>> {
    Ok(Arc::new(bridge_desktop::ExiftoolTagReader::new(
        config.exiftool.clone(),
    )))
}

#[cfg(feature = "desktop-shims")]
pub(crate) fn converter(config: &CatalogConfig) -> Result<Arc<dyn Converter>> {
    let pipeline = bridge_desktop::PipelineConverter::new(config.pipeline_engine.clone());
    Ok(Arc::new(
        bridge_desktop::RawTherapeeConverter::new(config.rawtherapee_cli.clone())
            .with_pipeline(pipeline),
    ))
}

#[cfg(feature = "desktop-shims")]
pub(crate) fn exif_rewriter(config: &CatalogConfig) -> Result<Arc<dyn ExifRewriter>> {
    Ok(Arc::new(bridge_desktop::ExiftoolRewriter::new(
        config.exiftool.clone(),
    )))
}

/// A Google Photos connector when credentials are available.
#[cfg(feature = "desktop-shims")]
pub(crate) fn photo_service(
    config: &CatalogConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
) -> Result<Option<Arc<dyn PhotoService>>> {
    let Some(credentials) = credentials else {
        return Ok(None);
    };
    let http = bridge_desktop::ReqwestHttpClient::new()?;
    let connector =
        provider_google_photos::GooglePhotosConnector::new(Arc::new(http), credentials)
            .with_base_url(config.api_base_url.clone());
    let service: Arc<dyn PhotoService> = Arc::new(connector);
    Ok(Some(service))
}

#[cfg(not(feature = "desktop-shims"))]
pub(crate) fn tag_reader(_config: &CatalogConfig) -> Result<Arc<dyn TagReader>> {
    Err(CoreError::missing(
        "TagReader",
        "no tag reader injected and desktop shims are disabled",
    ))
}

#[cfg(not(feature = "desktop-shims"))]
pub(crate) fn converter(_config: &CatalogConfig) -> Result<Arc<dyn Converter>> {
    Err(CoreError::missing(
        "Converter",
        "no converter injected and desktop shims are disabled",
    ))
}

#[cfg(not(feature = "desktop-shims"))]
pub(crate) fn exif_rewriter(_config: &CatalogConfig) -> Result<Arc<dyn ExifRewriter>> {
    Err(CoreError::missing(
        "ExifRewriter",
        "no EXIF rewriter injected and desktop shims are disabled",
    ))
}

#[cfg(not(feature = "desktop-shims"))]
pub(crate) fn photo_service(
    _config: &CatalogConfig,
    _credentials: Option<Arc<dyn CredentialProvider>>,
) -> Result<Option<Arc<dyn PhotoService>>> {
    Ok(None)
}
