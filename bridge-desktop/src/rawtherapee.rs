//! RawTherapee converter.
//!
//! Profile recipes run `rawtherapee-cli -Y -o <output> -q -p <profile> -c <input>`.
//! Script recipes are handed to the pipeline engine when one is configured.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::{ConversionJob, Converter, Recipe};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::instrument;

use crate::pipeline::PipelineConverter;
use crate::process::run_tool;

#[derive(Debug, Clone)]
pub struct RawTherapeeConverter {
    cli: PathBuf,
    pipeline: Option<PipelineConverter>,
}

impl RawTherapeeConverter {
    pub fn new(cli: impl Into<PathBuf>) -> Self {
        Self {
            cli: cli.into(),
            pipeline: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConverter) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    fn args(profile: &Path, job: &ConversionJob) -> Vec<OsString> {
        vec![
            OsString::from("-Y"),
            OsString::from("-o"),
            job.output.clone().into_os_string(),
            OsString::from("-q"),
            OsString::from("-p"),
            profile.as_os_str().to_owned(),
            OsString::from("-c"),
            job.input.clone().into_os_string(),
        ]
    }
}

#[async_trait]
impl Converter for RawTherapeeConverter {
    #[instrument(skip(self, job), fields(output = %job.output.display(), size = job.size))]
    async fn convert(&self, job: &ConversionJob) -> Result<()> {
        match &job.recipe {
            Recipe::Pp3 { profile } => {
                if let Err(e) = run_tool(&self.cli, Self::args(profile, job)).await {
                    let _ = tokio::fs::remove_file(&job.output).await;
                    return Err(e);
                }
                Ok(())
            }
            Recipe::Script { .. } => match &self.pipeline {
                Some(pipeline) => pipeline.convert(job).await,
                None => Err(BridgeError::NotAvailable(
                    "no pipeline engine configured for script sidecars".to_string(),
                )),
            },
        }
    }
}
