//! Converter for pipeline-script sidecars.
//!
//! The engine is invoked as `<engine> <script> <input> <output> <size>` and
//! must run the script's `.convert` target, writing a JPEG whose longest
//! edge is at most `size` pixels.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::{ConversionJob, Converter, Recipe};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::instrument;

use crate::process::run_tool;

#[derive(Debug, Clone)]
pub struct PipelineConverter {
    program: PathBuf,
}

impl PipelineConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(job: &ConversionJob) -> Result<Vec<OsString>> {
        let Recipe::Script { script } = &job.recipe else {
            return Err(BridgeError::OperationFailed(
                "pipeline engine only renders script recipes".to_string(),
            ));
        };
        Ok(vec![
            script.clone().into_os_string(),
            job.input.clone().into_os_string(),
            job.output.clone().into_os_string(),
            OsString::from(job.size.to_string()),
        ])
    }
}

#[async_trait]
impl Converter for PipelineConverter {
    #[instrument(skip(self, job), fields(output = %job.output.display(), size = job.size))]
    async fn convert(&self, job: &ConversionJob) -> Result<()> {
        run_tool(&self.program, Self::args(job)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(recipe: Recipe) -> ConversionJob {
        ConversionJob {
            input: "/c/a.NEF".into(),
            output: "/v/a.jpg.tmp.jpg".into(),
            recipe,
            size: 1920,
            created: Utc::now(),
            lat_lng: None,
        }
    }

    #[test]
    fn test_args() {
        let args = PipelineConverter::args(&job(Recipe::Script {
            script: "/c/a.NEF.pho".into(),
        }))
        .unwrap();
        assert_eq!(
            args,
            vec!["/c/a.NEF.pho", "/c/a.NEF", "/v/a.jpg.tmp.jpg", "1920"]
                .into_iter()
                .map(OsString::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_profile_recipe_rejected() {
        let result = PipelineConverter::args(&job(Recipe::Pp3 {
            profile: "/v/a.tmp.pp3".into(),
        }));
        assert!(matches!(result, Err(BridgeError::OperationFailed(_))));
    }
}
