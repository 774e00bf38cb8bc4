//! Image processing job.

use crate::error::{JobError, JobResult};
use crate::job::{payload_from, Job, JobContext, JobDefinition, JobPayload, JobRecord, JobSettings};
use crate::outcome::JobOutcome;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

const MAX_DIMENSION: u32 = 10_000;
const SUPPORTED_FORMATS: [&str; 4] = ["jpeg", "png", "webp", "gif"];

/// One step of an image pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ImageOperation {
    Resize { width: u32, height: u32 },
    Crop { x: u32, y: u32, width: u32, height: u32 },
    Rotate { degrees: i32 },
    Convert { format: String },
}

impl ImageOperation {
    fn validate(&self) -> JobResult<()> {
        let dimension = |name: &str, value: u32| {
            if value == 0 || value > MAX_DIMENSION {
                Err(JobError::InvalidPayload(format!(
                    "{name} must be between 1 and {MAX_DIMENSION}, got {value}"
                )))
            } else {
                Ok(())
            }
        };

        match self {
            ImageOperation::Resize { width, height }
            | ImageOperation::Crop { width, height, .. } => {
                dimension("width", *width)?;
                dimension("height", *height)
            }
            ImageOperation::Rotate { degrees } if !(-360..=360).contains(degrees) => Err(
                JobError::InvalidPayload(format!("rotation out of range: {degrees}")),
            ),
            ImageOperation::Rotate { .. } => Ok(()),
            ImageOperation::Convert { format } if !SUPPORTED_FORMATS.contains(&format.as_str()) => {
                Err(JobError::InvalidPayload(format!(
                    "unsupported image format: {format}"
                )))
            }
            ImageOperation::Convert { .. } => Ok(()),
        }
    }
}

/// Image job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub source: String,
    pub operations: Vec<ImageOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ImagePayload {
    /// Checks the source and every operation.
    pub fn validate(&self) -> JobResult<()> {
        if self.source.trim().is_empty() {
            return Err(JobError::InvalidPayload("image source is empty".into()));
        }
        if self.operations.is_empty() {
            return Err(JobError::InvalidPayload("no image operations given".into()));
        }
        self.operations.iter().try_for_each(ImageOperation::validate)
    }

    /// Output path: the explicit one, or `<stem>_processed.<ext>` next to
    /// the source, taking the extension from the last conversion.
    pub fn output_path(&self) -> String {
        if let Some(output) = &self.output {
            return output.clone();
        }

        let (stem, ext) = match self.source.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => (stem, ext),
            _ => (self.source.as_str(), ""),
        };
        let ext = self
            .operations
            .iter()
            .rev()
            .find_map(|op| match op {
                ImageOperation::Convert { format } => Some(format.as_str()),
                _ => None,
            })
            .unwrap_or(ext);

        if ext.is_empty() {
            format!("{stem}_processed")
        } else {
            format!("{stem}_processed.{ext}")
        }
    }
}

/// Runs an ordered pipeline of image operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageProcessingJob {
    settings: JobSettings,
    payload: ImagePayload,
}

impl ImageProcessingJob {
    /// Builds a validated job on the `images` queue with a 600 s budget.
    pub fn new(payload: ImagePayload) -> JobResult<Self> {
        payload.validate()?;
        Ok(Self {
            settings: JobSettings {
                timeout_secs: 600,
                ..JobSettings::on_queue("images")
            },
            payload,
        })
    }

    /// The typed payload.
    pub fn image(&self) -> &ImagePayload {
        &self.payload
    }
}

#[async_trait]
impl Job for ImageProcessingJob {
    fn job_type(&self) -> &str {
        Self::JOB_TYPE
    }

    fn settings(&self) -> &JobSettings {
        &self.settings
    }

    fn payload(&self) -> JobResult<JobPayload> {
        payload_from(&self.payload)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        self.payload.validate()?;
        let transformer = ctx.services.images()?;
        let output_path = self.payload.output_path();

        debug!(
            job_id = %ctx.job_id,
            source = %self.payload.source,
            operations = self.payload.operations.len(),
            "Processing image"
        );

        let output = transformer
            .transform(&self.payload.source, &self.payload.operations, &output_path)
            .await?;

        Ok(JobOutcome::success(json!({
            "path": output.path,
            "width": output.width,
            "height": output.height,
        }))
        .with_metadata("operations", self.payload.operations.len()))
    }
}

impl JobDefinition for ImageProcessingJob {
    const JOB_TYPE: &'static str = "image_processing";

    fn from_record(record: JobRecord) -> JobResult<Self> {
        Ok(Self {
            payload: record.typed_payload()?,
            settings: record.settings,
        })
    }

    fn settings_mut(&mut self) -> &mut JobSettings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn payload(operations: Vec<ImageOperation>) -> ImagePayload {
        ImagePayload {
            source: "uploads/cat.jpg".into(),
            operations,
            output: None,
        }
    }

    #[test]
    fn test_defaults() {
        let job = ImageProcessingJob::new(payload(vec![ImageOperation::Rotate { degrees: 90 }]))
            .unwrap();
        assert_eq!(job.queue_name(), "images");
        assert_eq!(job.timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_validation() {
        let zero = payload(vec![ImageOperation::Resize { width: 0, height: 10 }]);
        assert!(matches!(zero.validate(), Err(JobError::InvalidPayload(_))));

        let spin = payload(vec![ImageOperation::Rotate { degrees: 720 }]);
        assert!(spin.validate().is_err());

        let bmp = payload(vec![ImageOperation::Convert { format: "bmp".into() }]);
        assert!(bmp.validate().is_err());

        assert!(payload(vec![]).validate().is_err());
    }

    #[test]
    fn test_output_path() {
        let plain = payload(vec![ImageOperation::Resize { width: 10, height: 10 }]);
        assert_eq!(plain.output_path(), "uploads/cat_processed.jpg");

        let converted = payload(vec![ImageOperation::Convert { format: "webp".into() }]);
        assert_eq!(converted.output_path(), "uploads/cat_processed.webp");

        let explicit = ImagePayload {
            output: Some("out.png".into()),
            ..plain
        };
        assert_eq!(explicit.output_path(), "out.png");
    }

    #[test]
    fn test_operation_wire_format() {
        let op: ImageOperation =
            serde_json::from_str(r#"{"op": "crop", "x": 1, "y": 2, "width": 3, "height": 4}"#)
                .unwrap();
        assert_eq!(op, ImageOperation::Crop { x: 1, y: 2, width: 3, height: 4 });
    }
}
