use thiserror::Error;

use crate::orchestrator::JobRequest;

const MAX_JOB_ID_LEN: usize = 128;
const MAX_CAPTION_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum JobValidationError {
    #[error("user_id must be positive")]
    InvalidUserId,
    #[error("payload must be a JSON object")]
    PayloadNotObject,
    #[error("discount_percent must be between 0 and 100, got {0}")]
    DiscountOutOfRange(u8),
    #[error("job_id must be 1 to {MAX_JOB_ID_LEN} characters")]
    InvalidJobId,
    #[error("model_alias must not be blank")]
    BlankModelAlias,
    #[error("caption exceeds {MAX_CAPTION_LEN} characters")]
    CaptionTooLong,
}

pub fn validate_job(request: &JobRequest) -> Result<(), JobValidationError> {
    if request.user_id == 0 {
        return Err(JobValidationError::InvalidUserId);
    }

    if !request.payload.is_object() {
        return Err(JobValidationError::PayloadNotObject);
    }

    if let Some(pct) = request.discount_percent {
        if pct > 100 {
            return Err(JobValidationError::DiscountOutOfRange(pct));
        }
    }

    if let Some(job_id) = &request.job_id {
        if job_id.is_empty() || job_id.len() > MAX_JOB_ID_LEN {
            return Err(JobValidationError::InvalidJobId);
        }
    }

    if request
        .model_alias
        .as_deref()
        .is_some_and(|alias| alias.trim().is_empty())
    {
        return Err(JobValidationError::BlankModelAlias);
    }

    if request
        .caption
        .as_deref()
        .is_some_and(|caption| caption.chars().count() > MAX_CAPTION_LEN)
    {
        return Err(JobValidationError::CaptionTooLong);
    }

    Ok(())
}
