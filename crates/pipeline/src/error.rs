//! Pipeline error type aggregating the component errors.

use commitreel_core::build_status::TransitionError;
use commitreel_core::error::CoreError;
use commitreel_core::estimation::EstimateError;
use commitreel_core::ffmpeg::FfmpegError;
use commitreel_core::gource_log::LogError;
use commitreel_core::render::RenderError;
use commitreel_core::render_options::OptionError;
use commitreel_core::vcs::VcsError;

use crate::blob::BlobError;
use crate::dispatch::DispatchError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Estimate(#[from] EstimateError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Option(#[from] OptionError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Media(#[from] FfmpegError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stopped on request between stages.
    #[error("build aborted")]
    Aborted,
}

impl PipelineError {
    /// A user-requested stop. Never recorded as a build failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted | Self::Render(RenderError::Aborted))
    }

    /// Errors caused by the request rather than by the system; surfaced
    /// to callers as 400-class responses.
    pub fn is_input_error(&self) -> bool {
        match self {
            Self::Vcs(e) => e.is_input_error(),
            Self::Option(_) | Self::Log(_) | Self::Estimate(_) => true,
            Self::Core(CoreError::Validation(_) | CoreError::Conflict(_)) => true,
            _ => false,
        }
    }
}
