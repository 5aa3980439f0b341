//! Build pipeline orchestration.
//!
//! [`Pipeline`] ties the core components to three collaborators: a
//! [`BuildStore`](store::BuildStore) for records, a
//! [`BlobStore`](blob::BlobStore) for files, and a
//! [`TaskDispatcher`](dispatch::TaskDispatcher) for handing build ids to
//! workers. Its operations are split by concern across the modules below.

use std::sync::Arc;

use commitreel_core::executables::ToolPaths;
use commitreel_core::ffmpeg::MediaTools;
use commitreel_core::render::Renderer;
use commitreel_core::vcs::VcsExtractor;

pub mod blob;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod options;
pub mod progress;
pub mod refresh;
pub mod runner;
pub mod snapshot;
pub mod store;

use blob::BlobStore;
use config::PipelineConfig;
use dispatch::TaskDispatcher;
use store::BuildStore;

/// Shared handle over the collaborators and the configured tools.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn BuildStore>,
    blobs: Arc<dyn BlobStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    tools: Arc<ToolPaths>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn BuildStore>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        tools: Arc<ToolPaths>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            dispatcher,
            tools,
            config,
        }
    }

    pub fn store(&self) -> &dyn BuildStore {
        self.store.as_ref()
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn tools(&self) -> &Arc<ToolPaths> {
        &self.tools
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub(crate) fn vcs(&self) -> VcsExtractor {
        VcsExtractor::new(Arc::clone(&self.tools), self.config.vcs_timeouts())
    }

    pub(crate) fn media(&self) -> MediaTools {
        MediaTools::new(Arc::clone(&self.tools), self.config.ffmpeg_timeout())
    }

    pub(crate) fn renderer(&self) -> Renderer {
        Renderer::new(Arc::clone(&self.tools), self.config.render_settings())
    }
}
