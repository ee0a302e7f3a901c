use super::Ctx;
use crate::output::{MediaReport, StageOutput, VideoAnalysis};
use async_trait::async_trait;
use got_kernel::executor::StageAgent;
use got_kernel::AgentErrorKind;

/// Key frames are sampled this often
pub const KEY_FRAME_INTERVAL_SECS: u32 = 5;
/// Opening window that is sampled
pub const KEY_FRAME_WINDOW_SECS: u32 = 120;

/// Checks the resolved media against limits and samples key frames
#[derive(Debug, Clone, Copy)]
pub struct FetcherAgent {
    max_length_secs: u32,
}

impl FetcherAgent {
    #[must_use]
    pub fn new(max_length_secs: u32) -> Self {
        Self { max_length_secs }
    }
}

/// Timestamps every interval over the window, stopping at a known duration
fn key_frames(duration_secs: u32) -> Vec<u32> {
    let window = if duration_secs == 0 {
        KEY_FRAME_WINDOW_SECS
    } else {
        KEY_FRAME_WINDOW_SECS.min(duration_secs)
    };
    (0..window).step_by(KEY_FRAME_INTERVAL_SECS as usize).collect()
}

#[async_trait]
impl StageAgent<VideoAnalysis> for FetcherAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let asset = ctx.input();
        if asset.duration_secs > self.max_length_secs {
            return Err(AgentErrorKind::Validation(format!(
                "video is {}s long, limit is {}s",
                asset.duration_secs, self.max_length_secs
            )));
        }

        let key_frames = key_frames(asset.duration_secs);
        tracing::info!(
            title = %asset.title,
            duration = asset.duration_secs,
            frames = key_frames.len(),
            "media fetched"
        );
        Ok(StageOutput::Media(MediaReport {
            asset: asset.clone(),
            key_frames,
        }))
    }
}
