use tokio::sync::mpsc;

use tollgate_core::{ChatChunk, ChatRequest, ChatResponse, RequestContext, ResponseAugmentation};

/// What the pipeline hands back to the HTTP layer.
pub enum ChatReply {
    /// A full response, augmentation attached in the body and ready to
    /// mirror into headers.
    Complete(Box<ChatResponse>),
    /// A streaming response. Chunks arrive on the channel; the relay task
    /// owns settlement and keeps running until the stream terminates or the
    /// request is cancelled. The augmentation carries routing identity only;
    /// cost settles after the stream ends and is visible in the ledger.
    Stream {
        chunks: mpsc::Receiver<ChatChunk>,
        augmentation: ResponseAugmentation,
    },
}

impl std::fmt::Debug for ChatReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(response) => f.debug_tuple("Complete").field(&response.id).finish(),
            Self::Stream { augmentation, .. } => f
                .debug_struct("Stream")
                .field("provider_used", &augmentation.provider_used)
                .finish_non_exhaustive(),
        }
    }
}

/// A request parked for human review (quarantine or require-approval).
#[derive(Debug, Clone)]
pub struct HeldRequest {
    pub ctx: RequestContext,
    pub request: ChatRequest,
    /// Why the request was held (`quarantine` or the approving rule's id).
    pub reason: String,
}
