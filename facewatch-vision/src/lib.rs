pub mod display;
pub mod face;
pub mod model;
pub mod overlay;
pub mod provider;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use display::{DirectorySink, FrameSink};
#[cfg(feature = "window")]
pub use display::WindowSink;
pub use face::{Detection, Embedding, FaceBox};
pub use overlay::Annotator;
pub use provider::{ChannelOrder, EmbeddingProvider, OnnxProvider, ProviderSettings};
pub use video::{Camera, FrameSource, VideoFile};
