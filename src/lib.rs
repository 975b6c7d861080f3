pub mod config;
pub mod enroll;
pub mod gallery;
pub mod matcher;
pub mod recognize;

// Re-export vision types for convenience
pub use facewatch_vision::{
    face, video, Annotator, ChannelOrder, Embedding, EmbeddingProvider, FaceBox, FrameSink,
    FrameSource,
};
