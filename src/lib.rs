//! Video salient-object detection on top of libtorch.
//!
//! The network composes a 101-layer residual backbone, atrous spatial
//! pyramid pooling and two dilated convolutional LSTMs into a single
//! tensor-to-tensor module: a (batch, time, channel, height, width) clip in,
//! one saliency map per frame out. Spatial feature extraction is stateless
//! and per-frame; temporal context is integrated in one recurrent pass over
//! the stacked frame features.
//!
//! Training, data loading and checkpointing live in the consuming driver,
//! not here.

pub mod config;
pub mod error;
pub mod model;

pub use config::NetConfig;
pub use error::ModelError;
pub use model::network::VideoSodNet;
