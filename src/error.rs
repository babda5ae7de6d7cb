use thiserror::Error;

/// Construction-time configuration errors. Raised before any parameter is
/// allocated; shape violations during a forward pass panic instead.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unsupported output stride {0}, expected one of 8, 16, 32")]
    UnsupportedOutputStride(i64),

    #[error("unsupported backbone `{0}`, only `resnet101` is available")]
    UnsupportedBackbone(String),
}
