use tch::Device;

use crate::error::ModelError;
use crate::model::utils::DEVICE;

/// Construction-time configuration for [`VideoSodNet`](crate::VideoSodNet).
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub input_channels: i64,
    pub n_classes: i64,
    /// Ratio of input resolution to the backbone's deepest feature map.
    /// Supported values: 8, 16, 32.
    pub output_stride: i64,
    /// Backbone identifier. Only `resnet101` is available.
    pub backbone: String,
    /// Run the recurrent modules over the sequence in both directions.
    pub bidirectional: bool,
    /// Learn bias terms in the recurrent gate convolutions.
    pub bias: bool,
    pub device: Device,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig {
            input_channels: 3,
            n_classes: 1,
            output_stride: 16,
            backbone: "resnet101".to_string(),
            bidirectional: false,
            bias: true,
            device: *DEVICE,
        }
    }
}

/// Per-stage strides and dilation rates resolved from an output stride,
/// together with the matching ASPP rate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StridePlan {
    pub strides: [i64; 4],
    pub rates: [i64; 4],
    pub aspp_rates: [i64; 4],
    /// os=32 additionally upsamples the deepest feature map x4 (bilinear,
    /// aligned corners) before ASPP.
    pub upsample_before_aspp: bool,
}

impl StridePlan {
    pub fn for_output_stride(output_stride: i64) -> Result<StridePlan, ModelError> {
        match output_stride {
            16 => Ok(StridePlan {
                strides: [1, 2, 2, 1],
                rates: [1, 1, 1, 2],
                aspp_rates: [1, 6, 12, 18],
                upsample_before_aspp: false,
            }),
            8 => Ok(StridePlan {
                strides: [1, 2, 1, 1],
                rates: [1, 1, 2, 2],
                aspp_rates: [1, 12, 24, 36],
                upsample_before_aspp: false,
            }),
            32 => Ok(StridePlan {
                strides: [1, 2, 2, 2],
                rates: [1, 1, 1, 1],
                aspp_rates: [1, 12, 24, 36],
                upsample_before_aspp: true,
            }),
            other => Err(ModelError::UnsupportedOutputStride(other)),
        }
    }
}
