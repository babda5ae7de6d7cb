use tch::{nn, Tensor};

use crate::model::constants::BOTTLENECK_EXPANSION;

/// 1x1 -> 3x3 -> 1x1 residual unit. The 3x3 conv carries the stage's stride
/// and dilation; padding equals the dilation so the no-stride spatial size
/// is preserved. The shortcut is the identity unless the block changes
/// channel count or stride, in which case a learned 1x1 projection matches
/// the main path's shape.
#[derive(Debug)]
pub struct Bottleneck {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
    conv3: nn::Conv2D,
    bn3: nn::BatchNorm,
    downsample: Option<(nn::Conv2D, nn::BatchNorm)>,
}

impl Bottleneck {
    pub fn new(vs: &nn::Path, in_planes: i64, planes: i64, stride: i64, rate: i64) -> Self {
        let out_planes = planes * BOTTLENECK_EXPANSION;

        let no_bias = nn::ConvConfig { bias: false, ..Default::default() };
        let spatial = nn::ConvConfig {
            stride,
            padding: rate,
            dilation: rate,
            bias: false,
            ..Default::default()
        };

        let downsample = if stride != 1 || in_planes != out_planes {
            let projection = nn::ConvConfig { stride, bias: false, ..Default::default() };
            Some((
                nn::conv2d(vs / "downsample_conv", in_planes, out_planes, 1, projection),
                nn::batch_norm2d(vs / "downsample_bn", out_planes, Default::default()),
            ))
        } else {
            None
        };

        Bottleneck {
            conv1: nn::conv2d(vs / "conv1", in_planes, planes, 1, no_bias),
            bn1: nn::batch_norm2d(vs / "bn1", planes, Default::default()),
            conv2: nn::conv2d(vs / "conv2", planes, planes, 3, spatial),
            bn2: nn::batch_norm2d(vs / "bn2", planes, Default::default()),
            conv3: nn::conv2d(vs / "conv3", planes, out_planes, 1, no_bias),
            bn3: nn::batch_norm2d(vs / "bn3", out_planes, Default::default()),
            downsample,
        }
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        let out = x
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.bn2, train)
            .relu()
            .apply(&self.conv3)
            .apply_t(&self.bn3, train);

        let residual = match &self.downsample {
            Some((conv, bn)) => x.apply(conv).apply_t(bn, train),
            None => x.shallow_clone(),
        };

        (out + residual).relu()
    }
}
