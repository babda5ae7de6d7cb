use tch::{nn, Tensor};

use crate::model::constants::{
    ASPP_OUTPUT_CHANNELS, LOW_LEVEL_INPUT_CHANNELS, LOW_LEVEL_OUTPUT_CHANNELS,
    LSTM_HIDDEN_CHANNELS,
};
use crate::model::utils::upsample_bilinear;

/// Projects the stage-1 feature map down to 48 channels. No activation; the
/// fusion conv follows immediately.
#[derive(Debug)]
pub struct LowLevelProjection {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
}

impl LowLevelProjection {
    pub fn new(vs: &nn::Path) -> Self {
        let no_bias = nn::ConvConfig { bias: false, ..Default::default() };
        LowLevelProjection {
            conv: nn::conv2d(
                vs / "conv",
                LOW_LEVEL_INPUT_CHANNELS,
                LOW_LEVEL_OUTPUT_CHANNELS,
                1,
                no_bias,
            ),
            bn: nn::batch_norm2d(vs / "bn", LOW_LEVEL_OUTPUT_CHANNELS, Default::default()),
        }
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        x.apply(&self.conv).apply_t(&self.bn, train)
    }
}

/// Fuses multi-scale context with the projected low-level features: the
/// context map is upsampled to the low-level spatial size, concatenated
/// channel-wise, and mixed by a 3x3 conv back to 256 channels.
#[derive(Debug)]
pub struct FeatureFusion {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
}

impl FeatureFusion {
    pub fn new(vs: &nn::Path) -> Self {
        let config = nn::ConvConfig { padding: 1, bias: false, ..Default::default() };
        FeatureFusion {
            conv: nn::conv2d(
                vs / "conv",
                ASPP_OUTPUT_CHANNELS + LOW_LEVEL_OUTPUT_CHANNELS,
                ASPP_OUTPUT_CHANNELS,
                3,
                config,
            ),
            bn: nn::batch_norm2d(vs / "bn", ASPP_OUTPUT_CHANNELS, Default::default()),
        }
    }

    pub fn forward_t(&self, context: &Tensor, low_level: &Tensor, train: bool) -> Tensor {
        let size = low_level.size();
        let context = upsample_bilinear(context, size[2], size[3]);
        Tensor::cat(&[&context, low_level], 1)
            .apply(&self.conv)
            .apply_t(&self.bn, train)
            .relu()
    }
}

/// Final 1x1 projection from the concatenated recurrent states to per-class
/// saliency logits. Xavier-uniform initialized (gain 1.0) instead of the
/// default Kaiming scheme; this is the network's last unconstrained linear
/// map.
#[derive(Debug)]
pub struct SaliencyHead {
    conv: nn::Conv2D,
}

impl SaliencyHead {
    pub fn new(vs: &nn::Path, n_classes: i64) -> Self {
        let in_channels = 2 * LSTM_HIDDEN_CHANNELS;
        // Xavier-uniform bound for a 1x1 kernel: gain * sqrt(6 / (fan_in + fan_out))
        let bound = (6.0 / (in_channels + n_classes) as f64).sqrt();
        let config = nn::ConvConfig {
            ws_init: nn::Init::Uniform { lo: -bound, up: bound },
            ..Default::default()
        };
        SaliencyHead {
            conv: nn::conv2d(vs / "conv", in_channels, n_classes, 1, config),
        }
    }

    pub fn forward(&self, x: &Tensor) -> Tensor {
        x.apply(&self.conv)
    }
}

#[cfg(test)]
mod tests {
    use tch::{nn, Device, Kind, Tensor};
    use super::*;

    #[test]
    fn test_low_level_projection_channels() {
        let vs = nn::VarStore::new(Device::Cpu);
        let projection = LowLevelProjection::new(&vs.root());
        let x = Tensor::randn([1, 256, 16, 16], (Kind::Float, Device::Cpu));
        let y = projection.forward_t(&x, false);
        assert_eq!(y.size(), [1, 48, 16, 16]);
    }

    #[test]
    fn test_fusion_upsamples_context_to_low_level_size() {
        let vs = nn::VarStore::new(Device::Cpu);
        let fusion = FeatureFusion::new(&vs.root());
        let context = Tensor::randn([1, 256, 4, 4], (Kind::Float, Device::Cpu));
        let low_level = Tensor::randn([1, 48, 16, 16], (Kind::Float, Device::Cpu));
        let y = fusion.forward_t(&context, &low_level, false);
        assert_eq!(y.size(), [1, 256, 16, 16]);
    }

    #[test]
    fn test_head_projects_to_class_logits() {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = SaliencyHead::new(&vs.root(), 5);
        let x = Tensor::randn([2, 64, 16, 16], (Kind::Float, Device::Cpu));
        let y = head.forward(&x);
        assert_eq!(y.size(), [2, 5, 16, 16]);
    }

    #[test]
    fn test_head_weights_within_xavier_bound() {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = SaliencyHead::new(&vs.root(), 1);
        let bound = (6.0 / 65.0_f64).sqrt();
        let max = head.conv.ws.abs().max().double_value(&[]);
        assert!(max <= bound);
    }
}
