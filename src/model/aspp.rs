use tch::{nn, Tensor};

use crate::model::constants::{ASPP_INPUT_CHANNELS, ASPP_OUTPUT_CHANNELS};
use crate::model::utils::upsample_bilinear;

#[derive(Debug)]
struct AsppBranch {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
}

impl AsppBranch {
    // rate 1 degenerates to a plain 1x1 conv; larger rates use a 3x3 conv
    // with padding equal to the dilation so the spatial size is unchanged.
    fn new(vs: &nn::Path, rate: i64) -> Self {
        let (kernel, config) = if rate == 1 {
            (1, nn::ConvConfig { bias: false, ..Default::default() })
        } else {
            (3, nn::ConvConfig { padding: rate, dilation: rate, bias: false, ..Default::default() })
        };
        AsppBranch {
            conv: nn::conv2d(vs / "conv", ASPP_INPUT_CHANNELS, ASPP_OUTPUT_CHANNELS, kernel, config),
            bn: nn::batch_norm2d(vs / "bn", ASPP_OUTPUT_CHANNELS, Default::default()),
        }
    }

    fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        x.apply(&self.conv).apply_t(&self.bn, train).relu()
    }
}

/// Atrous spatial pyramid pooling over the backbone's deepest feature map.
/// Four dilated branches run in parallel with a pooled global-context
/// branch; the concatenation is projected back down to 256 channels.
#[derive(Debug)]
pub struct Aspp {
    branches: Vec<AsppBranch>,
    global_conv: nn::Conv2D,
    global_bn: nn::BatchNorm,
    project_conv: nn::Conv2D,
    project_bn: nn::BatchNorm,
}

impl Aspp {
    pub fn new(vs: &nn::Path, rates: [i64; 4]) -> Self {
        let no_bias = nn::ConvConfig { bias: false, ..Default::default() };
        let branches = rates
            .iter()
            .enumerate()
            .map(|(i, &rate)| AsppBranch::new(&(vs / format!("branch{}", i)), rate))
            .collect();

        Aspp {
            branches,
            global_conv: nn::conv2d(vs / "global_conv", ASPP_INPUT_CHANNELS, ASPP_OUTPUT_CHANNELS, 1, no_bias),
            global_bn: nn::batch_norm2d(vs / "global_bn", ASPP_OUTPUT_CHANNELS, Default::default()),
            project_conv: nn::conv2d(
                vs / "project_conv",
                5 * ASPP_OUTPUT_CHANNELS,
                ASPP_OUTPUT_CHANNELS,
                1,
                no_bias,
            ),
            project_bn: nn::batch_norm2d(vs / "project_bn", ASPP_OUTPUT_CHANNELS, Default::default()),
        }
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        let size = x.size();
        let (height, width) = (size[2], size[3]);

        let mut maps: Vec<Tensor> = self.branches.iter().map(|b| b.forward_t(x, train)).collect();

        let global = x
            .adaptive_avg_pool2d([1, 1])
            .apply(&self.global_conv)
            .apply_t(&self.global_bn, train)
            .relu();
        maps.push(upsample_bilinear(&global, height, width));

        Tensor::cat(&maps, 1)
            .apply(&self.project_conv)
            .apply_t(&self.project_bn, train)
            .relu()
    }
}

#[cfg(test)]
mod tests {
    use tch::{nn, Device, Kind, Tensor};
    use super::*;

    #[test]
    fn test_output_channels() {
        let vs = nn::VarStore::new(Device::Cpu);
        let aspp = Aspp::new(&vs.root(), [1, 6, 12, 18]);
        let x = Tensor::randn([2, 2048, 8, 8], (Kind::Float, Device::Cpu));
        let y = aspp.forward_t(&x, false);
        assert_eq!(y.size(), [2, 256, 8, 8]);
    }

    #[test]
    fn test_wide_rates_preserve_spatial_size() {
        let vs = nn::VarStore::new(Device::Cpu);
        let aspp = Aspp::new(&vs.root(), [1, 12, 24, 36]);
        let x = Tensor::randn([1, 2048, 4, 4], (Kind::Float, Device::Cpu));
        let y = aspp.forward_t(&x, false);
        assert_eq!(y.size(), [1, 256, 4, 4]);
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let vs = nn::VarStore::new(Device::Cpu);
        let aspp = Aspp::new(&vs.root(), [1, 6, 12, 18]);
        let x = Tensor::randn([1, 2048, 4, 4], (Kind::Float, Device::Cpu));
        let a = aspp.forward_t(&x, false);
        let b = aspp.forward_t(&x, false);
        assert!(a.equal(&b));
    }
}
