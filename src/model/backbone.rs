use tch::{nn, Tensor};

use crate::config::StridePlan;
use crate::model::bottleneck::Bottleneck;
use crate::model::constants::{BOTTLENECK_EXPANSION, STAGE_BLOCKS, STAGE_PLANES, STEM_CHANNELS};

/// 101-layer residual feature extractor. A 7x7/2 stem plus max-pool is
/// followed by four bottleneck stages whose strides and dilations come from
/// the configured [`StridePlan`]. Stage 1's output doubles as the low-level
/// feature tap for the decoder.
#[derive(Debug)]
pub struct Backbone {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    layer1: Vec<Bottleneck>,
    layer2: Vec<Bottleneck>,
    layer3: Vec<Bottleneck>,
    layer4: Vec<Bottleneck>,
}

/// Builds one run of bottleneck blocks. Only the first block carries the
/// stage's stride and dilation; the rest run at stride 1, rate 1. Returns
/// the stage together with its output channel count so the caller can
/// thread the running width into the next stage.
fn make_stage(
    vs: &nn::Path,
    in_planes: i64,
    planes: i64,
    blocks: i64,
    stride: i64,
    rate: i64,
) -> (Vec<Bottleneck>, i64) {
    let out_planes = planes * BOTTLENECK_EXPANSION;
    let mut layers = Vec::with_capacity(blocks as usize);
    layers.push(Bottleneck::new(&(vs / "block0"), in_planes, planes, stride, rate));
    for i in 1..blocks {
        layers.push(Bottleneck::new(&(vs / format!("block{}", i)), out_planes, planes, 1, 1));
    }
    (layers, out_planes)
}

impl Backbone {
    pub fn new(vs: &nn::Path, input_channels: i64, plan: &StridePlan) -> Self {
        let stem = nn::ConvConfig { stride: 2, padding: 3, bias: false, ..Default::default() };
        let conv1 = nn::conv2d(vs / "conv1", input_channels, STEM_CHANNELS, 7, stem);
        let bn1 = nn::batch_norm2d(vs / "bn1", STEM_CHANNELS, Default::default());

        let (layer1, c1) = make_stage(
            &(vs / "layer1"),
            STEM_CHANNELS,
            STAGE_PLANES[0],
            STAGE_BLOCKS[0],
            plan.strides[0],
            plan.rates[0],
        );
        let (layer2, c2) = make_stage(
            &(vs / "layer2"),
            c1,
            STAGE_PLANES[1],
            STAGE_BLOCKS[1],
            plan.strides[1],
            plan.rates[1],
        );
        let (layer3, c3) = make_stage(
            &(vs / "layer3"),
            c2,
            STAGE_PLANES[2],
            STAGE_BLOCKS[2],
            plan.strides[2],
            plan.rates[2],
        );
        let (layer4, _) = make_stage(
            &(vs / "layer4"),
            c3,
            STAGE_PLANES[3],
            STAGE_BLOCKS[3],
            plan.strides[3],
            plan.rates[3],
        );

        Backbone { conv1, bn1, layer1, layer2, layer3, layer4 }
    }

    /// Returns `(low_level, deep)`: the stage-1 feature map at 1/4 input
    /// resolution and the stage-4 feature map at the plan's output stride.
    pub fn forward_t(&self, x: &Tensor, train: bool) -> (Tensor, Tensor) {
        let mut x = x
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .max_pool2d([3, 3], [2, 2], [1, 1], [1, 1], false);

        for block in &self.layer1 {
            x = block.forward_t(&x, train);
        }
        let low_level = x.shallow_clone();

        for block in self.layer2.iter().chain(&self.layer3).chain(&self.layer4) {
            x = block.forward_t(&x, train);
        }

        (low_level, x)
    }
}

#[cfg(test)]
mod tests {
    use tch::{nn, Device, Kind, Tensor};
    use super::*;

    fn backbone_for(output_stride: i64) -> (nn::VarStore, Backbone) {
        let plan = StridePlan::for_output_stride(output_stride).unwrap();
        let vs = nn::VarStore::new(Device::Cpu);
        let backbone = Backbone::new(&vs.root(), 3, &plan);
        (vs, backbone)
    }

    #[test]
    fn test_stage_block_counts() {
        let (_vs, backbone) = backbone_for(16);
        assert_eq!(backbone.layer1.len(), 3);
        assert_eq!(backbone.layer2.len(), 4);
        assert_eq!(backbone.layer3.len(), 23);
        assert_eq!(backbone.layer4.len(), 3);
    }

    #[test]
    fn test_os16_feature_sizes() {
        let (_vs, backbone) = backbone_for(16);
        let x = Tensor::randn([1, 3, 64, 64], (Kind::Float, Device::Cpu));
        let (low_level, deep) = backbone.forward_t(&x, false);
        assert_eq!(low_level.size(), [1, 256, 16, 16]);
        assert_eq!(deep.size(), [1, 2048, 4, 4]);
    }

    #[test]
    fn test_os8_feature_sizes() {
        let (_vs, backbone) = backbone_for(8);
        let x = Tensor::randn([1, 3, 64, 64], (Kind::Float, Device::Cpu));
        let (low_level, deep) = backbone.forward_t(&x, false);
        assert_eq!(low_level.size(), [1, 256, 16, 16]);
        assert_eq!(deep.size(), [1, 2048, 8, 8]);
    }

    #[test]
    fn test_os32_feature_sizes() {
        let (_vs, backbone) = backbone_for(32);
        let x = Tensor::randn([1, 3, 64, 64], (Kind::Float, Device::Cpu));
        let (low_level, deep) = backbone.forward_t(&x, false);
        assert_eq!(low_level.size(), [1, 256, 16, 16]);
        assert_eq!(deep.size(), [1, 2048, 2, 2]);
    }
}
