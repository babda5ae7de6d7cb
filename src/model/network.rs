use log::debug;
use tch::{nn, Tensor};

use crate::config::{NetConfig, StridePlan};
use crate::error::ModelError;
use crate::model::aspp::Aspp;
use crate::model::backbone::Backbone;
use crate::model::constants::{
    ASPP_OUTPUT_CHANNELS, LSTM_DILATIONS, LSTM_HIDDEN_CHANNELS, LSTM_KERNEL_SIZE, LSTM_PADDINGS,
};
use crate::model::conv_lstm::ConvLstm;
use crate::model::decoder::{FeatureFusion, LowLevelProjection, SaliencyHead};
use crate::model::utils::upsample_bilinear;

/// Video salient-object detection network.
///
/// A forward pass has two ordered phases. Phase 1 runs backbone, ASPP and
/// fusion on every frame independently; phase 2 stacks the per-frame
/// features along time, runs two dilated convolutional LSTMs over the
/// stacked sequence, and projects each step's concatenated hidden states to
/// saliency logits at the clip's input resolution. All cross-frame mixing
/// happens inside the recurrent modules.
#[derive(Debug)]
pub struct VideoSodNet {
    pub vs: nn::VarStore,
    input_channels: i64,
    output_stride: i64,
    upsample_before_aspp: bool,
    backbone: Backbone,
    aspp: Aspp,
    low_level: LowLevelProjection,
    fusion: FeatureFusion,
    conv_lstm1: ConvLstm,
    conv_lstm2: ConvLstm,
    head: SaliencyHead,
}

impl VideoSodNet {
    /// Validates the configuration and builds the network on
    /// `config.device`. Fails before allocating any parameters if the
    /// output stride or backbone identifier is not supported.
    pub fn new(config: &NetConfig) -> Result<VideoSodNet, ModelError> {
        let plan = StridePlan::for_output_stride(config.output_stride)?;
        if config.backbone != "resnet101" {
            return Err(ModelError::UnsupportedBackbone(config.backbone.clone()));
        }

        let vs = nn::VarStore::new(config.device);
        let root = vs.root();

        let backbone = Backbone::new(&(&root / "backbone"), config.input_channels, &plan);
        let aspp = Aspp::new(&(&root / "aspp"), plan.aspp_rates);
        let low_level = LowLevelProjection::new(&(&root / "low_level"));
        let fusion = FeatureFusion::new(&(&root / "fusion"));
        let conv_lstm1 = ConvLstm::new(
            &(&root / "conv_lstm1"),
            ASPP_OUTPUT_CHANNELS,
            LSTM_HIDDEN_CHANNELS,
            LSTM_KERNEL_SIZE,
            LSTM_PADDINGS[0],
            config.bidirectional,
            LSTM_DILATIONS[0],
            config.bias,
        );
        let conv_lstm2 = ConvLstm::new(
            &(&root / "conv_lstm2"),
            ASPP_OUTPUT_CHANNELS,
            LSTM_HIDDEN_CHANNELS,
            LSTM_KERNEL_SIZE,
            LSTM_PADDINGS[1],
            config.bidirectional,
            LSTM_DILATIONS[1],
            config.bias,
        );
        let head = SaliencyHead::new(&(&root / "head"), config.n_classes);

        debug!(
            "built video-sod net: output stride {}, {} trainable tensors",
            config.output_stride,
            vs.trainable_variables().len()
        );

        Ok(VideoSodNet {
            vs,
            input_channels: config.input_channels,
            output_stride: config.output_stride,
            upsample_before_aspp: plan.upsample_before_aspp,
            backbone,
            aspp,
            low_level,
            fusion,
            conv_lstm1,
            conv_lstm2,
            head,
        })
    }

    /// Maps a (batch, time, channel, height, width) clip to per-frame
    /// saliency logits of shape (batch, time, n_classes, height, width).
    pub fn forward_t(&self, clip: &Tensor, train: bool) -> Tensor {
        let size = clip.size();
        assert_eq!(size.len(), 5, "expected a (batch, time, channel, height, width) clip");
        let (steps, channels, height, width) = (size[1], size[2], size[3], size[4]);
        assert_eq!(channels, self.input_channels, "clip channel count mismatch");
        assert!(steps >= 1, "clip must contain at least one frame");
        assert_eq!(height % self.output_stride, 0, "height not divisible by output stride");
        assert_eq!(width % self.output_stride, 0, "width not divisible by output stride");

        // Phase 1: stateless per-frame feature extraction.
        let mut low_level_maps = Vec::with_capacity(steps as usize);
        let mut fused_maps = Vec::with_capacity(steps as usize);
        for t in 0..steps {
            let frame = clip.select(1, t);
            let (low_level, fused) = self.frame_features(&frame, train);
            low_level_maps.push(low_level);
            fused_maps.push(fused);
        }
        // The stacked low-level sequence is not consumed downstream.
        let _low_level_seq = Tensor::stack(&low_level_maps, 1);
        let fused_seq = Tensor::stack(&fused_maps, 1);

        // Phase 2: temporal integration, the only cross-frame mixing.
        let states1 = self.conv_lstm1.forward(&fused_seq);
        let states2 = self.conv_lstm2.forward(&fused_seq);

        let mut saliency_maps = Vec::with_capacity(steps as usize);
        for t in 0..steps {
            let states = Tensor::cat(&[states1.select(1, t), states2.select(1, t)], 1);
            let logits = self.head.forward(&states);
            saliency_maps.push(upsample_bilinear(&logits, height, width));
        }
        Tensor::stack(&saliency_maps, 1)
    }

    /// Backbone -> low-level projection -> ASPP -> fusion for a single
    /// frame. Stateless, applied identically to every time step.
    fn frame_features(&self, frame: &Tensor, train: bool) -> (Tensor, Tensor) {
        let (stage1, deep) = self.backbone.forward_t(frame, train);
        let low_level = self.low_level.forward_t(&stage1, train);

        let context = self.aspp.forward_t(&self.aspp_input(deep), train);
        let fused = self.fusion.forward_t(&context, &low_level, train);
        (low_level, fused)
    }

    // os=32 compensates its coarser stride by upsampling x4 before ASPP.
    fn aspp_input(&self, deep: Tensor) -> Tensor {
        if !self.upsample_before_aspp {
            return deep;
        }
        let size = deep.size();
        upsample_bilinear(&deep, 4 * size[2], 4 * size[3])
    }
}
