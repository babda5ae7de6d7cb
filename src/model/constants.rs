// channel plan: 101-layer residual backbone
pub const STEM_CHANNELS: i64 = 64;
pub const STAGE_PLANES: [i64; 4] = [64, 128, 256, 512];
pub const STAGE_BLOCKS: [i64; 4] = [3, 4, 23, 3];
pub const BOTTLENECK_EXPANSION: i64 = 4;

// multi-scale context module
pub const ASPP_INPUT_CHANNELS: i64 = 2048;
pub const ASPP_OUTPUT_CHANNELS: i64 = 256;

// low-level tap from stage 1, projected before fusion
pub const LOW_LEVEL_INPUT_CHANNELS: i64 = 256;
pub const LOW_LEVEL_OUTPUT_CHANNELS: i64 = 48;

// hyper-parameters: recurrent temporal integration
pub const LSTM_HIDDEN_CHANNELS: i64 = 32;
pub const LSTM_KERNEL_SIZE: i64 = 3;
pub const LSTM_PADDINGS: [i64; 2] = [1, 2];
pub const LSTM_DILATIONS: [i64; 2] = [1, 2];
