use tch::{nn, Tensor};

/// One recurrent step: all four gates come out of a single convolution over
/// the channel-concatenated input and previous hidden state.
#[derive(Debug)]
struct ConvLstmCell {
    gates: nn::Conv2D,
}

impl ConvLstmCell {
    fn new(
        vs: &nn::Path,
        input_channels: i64,
        hidden_channels: i64,
        kernel_size: i64,
        padding: i64,
        dilation: i64,
        bias: bool,
    ) -> Self {
        let config = nn::ConvConfig { padding, dilation, bias, ..Default::default() };
        ConvLstmCell {
            gates: nn::conv2d(
                vs / "gates",
                input_channels + hidden_channels,
                4 * hidden_channels,
                kernel_size,
                config,
            ),
        }
    }

    fn step(&self, x: &Tensor, hidden: &Tensor, cell: &Tensor) -> (Tensor, Tensor) {
        let gates = Tensor::cat(&[x, hidden], 1).apply(&self.gates);
        let chunks = gates.chunk(4, 1);
        let input_gate = chunks[0].sigmoid();
        let forget_gate = chunks[1].sigmoid();
        let output_gate = chunks[2].sigmoid();
        let candidate = chunks[3].tanh();

        let next_cell = forget_gate * cell + input_gate * candidate;
        let next_hidden = output_gate * next_cell.tanh();
        (next_hidden, next_cell)
    }
}

/// Convolutional LSTM over a (batch, time, channel, height, width)
/// sequence, emitting the hidden state at every step. When bidirectional,
/// an independently parameterized cell consumes the sequence in reverse and
/// the per-step states of both directions are averaged, so the output keeps
/// `hidden_channels` channels either way.
#[derive(Debug)]
pub struct ConvLstm {
    forward_cell: ConvLstmCell,
    backward_cell: Option<ConvLstmCell>,
    hidden_channels: i64,
}

impl ConvLstm {
    pub fn new(
        vs: &nn::Path,
        input_channels: i64,
        hidden_channels: i64,
        kernel_size: i64,
        padding: i64,
        bidirectional: bool,
        dilation: i64,
        bias: bool,
    ) -> Self {
        let forward_cell = ConvLstmCell::new(
            &(vs / "forward"),
            input_channels,
            hidden_channels,
            kernel_size,
            padding,
            dilation,
            bias,
        );
        let backward_cell = if bidirectional {
            Some(ConvLstmCell::new(
                &(vs / "backward"),
                input_channels,
                hidden_channels,
                kernel_size,
                padding,
                dilation,
                bias,
            ))
        } else {
            None
        };
        ConvLstm { forward_cell, backward_cell, hidden_channels }
    }

    pub fn forward(&self, seq: &Tensor) -> Tensor {
        assert_eq!(seq.size().len(), 5, "expected a (batch, time, channel, height, width) sequence");

        let states = match &self.backward_cell {
            Some(backward_cell) => {
                let forward = self.run_direction(&self.forward_cell, seq, false);
                let backward = self.run_direction(backward_cell, seq, true);
                forward
                    .iter()
                    .zip(backward.iter())
                    .map(|(f, b)| (f + b) / 2.0)
                    .collect()
            }
            None => self.run_direction(&self.forward_cell, seq, false),
        };
        Tensor::stack(&states, 1)
    }

    /// Runs one cell over the sequence, in time order or reversed. The
    /// returned states are always in forward time order.
    fn run_direction(&self, cell: &ConvLstmCell, seq: &Tensor, reverse: bool) -> Vec<Tensor> {
        let size = seq.size();
        let (batch, steps, height, width) = (size[0], size[1], size[3], size[4]);
        let state_size = [batch, self.hidden_channels, height, width];
        let options = (seq.kind(), seq.device());

        let mut hidden = Tensor::zeros(state_size, options);
        let mut cell_state = Tensor::zeros(state_size, options);

        let mut states = Vec::with_capacity(steps as usize);
        for i in 0..steps {
            let t = if reverse { steps - 1 - i } else { i };
            let frame = seq.select(1, t);
            let (next_hidden, next_cell) = cell.step(&frame, &hidden, &cell_state);
            hidden = next_hidden;
            cell_state = next_cell;
            states.push(hidden.shallow_clone());
        }
        if reverse {
            states.reverse();
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use tch::{nn, Device, Kind, Tensor};
    use super::*;

    fn lstm(padding: i64, dilation: i64, bidirectional: bool) -> (nn::VarStore, ConvLstm) {
        let vs = nn::VarStore::new(Device::Cpu);
        let lstm = ConvLstm::new(&vs.root(), 16, 8, 3, padding, bidirectional, dilation, true);
        (vs, lstm)
    }

    #[test]
    fn test_one_hidden_state_per_step() {
        let (_vs, lstm) = lstm(1, 1, false);
        let seq = Tensor::randn([2, 4, 16, 8, 8], (Kind::Float, Device::Cpu));
        let states = lstm.forward(&seq);
        assert_eq!(states.size(), [2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_dilated_cell_preserves_spatial_size() {
        let (_vs, lstm) = lstm(2, 2, false);
        let seq = Tensor::randn([1, 3, 16, 8, 8], (Kind::Float, Device::Cpu));
        let states = lstm.forward(&seq);
        assert_eq!(states.size(), [1, 3, 8, 8, 8]);
    }

    #[test]
    fn test_bidirectional_keeps_hidden_channel_count() {
        let (_vs, lstm) = lstm(1, 1, true);
        let seq = Tensor::randn([1, 4, 16, 8, 8], (Kind::Float, Device::Cpu));
        let states = lstm.forward(&seq);
        assert_eq!(states.size(), [1, 4, 8, 8, 8]);
    }

    #[test]
    fn test_unidirectional_states_are_causal() {
        // Perturbing the last frame must not change earlier hidden states.
        let (_vs, lstm) = lstm(1, 1, false);
        let seq = Tensor::randn([1, 4, 16, 8, 8], (Kind::Float, Device::Cpu));
        let altered = seq.copy();
        tch::no_grad(|| {
            let _ = altered
                .select(1, 3)
                .copy_(&Tensor::randn([16, 8, 8], (Kind::Float, Device::Cpu)));
        });

        let states = lstm.forward(&seq);
        let altered_states = lstm.forward(&altered);
        for t in 0..3 {
            assert!(states.select(1, t).equal(&altered_states.select(1, t)));
        }
        assert!(!states.select(1, 3).equal(&altered_states.select(1, 3)));
    }

    #[test]
    fn test_bidirectional_first_state_sees_the_whole_sequence() {
        let (_vs, lstm) = lstm(1, 1, true);
        let seq = Tensor::randn([1, 4, 16, 8, 8], (Kind::Float, Device::Cpu));
        let altered = seq.copy();
        tch::no_grad(|| {
            let _ = altered
                .select(1, 3)
                .copy_(&Tensor::randn([16, 8, 8], (Kind::Float, Device::Cpu)));
        });

        let states = lstm.forward(&seq);
        let altered_states = lstm.forward(&altered);
        assert!(!states.select(1, 0).equal(&altered_states.select(1, 0)));
    }
}
