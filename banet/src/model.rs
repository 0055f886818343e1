use burn::{config::Config, module::Module, nn::{conv::{Conv2d, Conv2dConfig}, BatchNorm, BatchNormConfig, PaddingConfig2d, ReLU}, tensor::{backend::Backend, Tensor}};

#[derive(Module, Debug)]
pub struct BaNet<B: Backend> {
    conv1: Conv2d<B>,
    batch_norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    batch_norm2: BatchNorm<B, 2>,
    temporal: Conv2d<B>,
    activation: ReLU,
    sequence_len: usize,
    out_channels: usize,
}

#[derive(Config, Debug)]
pub struct BaNetConfig {
    pub sequence_len: usize,
    #[config(default = 4)]
    pub in_channels: usize,
    #[config(default = 1)]
    pub out_channels: usize,
    #[config(default = 16)]
    pub hidden_size: usize,
}

impl BaNetConfig {
    fn conv1(&self) -> Conv2dConfig {
        Conv2dConfig::new([self.in_channels, self.hidden_size], [3, 3]).with_padding(PaddingConfig2d::Same)
    }

    fn conv2(&self) -> Conv2dConfig {
        Conv2dConfig::new([self.hidden_size, self.hidden_size], [3, 3]).with_padding(PaddingConfig2d::Same)
    }

    fn temporal(&self) -> Conv2dConfig {
        Conv2dConfig::new(
            [self.sequence_len * self.hidden_size, self.sequence_len * self.out_channels],
            [3, 3],
        )
        .with_padding(PaddingConfig2d::Same)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> BaNet<B> {
        BaNet {
            conv1: self.conv1().init(device),
            batch_norm1: BatchNormConfig::new(self.hidden_size).init(device),
            conv2: self.conv2().init(device),
            batch_norm2: BatchNormConfig::new(self.hidden_size).init(device),
            temporal: self.temporal().init(device),
            activation: ReLU::new(),
            sequence_len: self.sequence_len,
            out_channels: self.out_channels,
        }
    }

    pub fn init_with<B: Backend>(&self, record: BaNetRecord<B>) -> BaNet<B> {
        BaNet {
            conv1: self.conv1().init_with(record.conv1),
            batch_norm1: BatchNormConfig::new(self.hidden_size).init_with(record.batch_norm1),
            conv2: self.conv2().init_with(record.conv2),
            batch_norm2: BatchNormConfig::new(self.hidden_size).init_with(record.batch_norm2),
            temporal: self.temporal().init_with(record.temporal),
            activation: ReLU::new(),
            sequence_len: self.sequence_len,
            out_channels: self.out_channels,
        }
    }
}

impl<B: Backend> BaNet<B> {
    pub fn sequence_len(&self) -> usize {
        self.sequence_len
    }

    /// `(N, C, S, H, W)` inputs to `(N, out, S, H, W)` logits.
    pub fn forward(&self, sequences: Tensor<B, 5>) -> Tensor<B, 5> {
        let [n, channels, steps, height, width] = sequences.dims();

        // frames hidden x H x W
        let x = sequences.swap_dims(1, 2).reshape([n * steps, channels, height, width]);
        let x = self.conv1.forward(x);
        let x = self.batch_norm1.forward(x);
        let x = self.activation.forward(x);

        let x = self.conv2.forward(x);
        let x = self.batch_norm2.forward(x);
        let x = self.activation.forward(x);

        // time mixing (S*hidden) x H x W -> (S*out) x H x W
        let [_, hidden, _, _] = x.dims();
        let x = x.reshape([n, steps * hidden, height, width]);
        let x = self.temporal.forward(x);

        x.reshape([n, self.out_channels, steps, height, width])
    }
}
