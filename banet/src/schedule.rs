use burn::{config::Config, lr_scheduler::LrScheduler, tensor::backend::Backend, LearningRate};

/// One-cycle learning rate policy: cosine warm-up from `max_lr / div_factor`
/// to `max_lr` over the first `pct_start` of the run, then cosine annealing
/// down to the initial rate divided by `final_div_factor`.
#[derive(Config, Debug)]
pub struct OneCycleConfig {
    pub max_lr: f64,
    #[config(default = 0.3)]
    pub pct_start: f64,
    #[config(default = 25.0)]
    pub div_factor: f64,
    #[config(default = 1.0e4)]
    pub final_div_factor: f64,
}

impl OneCycleConfig {
    pub fn init(&self, total_steps: usize) -> OneCycleSchedule {
        let total_steps = total_steps.max(1);
        let warmup = ((total_steps as f64 * self.pct_start).round() as usize).clamp(1, total_steps);
        let initial_lr = self.max_lr / self.div_factor;
        OneCycleSchedule {
            initial_lr,
            max_lr: self.max_lr,
            final_lr: initial_lr / self.final_div_factor,
            warmup,
            total_steps,
            step: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OneCycleSchedule {
    initial_lr: f64,
    max_lr: f64,
    final_lr: f64,
    warmup: usize,
    total_steps: usize,
    step: usize,
}

fn cosine(from: f64, to: f64, progress: f64) -> f64 {
    let progress = progress.clamp(0.0, 1.0);
    to + (from - to) * (1.0 + (std::f64::consts::PI * progress).cos()) / 2.0
}

impl OneCycleSchedule {
    pub fn learning_rate_at(&self, step: usize) -> f64 {
        if step < self.warmup {
            cosine(self.initial_lr, self.max_lr, step as f64 / self.warmup as f64)
        } else {
            let annealing = (self.total_steps - self.warmup).max(1);
            cosine(self.max_lr, self.final_lr, (step - self.warmup) as f64 / annealing as f64)
        }
    }

    /// Number of learning rates handed out so far.
    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }
}

impl<B: Backend> LrScheduler<B> for OneCycleSchedule {
    type Record = usize;

    /// Learning rate for the current step, then advances. Past the last step
    /// the final rate is held.
    fn step(&mut self) -> LearningRate {
        let lr = self.learning_rate_at(self.step);
        self.step += 1;
        lr
    }

    fn to_record(&self) -> Self::Record {
        self.step
    }

    fn load_record(mut self, record: Self::Record) -> Self {
        self.step = record;
        self
    }
}
