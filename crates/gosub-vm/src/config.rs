//! Evaluator configuration.

/// Settings fixed for the lifetime of one `Vm`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Heap size in 64-bit words. Rounded down to a power of two.
    pub heap_words: usize,
    /// Record one `Snapshot` per scheduling step.
    pub visualize: bool,
    /// Run the tracing collector after every step. Slow; meant for tests.
    pub gc_every_step: bool,
    /// Collect once fewer than this fraction of the heap's words are free.
    pub gc_low_water: f64,
    /// Seed for `select`'s case order. `None` seeds from the environment.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heap_words: 1 << 20,
            visualize: false,
            gc_every_step: false,
            gc_low_water: 0.125,
            seed: None,
        }
    }
}

impl Config {
    pub fn with_heap_words(mut self, words: usize) -> Self {
        self.heap_words = words;
        self
    }

    pub fn with_visualize(mut self, on: bool) -> Self {
        self.visualize = on;
        self
    }

    pub fn with_gc_every_step(mut self, on: bool) -> Self {
        self.gc_every_step = on;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
