//! Where `fmt` output goes.

/// Receives program output in execution order.
pub trait OutputSink {
    fn write(&mut self, thread: u32, text: &str);
}

/// Accumulates everything written, interleaved across goroutines.
#[derive(Debug, Default, Clone)]
pub struct CapturedOutput {
    text: String,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl OutputSink for CapturedOutput {
    fn write(&mut self, _thread: u32, text: &str) {
        self.text.push_str(text);
    }
}
