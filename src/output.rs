//! Aggregated step output.
//!
//! Each step buffers its own captured output and hands the finished block to
//! one writer task, so blocks from concurrent steps never interleave.

use std::io::Write;

use console::style;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Result;
use crate::step::OutputSummary;

/// One step's finished output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepBlock {
    pub step: String,
    pub summary: OutputSummary,
    pub text: String,
}

impl StepBlock {
    pub fn new(step: &str, summary: OutputSummary) -> Self {
        Self {
            step: step.to_string(),
            summary,
            text: String::new(),
        }
    }

    /// Adds one command's captured stream to the block.
    pub fn push(&mut self, text: &str) {
        let text = text.trim_end();
        if text.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(text);
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn render(&self) -> Option<String> {
        let label = match self.summary {
            OutputSummary::Stdout => "stdout",
            OutputSummary::Stderr => "stderr",
            OutputSummary::Combined => "output",
            OutputSummary::Hide => return None,
        };
        if self.is_empty() {
            return None;
        }
        let header = style(format!("{} {label}:", self.step)).bold().for_stderr();
        Some(format!("\n{header}\n{}\n", self.text))
    }
}

/// Sending half handed to step tasks.
#[derive(Debug, Clone)]
pub struct OutputHandle {
    tx: mpsc::UnboundedSender<StepBlock>,
}

impl OutputHandle {
    pub fn send(&self, block: StepBlock) {
        if block.summary == OutputSummary::Hide || block.is_empty() {
            return;
        }
        if self.tx.send(block).is_err() {
            warn!("output writer closed before all steps finished");
        }
    }
}

pub struct OutputSink {
    handle: OutputHandle,
    writer: JoinHandle<Box<dyn Write + Send>>,
}

impl OutputSink {
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Spawns the writer task; must be called inside a tokio runtime.
    pub fn new(mut writer: Box<dyn Write + Send>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StepBlock>();
        let writer = tokio::spawn(async move {
            while let Some(block) = rx.recv().await {
                let Some(text) = block.render() else {
                    continue;
                };
                let () = clx::progress::with_terminal_lock(|| {
                    if let Err(err) = writer.write_all(text.as_bytes()).and_then(|_| writer.flush())
                    {
                        warn!("failed to write output of {}: {err}", block.step);
                    }
                });
            }
            writer
        });
        Self {
            handle: OutputHandle { tx },
            writer,
        }
    }

    pub fn handle(&self) -> OutputHandle {
        self.handle.clone()
    }

    /// Waits until every block sent so far has been written.
    pub async fn finish(self) -> Result<()> {
        drop(self.handle);
        self.writer.await?;
        Ok(())
    }
}
