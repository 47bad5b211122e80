//! Tokio-backed execution contexts
//!
//! For hosts without their own scheduler: a dedicated thread plays the serial
//! context, tokio's blocking pool plays the background context.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;

use hotcmd_kernel::{ExecutionContexts, Task};
use tokio::runtime::Handle;
use tracing::{debug, error};

pub struct TokioContexts {
    serial: crossbeam_channel::Sender<Task>,
    runtime: Handle,
    thread: Option<JoinHandle<()>>,
}

impl TokioContexts {
    /// Must be called from within a tokio runtime
    pub fn new() -> std::io::Result<Self> {
        let runtime = Handle::try_current().map_err(std::io::Error::other)?;
        Self::with_handle(runtime)
    }

    pub fn with_handle(runtime: Handle) -> std::io::Result<Self> {
        let (serial, tasks) = crossbeam_channel::unbounded::<Task>();
        let thread = std::thread::Builder::new()
            .name("hotcmd-serial".to_string())
            .spawn(move || {
                for task in tasks.iter() {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!("Serial task panicked");
                    }
                }
                debug!("Serial context stopped");
            })?;

        Ok(Self {
            serial,
            runtime,
            thread: Some(thread),
        })
    }

    /// Whether the calling thread is the serial context
    pub fn is_serial_thread() -> bool {
        std::thread::current().name() == Some("hotcmd-serial")
    }
}

impl ExecutionContexts for TokioContexts {
    fn run_serial(&self, task: Task) {
        if self.serial.send(task).is_err() {
            error!("Serial context is gone; task dropped");
        }
    }

    fn run_background(&self, task: Task) {
        drop(self.runtime.spawn_blocking(task));
    }
}

impl Drop for TokioContexts {
    fn drop(&mut self) {
        let (closed, _) = crossbeam_channel::bounded(0);
        drop(std::mem::replace(&mut self.serial, closed));
        if let Some(thread) = self.thread.take() {
            if !Self::is_serial_thread() && thread.join().is_err() {
                error!("Serial context thread panicked");
            }
        }
    }
}
