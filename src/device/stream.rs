//! In-order execution streams.
//!
//! A [`Stream`] is a single ordered queue of device work served by a dedicated worker thread.
//! Host calls that enqueue work ([`Stream::launch`], [`Stream::copy_from_host`]) return as soon
//! as the work is queued; operations run on the device strictly in enqueue order, so launch
//! `k + 1` never starts before launch `k` has completed. The host blocks only in
//! [`Stream::synchronize`] and [`Stream::copy_to_host`].
//!
//! Launch configurations are validated synchronously at enqueue time. Faults raised while a
//! kernel runs are recorded by the worker and reported by the next synchronization; like on a
//! real device, a fault is sticky and every later operation of the stream is discarded.

use super::{
    block::{BlockCtx, Kernel},
    launch::LaunchConfig,
    memory::DeviceBuffer,
    DeviceProps,
};
use crate::{
    error::{DeviceFault, LaunchError, SyncError},
    utils::HarpFloat,
};

use crossbeam::channel::{self, Receiver, Sender};
use rayon::prelude::*;

use std::{
    cell::Cell,
    sync::Arc,
    thread::{self, JoinHandle},
};

type Task = Box<dyn FnOnce() -> Result<(), DeviceFault> + Send + 'static>;

enum Command {
    Exec(Task),
    Fence(Sender<Result<(), SyncError>>),
}

/// Ordered queue of device operations.
pub struct Stream {
    props: DeviceProps,
    queue: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    launches: Cell<usize>,
}

impl Stream {
    pub(crate) fn new(props: DeviceProps) -> Self {
        let (tx, rx) = channel::unbounded();
        let worker = thread::Builder::new()
            .name("harp-stream".into())
            .spawn(move || serve(rx))
            .ok();
        if worker.is_none() {
            log::error!("failed to spawn stream worker");
        }
        Self {
            props,
            queue: worker.as_ref().map(|_| tx),
            worker,
            launches: Cell::new(0),
        }
    }

    fn enqueue(&self, task: Task) -> Result<(), LaunchError> {
        self.queue
            .as_ref()
            .ok_or(LaunchError::StreamClosed)?
            .send(Command::Exec(task))
            .map_err(|_| LaunchError::StreamClosed)
    }

    /// Number of kernel launches accepted by this stream so far.
    pub fn launch_count(&self) -> usize {
        self.launches.get()
    }

    /// Validates `config` for `kernel` and enqueues the launch.
    ///
    /// Blocks of the launch are distributed over the `rayon` pool; a launch with an empty grid
    /// is accepted and does nothing.
    pub fn launch<K: Kernel + ?Sized>(
        &self,
        kernel: &Arc<K>,
        config: LaunchConfig,
    ) -> Result<(), LaunchError> {
        let attrs = kernel.attributes();
        config.validate(&self.props, &attrs)?;
        log::trace!(
            "enqueue `{}` with {config}, {} threads",
            attrs.name,
            config.total_threads()
        );

        let kernel = Arc::clone(kernel);
        self.enqueue(Box::new(move || {
            (0..config.grid.size()).into_par_iter().try_for_each(|b| {
                let mut ctx = BlockCtx::new(&config, config.grid.unflatten(b));
                kernel.run_block(&mut ctx)?;
                log::trace!(
                    "`{}` block {} passed {} barriers",
                    attrs.name,
                    ctx.block_idx(),
                    ctx.barriers()
                );
                Ok(())
            })
        }))?;
        self.launches.set(self.launches.get() + 1);
        Ok(())
    }

    /// Enqueues an asynchronous host-to-device copy of `src` into the front of `dst`.
    pub fn copy_from_host<T: HarpFloat>(
        &self,
        dst: &DeviceBuffer<T>,
        src: &[T],
    ) -> Result<(), LaunchError> {
        let dst = dst.as_device_ptr();
        let src = src.to_vec();
        self.enqueue(Box::new(move || {
            src.iter()
                .enumerate()
                .try_for_each(|(i, &value)| dst.store(i, value))
        }))
    }

    /// Copies the front of `src` into `dst` once every previously enqueued operation completed.
    pub fn copy_to_host<T: HarpFloat>(
        &self,
        src: &DeviceBuffer<T>,
        dst: &mut [T],
    ) -> Result<(), SyncError> {
        self.synchronize()?;
        let src = src.as_device_ptr();
        for (i, value) in dst.iter_mut().enumerate() {
            *value = src.load(i)?;
        }
        Ok(())
    }

    /// Blocks until every enqueued operation completed, reporting the stream's fault if any.
    pub fn synchronize(&self) -> Result<(), SyncError> {
        let queue = self.queue.as_ref().ok_or(SyncError::WorkerLost)?;
        let (tx, rx) = channel::bounded(1);
        queue
            .send(Command::Fence(tx))
            .map_err(|_| SyncError::WorkerLost)?;
        rx.recv().map_err(|_| SyncError::WorkerLost)?
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain it and exit.
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("stream worker panicked");
            }
        }
    }
}

fn serve(rx: Receiver<Command>) {
    let mut fault: Option<DeviceFault> = None;
    for cmd in rx {
        match cmd {
            Command::Exec(task) => {
                if fault.is_some() {
                    continue;
                }
                if let Err(err) = task() {
                    log::error!("device fault: {err}");
                    fault = Some(err);
                }
            }
            Command::Fence(reply) => {
                let status = match &fault {
                    Some(err) => Err(SyncError::Fault(err.clone())),
                    None => Ok(()),
                };
                // The host may have given up waiting.
                let _ = reply.send(status);
            }
        }
    }
}
