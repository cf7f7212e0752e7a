//! Buffer pools and the recycling protocol.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::BufferHeader;
use crate::error::HalError;
use crate::{HalResult, Hardware, PortRef};

struct PoolInner {
    free: VecDeque<BufferHeader>,
    /// Indexed by buffer index; true while the buffer is out of the pool.
    outstanding: Vec<bool>,
}

/// A fixed set of reusable buffers for one output port.
///
/// Every buffer is either queued here or in flight. The two counts always
/// add up to the capacity.
pub struct BufferPool {
    port: PortRef,
    capacity: usize,
    buffer_size: usize,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    /// Allocate `capacity` buffers of `buffer_size` bytes each.
    pub fn new(port: PortRef, capacity: usize, buffer_size: usize) -> Self {
        debug!(%port, capacity, buffer_size, "Creating buffer pool");
        let free = (0..capacity)
            .map(|index| BufferHeader::new(index, buffer_size))
            .collect();
        Self {
            port,
            capacity,
            buffer_size,
            inner: Mutex::new(PoolInner {
                free,
                outstanding: vec![false; capacity],
            }),
        }
    }

    /// Port that owns this pool.
    pub fn port(&self) -> PortRef {
        self.port
    }

    /// Total number of buffers.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocated size of each buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffers currently queued in the pool.
    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Buffers currently handed out.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().outstanding.iter().filter(|o| **o).count()
    }

    /// Returns `(available, in_flight)` from a single observation.
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        let in_flight = inner.outstanding.iter().filter(|o| **o).count();
        (inner.free.len(), in_flight)
    }

    /// Take a buffer from the pool.
    pub fn get(&self) -> Option<BufferHeader> {
        let mut inner = self.inner.lock();
        let buffer = inner.free.pop_front()?;
        inner.outstanding[buffer.index()] = true;
        Some(buffer)
    }

    /// Return a buffer to the pool.
    pub fn release(&self, mut buffer: BufferHeader) -> HalResult<()> {
        let index = buffer.index();
        let mut inner = self.inner.lock();
        match inner.outstanding.get_mut(index) {
            Some(out) if *out && buffer.alloc_size() == self.buffer_size => *out = false,
            _ => return Err(HalError::ForeignBuffer { index }),
        }
        buffer.reset();
        inner.free.push_back(buffer);
        Ok(())
    }
}

/// Feeds empty buffers from a pool to its output port.
#[derive(Clone)]
pub struct PortFeeder {
    hw: Arc<dyn Hardware>,
    port: PortRef,
    enabled: Arc<AtomicBool>,
    pool: Arc<BufferPool>,
}

impl PortFeeder {
    pub(crate) fn new(
        hw: Arc<dyn Hardware>,
        port: PortRef,
        enabled: Arc<AtomicBool>,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            hw,
            port,
            enabled,
            pool,
        }
    }

    /// The pool being fed.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// The port being fed.
    pub fn port(&self) -> PortRef {
        self.port
    }

    /// Returns true while the port is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Hand every queued buffer to the port.
    pub fn prime(&self) -> HalResult<usize> {
        let queued = self.pool.available();
        for _ in 0..queued {
            self.send_one()?;
        }
        debug!(port = %self.port, queued, "Primed output port");
        Ok(queued)
    }

    /// Release a completed buffer and, if the port is still enabled,
    /// send a replacement.
    pub fn recycle(&self, buffer: BufferHeader) -> HalResult<()> {
        self.pool.release(buffer)?;

        if !self.is_enabled() {
            trace!(port = %self.port, "Port disabled, not resubmitting");
            return Ok(());
        }

        self.send_one()
    }

    /// Take one buffer from the pool and send it to the port.
    ///
    /// A buffer the port refuses goes straight back to the pool.
    pub fn send_one(&self) -> HalResult<()> {
        let buffer = self
            .pool
            .get()
            .ok_or(HalError::PoolExhausted(self.port))?;
        match self.hw.send_buffer(self.port, buffer) {
            Ok(()) => Ok(()),
            Err(rejected) => {
                self.pool.release(rejected.buffer)?;
                Err(rejected.error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sim::{SimConfig, SimulatedHardware};
    use crate::{ComponentId, ComponentKind, Graph, Host, Parameter, Status};

    fn port() -> PortRef {
        PortRef::output(ComponentId(1), 0)
    }

    fn graph() -> (Arc<SimulatedHardware>, Graph) {
        let sim = Arc::new(SimulatedHardware::new(SimConfig::default()));
        let host = Host::new(sim.clone());
        host.bring_up().unwrap();
        (sim, host.graph().unwrap())
    }

    /// A pooled camera output. Nothing fills camera outputs here, so
    /// buffers only come back when the port is disabled.
    fn idle_output(graph: &mut Graph, capacity: u32) -> PortRef {
        let camera = graph.create_component(ComponentKind::Camera).unwrap();
        let output = PortRef::output(camera, 0);
        graph.set_buffer_requirements(output, capacity, 64).unwrap();
        graph.create_pool(output).unwrap();
        output
    }

    #[test]
    fn test_pool_conservation() {
        let pool = BufferPool::new(port(), 4, 128);
        let mut held = Vec::new();
        for expected in 1..=4 {
            held.push(pool.get().unwrap());
            let (available, in_flight) = pool.counts();
            assert_eq!(in_flight, expected);
            assert_eq!(available + in_flight, 4);
        }
        assert!(pool.get().is_none());
        while let Some(buffer) = held.pop() {
            pool.release(buffer).unwrap();
            let (available, in_flight) = pool.counts();
            assert_eq!(available + in_flight, 4);
        }
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_release_resets_buffer() {
        let pool = BufferPool::new(port(), 1, 16);
        let mut buffer = pool.get().unwrap();
        buffer.fill(b"abc");
        buffer.pts = Some(42);
        pool.release(buffer).unwrap();
        let buffer = pool.get().unwrap();
        assert_eq!(buffer.length(), 0);
        assert!(buffer.pts.is_none());
    }

    #[test]
    fn test_double_release_rejected() {
        let pool = BufferPool::new(port(), 2, 16);
        let buffer = pool.get().unwrap();
        let index = buffer.index();
        pool.release(buffer).unwrap();
        assert_eq!(pool.counts(), (2, 0));

        // Same index and size as the buffer just returned.
        let stale = BufferHeader::new(index, 16);
        assert!(matches!(
            pool.release(stale),
            Err(HalError::ForeignBuffer { index: i }) if i == index
        ));
        assert_eq!(pool.counts(), (2, 0));
    }

    #[test]
    fn test_foreign_release_rejected() {
        let pool = BufferPool::new(port(), 2, 16);
        let other = BufferPool::new(port(), 2, 16);
        let foreign = other.get().unwrap();
        assert!(matches!(
            pool.release(foreign),
            Err(HalError::ForeignBuffer { index: 0 })
        ));
        assert_eq!(pool.counts(), (2, 0));
    }

    #[test]
    fn test_prime_hands_every_buffer_to_port() {
        let (sim, mut graph) = graph();
        let output = idle_output(&mut graph, 3);
        let _rx = graph.enable_output(output).unwrap();
        let feeder = graph.feeder(output).unwrap();

        assert_eq!(feeder.prime().unwrap(), 3);
        assert_eq!(feeder.pool().counts(), (0, 3));
        assert_eq!(sim.queued_buffers(output), 3);
    }

    #[test]
    fn test_prime_on_disabled_port_leaves_pool_full() {
        let (_sim, mut graph) = graph();
        let output = idle_output(&mut graph, 3);
        let feeder = graph.feeder(output).unwrap();

        let err = feeder.prime().unwrap_err();
        assert_eq!(err.status_code(), Some(Status::Invalid));
        assert_eq!(feeder.pool().counts(), (3, 0));
    }

    #[test]
    fn test_recycle_after_disable_keeps_buffers() {
        let (sim, mut graph) = graph();
        let output = idle_output(&mut graph, 3);
        let rx = graph.enable_output(output).unwrap();
        let feeder = graph.feeder(output).unwrap();
        feeder.prime().unwrap();

        graph.disable_port(output).unwrap();
        assert!(!feeder.is_enabled());
        for returned in 1..=3 {
            let buffer = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            feeder.recycle(buffer).unwrap();
            assert_eq!(feeder.pool().counts(), (returned, 3 - returned));
        }
        assert_eq!(sim.queued_buffers(output), 0);
    }

    #[test]
    fn test_rejected_resubmit_returns_buffer() {
        let (_sim, mut graph) = graph();
        let output = idle_output(&mut graph, 3);
        let rx = graph.enable_output(output).unwrap();
        let feeder = graph.feeder(output).unwrap();
        feeder.prime().unwrap();

        // The hardware drops the port while the graph still sees it enabled.
        graph.hardware().disable_port(output).unwrap();
        assert!(feeder.is_enabled());

        let buffer = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let err = feeder.recycle(buffer).unwrap_err();
        assert_eq!(err.status_code(), Some(Status::Invalid));
        assert_eq!(feeder.pool().counts(), (1, 2));
    }

    #[test]
    fn test_send_one_on_empty_pool() {
        let (_sim, mut graph) = graph();
        let output = idle_output(&mut graph, 2);
        let _rx = graph.enable_output(output).unwrap();
        let feeder = graph.feeder(output).unwrap();
        feeder.prime().unwrap();

        assert!(matches!(
            feeder.send_one(),
            Err(HalError::PoolExhausted(port)) if port == output
        ));
        assert_eq!(feeder.pool().counts(), (0, 2));
    }

    #[test]
    fn test_conservation_while_streaming() {
        let (_sim, mut graph) = graph();
        let camera = graph.create_component(ComponentKind::Camera).unwrap();
        let encoder = graph.create_component(ComponentKind::VideoEncoder).unwrap();
        let source = PortRef::output(camera, 1);
        graph.connect(source, PortRef::input(encoder, 0)).unwrap();

        let output = PortRef::output(encoder, 0);
        graph.set_buffer_requirements(output, 3, 2048).unwrap();
        let pool = graph.create_pool(output).unwrap();
        graph.enable_component(camera).unwrap();
        graph.enable_component(encoder).unwrap();
        let rx = graph.enable_output(output).unwrap();
        let feeder = graph.feeder(output).unwrap();
        feeder.prime().unwrap();
        graph.set_parameter(source, &Parameter::Capture(true)).unwrap();

        for _ in 0..40 {
            let buffer = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            let (available, in_flight) = pool.counts();
            assert_eq!(available + in_flight, 3);
            assert!(in_flight >= 1);
            feeder.recycle(buffer).unwrap();
            let (available, in_flight) = pool.counts();
            assert_eq!(available + in_flight, 3);
        }

        graph.set_parameter(source, &Parameter::Capture(false)).unwrap();
        graph.disable_port(output).unwrap();
        for buffer in rx.try_iter() {
            feeder.recycle(buffer).unwrap();
        }
        assert_eq!(pool.counts(), (3, 0));
    }
}
