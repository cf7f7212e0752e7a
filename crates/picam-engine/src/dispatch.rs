//! Buffer completion handling.
//!
//! Each enabled encoder output delivers filled buffers on a bounded
//! channel. A worker thread drains it, copies the payload out, hands the
//! buffer back to the port through its [`PortFeeder`] and only then passes
//! the assembled frame on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender};
use picam_mmal::{BufferFlags, BufferHeader, PortFeeder};
use picam_types::PipelineEvent;
use tracing::{debug, error, info, trace, warn};

use crate::events::EventSink;
use crate::metrics::MetricsCollector;
use crate::pacing::SegmentCounter;

/// One logical encoded video frame.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Microseconds since the first delivered frame.
    pub timestamp: i64,

    /// Payload of every fragment of the frame.
    pub data: Bytes,

    /// Payload offset within the first fragment's buffer.
    pub offset: usize,

    pub keyframe: bool,

    /// Output segment the frame belongs to.
    pub segment: u32,
}

/// A completed still image.
#[derive(Debug, Clone)]
pub struct StillImage {
    /// Frame index, or Unix time in timestamp mode.
    pub frame: u64,

    pub data: Bytes,

    /// The hardware flagged the last buffer as failed.
    pub truncated: bool,
}

/// Decides when the output moves to a new segment.
pub(crate) struct Segmenter {
    counter: SegmentCounter,
    segment_size: Option<Duration>,
    split_wait: bool,
    split_now: Arc<AtomicBool>,
    base_time: Option<Instant>,
}

impl Segmenter {
    pub(crate) fn new(
        counter: SegmentCounter,
        segment_size: Option<Duration>,
        split_wait: bool,
        split_now: Arc<AtomicBool>,
    ) -> Self {
        Self {
            counter,
            segment_size,
            split_wait,
            split_now,
            base_time: None,
        }
    }

    fn current(&self) -> u32 {
        self.counter.current()
    }

    /// Segment times count from the first completion.
    fn observe(&mut self, now: Instant) {
        self.base_time.get_or_insert(now);
    }

    /// Codec headers mark a point where a new segment may start.
    fn on_codec_config(&mut self, now: Instant) -> Option<u32> {
        let base = *self.base_time.get_or_insert(now);
        let size_elapsed = self
            .segment_size
            .is_some_and(|size| now.duration_since(base) > size);
        let split = self.split_wait && self.split_now.load(Ordering::SeqCst);
        if !(size_elapsed || split) {
            return None;
        }

        self.base_time = Some(now);
        self.split_now.store(false, Ordering::SeqCst);
        Some(self.counter.advance())
    }
}

/// Result of feeding one buffer to the video assembler.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Frame(EncodedFrame),
    Rotated(u32),
    /// A frame was dropped for a missing or repeated timestamp.
    Skipped,
}

/// Rebuilds logical frames from encoder output buffers.
pub(crate) struct VideoFrameAssembler {
    pending: BytesMut,
    offset: usize,
    keyframe: bool,
    start_pts: Option<i64>,
    last_pts: Option<i64>,
    segments: Segmenter,
}

impl VideoFrameAssembler {
    pub(crate) fn new(segments: Segmenter) -> Self {
        Self {
            pending: BytesMut::new(),
            offset: 0,
            keyframe: false,
            start_pts: None,
            last_pts: None,
            segments,
        }
    }

    pub(crate) fn push(&mut self, buffer: &BufferHeader) -> Option<Dispatch> {
        let now = Instant::now();
        self.segments.observe(now);
        let flags = buffer.flags;

        if flags.contains(BufferFlags::CONFIG) {
            return self.segments.on_codec_config(now).map(Dispatch::Rotated);
        }
        if buffer.length() == 0 {
            return None;
        }
        if flags.contains(BufferFlags::CODECSIDEINFO) {
            debug!("IMV of length {}", buffer.length());
            return None;
        }

        if self.pending.is_empty() {
            self.offset = buffer.offset;
        }
        self.pending.extend_from_slice(buffer.payload());
        self.keyframe |= flags.contains(BufferFlags::KEYFRAME);

        let frame_end =
            flags.is_empty() || flags.intersects(BufferFlags::FRAME_END | BufferFlags::KEYFRAME);
        if !frame_end {
            return None;
        }

        let data = self.pending.split().freeze();
        let keyframe = std::mem::take(&mut self.keyframe);
        match buffer.pts {
            Some(pts) if self.last_pts != Some(pts) => {
                let start = *self.start_pts.get_or_insert(pts);
                self.last_pts = Some(pts);
                Some(Dispatch::Frame(EncodedFrame {
                    timestamp: pts - start,
                    data,
                    offset: self.offset,
                    keyframe,
                    segment: self.segments.current(),
                }))
            }
            _ => Some(Dispatch::Skipped),
        }
    }
}

/// Release a completed buffer and send a replacement to the port.
fn recycle(feeder: &PortFeeder, buffer: BufferHeader, metrics: &MetricsCollector) {
    if let Err(e) = feeder.recycle(buffer) {
        error!(port = %feeder.port(), "Unable to return a buffer to the encoder port: {}", e);
        metrics.record_resubmit_failure();
    }
}

/// Drain a video encoder output until the port is disabled.
pub(crate) fn spawn_video_worker<F>(
    rx: Receiver<BufferHeader>,
    feeder: PortFeeder,
    mut assembler: VideoFrameAssembler,
    mut on_frame: F,
    metrics: Arc<MetricsCollector>,
    events: EventSink,
) -> JoinHandle<()>
where
    F: FnMut(EncodedFrame) + Send + 'static,
{
    thread::spawn(move || {
        debug!(port = %feeder.port(), "Video dispatch started");
        for buffer in rx.iter() {
            let dispatch = assembler.push(&buffer);
            recycle(&feeder, buffer, &metrics);

            match dispatch {
                Some(Dispatch::Frame(frame)) => {
                    metrics.record_frame(frame.data.len());
                    on_frame(frame);
                }
                Some(Dispatch::Rotated(segment)) => {
                    info!(segment, "Starting new segment");
                    metrics.record_segment();
                    events.send(PipelineEvent::SegmentRotated { segment });
                }
                Some(Dispatch::Skipped) => {
                    trace!("Skipping buffer with unknown or repeated timestamp");
                    metrics.record_skip();
                }
                None => {}
            }
        }
        debug!(port = %feeder.port(), "Video dispatch stopped");
    })
}

/// Accumulates the buffers of one still image.
pub(crate) struct StillRequest {
    frame: u64,
    image: BytesMut,
}

impl StillRequest {
    pub(crate) fn new(frame: u64) -> Self {
        Self {
            frame,
            image: BytesMut::new(),
        }
    }

    /// Append a buffer; returns the image once it is complete.
    pub(crate) fn push(&mut self, buffer: &BufferHeader) -> Option<StillImage> {
        if buffer.length() > 0 {
            self.image.extend_from_slice(buffer.payload());
        }

        let failed = buffer.flags.contains(BufferFlags::TRANSMISSION_FAILED);
        if !failed && !buffer.flags.contains(BufferFlags::FRAME_END) {
            return None;
        }
        Some(StillImage {
            frame: self.frame,
            data: self.image.split().freeze(),
            truncated: failed,
        })
    }
}

/// Drain an image encoder output for one capture.
///
/// The finished image is sent on `done`; buffers are recycled until the
/// port is disabled.
pub(crate) fn spawn_still_worker(
    rx: Receiver<BufferHeader>,
    feeder: PortFeeder,
    request: StillRequest,
    done: Sender<StillImage>,
    abort: Arc<AtomicBool>,
    metrics: Arc<MetricsCollector>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut request = Some(request);
        for buffer in rx.iter() {
            let completed = request.as_mut().and_then(|r| r.push(&buffer));
            recycle(&feeder, buffer, &metrics);

            if let Some(image) = completed {
                request = None;
                if done.send(image).is_err() {
                    warn!("Still capture abandoned - aborting");
                    abort.store(true, Ordering::SeqCst);
                }
            }
        }
        trace!(port = %feeder.port(), "Still dispatch stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use picam_mmal::{BufferPool, ComponentId, PortRef};

    fn pool() -> BufferPool {
        BufferPool::new(PortRef::output(ComponentId(1), 0), 4, 64)
    }

    fn buffer(pool: &BufferPool, flags: BufferFlags, pts: Option<i64>, payload: &[u8]) -> BufferHeader {
        let mut buffer = pool.get().unwrap();
        buffer.fill(payload);
        buffer.flags = flags;
        buffer.pts = pts;
        buffer
    }

    fn assembler(split_now: Arc<AtomicBool>, wrap: u32) -> VideoFrameAssembler {
        VideoFrameAssembler::new(Segmenter::new(
            SegmentCounter::new(1, wrap),
            None,
            true,
            split_now,
        ))
    }

    fn feed(assembler: &mut VideoFrameAssembler, pool: &BufferPool, buffer: BufferHeader) -> Option<Dispatch> {
        let result = assembler.push(&buffer);
        pool.release(buffer).unwrap();
        result
    }

    #[test]
    fn test_fragments_form_one_frame() {
        let pool = pool();
        let mut assembler = assembler(Arc::default(), 0);

        let first = buffer(&pool, BufferFlags::KEYFRAME | BufferFlags::FRAME_END, Some(1000), b"key");
        let Some(Dispatch::Frame(frame)) = feed(&mut assembler, &pool, first) else {
            panic!("keyframe not delivered");
        };
        assert_eq!(frame.timestamp, 0);
        assert!(frame.keyframe);

        let start = buffer(&pool, BufferFlags::FRAME_START, Some(2000), b"ab");
        assert!(feed(&mut assembler, &pool, start).is_none());
        let end = buffer(&pool, BufferFlags::FRAME_END, Some(2000), b"cd");
        let Some(Dispatch::Frame(frame)) = feed(&mut assembler, &pool, end) else {
            panic!("frame not delivered");
        };
        assert_eq!(&frame.data[..], b"abcd");
        assert_eq!(frame.timestamp, 1000);
        assert!(!frame.keyframe);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_repeated_and_unknown_timestamps_skipped() {
        let pool = pool();
        let mut assembler = assembler(Arc::default(), 0);

        let frame = buffer(&pool, BufferFlags::FRAME_END, Some(5), b"x");
        assert!(matches!(feed(&mut assembler, &pool, frame), Some(Dispatch::Frame(_))));
        let repeat = buffer(&pool, BufferFlags::FRAME_END, Some(5), b"y");
        assert!(matches!(feed(&mut assembler, &pool, repeat), Some(Dispatch::Skipped)));
        let unknown = buffer(&pool, BufferFlags::FRAME_END, None, b"z");
        assert!(matches!(feed(&mut assembler, &pool, unknown), Some(Dispatch::Skipped)));
    }

    #[test]
    fn test_codec_config_rotates_when_split_armed() {
        let pool = pool();
        let split_now = Arc::new(AtomicBool::new(false));
        let mut assembler = assembler(Arc::clone(&split_now), 2);

        let header = buffer(&pool, BufferFlags::CONFIG, None, b"sps");
        assert!(feed(&mut assembler, &pool, header).is_none());

        split_now.store(true, Ordering::SeqCst);
        let header = buffer(&pool, BufferFlags::CONFIG, None, b"sps");
        assert!(matches!(feed(&mut assembler, &pool, header), Some(Dispatch::Rotated(2))));
        assert!(!split_now.load(Ordering::SeqCst));

        split_now.store(true, Ordering::SeqCst);
        let header = buffer(&pool, BufferFlags::CONFIG, None, b"sps");
        assert!(matches!(feed(&mut assembler, &pool, header), Some(Dispatch::Rotated(1))));

        let frame = buffer(&pool, BufferFlags::KEYFRAME, Some(9), b"k");
        let Some(Dispatch::Frame(frame)) = feed(&mut assembler, &pool, frame) else {
            panic!("frame not delivered");
        };
        assert_eq!(frame.segment, 1);
    }

    #[test]
    fn test_segment_size_rotates_after_elapsed() {
        let pool = pool();
        let mut assembler = VideoFrameAssembler::new(Segmenter::new(
            SegmentCounter::new(1, 0),
            Some(Duration::from_millis(5)),
            false,
            Arc::default(),
        ));

        let frame = buffer(&pool, BufferFlags::FRAME_END, Some(1), b"a");
        feed(&mut assembler, &pool, frame);
        thread::sleep(Duration::from_millis(20));
        let header = buffer(&pool, BufferFlags::CONFIG, None, b"sps");
        assert!(matches!(feed(&mut assembler, &pool, header), Some(Dispatch::Rotated(2))));
    }

    #[test]
    fn test_side_info_not_delivered() {
        let pool = pool();
        let mut assembler = assembler(Arc::default(), 0);
        let side = buffer(&pool, BufferFlags::CODECSIDEINFO, Some(3), b"mv");
        assert!(feed(&mut assembler, &pool, side).is_none());
    }

    #[test]
    fn test_still_request_accumulates() {
        let pool = pool();
        let mut request = StillRequest::new(7);

        let part = buffer(&pool, BufferFlags::empty(), Some(1), b"\xff\xd8ab");
        assert!(request.push(&part).is_none());
        pool.release(part).unwrap();

        let last = buffer(&pool, BufferFlags::FRAME_END, Some(1), b"cd\xff\xd9");
        let image = request.push(&last).unwrap();
        pool.release(last).unwrap();
        assert_eq!(image.frame, 7);
        assert_eq!(&image.data[..], b"\xff\xd8abcd\xff\xd9");
        assert!(!image.truncated);
    }

    #[test]
    fn test_transmission_failure_completes_image() {
        let pool = pool();
        let mut request = StillRequest::new(0);
        let failed = buffer(&pool, BufferFlags::TRANSMISSION_FAILED, None, b"abc");
        let image = request.push(&failed).unwrap();
        assert!(image.truncated);
        assert_eq!(image.data.len(), 3);
    }

    #[test]
    fn test_failed_resubmit_is_counted() {
        use picam_mmal::sim::SimulatedHardware;
        use picam_mmal::{ComponentKind, Hardware, Host};

        let host = Host::new(Arc::new(SimulatedHardware::default()));
        host.bring_up().unwrap();
        let mut graph = host.graph().unwrap();
        let camera = graph.create_component(ComponentKind::Camera).unwrap();
        let output = PortRef::output(camera, 0);
        graph.set_buffer_requirements(output, 2, 64).unwrap();
        graph.create_pool(output).unwrap();
        let rx = graph.enable_output(output).unwrap();
        let feeder = graph.feeder(output).unwrap();
        feeder.prime().unwrap();

        // The port goes away underneath a still enabled feeder.
        graph.hardware().disable_port(output).unwrap();
        let metrics = MetricsCollector::new();
        let buffer = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        recycle(&feeder, buffer, &metrics);

        assert_eq!(metrics.resubmit_failures(), 1);
        assert_eq!(feeder.pool().counts(), (1, 1));
    }
}
