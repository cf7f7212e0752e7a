//! Software implementation of the hardware capability.
//!
//! Behaves like the camera stack closely enough to drive whole sessions:
//! encoders produce codec headers, key and delta frames and JPEG images
//! into the buffers the application hands them, completions arrive on a
//! producer thread, and faults can be injected per call.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::buffer::{BufferFlags, BufferHeader};
use crate::error::{HalError, Rejected, Status};
use crate::format::{Encoding, PortFormat, Rect};
use crate::param::{CameraInfo, CameraSettings, Parameter, ParameterId, Rational};
use crate::{
    ComponentId, ComponentKind, ConnectionId, ControlEvent, HalResult, Hardware, PortKind,
    PortLayout, PortRef, PortSink,
};

/// How often an idle image encoder checks for a capture request.
const STILL_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// How long a producer waits for the application to return a buffer.
const BUFFER_WAIT: Duration = Duration::from_millis(1);

/// Default key frame period when none is configured.
const DEFAULT_INTRA_PERIOD: u64 = 30;

/// Behaviour and fault injection for [`SimulatedHardware`].
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Time between encoded video frames.
    pub frame_interval: Duration,

    /// Sensor reported by the camera-info component; `None` fails the query.
    pub sensor: Option<CameraInfo>,

    /// Creating a component of this kind fails.
    pub fail_create: Option<ComponentKind>,

    /// Setting one of these parameters fails with the given status.
    pub reject_parameters: Vec<(ParameterId, Status)>,

    /// Enabling any connection fails.
    pub fail_connection_enable: bool,

    /// Still images end with a transmission failure instead of frame end.
    pub transmission_failure: bool,

    /// Number of buffers each still image is split across.
    pub still_chunks: usize,

    /// Size in bytes of each still image.
    pub still_size: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(10),
            sensor: Some(CameraInfo {
                name: "imx219".to_string(),
                max_width: 3280,
                max_height: 2464,
            }),
            fail_create: None,
            reject_parameters: Vec::new(),
            fail_connection_enable: false,
            transmission_failure: false,
            still_chunks: 3,
            still_size: 3000,
        }
    }
}

/// Calls recorded by the simulator, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOp {
    BringUp,
    CreateComponent(ComponentId, ComponentKind),
    DestroyComponent(ComponentId),
    EnableComponent(ComponentId),
    DisableComponent(ComponentId),
    EnablePort(PortRef),
    DisablePort(PortRef),
    SetParameter(PortRef, ParameterId),
    CreateConnection(ConnectionId),
    EnableConnection(ConnectionId),
    DisableConnection(ConnectionId),
    DestroyConnection(ConnectionId),
}

struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct SimPort {
    format: PortFormat,
    enabled: bool,
    sink: PortSink,
    queued: VecDeque<BufferHeader>,
    params: HashMap<ParameterId, Parameter>,
    producer: Option<Producer>,
}

impl SimPort {
    fn new() -> Self {
        Self {
            format: PortFormat::default(),
            enabled: false,
            sink: PortSink::None,
            queued: VecDeque::new(),
            params: HashMap::new(),
            producer: None,
        }
    }
}

struct SimComponent {
    kind: ComponentKind,
    enabled: bool,
    ports: BTreeMap<PortRef, SimPort>,
}

struct SimConnection {
    output: PortRef,
    input: PortRef,
    enabled: bool,
}

#[derive(Default)]
struct SimState {
    next_component: u32,
    next_connection: u32,
    components: BTreeMap<ComponentId, SimComponent>,
    connections: BTreeMap<ConnectionId, SimConnection>,
    ops: Vec<SimOp>,
}

impl SimState {
    fn port(&self, port: PortRef) -> HalResult<&SimPort> {
        self.components
            .get(&port.component)
            .and_then(|c| c.ports.get(&port))
            .ok_or(HalError::UnknownPort(port))
    }

    fn port_mut(&mut self, port: PortRef) -> HalResult<&mut SimPort> {
        self.components
            .get_mut(&port.component)
            .and_then(|c| c.ports.get_mut(&port))
            .ok_or(HalError::UnknownPort(port))
    }

    fn kind(&self, id: ComponentId) -> Option<ComponentKind> {
        self.components.get(&id).map(|c| c.kind)
    }

    /// The camera port feeding an encoder, if it is connected, enabled
    /// and asked to capture.
    fn capturing_source(&self, encoder: ComponentId) -> Option<PortRef> {
        let input = PortRef::input(encoder, 0);
        let connection = self
            .connections
            .values()
            .find(|c| c.input == input && c.enabled)?;
        let camera = self.components.get(&connection.output.component)?;
        if !camera.enabled {
            return None;
        }
        let source = camera.ports.get(&connection.output)?;
        match source.params.get(&ParameterId::Capture) {
            Some(Parameter::Capture(true)) => Some(connection.output),
            _ => None,
        }
    }
}

struct Inner {
    config: SimConfig,
    state: Mutex<SimState>,
    bring_ups: AtomicUsize,
    dropped: AtomicU64,
}

/// A piece of output destined for one buffer.
struct Piece {
    flags: BufferFlags,
    pts: Option<i64>,
    payload: Vec<u8>,
}

/// In-process stand-in for the camera, encoders and sinks.
pub struct SimulatedHardware {
    inner: Arc<Inner>,
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimulatedHardware {
    pub fn new(config: SimConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(SimState::default()),
                bring_ups: AtomicUsize::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Number of times the host was brought up.
    pub fn bring_up_count(&self) -> usize {
        self.inner.bring_ups.load(Ordering::SeqCst)
    }

    /// Live components.
    pub fn component_count(&self) -> usize {
        self.inner.state.lock().components.len()
    }

    /// Live components of one kind.
    pub fn components_of_kind(&self, kind: ComponentKind) -> Vec<ComponentId> {
        self.inner
            .state
            .lock()
            .components
            .iter()
            .filter(|(_, c)| c.kind == kind)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Recorded calls.
    pub fn ops(&self) -> Vec<SimOp> {
        self.inner.state.lock().ops.clone()
    }

    /// Last value set for a parameter on a port.
    pub fn parameter(&self, port: PortRef, id: ParameterId) -> Option<Parameter> {
        let state = self.inner.state.lock();
        state.port(port).ok()?.params.get(&id).cloned()
    }

    /// Last committed format of a port.
    pub fn committed_format(&self, port: PortRef) -> Option<PortFormat> {
        self.inner.state.lock().port(port).ok().map(|p| p.format)
    }

    /// Frames dropped because no buffer was available.
    pub fn frames_dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }

    /// Buffers currently held by a port.
    pub fn queued_buffers(&self, port: PortRef) -> usize {
        self.inner
            .state
            .lock()
            .port(port)
            .map(|p| p.queued.len())
            .unwrap_or(0)
    }

    fn rejection(&self, id: ParameterId) -> Option<Status> {
        self.inner
            .config
            .reject_parameters
            .iter()
            .find(|(rejected, _)| *rejected == id)
            .map(|(_, status)| *status)
    }

    fn layout(kind: ComponentKind) -> PortLayout {
        let (inputs, outputs) = match kind {
            ComponentKind::Camera => (0, 3),
            ComponentKind::CameraInfo => (0, 0),
            ComponentKind::VideoEncoder | ComponentKind::ImageEncoder => (1, 1),
            ComponentKind::VideoRenderer | ComponentKind::NullSink => (1, 0),
        };
        PortLayout { inputs, outputs }
    }

    fn negotiate(kind: ComponentKind, port: PortRef, format: &PortFormat) -> HalResult<PortFormat> {
        let mut negotiated = *format;
        let invalid = || HalError::status("commit format", Status::BadConfig);

        let (size_min, size_rec, num_min, num_rec) = match (kind, port.kind) {
            (ComponentKind::Camera, PortKind::Output) => {
                if !matches!(format.encoding, Encoding::Opaque | Encoding::I420) {
                    return Err(invalid());
                }
                let video = &format.video;
                if video.width == 0
                    || video.width % 32 != 0
                    || video.height % 16 != 0
                    || video.crop.width > video.width
                    || video.crop.height > video.height
                {
                    return Err(invalid());
                }
                (128, 128, 1, 1)
            }
            (ComponentKind::VideoEncoder, PortKind::Output) => {
                if !matches!(format.encoding, Encoding::H264 | Encoding::Mjpeg) {
                    return Err(invalid());
                }
                (2048, 65536, 1, 3)
            }
            (ComponentKind::ImageEncoder, PortKind::Output) => {
                if format.encoding != Encoding::Jpeg {
                    return Err(invalid());
                }
                (2048, 81920, 1, 3)
            }
            _ => (0, 0, 0, 0),
        };

        negotiated.buffer_size_min = size_min;
        negotiated.buffer_size_recommended = size_rec;
        negotiated.buffer_num_min = num_min;
        negotiated.buffer_num_recommended = num_rec;
        if negotiated.buffer_num == 0 {
            negotiated.buffer_num = num_rec;
        }
        negotiated.buffer_num = negotiated.buffer_num.max(num_min);
        if negotiated.buffer_size == 0 {
            negotiated.buffer_size = size_rec;
        }
        negotiated.buffer_size = negotiated.buffer_size.max(size_min);
        Ok(negotiated)
    }

    fn stop_producer(&self, port: PortRef) {
        let producer = {
            let mut state = self.inner.state.lock();
            state.port_mut(port).ok().and_then(|p| p.producer.take())
        };
        if let Some(producer) = producer {
            producer.stop.store(true, Ordering::SeqCst);
            if producer.handle.join().is_err() {
                warn!(%port, "Producer thread panicked");
            }
        }
    }

    fn spawn_producer(&self, port: PortRef, kind: ComponentKind) -> Producer {
        let stop = Arc::new(AtomicBool::new(false));
        let inner = Arc::clone(&self.inner);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || produce(inner, port, kind, thread_stop));
        Producer { stop, handle }
    }
}

impl Drop for SimulatedHardware {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        for component in state.components.values_mut() {
            for port in component.ports.values_mut() {
                if let Some(producer) = port.producer.take() {
                    producer.stop.store(true, Ordering::SeqCst);
                }
            }
        }
    }
}

impl Hardware for SimulatedHardware {
    fn bring_up(&self) -> HalResult<()> {
        self.inner.bring_ups.fetch_add(1, Ordering::SeqCst);
        self.inner.state.lock().ops.push(SimOp::BringUp);
        Ok(())
    }

    fn create_component(&self, kind: ComponentKind) -> HalResult<(ComponentId, PortLayout)> {
        if self.inner.config.fail_create == Some(kind) {
            return Err(HalError::status("create component", Status::NoMemory));
        }

        let layout = Self::layout(kind);
        let mut state = self.inner.state.lock();
        state.next_component += 1;
        let id = ComponentId(state.next_component);

        let mut ports = BTreeMap::new();
        ports.insert(PortRef::control(id), SimPort::new());
        for index in 0..layout.inputs {
            ports.insert(PortRef::input(id, index), SimPort::new());
        }
        for index in 0..layout.outputs {
            ports.insert(PortRef::output(id, index), SimPort::new());
        }

        state.components.insert(
            id,
            SimComponent {
                kind,
                enabled: false,
                ports,
            },
        );
        state.ops.push(SimOp::CreateComponent(id, kind));
        debug!(?id, name = kind.name(), "Simulated component created");
        Ok((id, layout))
    }

    fn destroy_component(&self, id: ComponentId) -> HalResult<()> {
        let ports: Vec<PortRef> = {
            let state = self.inner.state.lock();
            let component = state
                .components
                .get(&id)
                .ok_or(HalError::UnknownComponent(id))?;
            let connected = state
                .connections
                .values()
                .any(|c| c.output.component == id || c.input.component == id);
            if connected {
                return Err(HalError::status("destroy component", Status::IsConnected));
            }
            component.ports.keys().copied().collect()
        };

        for port in ports {
            self.stop_producer(port);
        }

        let mut state = self.inner.state.lock();
        state.components.remove(&id);
        state.ops.push(SimOp::DestroyComponent(id));
        Ok(())
    }

    fn enable_component(&self, id: ComponentId) -> HalResult<()> {
        let mut state = self.inner.state.lock();
        let component = state
            .components
            .get_mut(&id)
            .ok_or(HalError::UnknownComponent(id))?;
        component.enabled = true;
        state.ops.push(SimOp::EnableComponent(id));
        Ok(())
    }

    fn disable_component(&self, id: ComponentId) -> HalResult<()> {
        let mut state = self.inner.state.lock();
        let component = state
            .components
            .get_mut(&id)
            .ok_or(HalError::UnknownComponent(id))?;
        component.enabled = false;
        state.ops.push(SimOp::DisableComponent(id));
        Ok(())
    }

    fn set_parameter(&self, port: PortRef, param: &Parameter) -> HalResult<()> {
        let id = param.id();
        if let Some(status) = self.rejection(id) {
            return Err(HalError::status("set parameter", status));
        }

        let mut state = self.inner.state.lock();
        let kind = state
            .kind(port.component)
            .ok_or(HalError::UnknownComponent(port.component))?;
        state.port_mut(port)?.params.insert(id, param.clone());
        state.ops.push(SimOp::SetParameter(port, id));
        let target = state.port_mut(port)?;

        if let Parameter::ChangeEventRequest {
            id: ParameterId::CameraSettings,
            enable: true,
        } = param
        {
            if kind == ComponentKind::Camera {
                if let PortSink::Events(tx) = &target.sink {
                    let settings = CameraSettings {
                        exposure: 33_000,
                        analog_gain: Rational::new(1, 1),
                        digital_gain: Rational::new(1, 1),
                        awb_red_gain: Rational::new(3, 2),
                        awb_blue_gain: Rational::new(7, 4),
                        focus_position: 0,
                    };
                    if tx.try_send(ControlEvent::SettingsChanged(settings)).is_err() {
                        trace!(%port, "Control event dropped");
                    }
                }
            }
        }
        Ok(())
    }

    fn get_parameter(&self, port: PortRef, id: ParameterId) -> HalResult<Parameter> {
        let state = self.inner.state.lock();
        let kind = state
            .kind(port.component)
            .ok_or(HalError::UnknownComponent(port.component))?;

        if kind == ComponentKind::CameraInfo && id == ParameterId::CameraInfo {
            return self
                .inner
                .config
                .sensor
                .clone()
                .map(Parameter::CameraInfo)
                .ok_or(HalError::status("get camera info", Status::NotFound));
        }

        let target = state.port(port)?;
        match (target.params.get(&id), id) {
            (Some(value), _) => Ok(value.clone()),
            (None, ParameterId::InputCrop) => {
                Ok(Parameter::InputCrop(Rect::new(0, 0, 65536, 65536)))
            }
            (None, _) => Err(HalError::status("get parameter", Status::NotFound)),
        }
    }

    fn commit_format(&self, port: PortRef, format: &PortFormat) -> HalResult<PortFormat> {
        let mut state = self.inner.state.lock();
        let kind = state
            .kind(port.component)
            .ok_or(HalError::UnknownComponent(port.component))?;
        let negotiated = Self::negotiate(kind, port, format)?;
        state.port_mut(port)?.format = negotiated;
        Ok(negotiated)
    }

    fn enable_port(&self, port: PortRef, sink: PortSink) -> HalResult<()> {
        let kind = {
            let mut state = self.inner.state.lock();
            let kind = state
                .kind(port.component)
                .ok_or(HalError::UnknownComponent(port.component))?;
            let target = state.port_mut(port)?;
            if target.enabled {
                return Err(HalError::status("enable port", Status::Invalid));
            }
            target.enabled = true;
            target.sink = sink;
            state.ops.push(SimOp::EnablePort(port));
            kind
        };

        let produces = port.kind == PortKind::Output
            && matches!(kind, ComponentKind::VideoEncoder | ComponentKind::ImageEncoder);
        if produces {
            let producer = self.spawn_producer(port, kind);
            let mut state = self.inner.state.lock();
            state.port_mut(port)?.producer = Some(producer);
        }
        Ok(())
    }

    fn disable_port(&self, port: PortRef) -> HalResult<()> {
        {
            let mut state = self.inner.state.lock();
            let target = state.port_mut(port)?;
            if !target.enabled {
                return Ok(());
            }
            target.enabled = false;
        }

        self.stop_producer(port);

        let (sink, buffers) = {
            let mut state = self.inner.state.lock();
            state.ops.push(SimOp::DisablePort(port));
            let target = state.port_mut(port)?;
            let sink = std::mem::replace(&mut target.sink, PortSink::None);
            let buffers: Vec<BufferHeader> = target.queued.drain(..).collect();
            (sink, buffers)
        };

        if let PortSink::Buffers(tx) = sink {
            trace!(%port, returned = buffers.len(), "Returning buffers on disable");
            for mut buffer in buffers {
                buffer.reset();
                if tx.send(buffer).is_err() {
                    warn!(%port, "Buffer returned to a closed sink");
                    break;
                }
            }
        }
        Ok(())
    }

    fn send_buffer(&self, port: PortRef, buffer: BufferHeader) -> Result<(), Rejected> {
        let mut state = self.inner.state.lock();
        match state.port_mut(port) {
            Ok(target) if target.enabled && port.kind == PortKind::Output => {
                target.queued.push_back(buffer);
                Ok(())
            }
            Ok(_) => Err(Rejected {
                buffer,
                error: HalError::status("send buffer", Status::Invalid),
            }),
            Err(error) => Err(Rejected { buffer, error }),
        }
    }

    fn create_connection(&self, output: PortRef, input: PortRef) -> HalResult<ConnectionId> {
        let mut state = self.inner.state.lock();
        let format = state.port(output)?.format;
        state.port(input)?;
        let busy = state
            .connections
            .values()
            .any(|c| c.output == output || c.input == input);
        if busy {
            return Err(HalError::status("create connection", Status::IsConnected));
        }

        state.port_mut(input)?.format = format;
        state.next_connection += 1;
        let id = ConnectionId(state.next_connection);
        state.connections.insert(
            id,
            SimConnection {
                output,
                input,
                enabled: false,
            },
        );
        state.ops.push(SimOp::CreateConnection(id));
        Ok(id)
    }

    fn enable_connection(&self, id: ConnectionId) -> HalResult<()> {
        if self.inner.config.fail_connection_enable {
            return Err(HalError::status("enable connection", Status::Io));
        }
        let mut state = self.inner.state.lock();
        let (output, input) = {
            let connection = state
                .connections
                .get_mut(&id)
                .ok_or(HalError::UnknownConnection(id))?;
            connection.enabled = true;
            (connection.output, connection.input)
        };
        state.port_mut(output)?.enabled = true;
        state.port_mut(input)?.enabled = true;
        state.ops.push(SimOp::EnableConnection(id));
        Ok(())
    }

    fn disable_connection(&self, id: ConnectionId) -> HalResult<()> {
        let mut state = self.inner.state.lock();
        let (output, input) = {
            let connection = state
                .connections
                .get_mut(&id)
                .ok_or(HalError::UnknownConnection(id))?;
            connection.enabled = false;
            (connection.output, connection.input)
        };
        for port in [output, input] {
            if let Ok(target) = state.port_mut(port) {
                target.enabled = false;
            }
        }
        state.ops.push(SimOp::DisableConnection(id));
        Ok(())
    }

    fn destroy_connection(&self, id: ConnectionId) -> HalResult<()> {
        let mut state = self.inner.state.lock();
        state
            .connections
            .remove(&id)
            .ok_or(HalError::status("destroy connection", Status::NotConnected))?;
        state.ops.push(SimOp::DestroyConnection(id));
        Ok(())
    }
}

/// Producer loop for one encoder output port.
fn produce(inner: Arc<Inner>, port: PortRef, kind: ComponentKind, stop: Arc<AtomicBool>) {
    let interval = inner.config.frame_interval;
    let interval_us = interval.as_micros() as i64;
    let base_pts = 1_000_000i64;
    let mut frame: u64 = 0;

    let pause = match kind {
        ComponentKind::VideoEncoder => interval,
        _ => STILL_POLL_INTERVAL,
    };

    trace!(%port, ?kind, "Producer started");
    while !stop.load(Ordering::SeqCst) {
        thread::sleep(pause);

        let pieces = {
            let mut state = inner.state.lock();
            match kind {
                ComponentKind::VideoEncoder => {
                    next_video_frame(&mut state, port, frame, base_pts + frame as i64 * interval_us)
                }
                _ => next_still_image(&mut state, port, &inner.config),
            }
        };

        let Some(pieces) = pieces else {
            continue;
        };
        frame += 1;

        for piece in pieces {
            if !deliver(&inner, port, piece, interval, &stop) {
                break;
            }
        }
    }
    trace!(%port, frames = frame, "Producer stopped");
}

fn next_video_frame(state: &mut SimState, port: PortRef, frame: u64, pts: i64) -> Option<Vec<Piece>> {
    state.capturing_source(port.component)?;
    let target = state.port_mut(port).ok()?;

    let intra_period = match target.params.get(&ParameterId::IntraPeriod) {
        Some(Parameter::IntraPeriod(p)) if *p > 0 => u64::from(*p),
        _ => DEFAULT_INTRA_PERIOD,
    };
    let requested = matches!(
        target.params.remove(&ParameterId::RequestIFrame),
        Some(Parameter::RequestIFrame(true))
    );
    let inline_headers = matches!(
        target.params.get(&ParameterId::InlineHeader),
        Some(Parameter::InlineHeader(true))
    );
    let inline_vectors = matches!(
        target.params.get(&ParameterId::InlineVectors),
        Some(Parameter::InlineVectors(true))
    );
    let keyframe = frame == 0 || frame % intra_period == 0 || requested;
    let marker = (frame % 251) as u8;

    let mut pieces = Vec::new();
    match target.format.encoding {
        Encoding::Mjpeg => pieces.push(Piece {
            flags: BufferFlags::FRAME_END,
            pts: Some(pts),
            payload: vec![marker; 64],
        }),
        _ => {
            if keyframe && (frame == 0 || inline_headers) {
                pieces.push(Piece {
                    flags: BufferFlags::CONFIG,
                    pts: None,
                    payload: vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce],
                });
            }
            if keyframe {
                pieces.push(Piece {
                    flags: BufferFlags::KEYFRAME | BufferFlags::FRAME_END,
                    pts: Some(pts),
                    payload: vec![marker; 96],
                });
            } else {
                pieces.push(Piece {
                    flags: BufferFlags::FRAME_START,
                    pts: Some(pts),
                    payload: vec![marker; 24],
                });
                pieces.push(Piece {
                    flags: BufferFlags::FRAME_END,
                    pts: Some(pts),
                    payload: vec![marker; 24],
                });
            }
            if inline_vectors {
                pieces.push(Piece {
                    flags: BufferFlags::CODECSIDEINFO,
                    pts: Some(pts),
                    payload: vec![0xaa; 8],
                });
            }
        }
    }
    Some(pieces)
}

fn next_still_image(state: &mut SimState, port: PortRef, config: &SimConfig) -> Option<Vec<Piece>> {
    let source = state.capturing_source(port.component)?;

    // One shot: the request is consumed by this image.
    if let Ok(camera_port) = state.port_mut(source) {
        camera_port
            .params
            .insert(ParameterId::Capture, Parameter::Capture(false));
    }

    let pts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);

    let size = config.still_size.max(4);
    let mut image = vec![0x5a; size];
    image[..2].copy_from_slice(&[0xff, 0xd8]);
    image[size - 2..].copy_from_slice(&[0xff, 0xd9]);

    let chunks = config.still_chunks.max(1);
    let chunk_len = size.div_ceil(chunks);
    let mut pieces: Vec<Piece> = image
        .chunks(chunk_len)
        .map(|chunk| Piece {
            flags: BufferFlags::empty(),
            pts: Some(pts),
            payload: chunk.to_vec(),
        })
        .collect();
    if let Some(last) = pieces.last_mut() {
        last.flags = if config.transmission_failure {
            BufferFlags::TRANSMISSION_FAILED
        } else {
            BufferFlags::FRAME_END
        };
    }
    Some(pieces)
}

/// Fill one buffer handed over by the application and complete it.
///
/// Returns false if the piece could not be delivered.
fn deliver(inner: &Inner, port: PortRef, piece: Piece, wait: Duration, stop: &AtomicBool) -> bool {
    let mut waited = Duration::ZERO;
    loop {
        let ready = {
            let mut state = inner.state.lock();
            let Ok(target) = state.port_mut(port) else {
                return false;
            };
            let PortSink::Buffers(tx) = &target.sink else {
                return false;
            };
            let tx = tx.clone();
            target.queued.pop_front().map(|buffer| (buffer, tx))
        };

        if let Some((mut buffer, tx)) = ready {
            buffer.fill(&piece.payload);
            buffer.flags = piece.flags;
            buffer.pts = piece.pts;
            return tx.send(buffer).is_ok();
        }

        if stop.load(Ordering::SeqCst) || waited >= wait {
            inner.dropped.fetch_add(1, Ordering::SeqCst);
            trace!(%port, "No buffer available, dropping output");
            return false;
        }
        thread::sleep(BUFFER_WAIT);
        waited += BUFFER_WAIT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_camera_alignment() {
        let port = PortRef::output(ComponentId(1), 1);
        let mut format = PortFormat {
            encoding: Encoding::Opaque,
            ..PortFormat::default()
        };
        format.video.width = 1280;
        format.video.height = 728;
        assert!(SimulatedHardware::negotiate(ComponentKind::Camera, port, &format).is_err());

        format.video.height = 720;
        let negotiated = SimulatedHardware::negotiate(ComponentKind::Camera, port, &format).unwrap();
        assert_eq!(negotiated.buffer_num_recommended, 1);
    }

    #[test]
    fn test_negotiate_encoder_buffers() {
        let port = PortRef::output(ComponentId(1), 0);
        let format = PortFormat {
            encoding: Encoding::H264,
            buffer_size: 16,
            ..PortFormat::default()
        };
        let negotiated =
            SimulatedHardware::negotiate(ComponentKind::VideoEncoder, port, &format).unwrap();
        assert_eq!(negotiated.buffer_size, 2048);
        assert_eq!(negotiated.buffer_num, 3);
    }

    #[test]
    fn test_send_buffer_to_disabled_port_is_rejected() {
        let sim = SimulatedHardware::default();
        let (id, _) = sim.create_component(ComponentKind::VideoEncoder).unwrap();
        let buffer = BufferHeader::new(0, 16);
        let rejected = sim.send_buffer(PortRef::output(id, 0), buffer).unwrap_err();
        assert_eq!(rejected.buffer.index(), 0);
        assert_eq!(rejected.error.status_code(), Some(Status::Invalid));
    }

    #[test]
    fn test_camera_info_fallback() {
        let sim = SimulatedHardware::new(SimConfig {
            sensor: None,
            ..SimConfig::default()
        });
        let (id, _) = sim.create_component(ComponentKind::CameraInfo).unwrap();
        let err = sim
            .get_parameter(PortRef::control(id), ParameterId::CameraInfo)
            .unwrap_err();
        assert_eq!(err.status_code(), Some(Status::NotFound));
    }

    #[test]
    fn test_disable_returns_queued_buffers() {
        let sim = SimulatedHardware::default();
        let (id, _) = sim.create_component(ComponentKind::VideoEncoder).unwrap();
        let port = PortRef::output(id, 0);
        let (tx, rx) = crossbeam_channel::bounded(4);
        sim.enable_port(port, PortSink::Buffers(tx)).unwrap();
        for index in 0..2 {
            sim.send_buffer(port, BufferHeader::new(index, 16)).unwrap();
        }
        assert_eq!(sim.queued_buffers(port), 2);

        sim.disable_port(port).unwrap();
        let returned: Vec<_> = rx.iter().collect();
        assert_eq!(returned.len(), 2);
        assert!(returned.iter().all(|b| b.length() == 0));
    }
}
