//! Hardware capability, component graph and buffer pools.
//!
//! The multimedia stack is reached only through the [`Hardware`] trait.
//! [`Graph`] owns every component, port, connection and pool created for
//! one session and keeps them keyed by stable ids, so ports and pools refer
//! to their owner by value rather than by pointer.

mod buffer;
mod error;
mod format;
mod graph;
mod host;
mod param;
mod pool;
pub mod sim;

pub use buffer::{BufferFlags, BufferHeader};
pub use error::{HalError, Rejected, Status};
pub use format::{align_up, Encoding, PortFormat, Rect, VideoFormat};
pub use graph::{Component, Graph, Port};
pub use host::Host;
pub use param::{
    CameraConfig, CameraInfo, CameraSettings, DisplayRegion, IntraRefresh, Mirror, Parameter,
    ParameterId, Rational, TextAnnotation, Thumbnail,
};
pub use pool::{BufferPool, PortFeeder};

use std::fmt;

use crossbeam_channel::Sender;

/// Result type for hardware operations.
pub type HalResult<T> = Result<T, HalError>;

/// Stable identifier of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub u32);

/// Stable identifier of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u32);

/// Port direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PortKind {
    Control,
    Input,
    Output,
}

/// A port addressed by owning component, direction and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRef {
    pub component: ComponentId,
    pub kind: PortKind,
    pub index: u8,
}

impl PortRef {
    /// The control port of a component.
    pub fn control(component: ComponentId) -> Self {
        Self {
            component,
            kind: PortKind::Control,
            index: 0,
        }
    }

    /// An input port of a component.
    pub fn input(component: ComponentId, index: u8) -> Self {
        Self {
            component,
            kind: PortKind::Input,
            index,
        }
    }

    /// An output port of a component.
    pub fn output(component: ComponentId, index: u8) -> Self {
        Self {
            component,
            kind: PortKind::Output,
            index,
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            PortKind::Control => "control",
            PortKind::Input => "in",
            PortKind::Output => "out",
        };
        write!(f, "{}:{}{}", self.component.0, kind, self.index)
    }
}

/// Kinds of processing stage the hardware can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Camera,
    CameraInfo,
    VideoEncoder,
    ImageEncoder,
    VideoRenderer,
    NullSink,
}

impl ComponentKind {
    /// Returns the vendor component name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Camera => "vc.ril.camera",
            Self::CameraInfo => "vc.camera_info",
            Self::VideoEncoder => "vc.ril.video_encode",
            Self::ImageEncoder => "vc.ril.image_encode",
            Self::VideoRenderer => "vc.ril.video_render",
            Self::NullSink => "vc.null_sink",
        }
    }
}

/// Number of ports a freshly created component exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLayout {
    pub inputs: u8,
    pub outputs: u8,
}

/// Events delivered on a control port.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Camera settings changed.
    SettingsChanged(CameraSettings),

    /// The component reported an error.
    Error(Status),
}

/// Where an enabled port delivers its completions.
#[derive(Debug, Clone)]
pub enum PortSink {
    /// Tunnelled or otherwise application-invisible.
    None,

    /// Filled buffers from an output port.
    Buffers(Sender<BufferHeader>),

    /// Events from a control port.
    Events(Sender<ControlEvent>),
}

/// The hardware capability the pipeline is built on.
///
/// Implementations deliver completions on their own threads through the
/// sink handed to [`Hardware::enable_port`], and return every queued buffer
/// through that sink before [`Hardware::disable_port`] returns.
pub trait Hardware: Send + Sync {
    /// One-time host bring-up.
    fn bring_up(&self) -> HalResult<()>;

    /// Instantiate a component.
    fn create_component(&self, kind: ComponentKind) -> HalResult<(ComponentId, PortLayout)>;

    /// Destroy a component. It must have no live connections.
    fn destroy_component(&self, id: ComponentId) -> HalResult<()>;

    /// Enable a component.
    fn enable_component(&self, id: ComponentId) -> HalResult<()>;

    /// Disable a component.
    fn disable_component(&self, id: ComponentId) -> HalResult<()>;

    /// Set a parameter on a port.
    fn set_parameter(&self, port: PortRef, param: &Parameter) -> HalResult<()>;

    /// Read a parameter from a port.
    fn get_parameter(&self, port: PortRef, id: ParameterId) -> HalResult<Parameter>;

    /// Commit a format and return what the hardware negotiated.
    fn commit_format(&self, port: PortRef, format: &PortFormat) -> HalResult<PortFormat>;

    /// Enable a port with the given completion sink.
    fn enable_port(&self, port: PortRef, sink: PortSink) -> HalResult<()>;

    /// Disable a port, returning any buffers it holds.
    fn disable_port(&self, port: PortRef) -> HalResult<()>;

    /// Hand an empty buffer to an output port.
    fn send_buffer(&self, port: PortRef, buffer: BufferHeader) -> Result<(), Rejected>;

    /// Create a tunnelled connection with allocation on the input side.
    fn create_connection(&self, output: PortRef, input: PortRef) -> HalResult<ConnectionId>;

    /// Enable a connection.
    fn enable_connection(&self, id: ConnectionId) -> HalResult<()>;

    /// Disable a connection.
    fn disable_connection(&self, id: ConnectionId) -> HalResult<()>;

    /// Destroy a connection.
    fn destroy_connection(&self, id: ConnectionId) -> HalResult<()>;
}
