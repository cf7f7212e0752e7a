//! Arena of components, ports, connections and pools for one session.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, info, instrument, warn};

use crate::buffer::BufferHeader;
use crate::error::{HalError, Status};
use crate::format::PortFormat;
use crate::param::{Parameter, ParameterId};
use crate::pool::{BufferPool, PortFeeder};
use crate::{
    ComponentId, ComponentKind, ConnectionId, ControlEvent, HalResult, Hardware, PortKind,
    PortLayout, PortRef, PortSink,
};

/// Capacity of a control port's event queue.
const CONTROL_EVENT_CAPACITY: usize = 16;

/// A port and its local state.
pub struct Port {
    port: PortRef,
    format: PortFormat,
    enabled: Arc<AtomicBool>,
    connection: Option<ConnectionId>,
}

impl Port {
    fn new(port: PortRef) -> Self {
        Self {
            port,
            format: PortFormat::default(),
            enabled: Arc::new(AtomicBool::new(false)),
            connection: None,
        }
    }

    pub fn port_ref(&self) -> PortRef {
        self.port
    }

    pub fn format(&self) -> &PortFormat {
        &self.format
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }
}

/// A live component.
pub struct Component {
    id: ComponentId,
    kind: ComponentKind,
    layout: PortLayout,
    enabled: bool,
    ports: BTreeMap<PortRef, Port>,
}

impl Component {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn layout(&self) -> PortLayout {
        self.layout
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }
}

struct Connection {
    output: PortRef,
    input: PortRef,
    enabled: bool,
}

/// Owns every hardware object built for one session.
pub struct Graph {
    hw: Arc<dyn Hardware>,
    components: BTreeMap<ComponentId, Component>,
    connections: BTreeMap<ConnectionId, Connection>,
    pools: BTreeMap<PortRef, Arc<BufferPool>>,
}

impl Graph {
    pub(crate) fn new(hw: Arc<dyn Hardware>) -> Self {
        Self {
            hw,
            components: BTreeMap::new(),
            connections: BTreeMap::new(),
            pools: BTreeMap::new(),
        }
    }

    /// The underlying hardware.
    pub fn hardware(&self) -> &Arc<dyn Hardware> {
        &self.hw
    }

    /// Instantiate a component and register its ports.
    #[instrument(name = "create_component", skip(self))]
    pub fn create_component(&mut self, kind: ComponentKind) -> HalResult<ComponentId> {
        let (id, layout) = self.hw.create_component(kind)?;

        let mut ports = BTreeMap::new();
        let control = PortRef::control(id);
        ports.insert(control, Port::new(control));
        for index in 0..layout.inputs {
            let port = PortRef::input(id, index);
            ports.insert(port, Port::new(port));
        }
        for index in 0..layout.outputs {
            let port = PortRef::output(id, index);
            ports.insert(port, Port::new(port));
        }

        debug!(?id, name = kind.name(), inputs = layout.inputs, outputs = layout.outputs, "Component created");
        self.components.insert(
            id,
            Component {
                id,
                kind,
                layout,
                enabled: false,
                ports,
            },
        );
        Ok(id)
    }

    /// Look up a component.
    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(&id)
    }

    /// Look up a port.
    pub fn port(&self, port: PortRef) -> Option<&Port> {
        self.components.get(&port.component)?.ports.get(&port)
    }

    fn port_mut(&mut self, port: PortRef) -> HalResult<&mut Port> {
        self.components
            .get_mut(&port.component)
            .and_then(|c| c.ports.get_mut(&port))
            .ok_or(HalError::UnknownPort(port))
    }

    /// Returns true if the port exists and is enabled.
    pub fn is_port_enabled(&self, port: PortRef) -> bool {
        self.port(port).map(Port::is_enabled).unwrap_or(false)
    }

    /// Enable a component.
    pub fn enable_component(&mut self, id: ComponentId) -> HalResult<()> {
        let component = self
            .components
            .get_mut(&id)
            .ok_or(HalError::UnknownComponent(id))?;
        if !component.enabled {
            self.hw.enable_component(id)?;
            component.enabled = true;
        }
        Ok(())
    }

    /// Disable a component. A no-op if it is unknown or already disabled.
    pub fn disable_component(&mut self, id: ComponentId) -> HalResult<()> {
        if let Some(component) = self.components.get_mut(&id) {
            if component.enabled {
                self.hw.disable_component(id)?;
                component.enabled = false;
            }
        }
        Ok(())
    }

    /// Set a parameter on a port.
    pub fn set_parameter(&self, port: PortRef, param: &Parameter) -> HalResult<()> {
        if self.port(port).is_none() {
            return Err(HalError::UnknownPort(port));
        }
        self.hw.set_parameter(port, param)
    }

    /// Read a parameter from a port.
    pub fn get_parameter(&self, port: PortRef, id: ParameterId) -> HalResult<Parameter> {
        if self.port(port).is_none() {
            return Err(HalError::UnknownPort(port));
        }
        self.hw.get_parameter(port, id)
    }

    /// The current format of a port.
    pub fn format(&self, port: PortRef) -> HalResult<PortFormat> {
        self.port(port)
            .map(|p| p.format)
            .ok_or(HalError::UnknownPort(port))
    }

    /// Copy one port's format onto another without committing it.
    pub fn copy_format(&mut self, from: PortRef, to: PortRef) -> HalResult<()> {
        let format = self.format(from)?;
        self.port_mut(to)?.format = format;
        Ok(())
    }

    /// Commit a format; the negotiated result is stored and returned.
    pub fn commit_format(&mut self, port: PortRef, format: PortFormat) -> HalResult<PortFormat> {
        self.port_mut(port)?;
        let negotiated = self.hw.commit_format(port, &format)?;
        self.port_mut(port)?.format = negotiated;
        debug!(
            %port,
            encoding = ?negotiated.encoding,
            width = negotiated.video.width,
            height = negotiated.video.height,
            buffer_num = negotiated.buffer_num,
            buffer_size = negotiated.buffer_size,
            "Format committed"
        );
        Ok(negotiated)
    }

    /// Set the buffer count and size a pool on this port will use.
    pub fn set_buffer_requirements(&mut self, port: PortRef, num: u32, size: u32) -> HalResult<()> {
        let port = self.port_mut(port)?;
        port.format.buffer_num = num;
        port.format.buffer_size = size;
        Ok(())
    }

    /// Enable an output port whose filled buffers are returned to the
    /// application. Completions arrive on the returned receiver.
    pub fn enable_output(&mut self, port: PortRef) -> HalResult<Receiver<BufferHeader>> {
        let capacity = match self.pools.get(&port) {
            Some(pool) => pool.capacity(),
            None => self.format(port)?.buffer_num as usize,
        }
        .max(1);

        self.ensure_enableable(port, PortKind::Output)?;
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        self.hw.enable_port(port, PortSink::Buffers(tx))?;
        self.port_mut(port)?.enabled.store(true, Ordering::SeqCst);
        debug!(%port, "Output port enabled");
        Ok(rx)
    }

    /// Enable a control port. Events arrive on the returned receiver.
    pub fn enable_control(&mut self, port: PortRef) -> HalResult<Receiver<ControlEvent>> {
        self.ensure_enableable(port, PortKind::Control)?;
        let (tx, rx) = crossbeam_channel::bounded(CONTROL_EVENT_CAPACITY);
        self.hw.enable_port(port, PortSink::Events(tx))?;
        self.port_mut(port)?.enabled.store(true, Ordering::SeqCst);
        debug!(%port, "Control port enabled");
        Ok(rx)
    }

    fn ensure_enableable(&self, port: PortRef, kind: PortKind) -> HalResult<()> {
        let state = self.port(port).ok_or(HalError::UnknownPort(port))?;
        if port.kind != kind || state.is_enabled() || state.connection.is_some() {
            return Err(HalError::status("enable port", Status::Invalid));
        }
        Ok(())
    }

    /// Disable a port if it exists and is enabled.
    pub fn disable_port(&mut self, port: PortRef) -> HalResult<()> {
        let Some(state) = self.port(port) else {
            return Ok(());
        };
        if !state.is_enabled() {
            return Ok(());
        }
        // Clear first so completions in flight are not resubmitted.
        state.enabled.store(false, Ordering::SeqCst);
        self.hw.disable_port(port)?;
        debug!(%port, "Port disabled");
        Ok(())
    }

    /// Create and enable a tunnelled connection.
    ///
    /// If enabling fails the connection is destroyed before the error is
    /// returned.
    #[instrument(name = "connect_ports", skip(self))]
    pub fn connect(&mut self, output: PortRef, input: PortRef) -> HalResult<ConnectionId> {
        for (port, kind) in [(output, PortKind::Output), (input, PortKind::Input)] {
            let state = self.port(port).ok_or(HalError::UnknownPort(port))?;
            if port.kind != kind {
                return Err(HalError::status("create connection", Status::Invalid));
            }
            if state.connection.is_some() || state.is_enabled() {
                return Err(HalError::status("create connection", Status::IsConnected));
            }
        }

        let id = self.hw.create_connection(output, input)?;

        if let Err(e) = self.hw.enable_connection(id) {
            warn!(?id, "Connection enable failed: {}", e);
            if let Err(destroy) = self.hw.destroy_connection(id) {
                warn!(?id, "Failed to destroy connection after enable failure: {}", destroy);
            }
            return Err(e);
        }

        // Formats propagate across the connection.
        let format = self.format(output)?;
        for port in [output, input] {
            let state = self.port_mut(port)?;
            state.connection = Some(id);
            state.enabled.store(true, Ordering::SeqCst);
        }
        self.port_mut(input)?.format = format;

        self.connections.insert(
            id,
            Connection {
                output,
                input,
                enabled: true,
            },
        );
        info!(?id, %output, %input, "Ports connected");
        Ok(id)
    }

    /// Disable and destroy a connection. A no-op for `None`.
    pub fn disconnect(&mut self, id: Option<ConnectionId>) -> HalResult<()> {
        let Some(id) = id else {
            return Ok(());
        };
        let Some(connection) = self.connections.get_mut(&id) else {
            return Ok(());
        };

        if connection.enabled {
            self.hw.disable_connection(id)?;
            connection.enabled = false;
        }
        self.hw.destroy_connection(id)?;

        if let Some(connection) = self.connections.remove(&id) {
            for port in [connection.output, connection.input] {
                if let Ok(state) = self.port_mut(port) {
                    state.connection = None;
                    state.enabled.store(false, Ordering::SeqCst);
                }
            }
        }
        debug!(?id, "Connection destroyed");
        Ok(())
    }

    /// Connection ids in creation order.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Create the buffer pool for an output port from its committed format.
    pub fn create_pool(&mut self, port: PortRef) -> HalResult<Arc<BufferPool>> {
        if self.pools.contains_key(&port) {
            return Err(HalError::PoolExists(port));
        }
        let format = self.format(port)?;
        if port.kind != PortKind::Output || format.buffer_num == 0 || format.buffer_size == 0 {
            return Err(HalError::status("create pool", Status::NoMemory));
        }
        let pool = Arc::new(BufferPool::new(
            port,
            format.buffer_num as usize,
            format.buffer_size as usize,
        ));
        self.pools.insert(port, Arc::clone(&pool));
        Ok(pool)
    }

    /// The pool owned by a port.
    pub fn pool(&self, port: PortRef) -> Option<Arc<BufferPool>> {
        self.pools.get(&port).cloned()
    }

    /// Release the pool owned by a port. A no-op if there is none.
    pub fn destroy_pool(&mut self, port: PortRef) {
        if let Some(pool) = self.pools.remove(&port) {
            let (available, in_flight) = pool.counts();
            if in_flight > 0 {
                warn!(%port, available, in_flight, "Destroying pool with buffers in flight");
            }
            debug!(%port, "Buffer pool destroyed");
        }
    }

    /// A feeder that recycles buffers between a port and its pool.
    pub fn feeder(&self, port: PortRef) -> HalResult<PortFeeder> {
        let pool = self.pool(port).ok_or(HalError::NoPool(port))?;
        let state = self.port(port).ok_or(HalError::UnknownPort(port))?;
        Ok(PortFeeder::new(
            Arc::clone(&self.hw),
            port,
            Arc::clone(&state.enabled),
            pool,
        ))
    }

    /// Destroy a component, releasing its pools first.
    ///
    /// Fails if any connection still references the component.
    pub fn destroy_component(&mut self, id: ComponentId) -> HalResult<()> {
        let Some(component) = self.components.get(&id) else {
            return Ok(());
        };
        let connected = component.ports.values().any(|p| p.connection.is_some());
        if connected {
            return Err(HalError::StillConnected(id));
        }

        let ports: Vec<PortRef> = component.ports.keys().copied().collect();
        for port in &ports {
            self.disable_port(*port)?;
        }
        for port in &ports {
            self.destroy_pool(*port);
        }
        self.disable_component(id)?;
        self.hw.destroy_component(id)?;
        self.components.remove(&id);
        debug!(?id, "Component destroyed");
        Ok(())
    }

    /// Component ids in creation order.
    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.components.keys().copied().collect()
    }

    /// Disable every enabled port that no connection manages.
    pub fn disable_unconnected_ports(&mut self) {
        let ports: Vec<PortRef> = self
            .components
            .values()
            .flat_map(|c| c.ports.values())
            .filter(|p| p.connection.is_none() && p.is_enabled())
            .map(|p| p.port)
            .collect();
        for port in ports {
            if let Err(e) = self.disable_port(port) {
                warn!(%port, "Failed to disable port: {}", e);
            }
        }
    }

    /// Disable and destroy every connection.
    pub fn destroy_connections(&mut self) {
        for id in self.connection_ids() {
            if let Err(e) = self.disconnect(Some(id)) {
                warn!(?id, "Failed to destroy connection: {}", e);
                self.connections.remove(&id);
            }
        }
    }

    /// Disable every component, newest first.
    pub fn disable_components(&mut self) {
        for id in self.component_ids().into_iter().rev() {
            if let Err(e) = self.disable_component(id) {
                warn!(?id, "Failed to disable component: {}", e);
            }
        }
    }

    /// Release every pool.
    pub fn destroy_pools(&mut self) {
        let ports: Vec<PortRef> = self.pools.keys().copied().collect();
        for port in ports {
            self.destroy_pool(port);
        }
    }

    /// Destroy every component, newest first.
    pub fn destroy_components(&mut self) {
        for id in self.component_ids().into_iter().rev() {
            if let Err(e) = self.destroy_component(id) {
                warn!(?id, "Failed to destroy component: {}", e);
                self.components.remove(&id);
            }
        }
    }

    /// Returns true once everything has been released.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.connections.is_empty() && self.pools.is_empty()
    }
}
