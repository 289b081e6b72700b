use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::interval;
use tracing::{debug, error, info, trace, warn};

use crate::messaging::command::{Command, CommandShape, EventCategory};
use crate::messaging::config::ProtocolConfig;
use crate::messaging::correlator::TicketCorrelator;
use crate::messaging::datagram::DatagramHeader;
use crate::messaging::error::{CallResult, FunctionError};
use crate::messaging::fragments::{ImageFragment, ImageReassembler};
use crate::messaging::peer::PeerTasks;
use crate::messaging::ticket::{Ticket, TicketGenerator};
use crate::messaging::transport::{DatagramHandler, Transport};
use crate::util::random::RngRandom;
use crate::vehicle::data::{CameraState, LatLng, Twist, UtmPose, WaypointState};
use crate::vehicle::events::{PushMessage, VehicleEvent};
use crate::vehicle::listeners::{ListenerId, ListenerRegistry, VehicleListener};
use crate::vehicle::messages::{encode_request, Reply, Request};
use crate::vehicle::server::AsyncVehicleServer;

/// The operator side of the protocol: a proxy for a remote vehicle.
///
/// Two-way calls are sent with a ticket and complete when the matching reply arrives, or fail
///  when the transport gives up on the ticket. Local listeners keep their subscription on the
///  vehicle alive by periodic registrations, see [UdpVehicleClient::send_registrations].
pub struct UdpVehicleClient {
    config: Arc<ProtocolConfig>,
    transport: Arc<dyn Transport>,
    vehicle: RwLock<Option<SocketAddr>>,
    registry: RwLock<Option<SocketAddr>>,
    tickets: TicketGenerator,
    correlator: TicketCorrelator<(Command, Reply)>,
    listeners: ListenerRegistry,
    reassembler: Mutex<ImageReassembler>,
}

impl UdpVehicleClient {
    pub fn new(config: Arc<ProtocolConfig>, transport: Arc<dyn Transport>) -> Arc<UdpVehicleClient> {
        Arc::new(UdpVehicleClient {
            reassembler: Mutex::new(ImageReassembler::new(&config)),
            config,
            transport,
            vehicle: Default::default(),
            registry: Default::default(),
            tickets: TicketGenerator::with_random::<RngRandom>(),
            correlator: TicketCorrelator::new(),
            listeners: ListenerRegistry::new(),
        })
    }

    /// Spawns the receive loop and the listener registration heartbeat.
    pub fn start(self: &Arc<Self>) -> PeerTasks {
        info!("starting vehicle client on {:?}", self.transport.local_addr());
        let client = self.clone();
        PeerTasks::spawn(self.transport.clone(), self.clone(), async move { client.run_registration_loop().await })
    }

    async fn run_registration_loop(&self) {
        let mut heartbeat = interval(self.config.registration_interval);
        loop {
            heartbeat.tick().await;
            self.send_registrations().await;
        }
    }

    /// Renews the vehicle-side subscription for every category that has local listeners.
    pub async fn send_registrations(&self) {
        let Some(vehicle) = self.vehicle_service() else {
            trace!("no vehicle configured - skipping listener registration");
            return;
        };

        for category in self.listeners.categories_with_listeners() {
            match encode_request(&self.config, Ticket::NONE, &Request::RegisterListener(category)) {
                Ok(datagram) => {
                    if let Err(e) = self.transport.send_unreliable(vehicle, &datagram).await {
                        warn!("failed to send {:?} listener registration: {}", category, e);
                    }
                }
                Err(e) => error!("could not encode {:?} listener registration: {}", category, e),
            }
        }
    }

    pub fn vehicle_service(&self) -> Option<SocketAddr> {
        *self.vehicle.read().unwrap()
    }

    /// Sets the vehicle this client talks to. If a registry is configured, it is asked to tell the
    ///  vehicle about this client so that the vehicle can reach it through NAT.
    pub async fn set_vehicle_service(&self, vehicle: Option<SocketAddr>) {
        *self.vehicle.write().unwrap() = vehicle;

        let (Some(vehicle), Some(registry)) = (vehicle, self.registry_service()) else {
            return;
        };

        debug!("asking registry {:?} to connect to {:?}", registry, vehicle);
        let request = Request::Connect { host: vehicle.ip().to_string(), port: vehicle.port() as i32 };
        // the vehicle answers with this ticket, but nobody waits for it
        let datagram = match encode_request(&self.config, self.tickets.next_ticket(), &request) {
            Ok(datagram) => datagram,
            Err(e) => {
                error!("could not encode connect request: {}", e);
                return;
            }
        };
        if let Err(e) = self.transport.send_unreliable(registry, &datagram).await {
            warn!("failed to send connect request to registry {:?}: {}", registry, e);
        }
    }

    pub fn registry_service(&self) -> Option<SocketAddr> {
        *self.registry.read().unwrap()
    }

    pub fn set_registry_service(&self, registry: Option<SocketAddr>) {
        *self.registry.write().unwrap() = registry;
    }

    /// The vehicles currently registered with the registry, by name.
    pub async fn vehicle_services(&self) -> CallResult<Vec<(String, SocketAddr)>> {
        let services = match self.call_peer(self.registry_service(), Request::List).await? {
            Reply::Services(services) => services,
            other => return unexpected(other),
        };

        Ok(services.into_iter()
            .filter_map(|s| match format!("{}:{}", s.host, s.port).parse() {
                Ok(addr) => Some((s.name, addr)),
                Err(_) => {
                    warn!("registry listed {} with invalid address {}:{} - skipping", s.name, s.host, s.port);
                    None
                }
            })
            .collect())
    }

    /// Sends a request to the vehicle without a ticket: there is no reply, and no retransmission.
    ///  This suits high-rate commands where the next one supersedes a lost one, e.g. velocities.
    pub async fn send_unacknowledged(&self, request: &Request) -> CallResult<()> {
        let Some(vehicle) = self.vehicle_service() else {
            debug!("no vehicle configured for {:?}", request.command());
            return Err(FunctionError::Error);
        };
        let datagram = encode_request(&self.config, Ticket::NONE, request)
            .map_err(|e| {
                warn!("could not encode {:?}: {}", request.command(), e);
                FunctionError::Error
            })?;

        if let Err(e) = self.transport.send_unreliable(vehicle, &datagram).await {
            warn!("failed to send {:?}: {}", request.command(), e);
        }
        Ok(())
    }

    pub fn num_pending_calls(&self) -> usize {
        self.correlator.num_pending()
    }

    async fn call(&self, request: Request) -> CallResult<Reply> {
        self.call_peer(self.vehicle_service(), request).await
    }

    async fn call_peer(&self, to: Option<SocketAddr>, request: Request) -> CallResult<Reply> {
        let command = request.command();
        let Some(to) = to else {
            debug!("no destination configured for {:?}", command);
            return Err(FunctionError::Error);
        };

        let ticket = self.tickets.next_ticket();
        let datagram = encode_request(&self.config, ticket, &request)
            .map_err(|e| {
                warn!("could not encode {:?}: {}", command, e);
                FunctionError::Error
            })?;

        // registered before sending so that no reply can overtake it
        let pending = self.correlator.await_response(ticket);
        if let Err(e) = self.transport.send_ticketed(to, ticket, &datagram).await {
            warn!("failed to send {:?} to {:?}: {}", command, to, e);
            self.correlator.abandon(ticket);
        }

        let (reply_command, reply) = pending.outcome().await?;
        if reply_command != command {
            warn!("ticket {} for {:?} was answered with {:?}", ticket, command, reply_command);
            return Err(FunctionError::Error);
        }
        Ok(reply)
    }

    async fn call_ack(&self, request: Request) -> CallResult<()> {
        match self.call(request).await? {
            Reply::Ack => Ok(()),
            other => unexpected(other),
        }
    }

    fn on_image_fragment(&self, fragment: ImageFragment, from: SocketAddr) {
        let image = self.reassembler.lock().unwrap()
            .on_fragment(from, fragment);
        match image {
            Ok(Some(image)) => self.listeners.notify(&VehicleEvent::Image(image)),
            Ok(None) => {}
            Err(e) => warn!("dropping image fragment from {:?}: {}", from, e),
        }
    }

    fn on_reply(&self, header: DatagramHeader, reply: Reply) {
        self.transport.complete_ticket(header.ticket);
        if !self.correlator.resolve(header.ticket, (header.command, reply)) {
            trace!("no pending call for ticket {} - duplicate or late {:?} reply", header.ticket, header.command);
        }
    }
}

fn unexpected<T>(reply: Reply) -> CallResult<T> {
    warn!("unexpected reply {:?}", reply);
    Err(FunctionError::Error)
}

#[async_trait]
impl DatagramHandler for UdpVehicleClient {
    #[tracing::instrument(skip(self, datagram))]
    async fn on_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let mut buf = datagram;
        let header = match DatagramHeader::try_deser(&mut buf) {
            Ok(header) => header,
            Err(e) => {
                warn!("dropping malformed datagram: {}", e);
                return;
            }
        };

        match header.command.shape() {
            CommandShape::Unknown => warn!("dropping datagram with unknown command"),
            CommandShape::Registration(category) => warn!("clients do not accept {:?} subscriptions - dropping", category),
            CommandShape::Push(_) => match PushMessage::try_deser(header.command, &mut buf) {
                Ok(PushMessage::Event(event)) => self.listeners.notify(&event),
                Ok(PushMessage::ImageFragment(fragment)) => self.on_image_fragment(fragment, from),
                Err(e) => warn!("dropping {:?} event: {}", header.command, e),
            },
            CommandShape::Call => {
                if header.ticket.is_none() {
                    warn!("dropping {:?} reply without a ticket", header.command);
                    return;
                }
                match Reply::try_deser(header.command, &mut buf) {
                    Ok(reply) => self.on_reply(header, reply),
                    Err(e) => warn!("dropping {:?} reply: {}", header.command, e),
                }
            }
        }
    }

    async fn on_ticket_timeout(&self, ticket: Ticket, to: SocketAddr) {
        if self.correlator.expire(ticket) {
            debug!("call with ticket {} to {:?} timed out", ticket, to);
        }
    }
}

#[async_trait]
impl AsyncVehicleServer for UdpVehicleClient {
    fn add_listener(&self, category: EventCategory, listener: Arc<dyn VehicleListener>) -> ListenerId {
        self.listeners.add(category, listener)
    }

    fn remove_listener(&self, category: EventCategory, id: ListenerId) -> bool {
        self.listeners.remove(category, id)
    }

    async fn set_pose(&self, pose: UtmPose) -> CallResult<()> {
        self.call_ack(Request::SetPose(pose)).await
    }

    async fn get_pose(&self) -> CallResult<UtmPose> {
        match self.call(Request::GetPose).await? {
            Reply::Pose(pose) => Ok(pose),
            other => unexpected(other),
        }
    }

    async fn capture_image(&self, width: i32, height: i32) -> CallResult<Bytes> {
        match self.call(Request::CaptureImage { width, height }).await? {
            Reply::Image(image) => Ok(image),
            other => unexpected(other),
        }
    }

    async fn start_camera(&self, num_frames: i32, interval: f64, width: i32, height: i32) -> CallResult<()> {
        self.call_ack(Request::StartCamera { num_frames, interval, width, height }).await
    }

    async fn stop_camera(&self) -> CallResult<()> {
        self.call_ack(Request::StopCamera).await
    }

    async fn get_camera_status(&self) -> CallResult<CameraState> {
        match self.call(Request::GetCameraStatus).await? {
            Reply::CameraState(state) => Ok(state),
            other => unexpected(other),
        }
    }

    async fn acknowledge_sensor_data(&self, id: i64) -> CallResult<()> {
        self.call_ack(Request::AckSensorData(id)).await
    }

    async fn set_velocity(&self, velocity: Twist) -> CallResult<()> {
        self.call_ack(Request::SetVelocity(velocity)).await
    }

    async fn get_velocity(&self) -> CallResult<Twist> {
        match self.call(Request::GetVelocity).await? {
            Reply::Velocity(velocity) => Ok(velocity),
            other => unexpected(other),
        }
    }

    async fn start_waypoints(&self, waypoints: Vec<LatLng>) -> CallResult<()> {
        self.call_ack(Request::StartWaypoints(waypoints)).await
    }

    async fn stop_waypoints(&self) -> CallResult<()> {
        self.call_ack(Request::StopWaypoints).await
    }

    async fn get_waypoints(&self) -> CallResult<Vec<LatLng>> {
        match self.call(Request::GetWaypoints).await? {
            Reply::Waypoints(waypoints) => Ok(waypoints),
            other => unexpected(other),
        }
    }

    async fn get_waypoint_status(&self) -> CallResult<WaypointState> {
        match self.call(Request::GetWaypointStatus).await? {
            Reply::WaypointState(state) => Ok(state),
            other => unexpected(other),
        }
    }

    async fn get_waypoints_index(&self) -> CallResult<i32> {
        match self.call(Request::GetWaypointsIndex).await? {
            Reply::WaypointsIndex(index) => Ok(index),
            other => unexpected(other),
        }
    }

    async fn is_connected(&self) -> CallResult<bool> {
        match self.call(Request::IsConnected).await? {
            Reply::Flag(is_connected) => Ok(is_connected),
            other => unexpected(other),
        }
    }

    async fn is_autonomous(&self) -> CallResult<bool> {
        match self.call(Request::IsAutonomous).await? {
            Reply::Flag(is_autonomous) => Ok(is_autonomous),
            other => unexpected(other),
        }
    }

    async fn set_autonomous(&self, is_autonomous: bool) -> CallResult<()> {
        self.call_ack(Request::SetAutonomous(is_autonomous)).await
    }

    async fn set_gains(&self, axis: i32, gains: Vec<f64>) -> CallResult<()> {
        self.call_ack(Request::SetGains { axis, gains }).await
    }

    async fn get_gains(&self, axis: i32) -> CallResult<Vec<f64>> {
        match self.call(Request::GetGains { axis }).await? {
            Reply::Gains(gains) => Ok(gains),
            other => unexpected(other),
        }
    }

    async fn set_home(&self, home: LatLng) -> CallResult<()> {
        self.call_ack(Request::SetHome(home)).await
    }

    async fn get_home(&self) -> CallResult<LatLng> {
        match self.call(Request::GetHome).await? {
            Reply::Home(home) => Ok(home),
            other => unexpected(other),
        }
    }

    async fn start_go_home(&self) -> CallResult<()> {
        self.call_ack(Request::StartGoHome).await
    }

    async fn acknowledge_crumb(&self, id: i64) -> CallResult<()> {
        self.call_ack(Request::AckCrumb(id)).await
    }

    async fn set_key_value(&self, key: String, value: f32) -> CallResult<()> {
        self.call_ack(Request::SetKeyValue { key, value }).await
    }

    async fn get_key_value(&self, key: String) -> CallResult<f32> {
        match self.call(Request::GetKeyValue { key }).await? {
            Reply::KeyValue(value) => Ok(value),
            other => unexpected(other),
        }
    }

    async fn new_autonomous_predicate_message(&self, message: String) -> CallResult<()> {
        self.call_ack(Request::AutonomousPredicateMessage(message)).await
    }
}
