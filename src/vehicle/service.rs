use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, trace, warn};

use crate::messaging::command::{Command, EventCategory};
use crate::messaging::config::ProtocolConfig;
use crate::messaging::datagram::{encode_datagram, DatagramHeader};
use crate::messaging::error::CallResult;
use crate::messaging::fragments::fragment_image;
use crate::messaging::leases::SubscriptionLeases;
use crate::messaging::peer::PeerTasks;
use crate::messaging::ticket::Ticket;
use crate::messaging::transport::{DatagramHandler, Transport};
use crate::util::random::{Random, RngRandom};
use crate::vehicle::events::{encode_event, encode_image_fragment, VehicleEvent};
use crate::vehicle::listeners::ListenerId;
use crate::vehicle::messages::{encode_reply, encode_request, Reply, Request};
use crate::vehicle::server::AsyncVehicleServer;

fn ack(result: CallResult<()>) -> CallResult<Reply> {
    result.map(|_| Reply::Ack)
}

/// The vehicle side of the protocol: it executes incoming requests on a vehicle and pushes the
///  vehicle's events to every peer holding a lease for the event's category.
///
/// Replies are sent unreliably. If one is lost, the client's retransmission of the ticketed
///  request triggers a new reply.
pub struct UdpVehicleService {
    config: Arc<ProtocolConfig>,
    transport: Arc<dyn Transport>,
    vehicle: Arc<dyn AsyncVehicleServer>,
    leases: SubscriptionLeases,
    registries: RwLock<Vec<SocketAddr>>,
    image_sequence: AtomicI32,
    events: Mutex<Option<mpsc::UnboundedReceiver<VehicleEvent>>>,
    listener_ids: Vec<(EventCategory, ListenerId)>,
}

impl UdpVehicleService {
    pub fn new(config: Arc<ProtocolConfig>, transport: Arc<dyn Transport>, vehicle: Arc<dyn AsyncVehicleServer>) -> Arc<UdpVehicleService> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let listener_ids = EventCategory::ALL.iter()
            .map(|&category| {
                let sender = sender.clone();
                let id = vehicle.add_listener(category, Arc::new(move |event: &VehicleEvent| {
                    // the receiver is gone only while the service is shutting down
                    let _ = sender.send(event.clone());
                }));
                (category, id)
            })
            .collect();

        Arc::new(UdpVehicleService {
            leases: SubscriptionLeases::new(config.lease_budget),
            config,
            transport,
            vehicle,
            registries: Default::default(),
            image_sequence: AtomicI32::new(RngRandom::next_u32() as i32),
            events: Mutex::new(Some(receiver)),
            listener_ids,
        })
    }

    /// Spawns the receive loop and the loop that forwards vehicle events and sweeps leases.
    pub fn start(self: &Arc<Self>) -> PeerTasks {
        info!("starting vehicle service on {:?}", self.transport.local_addr());
        let service = self.clone();
        PeerTasks::spawn(self.transport.clone(), self.clone(), async move { service.run().await })
    }

    async fn run(&self) {
        let events = self.events.lock().unwrap().take();
        let mut events = match events {
            Some(events) => events,
            None => {
                warn!("vehicle service was started twice - ignoring");
                return;
            }
        };

        let mut heartbeat = interval(self.config.registration_interval);
        loop {
            select! {
                event = events.recv() => match event {
                    Some(event) => self.on_vehicle_event(event).await,
                    None => break,
                },
                _ = heartbeat.tick() => self.on_heartbeat_tick().await,
            }
        }
        debug!("vehicle event stream closed");
    }

    pub fn add_registry(&self, registry: SocketAddr) {
        let mut registries = self.registries.write().unwrap();
        if !registries.contains(&registry) {
            registries.push(registry);
        }
    }

    pub fn remove_registry(&self, registry: SocketAddr) -> bool {
        let mut registries = self.registries.write().unwrap();
        let len_before = registries.len();
        registries.retain(|r| r != &registry);
        registries.len() != len_before
    }

    pub fn registries(&self) -> Vec<SocketAddr> {
        self.registries.read().unwrap().clone()
    }

    pub fn leases(&self) -> &SubscriptionLeases {
        &self.leases
    }

    /// Sweeps subscription leases and announces the service to all registries.
    pub async fn on_heartbeat_tick(&self) {
        for (category, peer) in self.leases.sweep().await {
            debug!("{:?} subscription of {:?} expired", category, peer);
        }

        let registries = self.registries();
        if registries.is_empty() {
            return;
        }
        let announcement = Request::Register { name: self.config.service_name.clone() };
        match encode_request(&self.config, Ticket::NONE, &announcement) {
            Ok(datagram) => self.transport.broadcast(&registries, &datagram).await,
            Err(e) => error!("could not encode registry announcement: {}", e),
        }
    }

    pub async fn on_vehicle_event(&self, event: VehicleEvent) {
        let category = event.category();
        let subscribers = self.leases.subscribers(category).await;
        if subscribers.is_empty() {
            trace!("no subscribers for {:?} events", category);
            return;
        }

        match event {
            VehicleEvent::Image(image) => self.broadcast_image(&subscribers, &image).await,
            event => match encode_event(&self.config, &event) {
                Ok(datagram) => self.transport.broadcast(&subscribers, &datagram).await,
                Err(e) => warn!("could not encode {:?} event: {}", category, e),
            }
        }
    }

    async fn broadcast_image(&self, subscribers: &[SocketAddr], image: &Bytes) {
        let sequence = self.image_sequence.fetch_add(1, Ordering::Relaxed);
        let fragments = match fragment_image(sequence, image, self.config.max_fragment_payload, self.config.max_image_fragments) {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!("dropping image of {} bytes: {}", image.len(), e);
                return;
            }
        };

        debug!("sending image #{} as {} fragments to {} subscribers", sequence, fragments.len(), subscribers.len());
        for fragment in &fragments {
            match encode_image_fragment(&self.config, fragment) {
                Ok(datagram) => self.transport.broadcast(subscribers, &datagram).await,
                Err(e) => {
                    error!("could not encode image fragment: {}", e);
                    return;
                }
            }
        }
    }

    async fn on_request(&self, request: Request, ticket: Ticket, from: SocketAddr) {
        let command = request.command();
        let v = &self.vehicle;

        let result = match request {
            Request::RegisterListener(category) => {
                trace!("renewing {:?} subscription of {:?}", category, from);
                self.leases.renew(category, from).await;
                return;
            }
            Request::Register { .. } | Request::List => {
                warn!("received registry command {:?} from {:?} - ignoring", command, from);
                return;
            }
            Request::Connect { host, port } => {
                self.on_connect(&host, port, ticket).await;
                return;
            }

            Request::SetPose(pose) => ack(v.set_pose(pose).await),
            Request::GetPose => v.get_pose().await.map(Reply::Pose),
            Request::CaptureImage { width, height } => v.capture_image(width, height).await.map(Reply::Image),
            Request::StartCamera { num_frames, interval, width, height } => ack(v.start_camera(num_frames, interval, width, height).await),
            Request::StopCamera => ack(v.stop_camera().await),
            Request::GetCameraStatus => v.get_camera_status().await.map(Reply::CameraState),
            Request::AckSensorData(id) => ack(v.acknowledge_sensor_data(id).await),
            Request::SetVelocity(velocity) => ack(v.set_velocity(velocity).await),
            Request::GetVelocity => v.get_velocity().await.map(Reply::Velocity),
            Request::StartWaypoints(waypoints) => ack(v.start_waypoints(waypoints).await),
            Request::StopWaypoints => ack(v.stop_waypoints().await),
            Request::GetWaypoints => v.get_waypoints().await.map(Reply::Waypoints),
            Request::GetWaypointStatus => v.get_waypoint_status().await.map(Reply::WaypointState),
            Request::GetWaypointsIndex => v.get_waypoints_index().await.map(Reply::WaypointsIndex),
            Request::IsConnected => v.is_connected().await.map(Reply::Flag),
            Request::IsAutonomous => v.is_autonomous().await.map(Reply::Flag),
            Request::SetAutonomous(is_autonomous) => ack(v.set_autonomous(is_autonomous).await),
            Request::SetGains { axis, gains } => ack(v.set_gains(axis, gains).await),
            Request::GetGains { axis } => v.get_gains(axis).await.map(Reply::Gains),
            Request::SetHome(home) => ack(v.set_home(home).await),
            Request::GetHome => v.get_home().await.map(Reply::Home),
            Request::StartGoHome => ack(v.start_go_home().await),
            Request::AckCrumb(id) => ack(v.acknowledge_crumb(id).await),
            Request::SetKeyValue { key, value } => ack(v.set_key_value(key, value).await),
            Request::GetKeyValue { key } => v.get_key_value(key).await.map(Reply::KeyValue),
            Request::AutonomousPredicateMessage(message) => ack(v.new_autonomous_predicate_message(message).await),
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!("vehicle failed to execute {:?} (ticket {}): {} - not responding", command, ticket, e);
                return;
            }
        };

        if ticket.is_none() {
            trace!("{:?} from {:?} was sent one-way - not responding", command, from);
            return;
        }
        self.send_reply(command, ticket, &reply, from).await;
    }

    async fn send_reply(&self, command: Command, ticket: Ticket, reply: &Reply, to: SocketAddr) {
        let datagram = match encode_reply(&self.config, command, ticket, reply) {
            Ok(datagram) => datagram,
            Err(e) if matches!(reply, Reply::Image(_)) => {
                warn!("captured image does not fit into a reply ({}) - responding with an empty image", e);
                match encode_reply(&self.config, command, ticket, &Reply::Image(Bytes::new())) {
                    Ok(datagram) => datagram,
                    Err(e) => {
                        error!("could not encode empty image reply: {}", e);
                        return;
                    }
                }
            }
            Err(e) => {
                error!("could not encode reply to {:?}: {}", command, e);
                return;
            }
        };

        if let Err(e) = self.transport.send_unreliable(to, &datagram).await {
            error!("error sending reply to {:?}: {}", to, e);
        }
    }

    /// A client asked a registry to connect it to this vehicle. Sending the ticket straight to
    ///  the client both answers its request and opens a path through NAT toward it.
    async fn on_connect(&self, host: &str, port: i32, ticket: Ticket) {
        if ticket.is_none() {
            trace!("connect request without ticket - ignoring");
            return;
        }
        let to = match (host.parse::<IpAddr>(), u16::try_from(port)) {
            (Ok(ip), Ok(port)) => SocketAddr::new(ip, port),
            _ => {
                warn!("invalid connect address {}:{} - ignoring", host, port);
                return;
            }
        };

        debug!("connecting to client {:?}", to);
        let datagram = match encode_datagram(&self.config, DatagramHeader::new(Command::Connect, ticket), |_| Ok(())) {
            Ok(datagram) => datagram,
            Err(e) => {
                error!("could not encode connect datagram: {}", e);
                return;
            }
        };
        if let Err(e) = self.transport.send_unreliable(to, &datagram).await {
            error!("error sending connect datagram to {:?}: {}", to, e);
        }
    }
}

#[async_trait]
impl DatagramHandler for UdpVehicleService {
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
        if header.command == Command::Unknown {
            warn!("dropping datagram with unknown command");
            return;
        }

        match Request::try_deser(header.command, &mut buf) {
            Ok(request) => {
                if buf.has_remaining() {
                    debug!("{:?} has {} trailing bytes", header.command, buf.remaining());
                }
                self.on_request(request, header.ticket, from).await
            }
            Err(e) => warn!("dropping {:?} datagram: {}", header.command, e),
        }
    }

    async fn on_ticket_timeout(&self, ticket: Ticket, to: SocketAddr) {
        // the service does not send ticketed datagrams
        debug!("unexpected timeout for ticket {} to {:?}", ticket, to);
    }
}

impl Drop for UdpVehicleService {
    fn drop(&mut self) {
        for (category, id) in &self.listener_ids {
            self.vehicle.remove_listener(*category, *id);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;
    use bytes::BytesMut;
    use rstest::rstest;
    use crate::messaging::fragments::ImageFragment;
    use crate::messaging::transport::MockTransport;
    use crate::test_util::transport::TrackingTransport;
    use crate::vehicle::adapter::to_async;
    use crate::vehicle::data::{LatLng, UtmPose};
    use crate::vehicle::events::PushMessage;
    use crate::vehicle::server::VehicleServer;
    use crate::vehicle::simple_vehicle::SimpleVehicleServer;

    fn addr(s: &str) -> SocketAddr {
        SocketAddr::from_str(s).unwrap()
    }

    fn service_with(transport: Arc<dyn Transport>) -> (Arc<UdpVehicleService>, Arc<SimpleVehicleServer>) {
        let vehicle = SimpleVehicleServer::new();
        let service = UdpVehicleService::new(Arc::new(ProtocolConfig::new()), transport, to_async(vehicle.clone()));
        (service, vehicle)
    }

    fn request(ticket: Ticket, request: &Request) -> Bytes {
        encode_request(&ProtocolConfig::new(), ticket, request).unwrap()
    }

    fn decode_reply(datagram: &[u8]) -> (DatagramHeader, Reply) {
        let mut buf = datagram;
        let header = DatagramHeader::try_deser(&mut buf).unwrap();
        let reply = Reply::try_deser(header.command, &mut buf).unwrap();
        (header, reply)
    }

    #[tokio::test]
    async fn test_no_subscribers_no_transport_calls() {
        // no expectations: any call fails the test
        let transport = MockTransport::new();
        let (service, _) = service_with(Arc::new(transport));

        service.on_vehicle_event(VehicleEvent::Pose(UtmPose::default())).await;
        service.on_vehicle_event(VehicleEvent::Image(Bytes::from(vec![1u8; 5000]))).await;
        service.on_vehicle_event(VehicleEvent::RcOverride(true)).await;
    }

    #[tokio::test]
    async fn test_event_broadcast_to_leased_peers() {
        let subscriber = addr("10.0.0.7:9000");
        let expected = encode_event(&ProtocolConfig::new(), &VehicleEvent::RcOverride(true)).unwrap();

        let mut transport = MockTransport::new();
        transport.expect_broadcast()
            .withf(move |to, datagram| to.to_vec() == vec![subscriber] && datagram.to_vec() == expected.to_vec())
            .times(1)
            .return_const(());
        let (service, _) = service_with(Arc::new(transport));

        service.on_datagram(&request(Ticket::NONE, &Request::RegisterListener(EventCategory::RcOverride)), subscriber).await;
        assert!(service.leases().is_subscribed(EventCategory::RcOverride, &subscriber).await);

        // other categories have no subscribers
        service.on_vehicle_event(VehicleEvent::Pose(UtmPose::default())).await;
        service.on_vehicle_event(VehicleEvent::RcOverride(true)).await;
    }

    #[tokio::test]
    async fn test_lease_expires_after_budget() {
        let subscriber = addr("10.0.0.7:9000");
        let (service, _) = service_with(TrackingTransport::new(addr("10.0.0.1:11411")));

        service.on_datagram(&request(Ticket::NONE, &Request::RegisterListener(EventCategory::Pose)), subscriber).await;
        for _ in 0..ProtocolConfig::new().lease_budget {
            service.on_heartbeat_tick().await;
            assert!(service.leases().is_subscribed(EventCategory::Pose, &subscriber).await);
        }
        service.on_heartbeat_tick().await;
        assert!(!service.leases().is_subscribed(EventCategory::Pose, &subscriber).await);
    }

    #[tokio::test]
    async fn test_image_is_fragmented() {
        let subscriber = addr("10.0.0.7:9000");
        let transport = TrackingTransport::new(addr("10.0.0.1:11411"));
        let (service, _) = service_with(transport.clone());

        service.on_datagram(&request(Ticket::NONE, &Request::RegisterListener(EventCategory::Image)), subscriber).await;
        let image: Vec<u8> = (0..1500).map(|i| i as u8).collect();
        service.on_vehicle_event(VehicleEvent::Image(Bytes::from(image))).await;

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 3);
        let fragments: Vec<ImageFragment> = sent.iter()
            .map(|s| {
                assert_eq!(s.to, subscriber);
                assert_eq!(s.header(), DatagramHeader::one_way(Command::SendImage));
                let mut buf = s.datagram.as_ref();
                DatagramHeader::try_deser(&mut buf).unwrap();
                match PushMessage::try_deser(Command::SendImage, &mut buf).unwrap() {
                    PushMessage::ImageFragment(f) => f,
                    other => panic!("expected a fragment, was {:?}", other),
                }
            })
            .collect();

        assert!(fragments.iter().all(|f| f.total == 3 && f.sequence == fragments[0].sequence));
        assert_eq!(fragments.iter().map(|f| f.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(fragments.iter().map(|f| f.data.len()).collect::<Vec<_>>(), vec![512, 512, 476]);

        // the next image gets the next sequence number
        service.on_vehicle_event(VehicleEvent::Image(Bytes::from_static(b"tiny"))).await;
        let mut buf = transport.take_sent()[0].datagram.clone();
        DatagramHeader::try_deser(&mut buf).unwrap();
        assert_eq!(ImageFragment::try_deser(&mut buf).unwrap().sequence, fragments[0].sequence.wrapping_add(1));
    }

    #[tokio::test]
    async fn test_get_pose_reply() {
        let client = addr("10.0.0.7:9000");
        let transport = TrackingTransport::new(addr("10.0.0.1:11411"));
        let (service, vehicle) = service_with(transport.clone());
        let pose = UtmPose { pose: crate::vehicle::data::Pose3D { x: 3.0, y: -4.0, ..Default::default() }, ..Default::default() };
        vehicle.set_pose(pose).unwrap();

        service.on_datagram(&request(Ticket(42), &Request::GetPose), client).await;

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, client);
        assert_eq!(sent[0].ticketed, None);
        assert_eq!(decode_reply(&sent[0].datagram), (DatagramHeader::new(Command::GetPose, Ticket(42)), Reply::Pose(pose)));
    }

    #[tokio::test]
    async fn test_one_way_request_is_executed_without_reply() {
        let transport = TrackingTransport::new(addr("10.0.0.1:11411"));
        let (service, vehicle) = service_with(transport.clone());

        service.on_datagram(&request(Ticket::NONE, &Request::SetHome(LatLng::new(1.5, 2.5))), addr("10.0.0.7:9000")).await;

        assert_eq!(vehicle.get_home().unwrap(), LatLng::new(1.5, 2.5));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_image_reply_is_replaced_by_empty_image() {
        let client = addr("10.0.0.7:9000");
        let transport = TrackingTransport::new(addr("10.0.0.1:11411"));
        let (service, vehicle) = service_with(transport.clone());
        vehicle.set_captured_image(Bytes::from(vec![7u8; 10_000]));

        service.on_datagram(&request(Ticket(3), &Request::CaptureImage { width: 640, height: 480 }), client).await;

        let sent = transport.take_sent();
        assert_eq!(decode_reply(&sent[0].datagram).1, Reply::Image(Bytes::new()));
    }

    #[rstest]
    #[case::garbage(vec![0xff, 0xff, 0xff])]
    #[case::empty(vec![])]
    #[case::unknown_command({
        let mut buf = BytesMut::new();
        DatagramHeader::one_way(Command::Unknown).ser(&mut buf);
        buf.to_vec()
    })]
    #[case::truncated_body({
        let mut datagram = request(Ticket(1), &Request::SetHome(LatLng::new(1.0, 2.0))).to_vec();
        datagram.truncate(datagram.len() - 3);
        datagram
    })]
    #[case::registry_command(request(Ticket(1), &Request::List).to_vec())]
    #[tokio::test]
    async fn test_invalid_datagrams_are_dropped(#[case] datagram: Vec<u8>) {
        let (service, _) = service_with(Arc::new(MockTransport::new()));
        service.on_datagram(&datagram, addr("10.0.0.7:9000")).await;
    }

    #[tokio::test]
    async fn test_connect_sends_ticket_to_client() {
        let registry = addr("10.0.0.2:6077");
        let transport = TrackingTransport::new(addr("10.0.0.1:11411"));
        let (service, _) = service_with(transport.clone());

        service.on_datagram(&request(Ticket(99), &Request::Connect { host: "192.168.0.5".to_string(), port: 4711 }), registry).await;

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, addr("192.168.0.5:4711"));
        assert_eq!(sent[0].header(), DatagramHeader::new(Command::Connect, Ticket(99)));
    }

    #[tokio::test]
    async fn test_heartbeat_announces_to_registries() {
        let registry = addr("10.0.0.2:6077");
        let mut transport = MockTransport::new();
        transport.expect_broadcast()
            .withf(move |to, _| to.to_vec() == vec![registry])
            .times(1)
            .return_const(());
        let (service, _) = service_with(Arc::new(transport));

        // nothing to announce to yet
        service.on_heartbeat_tick().await;

        service.add_registry(registry);
        service.add_registry(registry);
        assert_eq!(service.registries(), vec![registry]);
        service.on_heartbeat_tick().await;

        assert!(service.remove_registry(registry));
        assert!(!service.remove_registry(registry));
        service.on_heartbeat_tick().await;
    }

    #[tokio::test]
    async fn test_registry_announcement_content() {
        let registry = addr("10.0.0.2:6077");
        let transport = TrackingTransport::new(addr("10.0.0.1:11411"));
        let (service, _) = service_with(transport.clone());
        service.add_registry(registry);

        service.on_heartbeat_tick().await;

        let sent = transport.take_sent();
        assert_eq!(sent[0].to, registry);
        assert_eq!(sent[0].request(), (Ticket::NONE, Request::Register { name: "Vehicle".to_string() }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_events_are_forwarded() {
        let subscriber = addr("10.0.0.7:9000");
        let mut transport = MockTransport::new();
        transport.expect_local_addr().return_const(addr("10.0.0.1:11411"));
        transport.expect_recv_loop().returning(|_| Ok(()));
        transport.expect_cancel_recv_loop().return_const(());
        transport.expect_broadcast()
            .withf(move |to, _| to.to_vec() == vec![subscriber])
            .times(1)
            .return_const(());
        let (service, vehicle) = service_with(Arc::new(transport));

        service.on_datagram(&request(Ticket::NONE, &Request::RegisterListener(EventCategory::KeyValue)), subscriber).await;
        let tasks = service.start();

        vehicle.set_key_value("depth".to_string(), 1.25).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tasks.shutdown();
    }

    #[tokio::test]
    async fn test_drop_removes_vehicle_listeners() {
        let vehicle = SimpleVehicleServer::new();
        let service = UdpVehicleService::new(Arc::new(ProtocolConfig::new()), Arc::new(MockTransport::new()), to_async(vehicle.clone()));
        assert!(EventCategory::ALL.iter().all(|c| vehicle_has_listener(&vehicle, *c)));
        drop(service);
        assert!(EventCategory::ALL.iter().all(|c| !vehicle_has_listener(&vehicle, *c)));
    }

    fn vehicle_has_listener(vehicle: &SimpleVehicleServer, category: EventCategory) -> bool {
        vehicle.has_listeners(category)
    }
}
