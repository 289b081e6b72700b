//! Service, client and registry talking to each other over real sockets on localhost.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{sleep, timeout};

use crate::messaging::command::EventCategory;
use crate::messaging::config::ProtocolConfig;
use crate::messaging::error::FunctionError;
use crate::messaging::peer::PeerTasks;
use crate::messaging::transport::{DatagramHandler, Transport};
use crate::messaging::udp_transport::UdpTransport;
use crate::test_util::listener::ChannelListener;
use crate::test_util::transport::TrackingTransport;
use crate::vehicle::adapter::{to_async, BlockingVehicleAdapter};
use crate::vehicle::client::UdpVehicleClient;
use crate::vehicle::data::{LatLng, Pose3D, Quaternion, Utm, UtmPose};
use crate::messaging::ticket::Ticket;
use crate::vehicle::events::VehicleEvent;
use crate::vehicle::messages::{encode_request, Request};
use crate::vehicle::registry::UdpVehicleRegistry;
use crate::vehicle::server::{AsyncVehicleServer, VehicleServer};
use crate::vehicle::service::UdpVehicleService;
use crate::vehicle::simple_vehicle::SimpleVehicleServer;

fn localhost() -> SocketAddr {
    SocketAddr::from_str("127.0.0.1:0").unwrap()
}

fn fast_config() -> Arc<ProtocolConfig> {
    let mut config = ProtocolConfig::new();
    config.registration_interval = Duration::from_millis(50);
    config.initial_retry_delay = Duration::from_millis(20);
    config.max_retry_delay = Duration::from_millis(80);
    config.ticket_timeout = Duration::from_millis(1000);
    Arc::new(config)
}

struct VehicleNode {
    vehicle: Arc<SimpleVehicleServer>,
    service: Arc<UdpVehicleService>,
    addr: SocketAddr,
    _tasks: PeerTasks,
}

async fn start_vehicle(config: Arc<ProtocolConfig>) -> VehicleNode {
    let transport = Arc::new(UdpTransport::bind(localhost(), config.clone()).await.unwrap());
    let addr = transport.local_addr();
    let vehicle = SimpleVehicleServer::new();
    let service = UdpVehicleService::new(config, transport, to_async(vehicle.clone()));
    let tasks = service.start();
    VehicleNode { vehicle, service, addr, _tasks: tasks }
}

async fn start_client(config: Arc<ProtocolConfig>) -> (Arc<UdpVehicleClient>, SocketAddr, PeerTasks) {
    let transport = Arc::new(UdpTransport::bind(localhost(), config.clone()).await.unwrap());
    let addr = transport.local_addr();
    let client = UdpVehicleClient::new(config, transport);
    let tasks = client.start();
    (client, addr, tasks)
}

fn pose() -> UtmPose {
    UtmPose {
        pose: Pose3D { x: 586_412.25, y: 4_477_123.5, z: -0.75, rotation: Quaternion::from_yaw(1.2) },
        origin: Utm { zone: 17, is_north: true },
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-6, "{} != {}", actual, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_pose() {
    let config = fast_config();
    let node = start_vehicle(config.clone()).await;
    node.vehicle.set_pose(pose()).unwrap();

    let (client, _, _tasks) = start_client(config).await;
    client.set_vehicle_service(Some(node.addr)).await;

    let actual = client.get_pose().await.unwrap();
    assert_close(actual.pose.x, pose().pose.x);
    assert_close(actual.pose.y, pose().pose.y);
    assert_close(actual.pose.z, pose().pose.z);
    assert_close(actual.pose.rotation.yaw(), 1.2);
    assert_eq!(actual.origin, pose().origin);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_commands_round_trip() {
    let config = fast_config();
    let node = start_vehicle(config.clone()).await;
    let (client, _, _tasks) = start_client(config).await;
    client.set_vehicle_service(Some(node.addr)).await;

    client.set_gains(4, vec![0.5, 0.1, 0.05]).await.unwrap();
    assert_eq!(client.get_gains(4).await.unwrap(), vec![0.5, 0.1, 0.05]);
    assert_eq!(client.get_gains(17).await.unwrap(), Vec::<f64>::new());

    client.start_waypoints(vec![LatLng::new(40.44, -79.94), LatLng::new(40.45, -79.95)]).await.unwrap();
    assert_eq!(client.get_waypoints().await.unwrap().len(), 2);
    assert_eq!(client.get_waypoints_index().await.unwrap(), 0);

    client.set_key_value("thrust_limit".to_string(), 0.75).await.unwrap();
    assert_eq!(client.get_key_value("thrust_limit".to_string()).await.unwrap(), 0.75);

    client.new_autonomous_predicate_message("survey".to_string()).await.unwrap();
    assert_eq!(node.vehicle.predicate_messages(), vec!["survey".to_string()]);
    assert!(client.is_connected().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pose_listener() {
    let config = fast_config();
    let node = start_vehicle(config.clone()).await;
    let (client, client_addr, _tasks) = start_client(config).await;
    client.set_vehicle_service(Some(node.addr)).await;

    let (listener, mut events) = ChannelListener::new();
    client.add_listener(EventCategory::Pose, listener);

    timeout(Duration::from_secs(5), async {
        while !node.service.leases().is_subscribed(EventCategory::Pose, &client_addr).await {
            sleep(Duration::from_millis(10)).await;
        }
    }).await.unwrap();

    node.vehicle.publish(VehicleEvent::Pose(pose()));

    match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
        Some(VehicleEvent::Pose(actual)) => assert_close(actual.pose.y, pose().pose.y),
        other => panic!("expected a pose event, was {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_image_reordered() {
    let config = Arc::new(ProtocolConfig::new());
    let subscriber = SocketAddr::from_str("127.0.0.1:40000").unwrap();
    let service_transport = TrackingTransport::new(SocketAddr::from_str("127.0.0.1:11411").unwrap());
    let service = UdpVehicleService::new(config.clone(), service_transport.clone(), to_async(SimpleVehicleServer::new()));

    service.on_datagram(&encode_request(&config, Ticket::NONE, &Request::RegisterListener(EventCategory::Image)).unwrap(), subscriber).await;

    let image: Bytes = (0..10 * 1024).map(|i| ((i * 31) % 256) as u8).collect::<Vec<_>>().into();
    service.on_vehicle_event(VehicleEvent::Image(image.clone())).await;

    let mut datagrams: Vec<Bytes> = service_transport.take_sent().into_iter().map(|s| s.datagram).collect();
    assert_eq!(datagrams.len(), 20);

    // deterministic scramble plus a duplicate
    let n = datagrams.len();
    datagrams = (0..n).map(|i| datagrams[(i * 7) % n].clone()).collect();
    datagrams.insert(5, datagrams[12].clone());

    let client = UdpVehicleClient::new(config, TrackingTransport::new(subscriber));
    let (listener, mut events) = ChannelListener::new();
    client.add_listener(EventCategory::Image, listener);
    for datagram in &datagrams {
        client.on_datagram(datagram, SocketAddr::from_str("127.0.0.1:11411").unwrap()).await;
    }

    assert_eq!(events.try_recv().unwrap(), VehicleEvent::Image(image));
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_discovery_via_registry() {
    let config = fast_config();
    let registry_transport = Arc::new(UdpTransport::bind(localhost(), config.clone()).await.unwrap());
    let registry_addr = registry_transport.local_addr();
    let registry = UdpVehicleRegistry::new(config.clone(), registry_transport);
    let _registry_tasks = registry.start();

    let node = start_vehicle(config.clone()).await;
    node.service.add_registry(registry_addr);

    let (client, _, _tasks) = start_client(config).await;
    client.set_registry_service(Some(registry_addr));

    let services = timeout(Duration::from_secs(5), async {
        loop {
            let services = client.vehicle_services().await.unwrap();
            if !services.is_empty() {
                return services;
            }
            sleep(Duration::from_millis(20)).await;
        }
    }).await.unwrap();
    assert_eq!(services, vec![("Vehicle".to_string(), node.addr)]);

    // connecting through the registry leaves the client able to talk to the vehicle directly
    client.set_vehicle_service(Some(node.addr)).await;
    client.set_home(LatLng::new(1.0, 2.0)).await.unwrap();
    assert_eq!(node.vehicle.get_home().unwrap(), LatLng::new(1.0, 2.0));
}

#[test]
fn test_blocking_call_to_silent_vehicle_times_out() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut config = ProtocolConfig::new();
    config.initial_retry_delay = Duration::from_millis(20);
    config.max_retry_delay = Duration::from_millis(40);
    config.ticket_timeout = Duration::from_millis(200);
    let config = Arc::new(config);

    let (client, _silent, _tasks) = runtime.block_on(async {
        // bound but never read
        let silent = tokio::net::UdpSocket::bind(localhost()).await.unwrap();
        let (client, _, tasks) = start_client(config.clone()).await;
        client.set_vehicle_service(Some(silent.local_addr().unwrap())).await;
        (client, silent, tasks)
    });

    let blocking = BlockingVehicleAdapter::new(client.clone(), runtime.handle().clone(), &config);
    assert_eq!(blocking.get_waypoint_status(), Err(FunctionError::Timeout));
}
