use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use clap_derive::Parser;
use tokio::time::sleep;
use tracing::{info, Level};
use udp_vehicle::messaging::command::EventCategory;
use udp_vehicle::messaging::config::ProtocolConfig;
use udp_vehicle::messaging::udp_transport::UdpTransport;
use udp_vehicle::vehicle::adapter::to_blocking;
use udp_vehicle::vehicle::client::UdpVehicleClient;
use udp_vehicle::vehicle::data::Twist;
use udp_vehicle::vehicle::events::VehicleEvent;
use udp_vehicle::vehicle::messages::Request;
use udp_vehicle::vehicle::server::AsyncVehicleServer;

/// Connects to a vehicle (directly or by looking it up in a registry), prints its telemetry and
///  nudges it forward.
#[derive(Parser)]
struct Args {
    /// vehicle address; if omitted, the first vehicle known to the registry is used
    vehicle: Option<String>,

    #[clap(long)]
    registry: Option<String>,

    #[clap(long, default_value = "0.0.0.0:0")]
    bind: String,

    #[clap(long, default_value_t = 10)]
    seconds: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .try_init()
        .ok();

    let config = Arc::new(ProtocolConfig::new());
    let transport = Arc::new(UdpTransport::bind(args.bind.parse()?, config.clone()).await?);
    let client = UdpVehicleClient::new(config.clone(), transport);
    let _tasks = client.start();

    if let Some(registry) = &args.registry {
        let registry: SocketAddr = registry.parse()?;
        client.set_registry_service(Some(registry));
    }

    let vehicle: SocketAddr = match &args.vehicle {
        Some(vehicle) => vehicle.parse()?,
        None => {
            let services = client.vehicle_services().await?;
            for (name, addr) in &services {
                info!("registry knows {} at {:?}", name, addr);
            }
            services.first()
                .map(|(_, addr)| *addr)
                .ok_or_else(|| anyhow!("no vehicle registered"))?
        }
    };
    client.set_vehicle_service(Some(vehicle)).await;

    client.add_listener(EventCategory::Pose, Arc::new(|event: &VehicleEvent| {
        if let VehicleEvent::Pose(pose) = event {
            info!("pose: x={:.2} y={:.2} yaw={:.2}", pose.pose.x, pose.pose.y, pose.pose.rotation.yaw());
        }
    }));
    client.add_listener(EventCategory::Sensor, Arc::new(|event: &VehicleEvent| {
        if let VehicleEvent::Sensor { data, .. } = event {
            info!("sensor {:?} on channel {}: {}", data.data_type, data.channel, data.value);
        }
    }));

    info!("vehicle is at {:?}", client.get_pose().await?);

    // blocking calls must not run on the runtime's worker threads
    let blocking = to_blocking(client.clone(), tokio::runtime::Handle::current(), &config);
    let home = tokio::task::spawn_blocking(move || blocking.get_home()).await??;
    info!("vehicle home is {:?}", home);

    for _ in 0..args.seconds * 5 {
        client.send_unacknowledged(&Request::SetVelocity(Twist { dx: 1.0, ..Default::default() })).await?;
        sleep(Duration::from_millis(200)).await;
    }
    client.stop_waypoints().await?;
    Ok(())
}
