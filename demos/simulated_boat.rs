use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap_derive::Parser;
use tokio::select;
use tokio::time::interval;
use tracing::{info, Level};
use udp_vehicle::messaging::config::ProtocolConfig;
use udp_vehicle::messaging::transport::Transport;
use udp_vehicle::messaging::udp_transport::UdpTransport;
use udp_vehicle::vehicle::adapter::to_async;
use udp_vehicle::vehicle::data::{DataType, LatLng, Pose3D, Quaternion, SensorData, UtmPose};
use udp_vehicle::vehicle::events::VehicleEvent;
use udp_vehicle::vehicle::server::VehicleServer;
use udp_vehicle::vehicle::service::UdpVehicleService;
use udp_vehicle::vehicle::simple_vehicle::SimpleVehicleServer;

/// A boat that drives in circles and reports its battery level, served over UDP.
#[derive(Parser)]
struct Args {
    #[clap(default_value = "0.0.0.0:11411")]
    address: String,

    #[clap(long)]
    registry: Vec<String>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let config = Arc::new(ProtocolConfig::new());
    let transport = Arc::new(UdpTransport::bind(args.address.parse()?, config.clone()).await?);
    info!("simulated boat listening on {:?}", transport.local_addr());

    let vehicle = SimpleVehicleServer::new();
    let service = UdpVehicleService::new(config, transport, to_async(vehicle.clone()));
    for r in args.registry {
        let registry: SocketAddr = r.parse()?;
        service.add_registry(registry);
    }
    let _tasks = service.start();

    select! {
        _ = simulate(vehicle) => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

async fn simulate(vehicle: Arc<SimpleVehicleServer>) {
    let mut ticks = interval(Duration::from_millis(100));
    let mut step: u64 = 0;
    let mut battery = 12.6;

    loop {
        ticks.tick().await;
        step += 1;

        let angle = step as f64 * 0.01;
        let pose = UtmPose {
            pose: Pose3D {
                x: 589_000.0 + 50.0 * angle.cos(),
                y: 4_477_000.0 + 50.0 * angle.sin(),
                z: 0.0,
                rotation: Quaternion::from_yaw(angle + std::f64::consts::FRAC_PI_2),
            },
            ..Default::default()
        };
        let _ = vehicle.set_pose(pose);
        vehicle.publish(VehicleEvent::Pose(pose));

        if step % 10 == 0 {
            battery -= 0.001;
            vehicle.publish(VehicleEvent::Sensor {
                data: SensorData {
                    channel: 0,
                    data_type: DataType::Battery,
                    value: battery,
                    location: LatLng::new(40.44, -79.94),
                },
                index: step as i64,
            });
        }
    }
}
