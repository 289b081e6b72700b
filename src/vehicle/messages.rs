use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};

use crate::messaging::command::{Command, CommandShape, EventCategory};
use crate::messaging::config::ProtocolConfig;
use crate::messaging::datagram::{encode_datagram, DatagramHeader};
use crate::messaging::ticket::Ticket;
use crate::util::buf::{WireBuf, WireBufMut};
use crate::vehicle::data::*;

/// Every request a peer can send, one variant per command.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Register { name: String },
    List,
    Connect { host: String, port: i32 },
    RegisterListener(EventCategory),

    SetPose(UtmPose),
    GetPose,
    CaptureImage { width: i32, height: i32 },
    StartCamera { num_frames: i32, interval: f64, width: i32, height: i32 },
    StopCamera,
    GetCameraStatus,
    AckSensorData(i64),
    SetVelocity(Twist),
    GetVelocity,
    StartWaypoints(Vec<LatLng>),
    StopWaypoints,
    GetWaypoints,
    GetWaypointStatus,
    GetWaypointsIndex,
    IsConnected,
    IsAutonomous,
    SetAutonomous(bool),
    SetGains { axis: i32, gains: Vec<f64> },
    GetGains { axis: i32 },
    SetHome(LatLng),
    GetHome,
    StartGoHome,
    AckCrumb(i64),
    SetKeyValue { key: String, value: f32 },
    GetKeyValue { key: String },
    AutonomousPredicateMessage(String),
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Register { .. } => Command::Register,
            Request::List => Command::List,
            Request::Connect { .. } => Command::Connect,
            Request::RegisterListener(category) => category.registration_command(),
            Request::SetPose(_) => Command::SetPose,
            Request::GetPose => Command::GetPose,
            Request::CaptureImage { .. } => Command::CaptureImage,
            Request::StartCamera { .. } => Command::StartCamera,
            Request::StopCamera => Command::StopCamera,
            Request::GetCameraStatus => Command::GetCameraStatus,
            Request::AckSensorData(_) => Command::AckSensorData,
            Request::SetVelocity(_) => Command::SetVelocity,
            Request::GetVelocity => Command::GetVelocity,
            Request::StartWaypoints(_) => Command::StartWaypoints,
            Request::StopWaypoints => Command::StopWaypoints,
            Request::GetWaypoints => Command::GetWaypoints,
            Request::GetWaypointStatus => Command::GetWaypointStatus,
            Request::GetWaypointsIndex => Command::GetWaypointsIndex,
            Request::IsConnected => Command::IsConnected,
            Request::IsAutonomous => Command::IsAutonomous,
            Request::SetAutonomous(_) => Command::SetAutonomous,
            Request::SetGains { .. } => Command::SetGains,
            Request::GetGains { .. } => Command::GetGains,
            Request::SetHome(_) => Command::SetHome,
            Request::GetHome => Command::GetHome,
            Request::StartGoHome => Command::StartGoHome,
            Request::AckCrumb(_) => Command::AckCrumb,
            Request::SetKeyValue { .. } => Command::SetKeyValue,
            Request::GetKeyValue { .. } => Command::GetKeyValue,
            Request::AutonomousPredicateMessage(_) => Command::AutonomousPredicateMessage,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        match self {
            Request::Register { name } => buf.put_string(name)?,
            Request::Connect { host, port } => {
                buf.put_string(host)?;
                buf.put_i32(*port);
            }
            Request::SetPose(pose) => pose.ser(buf),
            Request::CaptureImage { width, height } => {
                buf.put_i32(*width);
                buf.put_i32(*height);
            }
            Request::StartCamera { num_frames, interval, width, height } => {
                buf.put_i32(*num_frames);
                buf.put_f64(*interval);
                buf.put_i32(*width);
                buf.put_i32(*height);
            }
            Request::AckSensorData(id) | Request::AckCrumb(id) => buf.put_i64(*id),
            Request::SetVelocity(twist) => twist.ser(buf),
            Request::StartWaypoints(waypoints) => ser_waypoints(waypoints, buf)?,
            Request::SetAutonomous(is_autonomous) => buf.put_bool(*is_autonomous),
            Request::SetGains { axis, gains } => {
                buf.put_i32(*axis);
                ser_f64s(gains, buf)?;
            }
            Request::GetGains { axis } => buf.put_i32(*axis),
            Request::SetHome(home) => home.ser(buf),
            Request::SetKeyValue { key, value } => {
                buf.put_string(key)?;
                buf.put_f32(*value);
            }
            Request::GetKeyValue { key } => buf.put_string(key)?,
            Request::AutonomousPredicateMessage(message) => buf.put_string(message)?,

            Request::List |
            Request::RegisterListener(_) |
            Request::GetPose |
            Request::StopCamera |
            Request::GetCameraStatus |
            Request::GetVelocity |
            Request::StopWaypoints |
            Request::GetWaypoints |
            Request::GetWaypointStatus |
            Request::GetWaypointsIndex |
            Request::IsConnected |
            Request::IsAutonomous |
            Request::GetHome |
            Request::StartGoHome => {}
        }
        Ok(())
    }

    pub fn try_deser(command: Command, buf: &mut impl Buf) -> anyhow::Result<Request> {
        let request = match command {
            Command::Unknown => bail!("unknown command"),
            Command::Register => Request::Register { name: buf.checked_string()? },
            Command::List => Request::List,
            Command::Connect => Request::Connect {
                host: buf.checked_string()?,
                port: buf.checked_i32()?,
            },

            Command::RegisterPoseListener |
            Command::RegisterImageListener |
            Command::RegisterCameraListener |
            Command::RegisterSensorListener |
            Command::RegisterVelocityListener |
            Command::RegisterWaypointListener |
            Command::RegisterCrumbListener |
            Command::RegisterRcOverrideListener |
            Command::RegisterKeyValueListener => match command.shape() {
                CommandShape::Registration(category) => Request::RegisterListener(category),
                _ => bail!("{:?} is not a registration", command),
            },

            Command::SendPose |
            Command::SendImage |
            Command::SendCamera |
            Command::SendSensor |
            Command::SendVelocity |
            Command::SendWaypoint |
            Command::SendCrumb |
            Command::SendRcOverride |
            Command::SendKeyValue => bail!("{:?} is a push event, not a request", command),

            Command::SetPose => Request::SetPose(UtmPose::try_deser(buf)?),
            Command::GetPose => Request::GetPose,
            Command::CaptureImage => Request::CaptureImage {
                width: buf.checked_i32()?,
                height: buf.checked_i32()?,
            },
            Command::StartCamera => Request::StartCamera {
                num_frames: buf.checked_i32()?,
                interval: buf.checked_f64()?,
                width: buf.checked_i32()?,
                height: buf.checked_i32()?,
            },
            Command::StopCamera => Request::StopCamera,
            Command::GetCameraStatus => Request::GetCameraStatus,
            Command::AckSensorData => Request::AckSensorData(buf.checked_i64()?),
            Command::SetVelocity => Request::SetVelocity(Twist::try_deser(buf)?),
            Command::GetVelocity => Request::GetVelocity,
            Command::StartWaypoints => Request::StartWaypoints(try_deser_waypoints(buf)?),
            Command::StopWaypoints => Request::StopWaypoints,
            Command::GetWaypoints => Request::GetWaypoints,
            Command::GetWaypointStatus => Request::GetWaypointStatus,
            Command::GetWaypointsIndex => Request::GetWaypointsIndex,
            Command::IsConnected => Request::IsConnected,
            Command::IsAutonomous => Request::IsAutonomous,
            Command::SetAutonomous => Request::SetAutonomous(buf.checked_bool()?),
            Command::SetGains => Request::SetGains {
                axis: buf.checked_i32()?,
                gains: try_deser_f64s(buf)?,
            },
            Command::GetGains => Request::GetGains { axis: buf.checked_i32()? },
            Command::SetHome => Request::SetHome(LatLng::try_deser(buf)?),
            Command::GetHome => Request::GetHome,
            Command::StartGoHome => Request::StartGoHome,
            Command::AckCrumb => Request::AckCrumb(buf.checked_i64()?),
            Command::SetKeyValue => Request::SetKeyValue {
                key: buf.checked_string()?,
                value: buf.checked_f32()?,
            },
            Command::GetKeyValue => Request::GetKeyValue { key: buf.checked_string()? },
            Command::AutonomousPredicateMessage => Request::AutonomousPredicateMessage(buf.checked_string()?),
        };
        Ok(request)
    }
}

/// A vehicle registered with a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub name: String,
    pub host: String,
    pub port: i32,
}

/// The body of a response. Which variant to expect follows from the command being answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// response of a command that has no result value
    Ack,
    Pose(UtmPose),
    Image(Bytes),
    CameraState(CameraState),
    Velocity(Twist),
    Waypoints(Vec<LatLng>),
    WaypointState(WaypointState),
    WaypointsIndex(i32),
    Flag(bool),
    Gains(Vec<f64>),
    Home(LatLng),
    KeyValue(f32),
    Services(Vec<ServiceEntry>),
}

impl Reply {
    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        match self {
            Reply::Ack => {}
            Reply::Pose(pose) => pose.ser(buf),
            Reply::Image(image) => buf.put_block(image)?,
            Reply::CameraState(state) => put_ordinal(buf, *state),
            Reply::Velocity(twist) => twist.ser(buf),
            Reply::Waypoints(waypoints) => ser_waypoints(waypoints, buf)?,
            Reply::WaypointState(state) => put_ordinal(buf, *state),
            Reply::WaypointsIndex(index) => buf.put_i32(*index),
            Reply::Flag(flag) => buf.put_bool(*flag),
            Reply::Gains(gains) => ser_f64s(gains, buf)?,
            Reply::Home(home) => home.ser(buf),
            Reply::KeyValue(value) => buf.put_f32(*value),
            Reply::Services(services) => {
                buf.put_count(services.len())?;
                for s in services {
                    buf.put_string(&s.name)?;
                    buf.put_string(&s.host)?;
                    buf.put_i32(s.port);
                }
            }
        }
        Ok(())
    }

    pub fn try_deser(command: Command, buf: &mut impl Buf) -> anyhow::Result<Reply> {
        let reply = match command {
            Command::GetPose => Reply::Pose(UtmPose::try_deser(buf)?),
            Command::CaptureImage => Reply::Image(buf.checked_block()?),
            Command::GetCameraStatus => Reply::CameraState(try_get_ordinal(buf)?),
            Command::GetVelocity => Reply::Velocity(Twist::try_deser(buf)?),
            Command::GetWaypoints => Reply::Waypoints(try_deser_waypoints(buf)?),
            Command::GetWaypointStatus => Reply::WaypointState(try_get_ordinal(buf)?),
            Command::GetWaypointsIndex => Reply::WaypointsIndex(buf.checked_i32()?),
            Command::IsConnected | Command::IsAutonomous => Reply::Flag(buf.checked_bool()?),
            Command::GetGains => Reply::Gains(try_deser_f64s(buf)?),
            Command::GetHome => Reply::Home(LatLng::try_deser(buf)?),
            Command::GetKeyValue => Reply::KeyValue(buf.checked_f32()?),
            Command::List => {
                // two length prefixes and a port
                let count = buf.checked_count(2 + 2 + 4)?;
                let mut services = Vec::with_capacity(count);
                for _ in 0..count {
                    services.push(ServiceEntry {
                        name: buf.checked_string()?,
                        host: buf.checked_string()?,
                        port: buf.checked_i32()?,
                    });
                }
                Reply::Services(services)
            }

            Command::Connect |
            Command::SetPose |
            Command::StartCamera |
            Command::StopCamera |
            Command::AckSensorData |
            Command::SetVelocity |
            Command::StartWaypoints |
            Command::StopWaypoints |
            Command::SetAutonomous |
            Command::SetGains |
            Command::SetHome |
            Command::StartGoHome |
            Command::AckCrumb |
            Command::SetKeyValue |
            Command::AutonomousPredicateMessage => Reply::Ack,

            Command::Unknown |
            Command::Register |
            Command::RegisterPoseListener |
            Command::RegisterImageListener |
            Command::RegisterCameraListener |
            Command::RegisterSensorListener |
            Command::RegisterVelocityListener |
            Command::RegisterWaypointListener |
            Command::RegisterCrumbListener |
            Command::RegisterRcOverrideListener |
            Command::RegisterKeyValueListener |
            Command::SendPose |
            Command::SendImage |
            Command::SendCamera |
            Command::SendSensor |
            Command::SendVelocity |
            Command::SendWaypoint |
            Command::SendCrumb |
            Command::SendRcOverride |
            Command::SendKeyValue => bail!("{:?} has no reply", command),
        };
        Ok(reply)
    }
}

pub fn encode_request(config: &ProtocolConfig, ticket: Ticket, request: &Request) -> anyhow::Result<Bytes> {
    encode_datagram(config, DatagramHeader::new(request.command(), ticket), |buf| request.ser(buf))
}

pub fn encode_reply(config: &ProtocolConfig, command: Command, ticket: Ticket, reply: &Reply) -> anyhow::Result<Bytes> {
    encode_datagram(config, DatagramHeader::new(command, ticket), |buf| reply.ser(buf))
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pose() -> UtmPose {
        UtmPose {
            pose: Pose3D { x: 10.0, y: 20.0, z: 0.5, rotation: Quaternion::from_yaw(-0.7) },
            origin: Utm::default(),
        }
    }

    #[rstest]
    #[case::register(Request::Register { name: "Vehicle".to_string() })]
    #[case::list(Request::List)]
    #[case::connect(Request::Connect { host: "192.168.1.20".to_string(), port: 11411 })]
    #[case::register_listener(Request::RegisterListener(EventCategory::Waypoint))]
    #[case::set_pose(Request::SetPose(pose()))]
    #[case::get_pose(Request::GetPose)]
    #[case::capture_image(Request::CaptureImage { width: 640, height: 480 })]
    #[case::start_camera(Request::StartCamera { num_frames: 10, interval: 0.5, width: 320, height: 240 })]
    #[case::stop_camera(Request::StopCamera)]
    #[case::camera_status(Request::GetCameraStatus)]
    #[case::ack_sensor(Request::AckSensorData(-5))]
    #[case::set_velocity(Request::SetVelocity(Twist { dx: 2.0, drz: 0.1, ..Default::default() }))]
    #[case::get_velocity(Request::GetVelocity)]
    #[case::start_waypoints(Request::StartWaypoints(vec![LatLng::new(40.0, -80.0), LatLng::new(40.1, -80.1)]))]
    #[case::stop_waypoints(Request::StopWaypoints)]
    #[case::get_waypoints(Request::GetWaypoints)]
    #[case::waypoint_status(Request::GetWaypointStatus)]
    #[case::waypoints_index(Request::GetWaypointsIndex)]
    #[case::is_connected(Request::IsConnected)]
    #[case::is_autonomous(Request::IsAutonomous)]
    #[case::set_autonomous(Request::SetAutonomous(true))]
    #[case::set_gains(Request::SetGains { axis: 5, gains: vec![0.2, 0.0, 0.05] })]
    #[case::get_gains(Request::GetGains { axis: 3 })]
    #[case::set_home(Request::SetHome(LatLng::new(40.44, -79.94)))]
    #[case::get_home(Request::GetHome)]
    #[case::go_home(Request::StartGoHome)]
    #[case::ack_crumb(Request::AckCrumb(99))]
    #[case::set_key_value(Request::SetKeyValue { key: "rudder_trim".to_string(), value: -1.5 })]
    #[case::get_key_value(Request::GetKeyValue { key: "rudder_trim".to_string() })]
    #[case::predicate(Request::AutonomousPredicateMessage("battery < 20".to_string()))]
    fn test_request_round_trip(#[case] request: Request) {
        let datagram = encode_request(&ProtocolConfig::new(), Ticket(12), &request).unwrap();

        let mut buf: &[u8] = &datagram;
        let header = DatagramHeader::try_deser(&mut buf).unwrap();
        assert_eq!(header, DatagramHeader::new(request.command(), Ticket(12)));
        assert_eq!(Request::try_deser(header.command, &mut buf).unwrap(), request);
        assert!(buf.is_empty());
    }

    #[rstest]
    #[case::ack(Command::SetVelocity, Reply::Ack)]
    #[case::connect(Command::Connect, Reply::Ack)]
    #[case::pose(Command::GetPose, Reply::Pose(pose()))]
    #[case::image(Command::CaptureImage, Reply::Image(Bytes::from_static(b"\xff\xd8\xff\xe0")))]
    #[case::camera_state(Command::GetCameraStatus, Reply::CameraState(CameraState::Capturing))]
    #[case::velocity(Command::GetVelocity, Reply::Velocity(Twist { dy: -1.0, ..Default::default() }))]
    #[case::waypoints(Command::GetWaypoints, Reply::Waypoints(vec![LatLng::new(1.0, 2.0)]))]
    #[case::waypoint_state(Command::GetWaypointStatus, Reply::WaypointState(WaypointState::Paused))]
    #[case::waypoints_index(Command::GetWaypointsIndex, Reply::WaypointsIndex(3))]
    #[case::connected(Command::IsConnected, Reply::Flag(true))]
    #[case::autonomous(Command::IsAutonomous, Reply::Flag(false))]
    #[case::gains(Command::GetGains, Reply::Gains(vec![1.0, 0.5, 0.25]))]
    #[case::home(Command::GetHome, Reply::Home(LatLng::new(-33.9, 151.2)))]
    #[case::key_value(Command::GetKeyValue, Reply::KeyValue(2.5))]
    #[case::services(Command::List, Reply::Services(vec![
        ServiceEntry { name: "Vehicle".to_string(), host: "10.0.0.5".to_string(), port: 11411 },
        ServiceEntry { name: "Vehicle".to_string(), host: "10.0.0.6".to_string(), port: 11412 },
    ]))]
    fn test_reply_round_trip(#[case] command: Command, #[case] reply: Reply) {
        let datagram = encode_reply(&ProtocolConfig::new(), command, Ticket(3), &reply).unwrap();

        let mut buf: &[u8] = &datagram;
        let header = DatagramHeader::try_deser(&mut buf).unwrap();
        assert_eq!(header, DatagramHeader::new(command, Ticket(3)));
        assert_eq!(Reply::try_deser(command, &mut buf).unwrap(), reply);
        assert!(buf.is_empty());
    }

    #[rstest]
    #[case::unknown(Command::Unknown)]
    #[case::push(Command::SendPose)]
    fn test_no_request(#[case] command: Command) {
        let mut buf: &[u8] = &[];
        assert!(Request::try_deser(command, &mut buf).is_err());
    }

    #[rstest]
    #[case::unknown(Command::Unknown)]
    #[case::register(Command::Register)]
    #[case::registration(Command::RegisterImageListener)]
    #[case::push(Command::SendCrumb)]
    fn test_no_reply(#[case] command: Command) {
        let mut buf: &[u8] = &[];
        assert!(Reply::try_deser(command, &mut buf).is_err());
    }

    #[rstest]
    #[case::set_pose(Command::SetPose, vec![0; 20])]
    #[case::gains_count(Command::SetGains, vec![0, 0, 0, 1, 0, 0, 0, 9, 1, 2, 3])]
    #[case::key(Command::GetKeyValue, vec![0, 9, b'a'])]
    fn test_truncated_request(#[case] command: Command, #[case] raw: Vec<u8>) {
        let mut buf: &[u8] = &raw;
        assert!(Request::try_deser(command, &mut buf).is_err());
    }

    #[test]
    fn test_oversized_request() {
        let request = Request::StartWaypoints(vec![LatLng::default(); 300]);
        assert!(encode_request(&ProtocolConfig::new(), Ticket(1), &request).is_err());
    }
}
