use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};

use crate::messaging::command::{Command, CommandShape, EventCategory};
use crate::messaging::config::ProtocolConfig;
use crate::messaging::datagram::{encode_datagram, DatagramHeader};
use crate::messaging::fragments::ImageFragment;
use crate::util::buf::{WireBuf, WireBufMut};
use crate::vehicle::data::{put_ordinal, try_get_ordinal, CameraState, LatLng, SensorData, Twist, UtmPose, WaypointState};

/// Something the vehicle reports on its own initiative.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleEvent {
    Pose(UtmPose),
    Image(Bytes),
    Camera(CameraState),
    Sensor { data: SensorData, index: i64 },
    Velocity(Twist),
    Waypoint(WaypointState),
    Crumb { location: LatLng, index: i64 },
    RcOverride(bool),
    KeyValue { key: String, value: f32 },
}

impl VehicleEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            VehicleEvent::Pose(_) => EventCategory::Pose,
            VehicleEvent::Image(_) => EventCategory::Image,
            VehicleEvent::Camera(_) => EventCategory::Camera,
            VehicleEvent::Sensor { .. } => EventCategory::Sensor,
            VehicleEvent::Velocity(_) => EventCategory::Velocity,
            VehicleEvent::Waypoint(_) => EventCategory::Waypoint,
            VehicleEvent::Crumb { .. } => EventCategory::Crumb,
            VehicleEvent::RcOverride(_) => EventCategory::RcOverride,
            VehicleEvent::KeyValue { .. } => EventCategory::KeyValue,
        }
    }

    fn ser_body(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        match self {
            VehicleEvent::Pose(pose) => pose.ser(buf),
            VehicleEvent::Image(_) => bail!("images are sent as fragments"),
            VehicleEvent::Camera(state) => put_ordinal(buf, *state),
            VehicleEvent::Sensor { data, index } => {
                data.ser(buf);
                buf.put_i64(*index);
            }
            VehicleEvent::Velocity(twist) => twist.ser(buf),
            VehicleEvent::Waypoint(state) => put_ordinal(buf, *state),
            VehicleEvent::Crumb { location, index } => {
                location.ser(buf);
                buf.put_i64(*index);
            }
            VehicleEvent::RcOverride(is_overridden) => buf.put_bool(*is_overridden),
            VehicleEvent::KeyValue { key, value } => {
                buf.put_string(key)?;
                buf.put_f32(*value);
            }
        }
        Ok(())
    }
}

/// A push datagram as it travels on the wire: images are split into fragments.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Event(VehicleEvent),
    ImageFragment(ImageFragment),
}

impl PushMessage {
    pub fn try_deser(command: Command, buf: &mut impl Buf) -> anyhow::Result<PushMessage> {
        let category = match command.shape() {
            CommandShape::Push(category) => category,
            _ => bail!("{:?} is not a push event", command),
        };

        let event = match category {
            EventCategory::Pose => VehicleEvent::Pose(UtmPose::try_deser(buf)?),
            EventCategory::Image => return Ok(PushMessage::ImageFragment(ImageFragment::try_deser(buf)?)),
            EventCategory::Camera => VehicleEvent::Camera(try_get_ordinal(buf)?),
            EventCategory::Sensor => VehicleEvent::Sensor {
                data: SensorData::try_deser(buf)?,
                index: buf.checked_i64()?,
            },
            EventCategory::Velocity => VehicleEvent::Velocity(Twist::try_deser(buf)?),
            EventCategory::Waypoint => VehicleEvent::Waypoint(try_get_ordinal(buf)?),
            EventCategory::Crumb => VehicleEvent::Crumb {
                location: LatLng::try_deser(buf)?,
                index: buf.checked_i64()?,
            },
            EventCategory::RcOverride => VehicleEvent::RcOverride(buf.checked_bool()?),
            EventCategory::KeyValue => VehicleEvent::KeyValue {
                key: buf.checked_string()?,
                value: buf.checked_f32()?,
            },
        };
        Ok(PushMessage::Event(event))
    }
}

pub fn encode_event(config: &ProtocolConfig, event: &VehicleEvent) -> anyhow::Result<Bytes> {
    let header = DatagramHeader::one_way(event.category().push_command());
    encode_datagram(config, header, |buf| event.ser_body(buf))
}

pub fn encode_image_fragment(config: &ProtocolConfig, fragment: &ImageFragment) -> anyhow::Result<Bytes> {
    encode_datagram(config, DatagramHeader::one_way(Command::SendImage), |buf| fragment.ser(buf))
}
