//! Value types exchanged with the vehicle, together with their fixed wire layout. All numbers are
//!  big endian; enumerations are written as their ordinal, so the declaration order of their
//!  variants is part of the wire format and must not change.

use std::mem::size_of;

use bytes::{Buf, BufMut};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::util::buf::{WireBuf, WireBufMut};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub const SERIALIZED_LEN: usize = 16;

    pub fn new(latitude: f64, longitude: f64) -> LatLng {
        LatLng { latitude, longitude }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_f64(self.latitude);
        buf.put_f64(self.longitude);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<LatLng> {
        Ok(LatLng {
            latitude: buf.checked_f64()?,
            longitude: buf.checked_f64()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    /// rotation around the vertical axis
    pub fn from_yaw(yaw: f64) -> Quaternion {
        let half = yaw / 2.0;
        Quaternion { w: half.cos(), x: 0.0, y: 0.0, z: half.sin() }
    }

    pub fn yaw(&self) -> f64 {
        let siny_cosp = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy_cosp = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        siny_cosp.atan2(cosy_cosp)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rotation: Quaternion,
}

/// UTM zone and hemisphere that a [Pose3D] is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utm {
    pub zone: u8,
    pub is_north: bool,
}

impl Default for Utm {
    fn default() -> Self {
        Utm { zone: 17, is_north: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UtmPose {
    pub pose: Pose3D,
    pub origin: Utm,
}

impl UtmPose {
    pub fn ser(&self, buf: &mut impl BufMut) {
        let p = &self.pose;
        buf.put_f64(p.x);
        buf.put_f64(p.y);
        buf.put_f64(p.z);
        buf.put_f64(p.rotation.w);
        buf.put_f64(p.rotation.x);
        buf.put_f64(p.rotation.y);
        buf.put_f64(p.rotation.z);
        buf.put_u8(self.origin.zone);
        buf.put_bool(self.origin.is_north);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<UtmPose> {
        let x = buf.checked_f64()?;
        let y = buf.checked_f64()?;
        let z = buf.checked_f64()?;
        let rotation = Quaternion {
            w: buf.checked_f64()?,
            x: buf.checked_f64()?,
            y: buf.checked_f64()?,
            z: buf.checked_f64()?,
        };
        let origin = Utm {
            zone: buf.checked_u8()?,
            is_north: buf.checked_bool()?,
        };

        Ok(UtmPose {
            pose: Pose3D { x, y, z, rotation },
            origin,
        })
    }
}

/// Linear and angular velocity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Twist {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub drx: f64,
    pub dry: f64,
    pub drz: f64,
}

impl Twist {
    pub fn ser(&self, buf: &mut impl BufMut) {
        for v in [self.dx, self.dy, self.dz, self.drx, self.dry, self.drz] {
            buf.put_f64(v);
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Twist> {
        Ok(Twist {
            dx: buf.checked_f64()?,
            dy: buf.checked_f64()?,
            dz: buf.checked_f64()?,
            drx: buf.checked_f64()?,
            dry: buf.checked_f64()?,
            drz: buf.checked_f64()?,
        })
    }
}

/// Measurement kinds of water quality and housekeeping sensors. Ordinals are on the wire,
///  unknown ordinals decode to [DataType::Unknown].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum DataType {
    #[num_enum(default)]
    Unknown,
    EcAtlas,
    EcGosys,
    TAtlas,
    TGosys,
    DoAtlas,
    DoGosys,
    PhAtlas,
    PhGosys,
    Battery,
    Salinity,
    Turbidity,
    Redox,
    ChlorophyllA,
    Toc,
    Nitrate,
    Nitrite,
}

impl DataType {
    pub fn kind(&self) -> &'static str {
        match self {
            DataType::Unknown => "?",
            DataType::EcAtlas | DataType::EcGosys => "EC",
            DataType::TAtlas | DataType::TGosys => "T",
            DataType::DoAtlas | DataType::DoGosys => "DO",
            DataType::PhAtlas | DataType::PhGosys => "pH",
            DataType::Battery => "battery",
            DataType::Salinity => "salinity",
            DataType::Turbidity => "turbidity",
            DataType::Redox => "redox",
            DataType::ChlorophyllA => "chlorophyll-a",
            DataType::Toc => "TOC",
            DataType::Nitrate => "nitrate",
            DataType::Nitrite => "nitrite",
        }
    }

    pub fn units(&self) -> &'static str {
        match self {
            DataType::Unknown => "?",
            DataType::EcAtlas | DataType::EcGosys => "uS/cm",
            DataType::TAtlas | DataType::TGosys => "C",
            DataType::DoAtlas | DataType::DoGosys | DataType::Toc => "mg/L",
            DataType::PhAtlas | DataType::PhGosys => "",
            DataType::Battery => "V",
            DataType::Salinity => "g/L",
            DataType::Turbidity => "NTU",
            DataType::Redox => "mV",
            DataType::ChlorophyllA | DataType::Nitrate | DataType::Nitrite => "ug/L",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorData {
    pub channel: i32,
    pub data_type: DataType,
    pub value: f64,
    pub location: LatLng,
}

impl SensorData {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_i32(self.channel);
        buf.put_u8(self.data_type.into());
        buf.put_f64(self.value);
        self.location.ser(buf);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<SensorData> {
        Ok(SensorData {
            channel: buf.checked_i32()?,
            data_type: DataType::from(buf.checked_u8()?),
            value: buf.checked_f64()?,
            location: LatLng::try_deser(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CameraState {
    Capturing,
    Done,
    Cancelled,
    Off,
    #[num_enum(default)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum WaypointState {
    Going,
    Paused,
    Done,
    Cancelled,
    Off,
    #[num_enum(default)]
    Unknown,
}

/// Writes an enumeration as its single-byte ordinal.
pub fn put_ordinal<E: Into<u8>>(buf: &mut impl BufMut, value: E) {
    buf.put_u8(value.into());
}

/// Reads a single-byte ordinal. Out-of-range values map to the enumeration's `Unknown` variant.
pub fn try_get_ordinal<E: From<u8>>(buf: &mut impl Buf) -> anyhow::Result<E> {
    Ok(E::from(buf.checked_u8()?))
}

pub fn ser_waypoints(waypoints: &[LatLng], buf: &mut impl BufMut) -> anyhow::Result<()> {
    buf.put_count(waypoints.len())?;
    for waypoint in waypoints {
        waypoint.ser(buf);
    }
    Ok(())
}

pub fn try_deser_waypoints(buf: &mut impl Buf) -> anyhow::Result<Vec<LatLng>> {
    let count = buf.checked_count(LatLng::SERIALIZED_LEN)?;
    let mut result = Vec::with_capacity(count);
    for _ in 0..count {
        result.push(LatLng::try_deser(buf)?);
    }
    Ok(result)
}

pub fn ser_f64s(values: &[f64], buf: &mut impl BufMut) -> anyhow::Result<()> {
    buf.put_count(values.len())?;
    for v in values {
        buf.put_f64(*v);
    }
    Ok(())
}

pub fn try_deser_f64s(buf: &mut impl Buf) -> anyhow::Result<Vec<f64>> {
    let count = buf.checked_count(size_of::<f64>())?;
    let mut result = Vec::with_capacity(count);
    for _ in 0..count {
        result.push(buf.checked_f64()?);
    }
    Ok(result)
}
