/// Every operation of the vehicle protocol. The wire representation is a short token, and the
///  mapping is fixed: tokens must never be reused for a different command.
///
/// Tokens that are not recognized map to [Command::Unknown] rather than failing the decode, so a
///  peer speaking a newer protocol version does not break older peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Unknown,

    Register,
    List,
    Connect,

    RegisterPoseListener,
    SendPose,
    SetPose,
    GetPose,

    RegisterImageListener,
    SendImage,
    CaptureImage,

    RegisterCameraListener,
    SendCamera,
    StartCamera,
    StopCamera,
    GetCameraStatus,

    RegisterSensorListener,
    SendSensor,
    AckSensorData,

    RegisterVelocityListener,
    SendVelocity,
    SetVelocity,
    GetVelocity,

    RegisterWaypointListener,
    SendWaypoint,
    StartWaypoints,
    StopWaypoints,
    GetWaypoints,
    GetWaypointStatus,
    GetWaypointsIndex,

    IsConnected,
    IsAutonomous,
    SetAutonomous,

    SetGains,
    GetGains,

    SetHome,
    GetHome,
    StartGoHome,

    RegisterCrumbListener,
    SendCrumb,
    AckCrumb,

    RegisterRcOverrideListener,
    SendRcOverride,

    RegisterKeyValueListener,
    SendKeyValue,
    SetKeyValue,
    GetKeyValue,

    AutonomousPredicateMessage,
}

/// The role a command plays in the protocol, which determines how a receiving peer treats it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandShape {
    Unknown,
    /// one-way request to (re)start the lease for an event category
    Registration(EventCategory),
    /// server-originated event, sent to leased subscribers only and never ticketed
    Push(EventCategory),
    /// request that may carry a ticket, in which case a response with the same command is sent
    Call,
}

impl Command {
    pub const ALL: [Command; 48] = [
        Command::Unknown,
        Command::Register, Command::List, Command::Connect,
        Command::RegisterPoseListener, Command::SendPose, Command::SetPose, Command::GetPose,
        Command::RegisterImageListener, Command::SendImage, Command::CaptureImage,
        Command::RegisterCameraListener, Command::SendCamera, Command::StartCamera, Command::StopCamera, Command::GetCameraStatus,
        Command::RegisterSensorListener, Command::SendSensor, Command::AckSensorData,
        Command::RegisterVelocityListener, Command::SendVelocity, Command::SetVelocity, Command::GetVelocity,
        Command::RegisterWaypointListener, Command::SendWaypoint, Command::StartWaypoints, Command::StopWaypoints,
        Command::GetWaypoints, Command::GetWaypointStatus, Command::GetWaypointsIndex,
        Command::IsConnected, Command::IsAutonomous, Command::SetAutonomous,
        Command::SetGains, Command::GetGains,
        Command::SetHome, Command::GetHome, Command::StartGoHome,
        Command::RegisterCrumbListener, Command::SendCrumb, Command::AckCrumb,
        Command::RegisterRcOverrideListener, Command::SendRcOverride,
        Command::RegisterKeyValueListener, Command::SendKeyValue, Command::SetKeyValue, Command::GetKeyValue,
        Command::AutonomousPredicateMessage,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Command::Unknown => "",
            Command::Register => "HI",
            Command::List => "HL",
            Command::Connect => "CC",
            Command::RegisterPoseListener => "RPL",
            Command::SendPose => "_P",
            Command::SetPose => "SP",
            Command::GetPose => "GP",
            Command::RegisterImageListener => "RIL",
            Command::SendImage => "_I",
            Command::CaptureImage => "CI",
            Command::RegisterCameraListener => "CIL",
            Command::SendCamera => "_C",
            Command::StartCamera => "STC",
            Command::StopCamera => "SPC",
            Command::GetCameraStatus => "CS",
            Command::RegisterSensorListener => "RSL",
            Command::SendSensor => "_S",
            Command::AckSensorData => "ASD",
            Command::RegisterVelocityListener => "RVL",
            Command::SendVelocity => "_V",
            Command::SetVelocity => "SV",
            Command::GetVelocity => "GV",
            Command::RegisterWaypointListener => "RWL",
            Command::SendWaypoint => "_W",
            Command::StartWaypoints => "STW",
            Command::StopWaypoints => "SPW",
            Command::GetWaypoints => "GW",
            Command::GetWaypointStatus => "GWS",
            Command::GetWaypointsIndex => "GWI",
            Command::IsConnected => "IC",
            Command::IsAutonomous => "IA",
            Command::SetAutonomous => "SA",
            Command::SetGains => "SG",
            Command::GetGains => "GG",
            Command::SetHome => "SH",
            Command::GetHome => "GH",
            Command::StartGoHome => "SGH",
            Command::RegisterCrumbListener => "RCL",
            Command::SendCrumb => "_B",
            Command::AckCrumb => "AC",
            Command::RegisterRcOverrideListener => "RRC",
            Command::SendRcOverride => "_RC",
            Command::RegisterKeyValueListener => "KVL",
            Command::SendKeyValue => "_KV",
            Command::SetKeyValue => "SKV",
            Command::GetKeyValue => "GKV",
            Command::AutonomousPredicateMessage => "APM",
        }
    }

    pub fn from_token(token: &str) -> Command {
        match token {
            "HI" => Command::Register,
            "HL" => Command::List,
            "CC" => Command::Connect,
            "RPL" => Command::RegisterPoseListener,
            "_P" => Command::SendPose,
            "SP" => Command::SetPose,
            "GP" => Command::GetPose,
            "RIL" => Command::RegisterImageListener,
            "_I" => Command::SendImage,
            "CI" => Command::CaptureImage,
            "CIL" => Command::RegisterCameraListener,
            "_C" => Command::SendCamera,
            "STC" => Command::StartCamera,
            "SPC" => Command::StopCamera,
            "CS" => Command::GetCameraStatus,
            "RSL" => Command::RegisterSensorListener,
            "_S" => Command::SendSensor,
            "ASD" => Command::AckSensorData,
            "RVL" => Command::RegisterVelocityListener,
            "_V" => Command::SendVelocity,
            "SV" => Command::SetVelocity,
            "GV" => Command::GetVelocity,
            "RWL" => Command::RegisterWaypointListener,
            "_W" => Command::SendWaypoint,
            "STW" => Command::StartWaypoints,
            "SPW" => Command::StopWaypoints,
            "GW" => Command::GetWaypoints,
            "GWS" => Command::GetWaypointStatus,
            "GWI" => Command::GetWaypointsIndex,
            "IC" => Command::IsConnected,
            "IA" => Command::IsAutonomous,
            "SA" => Command::SetAutonomous,
            "SG" => Command::SetGains,
            "GG" => Command::GetGains,
            "SH" => Command::SetHome,
            "GH" => Command::GetHome,
            "SGH" => Command::StartGoHome,
            "RCL" => Command::RegisterCrumbListener,
            "_B" => Command::SendCrumb,
            "AC" => Command::AckCrumb,
            "RRC" => Command::RegisterRcOverrideListener,
            "_RC" => Command::SendRcOverride,
            "KVL" => Command::RegisterKeyValueListener,
            "_KV" => Command::SendKeyValue,
            "SKV" => Command::SetKeyValue,
            "GKV" => Command::GetKeyValue,
            "APM" => Command::AutonomousPredicateMessage,
            _ => Command::Unknown,
        }
    }

    pub fn shape(&self) -> CommandShape {
        use EventCategory::*;

        match self {
            Command::Unknown => CommandShape::Unknown,

            Command::RegisterPoseListener => CommandShape::Registration(Pose),
            Command::RegisterImageListener => CommandShape::Registration(Image),
            Command::RegisterCameraListener => CommandShape::Registration(Camera),
            Command::RegisterSensorListener => CommandShape::Registration(Sensor),
            Command::RegisterVelocityListener => CommandShape::Registration(Velocity),
            Command::RegisterWaypointListener => CommandShape::Registration(Waypoint),
            Command::RegisterCrumbListener => CommandShape::Registration(Crumb),
            Command::RegisterRcOverrideListener => CommandShape::Registration(RcOverride),
            Command::RegisterKeyValueListener => CommandShape::Registration(KeyValue),

            Command::SendPose => CommandShape::Push(Pose),
            Command::SendImage => CommandShape::Push(Image),
            Command::SendCamera => CommandShape::Push(Camera),
            Command::SendSensor => CommandShape::Push(Sensor),
            Command::SendVelocity => CommandShape::Push(Velocity),
            Command::SendWaypoint => CommandShape::Push(Waypoint),
            Command::SendCrumb => CommandShape::Push(Crumb),
            Command::SendRcOverride => CommandShape::Push(RcOverride),
            Command::SendKeyValue => CommandShape::Push(KeyValue),

            Command::Register | Command::List | Command::Connect |
            Command::SetPose | Command::GetPose |
            Command::CaptureImage |
            Command::StartCamera | Command::StopCamera | Command::GetCameraStatus |
            Command::AckSensorData |
            Command::SetVelocity | Command::GetVelocity |
            Command::StartWaypoints | Command::StopWaypoints | Command::GetWaypoints |
            Command::GetWaypointStatus | Command::GetWaypointsIndex |
            Command::IsConnected | Command::IsAutonomous | Command::SetAutonomous |
            Command::SetGains | Command::GetGains |
            Command::SetHome | Command::GetHome | Command::StartGoHome |
            Command::AckCrumb |
            Command::SetKeyValue | Command::GetKeyValue |
            Command::AutonomousPredicateMessage => CommandShape::Call,
        }
    }
}

/// The kinds of push events a peer can subscribe to. Each category has its own lease table on the
///  service side and its own listener list on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Pose,
    Image,
    Camera,
    Sensor,
    Velocity,
    Waypoint,
    Crumb,
    RcOverride,
    KeyValue,
}

impl EventCategory {
    pub const ALL: [EventCategory; 9] = [
        EventCategory::Pose,
        EventCategory::Image,
        EventCategory::Camera,
        EventCategory::Sensor,
        EventCategory::Velocity,
        EventCategory::Waypoint,
        EventCategory::Crumb,
        EventCategory::RcOverride,
        EventCategory::KeyValue,
    ];

    /// position in [EventCategory::ALL], for per-category tables
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn registration_command(&self) -> Command {
        match self {
            EventCategory::Pose => Command::RegisterPoseListener,
            EventCategory::Image => Command::RegisterImageListener,
            EventCategory::Camera => Command::RegisterCameraListener,
            EventCategory::Sensor => Command::RegisterSensorListener,
            EventCategory::Velocity => Command::RegisterVelocityListener,
            EventCategory::Waypoint => Command::RegisterWaypointListener,
            EventCategory::Crumb => Command::RegisterCrumbListener,
            EventCategory::RcOverride => Command::RegisterRcOverrideListener,
            EventCategory::KeyValue => Command::RegisterKeyValueListener,
        }
    }

    pub fn push_command(&self) -> Command {
        match self {
            EventCategory::Pose => Command::SendPose,
            EventCategory::Image => Command::SendImage,
            EventCategory::Camera => Command::SendCamera,
            EventCategory::Sensor => Command::SendSensor,
            EventCategory::Velocity => Command::SendVelocity,
            EventCategory::Waypoint => Command::SendWaypoint,
            EventCategory::Crumb => Command::SendCrumb,
            EventCategory::RcOverride => Command::SendRcOverride,
            EventCategory::KeyValue => Command::SendKeyValue,
        }
    }
}
