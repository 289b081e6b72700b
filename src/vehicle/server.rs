use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::messaging::command::EventCategory;
use crate::messaging::error::CallResult;
use crate::vehicle::data::{CameraState, LatLng, Twist, UtmPose, WaypointState};
use crate::vehicle::listeners::{ListenerId, VehicleListener};

/// The command surface of a vehicle with blocking calls, as implemented by a vehicle controller.
///
/// Events flow the other way: the controller notifies listeners registered through
///  [VehicleServer::add_listener], which is how a service picks them up.
pub trait VehicleServer: Send + Sync + 'static {
    fn add_listener(&self, category: EventCategory, listener: Arc<dyn VehicleListener>) -> ListenerId;
    fn remove_listener(&self, category: EventCategory, id: ListenerId) -> bool;

    fn set_pose(&self, pose: UtmPose) -> CallResult<()>;
    fn get_pose(&self) -> CallResult<UtmPose>;

    fn capture_image(&self, width: i32, height: i32) -> CallResult<Bytes>;
    fn start_camera(&self, num_frames: i32, interval: f64, width: i32, height: i32) -> CallResult<()>;
    fn stop_camera(&self) -> CallResult<()>;
    fn get_camera_status(&self) -> CallResult<CameraState>;

    fn acknowledge_sensor_data(&self, id: i64) -> CallResult<()>;

    fn set_velocity(&self, velocity: Twist) -> CallResult<()>;
    fn get_velocity(&self) -> CallResult<Twist>;

    fn start_waypoints(&self, waypoints: Vec<LatLng>) -> CallResult<()>;
    fn stop_waypoints(&self) -> CallResult<()>;
    fn get_waypoints(&self) -> CallResult<Vec<LatLng>>;
    fn get_waypoint_status(&self) -> CallResult<WaypointState>;
    fn get_waypoints_index(&self) -> CallResult<i32>;

    fn is_connected(&self) -> CallResult<bool>;
    fn is_autonomous(&self) -> CallResult<bool>;
    fn set_autonomous(&self, is_autonomous: bool) -> CallResult<()>;

    fn set_gains(&self, axis: i32, gains: Vec<f64>) -> CallResult<()>;
    fn get_gains(&self, axis: i32) -> CallResult<Vec<f64>>;

    fn set_home(&self, home: LatLng) -> CallResult<()>;
    fn get_home(&self) -> CallResult<LatLng>;
    fn start_go_home(&self) -> CallResult<()>;

    fn acknowledge_crumb(&self, id: i64) -> CallResult<()>;

    fn set_key_value(&self, key: String, value: f32) -> CallResult<()>;
    fn get_key_value(&self, key: String) -> CallResult<f32>;

    fn new_autonomous_predicate_message(&self, message: String) -> CallResult<()>;
}

/// The same command surface with non-blocking calls. This is what a remote vehicle looks like
///  to operator code, and what the service dispatcher drives.
#[async_trait]
pub trait AsyncVehicleServer: Send + Sync + 'static {
    fn add_listener(&self, category: EventCategory, listener: Arc<dyn VehicleListener>) -> ListenerId;
    fn remove_listener(&self, category: EventCategory, id: ListenerId) -> bool;

    async fn set_pose(&self, pose: UtmPose) -> CallResult<()>;
    async fn get_pose(&self) -> CallResult<UtmPose>;

    async fn capture_image(&self, width: i32, height: i32) -> CallResult<Bytes>;
    async fn start_camera(&self, num_frames: i32, interval: f64, width: i32, height: i32) -> CallResult<()>;
    async fn stop_camera(&self) -> CallResult<()>;
    async fn get_camera_status(&self) -> CallResult<CameraState>;

    async fn acknowledge_sensor_data(&self, id: i64) -> CallResult<()>;

    async fn set_velocity(&self, velocity: Twist) -> CallResult<()>;
    async fn get_velocity(&self) -> CallResult<Twist>;

    async fn start_waypoints(&self, waypoints: Vec<LatLng>) -> CallResult<()>;
    async fn stop_waypoints(&self) -> CallResult<()>;
    async fn get_waypoints(&self) -> CallResult<Vec<LatLng>>;
    async fn get_waypoint_status(&self) -> CallResult<WaypointState>;
    async fn get_waypoints_index(&self) -> CallResult<i32>;

    async fn is_connected(&self) -> CallResult<bool>;
    async fn is_autonomous(&self) -> CallResult<bool>;
    async fn set_autonomous(&self, is_autonomous: bool) -> CallResult<()>;

    async fn set_gains(&self, axis: i32, gains: Vec<f64>) -> CallResult<()>;
    async fn get_gains(&self, axis: i32) -> CallResult<Vec<f64>>;

    async fn set_home(&self, home: LatLng) -> CallResult<()>;
    async fn get_home(&self) -> CallResult<LatLng>;
    async fn start_go_home(&self) -> CallResult<()>;

    async fn acknowledge_crumb(&self, id: i64) -> CallResult<()>;

    async fn set_key_value(&self, key: String, value: f32) -> CallResult<()>;
    async fn get_key_value(&self, key: String) -> CallResult<f32>;

    async fn new_autonomous_predicate_message(&self, message: String) -> CallResult<()>;
}
