use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::messaging::command::EventCategory;
use crate::messaging::error::CallResult;
use crate::vehicle::data::{CameraState, LatLng, Twist, UtmPose, WaypointState};
use crate::vehicle::events::VehicleEvent;
use crate::vehicle::listeners::{ListenerId, ListenerRegistry, VehicleListener};
use crate::vehicle::server::VehicleServer;

pub const NUM_GAIN_AXES: usize = 6;
pub const NUM_GAINS_PER_AXIS: usize = 3;

struct VehicleState {
    pose: UtmPose,
    velocity: Twist,
    camera: CameraState,
    captured_image: Bytes,
    waypoints: Vec<LatLng>,
    waypoint_status: WaypointState,
    waypoint_index: i32,
    is_autonomous: bool,
    gains: [[f64; NUM_GAINS_PER_AXIS]; NUM_GAIN_AXES],
    home: LatLng,
    key_values: FxHashMap<String, f32>,
    acknowledged_sensor_data: Vec<i64>,
    acknowledged_crumbs: Vec<i64>,
    predicate_messages: Vec<String>,
}

/// A vehicle that only exists in memory: it stores what it is told and reports it back. State
///  changes that a real vehicle would report (camera and waypoint status) are published as events,
///  and [SimpleVehicleServer::publish] emits arbitrary events, e.g. simulated sensor readings.
pub struct SimpleVehicleServer {
    state: Mutex<VehicleState>,
    listeners: ListenerRegistry,
}

impl SimpleVehicleServer {
    pub fn new() -> Arc<SimpleVehicleServer> {
        Arc::new(SimpleVehicleServer {
            state: Mutex::new(VehicleState {
                pose: UtmPose::default(),
                velocity: Twist::default(),
                camera: CameraState::Off,
                captured_image: Bytes::new(),
                waypoints: Vec::new(),
                waypoint_status: WaypointState::Off,
                waypoint_index: -1,
                is_autonomous: false,
                gains: [[0.0; NUM_GAINS_PER_AXIS]; NUM_GAIN_AXES],
                home: LatLng::default(),
                key_values: FxHashMap::default(),
                acknowledged_sensor_data: Vec::new(),
                acknowledged_crumbs: Vec::new(),
                predicate_messages: Vec::new(),
            }),
            listeners: ListenerRegistry::new(),
        })
    }

    pub fn publish(&self, event: VehicleEvent) {
        self.listeners.notify(&event);
    }

    pub fn has_listeners(&self, category: EventCategory) -> bool {
        self.listeners.has_listeners(category)
    }

    /// the frame returned by subsequent calls to `capture_image`
    pub fn set_captured_image(&self, image: Bytes) {
        self.state.lock().unwrap().captured_image = image;
    }

    pub fn acknowledged_sensor_data(&self) -> Vec<i64> {
        self.state.lock().unwrap().acknowledged_sensor_data.clone()
    }

    pub fn acknowledged_crumbs(&self) -> Vec<i64> {
        self.state.lock().unwrap().acknowledged_crumbs.clone()
    }

    pub fn predicate_messages(&self) -> Vec<String> {
        self.state.lock().unwrap().predicate_messages.clone()
    }

    fn update_camera(&self, camera: CameraState) {
        self.state.lock().unwrap().camera = camera;
        self.publish(VehicleEvent::Camera(camera));
    }

    fn update_waypoints(&self, waypoints: Option<Vec<LatLng>>, status: WaypointState) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(waypoints) = waypoints {
                state.waypoint_index = if waypoints.is_empty() { -1 } else { 0 };
                state.waypoints = waypoints;
            }
            state.waypoint_status = status;
        }
        self.publish(VehicleEvent::Waypoint(status));
    }
}

impl VehicleServer for SimpleVehicleServer {
    fn add_listener(&self, category: EventCategory, listener: Arc<dyn VehicleListener>) -> ListenerId {
        self.listeners.add(category, listener)
    }

    fn remove_listener(&self, category: EventCategory, id: ListenerId) -> bool {
        self.listeners.remove(category, id)
    }

    fn set_pose(&self, pose: UtmPose) -> CallResult<()> {
        self.state.lock().unwrap().pose = pose;
        Ok(())
    }

    fn get_pose(&self) -> CallResult<UtmPose> {
        Ok(self.state.lock().unwrap().pose)
    }

    fn capture_image(&self, width: i32, height: i32) -> CallResult<Bytes> {
        debug!("capturing {}x{} image", width, height);
        Ok(self.state.lock().unwrap().captured_image.clone())
    }

    fn start_camera(&self, num_frames: i32, interval: f64, width: i32, height: i32) -> CallResult<()> {
        info!("starting camera: {} frames of {}x{} every {}s", num_frames, width, height, interval);
        self.update_camera(CameraState::Capturing);
        Ok(())
    }

    fn stop_camera(&self) -> CallResult<()> {
        self.update_camera(CameraState::Cancelled);
        Ok(())
    }

    fn get_camera_status(&self) -> CallResult<CameraState> {
        Ok(self.state.lock().unwrap().camera)
    }

    fn acknowledge_sensor_data(&self, id: i64) -> CallResult<()> {
        self.state.lock().unwrap().acknowledged_sensor_data.push(id);
        Ok(())
    }

    fn set_velocity(&self, velocity: Twist) -> CallResult<()> {
        self.state.lock().unwrap().velocity = velocity;
        Ok(())
    }

    fn get_velocity(&self) -> CallResult<Twist> {
        Ok(self.state.lock().unwrap().velocity)
    }

    fn start_waypoints(&self, waypoints: Vec<LatLng>) -> CallResult<()> {
        self.update_waypoints(Some(waypoints), WaypointState::Going);
        Ok(())
    }

    fn stop_waypoints(&self) -> CallResult<()> {
        self.update_waypoints(None, WaypointState::Cancelled);
        Ok(())
    }

    fn get_waypoints(&self) -> CallResult<Vec<LatLng>> {
        Ok(self.state.lock().unwrap().waypoints.clone())
    }

    fn get_waypoint_status(&self) -> CallResult<WaypointState> {
        Ok(self.state.lock().unwrap().waypoint_status)
    }

    fn get_waypoints_index(&self) -> CallResult<i32> {
        Ok(self.state.lock().unwrap().waypoint_index)
    }

    fn is_connected(&self) -> CallResult<bool> {
        Ok(true)
    }

    fn is_autonomous(&self) -> CallResult<bool> {
        Ok(self.state.lock().unwrap().is_autonomous)
    }

    fn set_autonomous(&self, is_autonomous: bool) -> CallResult<()> {
        self.state.lock().unwrap().is_autonomous = is_autonomous;
        Ok(())
    }

    fn set_gains(&self, axis: i32, gains: Vec<f64>) -> CallResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(axis_gains) = usize::try_from(axis).ok().and_then(|a| state.gains.get_mut(a)) {
            for (target, value) in axis_gains.iter_mut().zip(gains) {
                *target = value;
            }
        }
        else {
            debug!("ignoring gains for unknown axis {}", axis);
        }
        Ok(())
    }

    fn get_gains(&self, axis: i32) -> CallResult<Vec<f64>> {
        let state = self.state.lock().unwrap();
        let gains = usize::try_from(axis).ok()
            .and_then(|a| state.gains.get(a))
            .map(|g| g.to_vec())
            .unwrap_or_default();
        Ok(gains)
    }

    fn set_home(&self, home: LatLng) -> CallResult<()> {
        self.state.lock().unwrap().home = home;
        Ok(())
    }

    fn get_home(&self) -> CallResult<LatLng> {
        Ok(self.state.lock().unwrap().home)
    }

    fn start_go_home(&self) -> CallResult<()> {
        let home = self.state.lock().unwrap().home;
        self.update_waypoints(Some(vec![home]), WaypointState::Going);
        Ok(())
    }

    fn acknowledge_crumb(&self, id: i64) -> CallResult<()> {
        self.state.lock().unwrap().acknowledged_crumbs.push(id);
        Ok(())
    }

    fn set_key_value(&self, key: String, value: f32) -> CallResult<()> {
        self.state.lock().unwrap().key_values.insert(key.clone(), value);
        self.publish(VehicleEvent::KeyValue { key, value });
        Ok(())
    }

    fn get_key_value(&self, key: String) -> CallResult<f32> {
        Ok(self.state.lock().unwrap().key_values.get(&key).copied().unwrap_or(0.0))
    }

    fn new_autonomous_predicate_message(&self, message: String) -> CallResult<()> {
        self.state.lock().unwrap().predicate_messages.push(message);
        Ok(())
    }
}
