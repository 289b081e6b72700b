use std::future::Future;
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::task;
use tracing::{error, warn};

use crate::messaging::command::EventCategory;
use crate::messaging::config::ProtocolConfig;
use crate::messaging::error::{CallResult, FunctionError};
use crate::vehicle::data::{CameraState, LatLng, Twist, UtmPose, WaypointState};
use crate::vehicle::listeners::{ListenerId, VehicleListener};
use crate::vehicle::server::{AsyncVehicleServer, VehicleServer};

/// Makes a blocking vehicle controller usable where an [AsyncVehicleServer] is expected, e.g. by
///  the UDP service. Every call runs on tokio's blocking thread pool.
pub struct AsyncVehicleAdapter {
    server: Arc<dyn VehicleServer>,
}

impl AsyncVehicleAdapter {
    pub fn new(server: Arc<dyn VehicleServer>) -> AsyncVehicleAdapter {
        AsyncVehicleAdapter { server }
    }

    async fn run_blocking<T, F>(&self, f: F) -> CallResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn VehicleServer) -> CallResult<T> + Send + 'static,
    {
        let server = self.server.clone();
        match task::spawn_blocking(move || f(server.as_ref())).await {
            Ok(result) => result,
            Err(e) => {
                error!("blocking vehicle call failed: {}", e);
                Err(FunctionError::Error)
            }
        }
    }
}

#[async_trait]
impl AsyncVehicleServer for AsyncVehicleAdapter {
    fn add_listener(&self, category: EventCategory, listener: Arc<dyn VehicleListener>) -> ListenerId {
        self.server.add_listener(category, listener)
    }

    fn remove_listener(&self, category: EventCategory, id: ListenerId) -> bool {
        self.server.remove_listener(category, id)
    }

    async fn set_pose(&self, pose: UtmPose) -> CallResult<()> {
        self.run_blocking(move |s| s.set_pose(pose)).await
    }

    async fn get_pose(&self) -> CallResult<UtmPose> {
        self.run_blocking(|s| s.get_pose()).await
    }

    async fn capture_image(&self, width: i32, height: i32) -> CallResult<Bytes> {
        self.run_blocking(move |s| s.capture_image(width, height)).await
    }

    async fn start_camera(&self, num_frames: i32, interval: f64, width: i32, height: i32) -> CallResult<()> {
        self.run_blocking(move |s| s.start_camera(num_frames, interval, width, height)).await
    }

    async fn stop_camera(&self) -> CallResult<()> {
        self.run_blocking(|s| s.stop_camera()).await
    }

    async fn get_camera_status(&self) -> CallResult<CameraState> {
        self.run_blocking(|s| s.get_camera_status()).await
    }

    async fn acknowledge_sensor_data(&self, id: i64) -> CallResult<()> {
        self.run_blocking(move |s| s.acknowledge_sensor_data(id)).await
    }

    async fn set_velocity(&self, velocity: Twist) -> CallResult<()> {
        self.run_blocking(move |s| s.set_velocity(velocity)).await
    }

    async fn get_velocity(&self) -> CallResult<Twist> {
        self.run_blocking(|s| s.get_velocity()).await
    }

    async fn start_waypoints(&self, waypoints: Vec<LatLng>) -> CallResult<()> {
        self.run_blocking(move |s| s.start_waypoints(waypoints)).await
    }

    async fn stop_waypoints(&self) -> CallResult<()> {
        self.run_blocking(|s| s.stop_waypoints()).await
    }

    async fn get_waypoints(&self) -> CallResult<Vec<LatLng>> {
        self.run_blocking(|s| s.get_waypoints()).await
    }

    async fn get_waypoint_status(&self) -> CallResult<WaypointState> {
        self.run_blocking(|s| s.get_waypoint_status()).await
    }

    async fn get_waypoints_index(&self) -> CallResult<i32> {
        self.run_blocking(|s| s.get_waypoints_index()).await
    }

    async fn is_connected(&self) -> CallResult<bool> {
        self.run_blocking(|s| s.is_connected()).await
    }

    async fn is_autonomous(&self) -> CallResult<bool> {
        self.run_blocking(|s| s.is_autonomous()).await
    }

    async fn set_autonomous(&self, is_autonomous: bool) -> CallResult<()> {
        self.run_blocking(move |s| s.set_autonomous(is_autonomous)).await
    }

    async fn set_gains(&self, axis: i32, gains: Vec<f64>) -> CallResult<()> {
        self.run_blocking(move |s| s.set_gains(axis, gains)).await
    }

    async fn get_gains(&self, axis: i32) -> CallResult<Vec<f64>> {
        self.run_blocking(move |s| s.get_gains(axis)).await
    }

    async fn set_home(&self, home: LatLng) -> CallResult<()> {
        self.run_blocking(move |s| s.set_home(home)).await
    }

    async fn get_home(&self) -> CallResult<LatLng> {
        self.run_blocking(|s| s.get_home()).await
    }

    async fn start_go_home(&self) -> CallResult<()> {
        self.run_blocking(|s| s.start_go_home()).await
    }

    async fn acknowledge_crumb(&self, id: i64) -> CallResult<()> {
        self.run_blocking(move |s| s.acknowledge_crumb(id)).await
    }

    async fn set_key_value(&self, key: String, value: f32) -> CallResult<()> {
        self.run_blocking(move |s| s.set_key_value(key, value)).await
    }

    async fn get_key_value(&self, key: String) -> CallResult<f32> {
        self.run_blocking(move |s| s.get_key_value(key)).await
    }

    async fn new_autonomous_predicate_message(&self, message: String) -> CallResult<()> {
        self.run_blocking(move |s| s.new_autonomous_predicate_message(message)).await
    }
}


/// Makes an [AsyncVehicleServer] (typically the UDP client) callable from plain threads. Calls
///  are spawned on a tokio runtime and the calling thread waits for the outcome.
///
/// Waiting is bounded: if no outcome arrives within the ticket timeout plus one retry delay, the
///  call fails with [FunctionError::Timeout]. This must not be called from inside the runtime's
///  own worker threads.
pub struct BlockingVehicleAdapter {
    server: Arc<dyn AsyncVehicleServer>,
    runtime: Handle,
    timeout: Duration,
}

impl BlockingVehicleAdapter {
    pub fn new(server: Arc<dyn AsyncVehicleServer>, runtime: Handle, config: &ProtocolConfig) -> BlockingVehicleAdapter {
        BlockingVehicleAdapter::with_timeout(server, runtime, config.ticket_timeout + config.initial_retry_delay)
    }

    pub fn with_timeout(server: Arc<dyn AsyncVehicleServer>, runtime: Handle, timeout: Duration) -> BlockingVehicleAdapter {
        BlockingVehicleAdapter { server, runtime, timeout }
    }

    fn wait_for<T, F, Fut>(&self, f: F) -> CallResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn AsyncVehicleServer>) -> Fut,
        Fut: Future<Output = CallResult<T>> + Send + 'static,
    {
        let (sender, receiver) = sync_channel(1);
        let call = f(self.server.clone());
        self.runtime.spawn(async move {
            // the caller may have stopped waiting
            let _ = sender.send(call.await);
        });

        match receiver.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!("no outcome for vehicle call after {:?}", self.timeout);
                Err(FunctionError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("vehicle call was dropped without an outcome");
                Err(FunctionError::Error)
            }
        }
    }
}

impl VehicleServer for BlockingVehicleAdapter {
    fn add_listener(&self, category: EventCategory, listener: Arc<dyn VehicleListener>) -> ListenerId {
        self.server.add_listener(category, listener)
    }

    fn remove_listener(&self, category: EventCategory, id: ListenerId) -> bool {
        self.server.remove_listener(category, id)
    }

    fn set_pose(&self, pose: UtmPose) -> CallResult<()> {
        self.wait_for(move |s| async move { s.set_pose(pose).await })
    }

    fn get_pose(&self) -> CallResult<UtmPose> {
        self.wait_for(|s| async move { s.get_pose().await })
    }

    fn capture_image(&self, width: i32, height: i32) -> CallResult<Bytes> {
        self.wait_for(move |s| async move { s.capture_image(width, height).await })
    }

    fn start_camera(&self, num_frames: i32, interval: f64, width: i32, height: i32) -> CallResult<()> {
        self.wait_for(move |s| async move { s.start_camera(num_frames, interval, width, height).await })
    }

    fn stop_camera(&self) -> CallResult<()> {
        self.wait_for(|s| async move { s.stop_camera().await })
    }

    fn get_camera_status(&self) -> CallResult<CameraState> {
        self.wait_for(|s| async move { s.get_camera_status().await })
    }

    fn acknowledge_sensor_data(&self, id: i64) -> CallResult<()> {
        self.wait_for(move |s| async move { s.acknowledge_sensor_data(id).await })
    }

    fn set_velocity(&self, velocity: Twist) -> CallResult<()> {
        self.wait_for(move |s| async move { s.set_velocity(velocity).await })
    }

    fn get_velocity(&self) -> CallResult<Twist> {
        self.wait_for(|s| async move { s.get_velocity().await })
    }

    fn start_waypoints(&self, waypoints: Vec<LatLng>) -> CallResult<()> {
        self.wait_for(move |s| async move { s.start_waypoints(waypoints).await })
    }

    fn stop_waypoints(&self) -> CallResult<()> {
        self.wait_for(|s| async move { s.stop_waypoints().await })
    }

    fn get_waypoints(&self) -> CallResult<Vec<LatLng>> {
        self.wait_for(|s| async move { s.get_waypoints().await })
    }

    fn get_waypoint_status(&self) -> CallResult<WaypointState> {
        self.wait_for(|s| async move { s.get_waypoint_status().await })
    }

    fn get_waypoints_index(&self) -> CallResult<i32> {
        self.wait_for(|s| async move { s.get_waypoints_index().await })
    }

    fn is_connected(&self) -> CallResult<bool> {
        self.wait_for(|s| async move { s.is_connected().await })
    }

    fn is_autonomous(&self) -> CallResult<bool> {
        self.wait_for(|s| async move { s.is_autonomous().await })
    }

    fn set_autonomous(&self, is_autonomous: bool) -> CallResult<()> {
        self.wait_for(move |s| async move { s.set_autonomous(is_autonomous).await })
    }

    fn set_gains(&self, axis: i32, gains: Vec<f64>) -> CallResult<()> {
        self.wait_for(move |s| async move { s.set_gains(axis, gains).await })
    }

    fn get_gains(&self, axis: i32) -> CallResult<Vec<f64>> {
        self.wait_for(move |s| async move { s.get_gains(axis).await })
    }

    fn set_home(&self, home: LatLng) -> CallResult<()> {
        self.wait_for(move |s| async move { s.set_home(home).await })
    }

    fn get_home(&self) -> CallResult<LatLng> {
        self.wait_for(|s| async move { s.get_home().await })
    }

    fn start_go_home(&self) -> CallResult<()> {
        self.wait_for(|s| async move { s.start_go_home().await })
    }

    fn acknowledge_crumb(&self, id: i64) -> CallResult<()> {
        self.wait_for(move |s| async move { s.acknowledge_crumb(id).await })
    }

    fn set_key_value(&self, key: String, value: f32) -> CallResult<()> {
        self.wait_for(move |s| async move { s.set_key_value(key, value).await })
    }

    fn get_key_value(&self, key: String) -> CallResult<f32> {
        self.wait_for(move |s| async move { s.get_key_value(key).await })
    }

    fn new_autonomous_predicate_message(&self, message: String) -> CallResult<()> {
        self.wait_for(move |s| async move { s.new_autonomous_predicate_message(message).await })
    }
}

pub fn to_async(server: Arc<dyn VehicleServer>) -> Arc<dyn AsyncVehicleServer> {
    Arc::new(AsyncVehicleAdapter::new(server))
}

pub fn to_blocking(server: Arc<dyn AsyncVehicleServer>, runtime: Handle, config: &ProtocolConfig) -> Arc<dyn VehicleServer> {
    Arc::new(BlockingVehicleAdapter::new(server, runtime, config))
}
