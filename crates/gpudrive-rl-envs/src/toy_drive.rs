//! Kinematic multi-agent driving simulator.

use crate::scene::{Point, RoadKind, Scene};
use gpudrive_rl::config::{
    CollisionBehavior, EnvConfig, ObsLayout, PARTNER_FEATURES, ROAD_POINT_FEATURES,
};
use gpudrive_rl::env::{SimFrame, Simulator, SimulatorFactory, SimulatorRequest};
use gpudrive_rl::IppoError;
use ndarray::{s, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;

/// Simulation timestep in seconds
const DT: f64 = 0.1;
const MAX_SPEED: f64 = 30.0;
/// Scale for vehicle dimensions in normalized observations
const MAX_VEHICLE_SIZE: f64 = 20.0;
/// Distance from the nearest road segment beyond which a vehicle is off road
const OFF_ROAD_DISTANCE: f64 = 6.0;
/// Uniform noise applied to spawn positions, in meters
const SPAWN_NOISE: f64 = 0.25;

#[derive(Clone, Copy, Debug)]
struct Vehicle {
    position: Point,
    heading: f64,
    speed: f64,
    goal: Point,
    length: f64,
    width: f64,
    controlled: bool,
    done: bool,
    stopped: bool,
    // Outcomes of the last step
    goal_achieved: bool,
    collided: bool,
    off_road: bool,
}

impl Vehicle {
    fn radius(&self) -> f64 {
        0.5 * self.length.max(self.width)
    }

    /// `point` in this vehicle's frame (x forward, y left).
    fn to_local(&self, point: Point) -> (f64, f64) {
        let dx = point.x - self.position.x;
        let dy = point.y - self.position.y;
        let (sin, cos) = self.heading.sin_cos();
        (dx * cos + dy * sin, -dx * sin + dy * cos)
    }
}

/// Start of a road segment.
#[derive(Clone, Copy, Debug)]
struct RoadPoint {
    position: Point,
    heading: f64,
    segment_length: f64,
    kind: RoadKind,
}

impl RoadPoint {
    /// Distance from `point` to the segment starting here.
    fn segment_distance(&self, point: &Point) -> f64 {
        let (sin, cos) = self.heading.sin_cos();
        let along = (point.x - self.position.x) * cos + (point.y - self.position.y) * sin;
        let t = along.clamp(0.0, self.segment_length);
        let closest = Point {
            x: self.position.x + t * cos,
            y: self.position.y + t * sin,
        };
        closest.distance(point)
    }
}

struct World {
    scene: Arc<Scene>,
    road_points: Vec<RoadPoint>,
    vehicles: Vec<Vehicle>,
}

impl World {
    fn new(scene: Arc<Scene>, polyline_reduction_threshold: f64) -> Self {
        let road_points = road_points(&scene, polyline_reduction_threshold);
        Self {
            scene,
            road_points,
            vehicles: Vec::new(),
        }
    }

    fn spawn(&mut self, config: &EnvConfig, max_agents: usize, rng: &mut StdRng) {
        self.vehicles = self
            .scene
            .objects
            .iter()
            .filter(|o| o.is_vehicle() || !config.remove_non_vehicles)
            .take(max_agents)
            .map(|o| {
                let dx = rng.gen_range(-SPAWN_NOISE..=SPAWN_NOISE);
                let dy = rng.gen_range(-SPAWN_NOISE..=SPAWN_NOISE);
                Vehicle {
                    position: Point {
                        x: o.position.x + dx,
                        y: o.position.y + dy,
                    },
                    heading: o.heading,
                    speed: o.speed.clamp(0.0, MAX_SPEED),
                    goal: o.goal_position,
                    length: o.length,
                    width: o.width,
                    controlled: o.is_vehicle(),
                    done: false,
                    stopped: false,
                    goal_achieved: false,
                    collided: false,
                    off_road: false,
                }
            })
            .collect();
    }

    fn step(&mut self, config: &EnvConfig, actions: ArrayView1<'_, usize>) {
        for v in self.vehicles.iter_mut() {
            v.goal_achieved = false;
            v.collided = false;
            v.off_road = false;
        }

        // Kinematic bicycle model
        for (slot, v) in self.vehicles.iter_mut().enumerate() {
            if v.done || !v.controlled || v.stopped {
                continue;
            }
            let (steer, accel) = config.decode_action(actions[slot]);
            v.speed = (v.speed + accel * DT).clamp(0.0, MAX_SPEED);
            let wheelbase = 0.8 * v.length.max(1.0);
            v.heading = wrap_angle(v.heading + v.speed / wheelbase * steer.tan() * DT);
            v.position.x += v.speed * v.heading.cos() * DT;
            v.position.y += v.speed * v.heading.sin() * DT;
            v.goal_achieved = v.position.distance(&v.goal) <= config.dist_to_goal_threshold;
        }

        let n = self.vehicles.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (&self.vehicles[i], &self.vehicles[j]);
                if a.done || b.done {
                    continue;
                }
                if a.position.distance(&b.position) < a.radius() + b.radius() {
                    self.vehicles[i].collided = true;
                    self.vehicles[j].collided = true;
                }
            }
        }

        let road_points = &self.road_points;
        for v in self.vehicles.iter_mut().filter(|v| v.controlled && !v.done) {
            if !road_points.is_empty() {
                let nearest = road_points
                    .iter()
                    .map(|p| p.segment_distance(&v.position))
                    .fold(f64::INFINITY, f64::min);
                v.off_road = nearest > OFF_ROAD_DISTANCE;
            }

            let removed = v.collided && config.collision_behavior == CollisionBehavior::Remove;
            if v.collided && config.collision_behavior == CollisionBehavior::Stop {
                v.stopped = true;
                v.speed = 0.0;
            }
            v.done = v.goal_achieved || v.off_road || removed;
        }
    }

    /// Flat observation of the vehicle in `slot`.
    fn observe(
        &self,
        slot: usize,
        config: &EnvConfig,
        layout: &ObsLayout,
        max_agents: usize,
    ) -> Vec<f32> {
        let ego = &self.vehicles[slot];
        let radius = config.obs_radius;
        let norm = |value: f64, scale: f64| -> f32 {
            (if config.norm_obs { value / scale } else { value }) as f32
        };
        let mut obs = Vec::with_capacity(layout.dim());

        if layout.ego > 0 {
            let (gx, gy) = ego.to_local(ego.goal);
            obs.extend([
                norm(ego.speed, MAX_SPEED),
                norm(ego.length, MAX_VEHICLE_SIZE),
                norm(ego.width, MAX_VEHICLE_SIZE),
                norm(gx, radius),
                norm(gy, radius),
                ego.collided as u8 as f32,
            ]);
        }

        let partners = (0..max_agents).filter(|&j| j != slot).take(layout.num_partners);
        for j in partners {
            match self.vehicles.get(j) {
                Some(other)
                    if !other.done && other.position.distance(&ego.position) <= radius =>
                {
                    let (dx, dy) = ego.to_local(other.position);
                    obs.extend([
                        norm(other.speed, MAX_SPEED),
                        norm(dx, radius),
                        norm(dy, radius),
                        norm(wrap_angle(other.heading - ego.heading), PI),
                        norm(other.length, MAX_VEHICLE_SIZE),
                        norm(other.width, MAX_VEHICLE_SIZE),
                    ]);
                }
                _ => obs.extend([0.0; PARTNER_FEATURES]),
            }
        }

        if layout.num_road_points > 0 {
            let mut nearby: Vec<(f64, &RoadPoint)> = self
                .road_points
                .iter()
                .map(|p| (p.position.distance(&ego.position), p))
                .filter(|(d, _)| *d <= radius)
                .collect();
            nearby.sort_by(|a, b| a.0.total_cmp(&b.0));

            for k in 0..layout.num_road_points {
                match nearby.get(k) {
                    Some((_, p)) => {
                        let (dx, dy) = ego.to_local(p.position);
                        obs.extend([
                            norm(dx, radius),
                            norm(dy, radius),
                            norm(wrap_angle(p.heading - ego.heading), PI),
                            norm(p.segment_length, radius),
                            p.kind.code(),
                        ]);
                    }
                    None => obs.extend([0.0; ROAD_POINT_FEATURES]),
                }
            }
        }

        obs.resize(layout.dim(), 0.0);
        obs
    }
}

/// Road polylines as points, dropping points closer than `threshold` to the
/// previously kept one. Endpoints are always kept.
fn road_points(scene: &Scene, threshold: f64) -> Vec<RoadPoint> {
    let mut points = Vec::new();
    for road in &scene.roads {
        let mut kept: Vec<Point> = Vec::with_capacity(road.geometry.len());
        for (i, p) in road.geometry.iter().enumerate() {
            let last = i + 1 == road.geometry.len();
            match kept.last() {
                Some(prev) if !last && prev.distance(p) < threshold => {}
                _ => kept.push(*p),
            }
        }

        if let [only] = kept.as_slice() {
            points.push(RoadPoint {
                position: *only,
                heading: 0.0,
                segment_length: 0.0,
                kind: road.kind,
            });
        }
        for pair in kept.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            points.push(RoadPoint {
                position: a,
                heading: (b.y - a.y).atan2(b.x - a.x),
                segment_length: a.distance(&b),
                kind: road.kind,
            });
        }
    }
    points
}

fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

/// Batched kinematic driving simulator running on the CPU.
///
/// Each world replays one scene: vehicles start at their recorded positions
/// (with a little seeded noise) and drive towards their goals under a
/// kinematic bicycle model. An agent's episode ends when it reaches its goal,
/// leaves the road or, with [`CollisionBehavior::Remove`], collides.
pub struct ToyDrive {
    config: EnvConfig,
    layout: ObsLayout,
    max_agents: usize,
    worlds: Vec<World>,
    rng: StdRng,
    closed: bool,
}

impl ToyDrive {
    /// Create a simulator with one world per scene.
    pub fn new(scenes: Vec<Arc<Scene>>, config: EnvConfig, max_agents: usize, seed: u64) -> Self {
        let layout = config.obs_layout();
        let worlds = scenes
            .into_iter()
            .map(|scene| World::new(scene, config.polyline_reduction_threshold))
            .collect();
        Self {
            config,
            layout,
            max_agents,
            worlds,
            rng: StdRng::seed_from_u64(seed),
            closed: false,
        }
    }

    /// Vehicles currently spawned in a world
    pub fn num_vehicles(&self, world: usize) -> usize {
        self.worlds.get(world).map_or(0, |w| w.vehicles.len())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> gpudrive_rl::Result<()> {
        if self.closed {
            Err(IppoError::ResourceAllocation(
                "simulator has been closed".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn frame(&self) -> SimFrame {
        let mut frame = SimFrame::empty(self.worlds.len(), self.max_agents, self.layout.dim());
        for (w, world) in self.worlds.iter().enumerate() {
            for (slot, v) in world.vehicles.iter().enumerate() {
                frame.controlled[[w, slot]] = v.controlled;
                frame.done[[w, slot]] = v.done;
                frame.goal_achieved[[w, slot]] = v.goal_achieved;
                frame.collided[[w, slot]] = v.collided;
                frame.off_road[[w, slot]] = v.off_road;
                if !v.done {
                    let obs = world.observe(slot, &self.config, &self.layout, self.max_agents);
                    frame
                        .observations
                        .slice_mut(s![w, slot, ..])
                        .assign(&ArrayView1::from(obs.as_slice()));
                }
            }
        }
        frame
    }
}

impl Simulator for ToyDrive {
    fn num_worlds(&self) -> usize {
        self.worlds.len()
    }

    fn max_agents(&self) -> usize {
        self.max_agents
    }

    fn observation_dim(&self) -> usize {
        self.layout.dim()
    }

    fn reset(&mut self) -> gpudrive_rl::Result<SimFrame> {
        self.ensure_open()?;
        for world in self.worlds.iter_mut() {
            world.spawn(&self.config, self.max_agents, &mut self.rng);
        }
        Ok(self.frame())
    }

    fn step(&mut self, actions: &Array2<usize>) -> gpudrive_rl::Result<SimFrame> {
        self.ensure_open()?;
        if actions.dim() != (self.worlds.len(), self.max_agents) {
            return Err(IppoError::Training(format!(
                "expected actions of shape {:?}, got {:?}",
                (self.worlds.len(), self.max_agents),
                actions.dim()
            )));
        }
        for (w, world) in self.worlds.iter_mut().enumerate() {
            world.step(&self.config, actions.row(w));
        }
        Ok(self.frame())
    }

    fn close(&mut self) {
        if !self.closed {
            self.worlds.clear();
            self.closed = true;
            tracing::debug!("Released simulator worlds");
        }
    }
}

/// Builds [`ToyDrive`] simulators, loading each distinct scene file once.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToyDriveFactory;

impl SimulatorFactory for ToyDriveFactory {
    fn create(&self, request: &SimulatorRequest<'_>) -> gpudrive_rl::Result<Box<dyn Simulator>> {
        if request.device.is_cuda() {
            tracing::warn!(device = %request.device, "ToyDrive runs on the CPU");
        }

        let mut cache: HashMap<&PathBuf, Arc<Scene>> = HashMap::new();
        let mut scenes = Vec::with_capacity(request.scenes.len());
        for path in &request.scenes {
            let scene = match cache.get(path) {
                Some(scene) => Arc::clone(scene),
                None => {
                    let scene = Arc::new(
                        Scene::load(path)
                            .map_err(|e| IppoError::ResourceAllocation(e.to_string()))?,
                    );
                    cache.insert(path, Arc::clone(&scene));
                    scene
                }
            };
            scenes.push(scene);
        }

        tracing::debug!(
            worlds = scenes.len(),
            unique_scenes = cache.len(),
            "Loaded scenes"
        );

        Ok(Box::new(ToyDrive::new(
            scenes,
            request.env_config.clone(),
            request.max_cont_agents,
            request.seed,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Road, SceneObject};
    use gpudrive_rl::config::EGO_FEATURES;
    use std::fs;

    fn car(x: f64, y: f64, goal_x: f64) -> SceneObject {
        SceneObject {
            kind: "vehicle".to_string(),
            position: Point { x, y },
            heading: 0.0,
            speed: 10.0,
            goal_position: Point { x: goal_x, y },
            length: 4.5,
            width: 2.0,
        }
    }

    fn straight_road() -> Road {
        Road {
            kind: RoadKind::Lane,
            geometry: (0..=20)
                .map(|i| Point {
                    x: -20.0 + 5.0 * i as f64,
                    y: 0.0,
                })
                .collect(),
        }
    }

    fn small_config() -> EnvConfig {
        EnvConfig {
            max_num_agents_in_scene: 4,
            max_num_road_points: 8,
            ..EnvConfig::default()
        }
    }

    fn sim(objects: Vec<SceneObject>, config: EnvConfig) -> ToyDrive {
        let scene = Arc::new(Scene {
            name: "test".to_string(),
            objects,
            roads: vec![straight_road()],
        });
        let max_agents = config.max_num_agents_in_scene;
        ToyDrive::new(vec![scene.clone(), scene], config, max_agents, 7)
    }

    /// Index of "no steering, no acceleration" in the action grid.
    fn coast(config: &EnvConfig) -> usize {
        (config.num_steer_actions / 2) * config.num_accel_actions + config.num_accel_actions / 2
    }

    #[test]
    fn test_reset_shapes_and_slots() {
        let config = small_config();
        let mut sim = sim(vec![car(0.0, 0.0, 50.0), car(20.0, 0.0, 60.0)], config.clone());
        let frame = sim.reset().unwrap();

        let dim = config.obs_layout().dim();
        assert_eq!(dim, EGO_FEATURES + 3 * PARTNER_FEATURES + 8 * ROAD_POINT_FEATURES);
        assert_eq!(frame.observations.dim(), (2, 4, dim));
        assert_eq!(frame.num_controlled(), 4);
        assert!(!frame.controlled[[0, 2]]);
        assert!(frame.observations.slice(s![0, 3, ..]).iter().all(|&x| x == 0.0));
        assert_eq!(sim.num_vehicles(0), 2);
    }

    #[test]
    fn test_goal_reached_ends_episode() {
        let config = small_config();
        let mut sim = sim(vec![car(0.0, 0.0, 2.0)], config.clone());
        sim.reset().unwrap();

        let actions = Array2::from_elem((2, 4), coast(&config));
        let frame = sim.step(&actions).unwrap();
        assert!(frame.goal_achieved[[0, 0]]);
        assert!(frame.done[[0, 0]]);
        assert!(!frame.collided[[0, 0]]);
    }

    #[test]
    fn test_collision_removes_both_vehicles() {
        let config = small_config();
        let mut sim = sim(vec![car(0.0, 0.0, 80.0), car(3.0, 0.0, 80.0)], config.clone());
        sim.reset().unwrap();

        let frame = sim.step(&Array2::from_elem((2, 4), coast(&config))).unwrap();
        assert!(frame.collided[[1, 0]] && frame.collided[[1, 1]]);
        assert!(frame.done[[1, 0]] && frame.done[[1, 1]]);
    }

    #[test]
    fn test_stop_behavior_keeps_vehicle_alive() {
        let config = EnvConfig {
            collision_behavior: CollisionBehavior::Stop,
            ..small_config()
        };
        let mut sim = sim(vec![car(0.0, 0.0, 80.0), car(3.0, 0.0, 80.0)], config.clone());
        sim.reset().unwrap();

        let frame = sim.step(&Array2::from_elem((2, 4), coast(&config))).unwrap();
        assert!(frame.collided[[0, 0]]);
        assert!(!frame.done[[0, 0]]);
    }

    #[test]
    fn test_leaving_road_ends_episode() {
        let config = small_config();
        // Start beside the road heading away from it, accelerating
        let mut start = car(0.0, 5.0, 80.0);
        start.heading = PI / 2.0;
        let mut sim = sim(vec![start], config.clone());
        sim.reset().unwrap();

        let full_throttle = coast(&config) + config.num_accel_actions / 2;
        let actions = Array2::from_elem((2, 4), full_throttle);
        let mut off_road = false;
        for _ in 0..20 {
            let frame = sim.step(&actions).unwrap();
            if frame.done[[0, 0]] {
                off_road = frame.off_road[[0, 0]];
                break;
            }
        }
        assert!(off_road);
    }

    #[test]
    fn test_non_vehicles_filtered() {
        let mut pedestrian = car(10.0, 10.0, 10.0);
        pedestrian.kind = "pedestrian".to_string();

        let mut keep = sim(vec![car(0.0, 0.0, 50.0), pedestrian.clone()], small_config());
        keep.reset().unwrap();
        assert_eq!(keep.num_vehicles(0), 1);

        let config = EnvConfig {
            remove_non_vehicles: false,
            ..small_config()
        };
        let mut all = sim(vec![car(0.0, 0.0, 50.0), pedestrian], config);
        let frame = all.reset().unwrap();
        assert_eq!(all.num_vehicles(0), 2);
        assert!(!frame.controlled[[0, 1]]);
    }

    #[test]
    fn test_seeded_resets_are_reproducible() {
        let objects = vec![car(0.0, 0.0, 50.0), car(20.0, 0.0, 60.0)];
        let mut a = sim(objects.clone(), small_config());
        let mut b = sim(objects, small_config());
        assert_eq!(a.reset().unwrap().observations, b.reset().unwrap().observations);
    }

    #[test]
    fn test_closed_simulator_rejects_steps() {
        let mut sim = sim(vec![car(0.0, 0.0, 50.0)], small_config());
        sim.close();
        sim.close();
        assert!(sim.is_closed());
        assert!(sim.reset().is_err());
    }

    #[test]
    fn test_polyline_reduction() {
        let scene = Scene {
            roads: vec![straight_road()],
            ..Scene::default()
        };
        assert_eq!(road_points(&scene, 0.1).len(), 20);
        // Keeps every other interior point plus the endpoint
        assert_eq!(road_points(&scene, 7.0).len(), 10);
    }

    #[test]
    fn test_segment_distance() {
        let p = RoadPoint {
            position: Point { x: 0.0, y: 0.0 },
            heading: 0.0,
            segment_length: 10.0,
            kind: RoadKind::Lane,
        };
        assert!((p.segment_distance(&Point { x: 5.0, y: 3.0 }) - 3.0).abs() < 1e-9);
        assert!((p.segment_distance(&Point { x: 13.0, y: 4.0 }) - 5.0).abs() < 1e-9);
        assert!((p.segment_distance(&Point { x: -3.0, y: 0.0 }) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_factory_loads_scenes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.json");
        fs::write(
            &path,
            r#"{"objects": [{"position": {"x": 0, "y": 0}, "goalPosition": {"x": 30, "y": 0}}]}"#,
        )
        .unwrap();

        let config = small_config();
        let request = SimulatorRequest {
            env_config: &config,
            scenes: vec![path.clone(), path],
            max_cont_agents: 4,
            device: gpudrive_rl::env::Device::Cpu,
            seed: 1,
        };
        let mut sim = ToyDriveFactory.create(&request).unwrap();
        assert_eq!(sim.num_worlds(), 2);
        assert_eq!(sim.max_agents(), 4);
        assert_eq!(sim.reset().unwrap().num_controlled(), 2);

        let missing = SimulatorRequest {
            scenes: vec![dir.path().join("missing.json")],
            ..request
        };
        assert!(matches!(
            ToyDriveFactory.create(&missing),
            Err(IppoError::ResourceAllocation(_))
        ));
    }
}
