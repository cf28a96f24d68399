//! Simulated collaborators plus the demo and benchmark runners.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::actuation::{Actuator, Competition, Dispatcher};
use crate::build_queue::BuildQueue;
use crate::config::SchedulerConfig;
use crate::lanes::LaneState;
use crate::localization::PartLocator;
use crate::session::{SessionSummary, run_session};
use crate::shutdown::ShutdownSignal;
use crate::types::{Arm, LaneId, Order, Part, PartSighting, Pose, Product, ProductSpec, SensorId, Shipment};

/// Sensor that sees parts dropped by a failed placement.
pub const DROP_SENSOR: &str = "drop_zone_camera";

// Demo timing knobs (small for quick CLI feedback).
const DEMO_WORK_MS: u64 = 10;
const DEMO_LATE_ORDER_MS: u64 = 150;
const DEMO_LATE_FRAME_MS: u64 = 100;
const DEMO_SILENCE_MS: u64 = 100;

/// One call made on the simulated robot.
#[derive(Clone, Debug, PartialEq)]
pub enum ActuationEvent {
    MoveToOffset {
        x: f64,
        y: f64,
    },
    Pick {
        part_type: String,
        seq: u64,
    },
    Flip,
    ActivateGripper(Arm),
    DeactivateGripper(Arm),
    Place {
        product_type: String,
        lane: LaneId,
        arm: Arm,
        placed: bool,
    },
    MoveToHome,
}

/// Robot stand-in that records every call and fails placements on demand.
pub struct SimActuator {
    events: Vec<ActuationEvent>,
    scripted_failures: HashMap<String, u32>,
    failure_rate: f64,
    rng: StdRng,
    locator: Option<Arc<PartLocator>>,
    work: Duration,
}

impl SimActuator {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            scripted_failures: HashMap::new(),
            failure_rate: 0.0,
            rng: StdRng::seed_from_u64(0),
            locator: None,
            work: Duration::ZERO,
        }
    }

    /// Fail the next `times` placements of this product type.
    pub fn fail_placements(mut self, product_type: &str, times: u32) -> Self {
        self.scripted_failures.insert(product_type.to_string(), times);
        self
    }

    /// Fail placements at random with the given probability.
    pub fn with_failure_rate(mut self, rate: f64, seed: u64) -> Self {
        self.failure_rate = rate;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Report a dropped part to the locator after every failed placement,
    /// as the camera over the drop zone would.
    pub fn republish_drops_to(mut self, locator: Arc<PartLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Sleep this long in every motion primitive.
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn events(&self) -> &[ActuationEvent] {
        &self.events
    }

    fn count(&self, pred: impl Fn(&ActuationEvent) -> bool) -> usize {
        self.events.iter().filter(|event| pred(event)).count()
    }

    pub fn picks(&self) -> usize {
        self.count(|event| matches!(event, ActuationEvent::Pick { .. }))
    }

    pub fn place_attempts(&self) -> usize {
        self.count(|event| matches!(event, ActuationEvent::Place { .. }))
    }

    pub fn flips(&self) -> usize {
        self.count(|event| matches!(event, ActuationEvent::Flip))
    }

    pub fn homes(&self) -> usize {
        self.count(|event| matches!(event, ActuationEvent::MoveToHome))
    }

    fn pause(&self) {
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
    }

    fn should_fail(&mut self, product_type: &str) -> bool {
        if let Some(remaining) = self.scripted_failures.get_mut(product_type) {
            if *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        self.failure_rate > 0.0 && self.rng.random_bool(self.failure_rate)
    }
}

impl Default for SimActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl Actuator for SimActuator {
    fn move_to_offset(&mut self, x: f64, y: f64) -> f64 {
        self.pause();
        self.events.push(ActuationEvent::MoveToOffset { x, y });
        y
    }

    fn pick(&mut self, part: &Part) {
        self.pause();
        self.events.push(ActuationEvent::Pick {
            part_type: part.part_type.clone(),
            seq: part.seq,
        });
    }

    fn place(&mut self, product: &Product, lane: &str, arm: Arm, lane_state: &mut LaneState) -> bool {
        self.pause();
        let placed = !self.should_fail(&product.product_type);
        if placed {
            lane_state.record_placement(product, arm);
        } else if let Some(locator) = &self.locator {
            let dropped = product.assigned_part.pose.shifted(0.05, -0.05);
            locator.observe_frame(
                DROP_SENSOR,
                vec![PartSighting::new(product.product_type.clone(), dropped)],
            );
        }
        self.events.push(ActuationEvent::Place {
            product_type: product.product_type.clone(),
            lane: lane.to_string(),
            arm,
            placed,
        });
        placed
    }

    fn flip(&mut self) {
        self.pause();
        self.events.push(ActuationEvent::Flip);
    }

    fn activate_gripper(&mut self, arm: Arm) {
        self.events.push(ActuationEvent::ActivateGripper(arm));
    }

    fn deactivate_gripper(&mut self, arm: Arm) {
        self.events.push(ActuationEvent::DeactivateGripper(arm));
    }

    fn move_to_home(&mut self) {
        self.pause();
        self.events.push(ActuationEvent::MoveToHome);
    }
}

/// Competition stand-in that records ship calls.
pub struct SimCompetition {
    state: &'static str,
    started_at: Option<Instant>,
    dispatches: Vec<(LaneId, String)>,
}

impl SimCompetition {
    pub fn new() -> Self {
        Self {
            state: "init",
            started_at: None,
            dispatches: Vec::new(),
        }
    }

    /// (lane, shipment type) per ship call, in order.
    pub fn dispatches(&self) -> &[(LaneId, String)] {
        &self.dispatches
    }
}

impl Default for SimCompetition {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for SimCompetition {
    fn dispatch_shipment(&mut self, lane: &str, shipment_type: &str) {
        self.dispatches
            .push((lane.to_string(), shipment_type.to_string()));
    }
}

impl Competition for SimCompetition {
    fn start(&mut self) {
        self.state = "go";
        self.started_at = Some(Instant::now());
    }

    fn state(&self) -> String {
        self.state.to_string()
    }

    fn clock(&self) -> Duration {
        self.started_at
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    fn end_competition(&mut self) {
        self.state = "done";
    }
}

/// Push orders after their delays, then close the queue.
pub fn spawn_order_feed(
    queue: Arc<BuildQueue>,
    schedule: Vec<(Duration, Order)>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("order-feed".to_string())
        .spawn(move || {
            for (delay, order) in schedule {
                thread::sleep(delay);
                if let Err(order) = queue.push_order(order) {
                    warn!(order = %order.order_id, "queue closed, order dropped");
                }
            }
            queue.close();
        })
}

/// Publish camera frames after their delays.
pub fn spawn_camera_feed(
    locator: Arc<PartLocator>,
    schedule: Vec<(Duration, SensorId, Vec<PartSighting>)>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("camera-feed".to_string())
        .spawn(move || {
            for (delay, sensor, sightings) in schedule {
                thread::sleep(delay);
                locator.observe_frame(&sensor, sightings);
            }
        })
}

fn join_feed(handle: thread::JoinHandle<()>, name: &str) -> anyhow::Result<()> {
    handle.join().map_err(|_| anyhow!("{name} thread panicked"))
}

fn build_queue_for(config: &SchedulerConfig) -> (Arc<PartLocator>, Arc<BuildQueue>) {
    let locator = Arc::new(PartLocator::new(config.poll_interval()));
    let queue = Arc::new(BuildQueue::new(
        Arc::clone(&locator),
        config.localization_timeout(),
        config.poll_interval(),
    ));
    (locator, queue)
}

fn tray_pose(slot: usize, inverted: bool) -> Pose {
    let x = 0.1 * (slot % 3) as f64 - 0.1;
    let y = 0.15 * (slot / 3) as f64 - 0.15;
    if inverted {
        Pose::new([x, y, 0.0], [1.0, 0.0, 0.0, 0.0])
    } else {
        Pose::from_translation(x, y, 0.0)
    }
}

fn bin_pose(index: usize) -> Pose {
    Pose::from_translation(-1.9 + 0.2 * index as f64, 3.3, 0.72)
}

fn demo_orders() -> Vec<(Duration, Order)> {
    let first = Order {
        order_id: "order_0".to_string(),
        shipments: vec![
            Shipment {
                sequence: 1,
                lane: "agv1".to_string(),
                shipment_type: "order_0_shipment_0".to_string(),
                products: vec![
                    ProductSpec::new("piston_rod_part_blue", tray_pose(0, false)),
                    ProductSpec::new("gear_part_red", tray_pose(1, false)),
                ],
            },
            Shipment {
                sequence: 2,
                lane: "agv2".to_string(),
                shipment_type: "order_0_shipment_1".to_string(),
                products: vec![
                    ProductSpec::new("gasket_part_green", tray_pose(0, false)),
                    ProductSpec::new("pulley_part_red", tray_pose(1, true)),
                ],
            },
        ],
    };
    // Arrives mid-run with a lower shipment sequence than the one in progress.
    let late = Order {
        order_id: "order_1".to_string(),
        shipments: vec![Shipment {
            sequence: 1,
            lane: "agv1".to_string(),
            shipment_type: "order_1_shipment_0".to_string(),
            products: vec![ProductSpec::new("disk_part_blue", tray_pose(2, false))],
        }],
    };
    vec![
        (Duration::ZERO, first),
        (Duration::from_millis(DEMO_LATE_ORDER_MS), late),
    ]
}

fn demo_frames() -> Vec<(Duration, SensorId, Vec<PartSighting>)> {
    vec![
        (
            Duration::ZERO,
            "logical_camera_1".to_string(),
            vec![
                PartSighting::new("piston_rod_part_blue", bin_pose(0)),
                PartSighting::new("gear_part_red", bin_pose(1)),
            ],
        ),
        (
            Duration::ZERO,
            "logical_camera_2".to_string(),
            vec![
                PartSighting::new("gasket_part_green", bin_pose(2)),
                PartSighting::new("pulley_part_red", bin_pose(3)),
            ],
        ),
        (
            Duration::from_millis(DEMO_LATE_FRAME_MS),
            "logical_camera_3".to_string(),
            vec![PartSighting::new("disk_part_blue", bin_pose(4))],
        ),
    ]
}

/// Run the demo: two orders over two lanes, one injected placement failure,
/// and a late order whose lower sequence forces a mid-run ship.
pub fn run_demo(config: SchedulerConfig) -> anyhow::Result<()> {
    info!("demo start");
    let (locator, queue) = build_queue_for(&config);
    // logical_camera_4 is wired but never reports.
    locator.register_sensors(["logical_camera_1", "logical_camera_2", "logical_camera_3", "logical_camera_4"]);

    let orders = demo_orders();
    let products_total: usize = orders
        .iter()
        .flat_map(|(_, order)| order.shipments.iter())
        .map(|shipment| shipment.products.len())
        .sum();
    let order_count = orders.len();
    let camera_feed = spawn_camera_feed(Arc::clone(&locator), demo_frames()).context("spawn camera feed")?;
    let order_feed = spawn_order_feed(Arc::clone(&queue), orders).context("spawn order feed")?;

    let actuator = SimActuator::new()
        .fail_placements("gasket_part_green", 1)
        .republish_drops_to(Arc::clone(&locator))
        .with_work(Duration::from_millis(DEMO_WORK_MS));
    let mut competition = SimCompetition::new();
    let start = Instant::now();
    let SessionSummary { report, lanes } =
        run_session(config, queue, actuator, &mut competition, ShutdownSignal::new());
    join_feed(order_feed, "order feed")?;
    join_feed(camera_feed, "camera feed")?;
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "demo finished");

    let mut silent: Vec<_> = locator
        .silent_sensors(Duration::from_millis(DEMO_SILENCE_MS))
        .into_iter()
        .collect();
    silent.sort();
    let dispatched: Vec<String> = report.dispatched.iter().map(ToString::to_string).collect();
    let abandoned: Vec<String> = report.abandoned.iter().map(ToString::to_string).collect();

    println!("DEMO SUMMARY");
    println!("orders={order_count} products_total={products_total}");
    println!("products_placed={}", report.placed.len());
    println!("products_failed={}", report.failures.len());
    println!("place_attempts={}", report.place_attempts());
    println!("dispatched={dispatched:?}");
    println!("abandoned={abandoned:?}");
    println!("lane_occupancy={:?}", lanes.occupancy());
    println!("silent_sensors={silent:?}");
    println!("competition_state={}", competition.state());
    println!("cancelled={}", report.cancelled);
    Ok(())
}

/// Parameters of a single benchmark run.
#[derive(Clone, Debug)]
pub struct BenchOptions {
    pub shipments: usize,
    pub products_per_shipment: usize,
    pub failure_rate: f64,
    pub seed: u64,
    pub work_ms: u64,
    /// Trigger shutdown after this long; zero runs to completion.
    pub deadline_ms: u64,
}

/// Best-effort process CPU user/system time (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: rusage is plain data; getrusage only writes into it.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let seconds = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some((seconds(usage.ru_utime), seconds(usage.ru_stime)))
}

#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

const BENCH_PART_TYPES: [&str; 5] = [
    "gear_part_red",
    "pulley_part_blue",
    "gasket_part_green",
    "piston_rod_part_red",
    "disk_part_blue",
];

fn bench_order(options: &BenchOptions, lanes: &[String]) -> Order {
    let shipments = (0..options.shipments)
        .map(|index| Shipment {
            sequence: index as u32,
            lane: lanes[index % lanes.len()].clone(),
            shipment_type: format!("bench_shipment_{index}"),
            products: (0..options.products_per_shipment)
                .map(|slot| {
                    let part_type = BENCH_PART_TYPES[(index + slot) % BENCH_PART_TYPES.len()];
                    ProductSpec::new(part_type, tray_pose(slot, slot % 4 == 3))
                })
                .collect(),
        })
        .collect();
    Order {
        order_id: "bench".to_string(),
        shipments,
    }
}

/// Run one seeded benchmark and print a CSV header plus result line.
pub fn run_benchmark(config: SchedulerConfig, options: BenchOptions) -> anyhow::Result<()> {
    if options.shipments == 0 {
        bail!("shipments must be > 0");
    }
    if options.products_per_shipment == 0 {
        bail!("products per shipment must be > 0");
    }
    if !(0.0..1.0).contains(&options.failure_rate) {
        bail!("failure rate must be in [0, 1)");
    }

    let (locator, queue) = build_queue_for(&config);
    let order = bench_order(&options, &config.lanes);
    let sightings: Vec<_> = order
        .shipments
        .iter()
        .flat_map(|shipment| shipment.products.iter())
        .enumerate()
        .map(|(index, spec)| PartSighting::new(spec.product_type.clone(), bin_pose(index % 16)))
        .collect();
    let total_products = sightings.len();
    locator.observe_frame("bench_camera", sightings);
    let order_feed = spawn_order_feed(Arc::clone(&queue), vec![(Duration::ZERO, order)]).context("spawn order feed")?;

    let shutdown = ShutdownSignal::new();
    let deadline = (options.deadline_ms > 0).then(|| {
        let signal = shutdown.clone();
        let after = Duration::from_millis(options.deadline_ms);
        thread::Builder::new()
            .name("bench-deadline".to_string())
            .spawn(move || {
                thread::sleep(after);
                signal.trigger();
            })
    });
    let deadline = deadline.transpose().context("spawn deadline timer")?;

    let actuator = SimActuator::new()
        .with_failure_rate(options.failure_rate, options.seed)
        .republish_drops_to(Arc::clone(&locator))
        .with_work(Duration::from_millis(options.work_ms));
    let mut competition = SimCompetition::new();

    let cpu_start = cpu_times_seconds();
    let start = Instant::now();
    let SessionSummary { report, .. } =
        run_session(config, queue, actuator, &mut competition, shutdown.clone());
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    join_feed(order_feed, "order feed")?;
    if let Some(handle) = deadline {
        // The timer may still be sleeping; fire it early so the join is quick.
        shutdown.trigger();
        join_feed(handle, "deadline")?;
    }

    let throughput = if elapsed_ms > 0.0 {
        report.placed.len() as f64 / (elapsed_ms / 1000.0)
    } else {
        0.0
    };
    let (cpu_user, cpu_sys) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => (
            format!("{:.4}", user_end - user_start),
            format!("{:.4}", sys_end - sys_start),
        ),
        _ => ("NA".to_string(), "NA".to_string()),
    };

    println!(
        "shipments,products,failure_rate,placed,failed,place_attempts,dispatched,abandoned,cancelled,elapsed_ms,throughput_products_per_s,cpu_user_s,cpu_sys_s"
    );
    println!(
        "{},{},{:.3},{},{},{},{},{},{},{:.2},{:.2},{},{}",
        options.shipments,
        total_products,
        options.failure_rate,
        report.placed.len(),
        report.failures.len(),
        report.place_attempts(),
        report.dispatched.len(),
        report.abandoned.len(),
        report.cancelled,
        elapsed_ms,
        throughput,
        cpu_user,
        cpu_sys
    );
    if !report.failures.is_empty() {
        eprintln!("# warning,unfulfilled_products,{}", report.failures.len());
    }
    Ok(())
}
