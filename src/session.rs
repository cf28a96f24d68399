//! Competition lifecycle around one scheduler run.

use std::sync::Arc;

use tracing::info;

use crate::actuation::{Actuator, Competition};
use crate::build_queue::BuildQueue;
use crate::config::SchedulerConfig;
use crate::lanes::LaneBoard;
use crate::scheduler::{FulfillmentReport, Scheduler};
use crate::shutdown::ShutdownSignal;

/// Outcome of a whole session: the scheduler report plus final lane state.
#[derive(Debug)]
pub struct SessionSummary {
    pub report: FulfillmentReport,
    pub lanes: LaneBoard,
}

/// Start the competition, home the robot, fulfil everything the queue
/// yields, then end the competition.
pub fn run_session<A, C>(
    config: SchedulerConfig,
    queue: Arc<BuildQueue>,
    mut actuator: A,
    competition: &mut C,
    shutdown: ShutdownSignal,
) -> SessionSummary
where
    A: Actuator,
    C: Competition,
{
    competition.start();
    info!(state = %competition.state(), clock = ?competition.clock(), "competition started");
    actuator.move_to_home();

    let mut scheduler = Scheduler::new(config, queue, actuator, &mut *competition, shutdown);
    let report = scheduler.run();
    let lanes = scheduler.lanes().clone();
    drop(scheduler);

    competition.end_competition();
    info!(
        state = %competition.state(),
        clock = ?competition.clock(),
        placed = report.placed.len(),
        failed = report.failures.len(),
        dispatched = report.dispatched.len(),
        "competition ended"
    );
    SessionSummary { report, lanes }
}
