use chrono::{DateTime, Duration, Local, TimeZone, Timelike};
use std::str::FromStr;
use std::sync::Arc;
use std::time;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pipeline::NotificationPipeline;

const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(thiserror::Error, Debug)]
pub enum ScheduleError {
    #[error("{hour}:{minute} is not a valid time of day for the daily schedule.")]
    InvalidCadence { hour: u32, minute: u32 },
    #[error("A fixed daily schedule needs both hour and minute, got {hour:?}:{minute:?}.")]
    IncompleteCadence {
        hour: Option<u32>,
        minute: Option<u32>,
    },
    #[error("A startup offset of {seconds} seconds is out of range.")]
    InvalidStartupOffset { seconds: i64 },
    #[error("Failed to register the cron expression `{expression}`: {reason}")]
    InvalidExpression { expression: String, reason: String },
    #[error("The daily schedule has no firing after {after}.")]
    Exhausted { after: String },
}

/// Fires once a day at a fixed hour:minute, backed by the cron expression
/// `0 {minute} {hour} * * *`.
#[derive(Debug, Clone)]
pub struct DailySchedule {
    hour: u32,
    minute: u32,
    cron: cron::Schedule,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32) -> Result<DailySchedule, ScheduleError> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidCadence { hour, minute });
        }

        let expression = format!("0 {} {} * * *", minute, hour);
        let cron = match cron::Schedule::from_str(&expression) {
            Ok(cron) => cron,
            Err(err) => {
                return Err(ScheduleError::InvalidExpression {
                    expression,
                    reason: err.to_string(),
                })
            }
        };

        Ok(DailySchedule { hour, minute, cron })
    }

    /// The cadence whose first firing is the first whole minute at or after
    /// `now + offset`.
    pub fn starting_after<Tz: TimeZone>(
        now: &DateTime<Tz>,
        offset: Duration,
    ) -> Result<DailySchedule, ScheduleError> {
        let invalid_offset = || ScheduleError::InvalidStartupOffset {
            seconds: offset.num_seconds(),
        };

        if offset < Duration::zero() {
            return Err(invalid_offset());
        }

        let start = now
            .clone()
            .checked_add_signed(offset)
            .ok_or_else(invalid_offset)?
            .time();

        let mut minute_of_day = start.hour() * 60 + start.minute();
        if start.second() > 0 || start.nanosecond() > 0 {
            minute_of_day = (minute_of_day + 1) % MINUTES_PER_DAY;
        }

        DailySchedule::new(minute_of_day / 60, minute_of_day % 60)
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// First instant strictly after `instant` at this hour:minute, in the
    /// instant's own time zone.
    pub fn next_after<Tz: TimeZone>(
        &self,
        instant: &DateTime<Tz>,
    ) -> Result<DateTime<Tz>, ScheduleError> {
        self.cron
            .after(instant)
            .next()
            .ok_or_else(|| ScheduleError::Exhausted {
                after: format!("{:?}", instant),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed { next_firing: DateTime<Local> },
    Firing { started_at: DateTime<Local> },
}

type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Drives the notification pipeline once a day. Owned by a single task, so a
/// run can never overlap the next one: the next firing is only computed once
/// the current run has returned.
pub struct Scheduler {
    schedule: DailySchedule,
    pipeline: Arc<NotificationPipeline>,
    clock: Clock,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(schedule: DailySchedule, pipeline: Arc<NotificationPipeline>) -> Scheduler {
        let (state, _) = watch::channel(SchedulerState::Idle);

        Scheduler {
            schedule,
            pipeline,
            clock: Arc::new(Local::now),
            state,
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: impl Fn() -> DateTime<Local> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state.borrow().clone()
    }

    pub fn next_firing(&self) -> Option<DateTime<Local>> {
        next_firing_of(&self.state())
    }

    /// Arms the first firing: today at hour:minute if that is still ahead,
    /// otherwise tomorrow.
    pub fn start(&mut self) -> Result<DateTime<Local>, ScheduleError> {
        let next_firing = self.schedule.next_after(&(self.clock)())?;
        self.state.send_replace(SchedulerState::Armed { next_firing });

        tracing::info!("Scheduler started with first execution at: {}", next_firing);

        Ok(next_firing)
    }

    /// Runs the pipeline for the firing due at `due_at` and arms the next
    /// day. The outcome of the run never prevents re-arming.
    pub async fn fire(
        &mut self,
        due_at: DateTime<Local>,
    ) -> Result<DateTime<Local>, ScheduleError> {
        self.state.send_replace(SchedulerState::Firing {
            started_at: (self.clock)(),
        });

        let pipeline = self.pipeline.clone();
        match tokio::spawn(async move { pipeline.run().await }).await {
            Ok(summary) if summary.is_aborted() => {
                tracing::warn!("Scheduled run sent no emails: {:?}", summary.aborted);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!("Scheduled run failed: {:?}", err);
            }
        }

        // Never re-arm at or before the instant that just fired.
        let now = (self.clock)();
        let reference = if now > due_at { now } else { due_at };
        let next_firing = match self.schedule.next_after(&reference) {
            Ok(next_firing) => next_firing,
            Err(err) => {
                self.state.send_replace(SchedulerState::Idle);
                return Err(err);
            }
        };
        self.state.send_replace(SchedulerState::Armed { next_firing });

        tracing::info!("Next scheduled execution at: {}", next_firing);

        Ok(next_firing)
    }

    /// Arms the schedule and hands it to a background task that fires until
    /// `shutdown` is cancelled.
    pub fn spawn(mut self, shutdown: CancellationToken) -> Result<SchedulerHandle, ScheduleError> {
        let next_firing = self.start()?;
        let state = self.state.subscribe();
        let task = tokio::spawn(self.run_until_cancelled(next_firing, shutdown.clone()));

        Ok(SchedulerHandle {
            state,
            shutdown,
            task,
        })
    }

    async fn run_until_cancelled(
        mut self,
        mut next_firing: DateTime<Local>,
        shutdown: CancellationToken,
    ) {
        loop {
            let wait = (next_firing - (self.clock)())
                .to_std()
                .unwrap_or(time::Duration::ZERO);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    match self.fire(next_firing).await {
                        Ok(next) => next_firing = next,
                        Err(err) => {
                            tracing::error!("Failed to re-arm the scheduler: {:?}", err);
                            break;
                        }
                    }
                }
            }
        }

        self.state.send_replace(SchedulerState::Idle);
    }
}

pub struct SchedulerHandle {
    state: watch::Receiver<SchedulerState>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        self.state.borrow().clone()
    }

    pub fn next_firing(&self) -> Option<DateTime<Local>> {
        next_firing_of(&self.state())
    }

    /// Stops the scheduler. A run already in flight is allowed to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();

        if let Err(err) = self.task.await {
            tracing::error!("Scheduler task failed: {:?}", err);
        }
    }
}

fn next_firing_of(state: &SchedulerState) -> Option<DateTime<Local>> {
    match state {
        SchedulerState::Armed { next_firing } => Some(*next_firing),
        SchedulerState::Idle | SchedulerState::Firing { .. } => None,
    }
}
