//! Pipeline loop: frames interleaved with control tasks.
//!
//! The receiver runs on whatever thread calls [`Receiver::read`]. Other
//! threads submit control tasks (slot and endpoint management, metric
//! queries, RTCP exchange) through a lock-free ring; the loop splits
//! every read into subframes and drains a bounded number of tasks at
//! each subframe boundary, so control work never preempts audio work
//! mid-subframe and task latency stays bounded by one subframe.
//!
//! When the loop is idle (no read in progress), the submitting thread
//! executes pending tasks inline instead of waiting for the next frame.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_queue::ArrayQueue;
use tracing::{debug, warn};

use audiolink_audio_core::Frame;
use audiolink_packet_core::rtp::EncodingMap;
use audiolink_packet_core::units::Nanos;
use audiolink_packet_core::{RecvReport, SendReport, SourceId};

use crate::config::{Interface, ReceiverConfig, SlotMetrics};
use crate::endpoint::{EndpointUri, IngressWriter};
use crate::error::{Error, Result};
use crate::slot::SlotId;
use crate::source::ReceiverSource;

/// Callback used to wake whoever drives the loop when tasks are
/// submitted while a read is in progress.
pub trait TaskScheduler: Send + Sync {
    fn schedule_task_processing(&self);
}

/// Default scheduler: tasks wait for the next subframe boundary.
pub struct NoopScheduler;

impl TaskScheduler for NoopScheduler {
    fn schedule_task_processing(&self) {}
}

enum ControlTask {
    CreateSlot {
        reply: mpsc::Sender<SlotId>,
    },
    DeleteSlot {
        id: SlotId,
        reply: mpsc::Sender<Result<()>>,
    },
    AddEndpoint {
        slot: SlotId,
        iface: Interface,
        uri: EndpointUri,
        reply: mpsc::Sender<Result<IngressWriter>>,
    },
    QueryMetrics {
        slot: SlotId,
        reply: mpsc::Sender<Result<SlotMetrics>>,
    },
    ProcessReport {
        report: SendReport,
    },
    LinkFlows {
        slot: SlotId,
        source_id: SourceId,
        repair_id: SourceId,
    },
    GenerateReports {
        report_time: Nanos,
        reply: mpsc::Sender<Vec<RecvReport>>,
    },
}

struct LoopState {
    source: ReceiverSource,
    subframe: Frame,
}

/// Thread-safe receiver front end.
pub struct Receiver {
    state: Mutex<LoopState>,
    tasks: ArrayQueue<ControlTask>,
    scheduler: Arc<dyn TaskScheduler>,

    receiver_ssrc: SourceId,
    receiver_cname: String,

    max_subframe: usize,
    max_tasks_per_subframe: usize,
    auto_reclock: bool,
}

impl Receiver {
    pub fn new(config: ReceiverConfig, encoding_map: EncodingMap) -> Result<Self> {
        Self::with_scheduler(config, encoding_map, Arc::new(NoopScheduler))
    }

    pub fn with_scheduler(
        config: ReceiverConfig,
        encoding_map: EncodingMap,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> Result<Self> {
        let max_subframe = config.max_subframe_samples;
        let max_tasks = config.max_tasks_per_subframe;
        let auto_reclock = config.enable_auto_reclock;

        let source = ReceiverSource::new(config, encoding_map)?;

        let receiver_ssrc: SourceId = rand::random();

        Ok(Self {
            state: Mutex::new(LoopState {
                source,
                subframe: Frame::new(),
            }),
            tasks: ArrayQueue::new(128),
            scheduler,
            receiver_ssrc,
            receiver_cname: format!("audiolink-{receiver_ssrc:08x}"),
            max_subframe,
            max_tasks_per_subframe: max_tasks,
            auto_reclock,
        })
    }

    pub fn receiver_ssrc(&self) -> SourceId {
        self.receiver_ssrc
    }

    pub fn receiver_cname(&self) -> &str {
        &self.receiver_cname
    }

    /// Create a slot. Blocks until the pipeline executes the task, at
    /// most one subframe away.
    pub fn create_slot(&self) -> Result<SlotId> {
        let (reply, rx) = mpsc::channel();
        self.submit(ControlTask::CreateSlot { reply })?;
        rx.recv().map_err(|_| Error::PipelineTerminated)
    }

    /// Remove a slot; its pending packets are cancelled at the next
    /// subframe boundary.
    pub fn delete_slot(&self, id: SlotId) -> Result<()> {
        let (reply, rx) = mpsc::channel();
        self.submit(ControlTask::DeleteSlot { id, reply })?;
        rx.recv().map_err(|_| Error::PipelineTerminated)?
    }

    /// Bind an endpoint on a slot, returning the writer for the network
    /// layer.
    pub fn add_endpoint(
        &self,
        slot: SlotId,
        iface: Interface,
        uri: EndpointUri,
    ) -> Result<IngressWriter> {
        let (reply, rx) = mpsc::channel();
        self.submit(ControlTask::AddEndpoint {
            slot,
            iface,
            uri,
            reply,
        })?;
        rx.recv().map_err(|_| Error::PipelineTerminated)?
    }

    /// Snapshot a slot's metrics.
    pub fn query_slot_metrics(&self, slot: SlotId) -> Result<SlotMetrics> {
        let (reply, rx) = mpsc::channel();
        self.submit(ControlTask::QueryMetrics { slot, reply })?;
        rx.recv().map_err(|_| Error::PipelineTerminated)?
    }

    /// Ingest a sender report from the RTCP layer.
    pub fn process_report(&self, report: SendReport) -> Result<()> {
        self.submit(ControlTask::ProcessReport { report })
    }

    /// Bind a repair-flow SSRC to a source-flow SSRC (from RTCP SDES).
    pub fn link_flows(&self, slot: SlotId, source_id: SourceId, repair_id: SourceId) -> Result<()> {
        self.submit(ControlTask::LinkFlows {
            slot,
            source_id,
            repair_id,
        })
    }

    /// Build the receiver reports the RTCP layer should emit.
    pub fn generate_reports(&self) -> Result<Vec<RecvReport>> {
        let (reply, rx) = mpsc::channel();
        self.submit(ControlTask::GenerateReports {
            report_time: wall_clock_ns(),
            reply,
        })?;
        rx.recv().map_err(|_| Error::PipelineTerminated)
    }

    /// Live sessions across all slots, as of the last read.
    pub fn num_sessions(&self) -> usize {
        self.state.lock().unwrap().source.num_sessions()
    }

    /// Read `duration` per-channel samples of mixed output.
    ///
    /// The caller controls cadence; there is no timeout. The read is
    /// split into subframes with task processing in between.
    pub fn read(&self, frame: &mut Frame, duration: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let n_channels = state.source.output_spec().num_channels();
        frame.prepare(duration * n_channels);

        let mut done = 0;
        while done < duration {
            let sub = (duration - done).min(self.max_subframe);

            state.source.refresh();

            {
                let LoopState { source, subframe } = &mut *state;
                source.read(subframe, sub);

                frame.samples_mut()[done * n_channels..(done + sub) * n_channels]
                    .copy_from_slice(subframe.samples());
                frame.add_flags(subframe.flags());
                if done == 0 && subframe.capture_timestamp() != 0 {
                    frame.set_capture_timestamp(subframe.capture_timestamp());
                }
            }

            done += sub;

            self.drain_tasks(&mut state, self.max_tasks_per_subframe);
        }

        if self.auto_reclock {
            state.source.reclock(wall_clock_ns());
        }

        Ok(())
    }

    /// Explicit reclock for callers that know the playback time better
    /// than the wall clock (sound card timestamps).
    pub fn reclock(&self, playback_time: Nanos) {
        if self.auto_reclock {
            warn!("receiver: unexpected reclock call in auto-reclock mode");
            return;
        }
        self.state.lock().unwrap().source.reclock(playback_time);
    }

    fn submit(&self, task: ControlTask) -> Result<()> {
        if self.tasks.push(task).is_err() {
            return Err(Error::TaskQueueFull);
        }

        // If the loop is idle, execute inline; otherwise ask the
        // scheduler to wake it so the task is picked up at the next
        // subframe boundary.
        match self.state.try_lock() {
            Ok(mut state) => {
                self.drain_tasks(&mut state, usize::MAX);
            }
            Err(_) => {
                self.scheduler.schedule_task_processing();
            }
        }

        Ok(())
    }

    fn drain_tasks(&self, state: &mut LoopState, max: usize) {
        for _ in 0..max {
            let Some(task) = self.tasks.pop() else {
                break;
            };
            self.execute_task(state, task);
        }
    }

    fn execute_task(&self, state: &mut LoopState, task: ControlTask) {
        match task {
            ControlTask::CreateSlot { reply } => {
                let _ = reply.send(state.source.create_slot());
            }
            ControlTask::DeleteSlot { id, reply } => {
                let _ = reply.send(state.source.delete_slot(id));
            }
            ControlTask::AddEndpoint {
                slot,
                iface,
                uri,
                reply,
            } => {
                let _ = reply.send(state.source.add_endpoint(slot, iface, uri));
            }
            ControlTask::QueryMetrics { slot, reply } => {
                let _ = reply.send(state.source.slot_metrics(slot));
            }
            ControlTask::ProcessReport { report } => {
                state.source.process_report(&report);
            }
            ControlTask::LinkFlows {
                slot,
                source_id,
                repair_id,
            } => {
                if let Ok(slot) = state.source.slot_mut(slot) {
                    slot.link_flows(source_id, repair_id);
                } else {
                    debug!(slot, "receiver: link_flows on unknown slot");
                }
            }
            ControlTask::GenerateReports { report_time, reply } => {
                let _ = reply.send(state.source.generate_reports(
                    &self.receiver_cname,
                    self.receiver_ssrc,
                    report_time,
                ));
            }
        }
    }
}

fn wall_clock_ns() -> Nanos {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as Nanos)
        .unwrap_or(0)
}
