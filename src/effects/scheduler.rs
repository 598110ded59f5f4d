use crossbeam_channel::Receiver;
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::device::{CommandDispatcher, CommandSender, DeviceCommand};
use super::group::{
    beats_elapsed, wrap_phase, EffectInstance, EffectUpdate, GroupEvent, GroupId, GroupSpec,
    GroupStatus, GroupUpdate, SynchronizedEffectGroup,
};
use crate::audio::analysis::AudioAnalysis;
use crate::audio::snapshot::{LatestAnalysis, Publisher};
use crate::config::{SyncConfig, MAX_TEMPO_BPM, MIN_TEMPO_BPM};
use crate::error::SyncError;

/// Everything the tick and the management API share. Guarded by one lock
/// so a tick never observes a half-applied group change.
struct SchedulerState {
    /// Global beat phase in [0, 1).
    global_phase: f64,
    tempo_bpm: f32,
    groups: BTreeMap<GroupId, SynchronizedEffectGroup>,
    effects: HashMap<String, EffectInstance>,
    next_id: u64,
    ticks: u64,
}

/// Drives every effect group from one global beat clock.
///
/// Each [`tick`](Self::tick) advances the global phase by the elapsed time at
/// the current tempo, derives every group's phase from it and produces one
/// [`EffectUpdate`] per member effect. Device calls are queued on the
/// [`CommandSender`] while the state lock is held, so they reach each device
/// in the same order as the state changes that caused them, but they are
/// never performed under the lock.
pub struct EffectSyncScheduler {
    state: Mutex<SchedulerState>,
    commands: CommandSender,
    events: Publisher<GroupEvent>,
    follow_analysis: bool,
}

impl EffectSyncScheduler {
    pub fn new(config: &SyncConfig, commands: CommandSender) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                global_phase: 0.0,
                tempo_bpm: config.default_tempo_bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM),
                groups: BTreeMap::new(),
                effects: HashMap::new(),
                next_id: 1,
                ticks: 0,
            }),
            commands,
            events: Publisher::new(),
            follow_analysis: config.follow_analysis,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or replace) an effect instance. Returns the replaced one.
    pub fn register_effect(&self, effect: EffectInstance) -> Option<EffectInstance> {
        debug!("Registering effect '{}' on device '{}'", effect.id, effect.device.name());
        self.lock().effects.insert(effect.id.clone(), effect)
    }

    /// Groups still referencing the effect skip it on later ticks.
    pub fn unregister_effect(&self, id: &str) -> Option<EffectInstance> {
        self.lock().effects.remove(id)
    }

    pub fn create_group(&self, spec: GroupSpec) -> Result<GroupId, SyncError> {
        spec.validate()?;

        let status = {
            let mut state = self.lock();
            let mut start = Vec::new();
            for effect_id in &spec.effect_ids {
                let effect = state
                    .effects
                    .get(effect_id)
                    .ok_or_else(|| SyncError::UnknownEffect(effect_id.clone()))?;
                start.extend(effect.start_commands());
            }

            let id = GroupId(state.next_id);
            state.next_id += 1;
            let group = SynchronizedEffectGroup::new(id, spec);
            let status = group.status();
            state.groups.insert(id, group);
            self.commands.send_all(start);
            status
        };

        info!(
            "Created {} '{}' with {} effect(s) ({:?})",
            status.id,
            status.name,
            status.effect_ids.len(),
            status.sync
        );

        let id = status.id;
        self.events.publish(GroupEvent::Created(status));
        Ok(id)
    }

    /// Remove a group and turn its member effects off.
    pub fn remove_group(&self, id: GroupId) -> bool {
        let stopped = {
            let mut state = self.lock();
            let Some(group) = state.groups.remove(&id) else {
                return false;
            };
            let stop: Vec<DeviceCommand> = group
                .spec
                .effect_ids
                .iter()
                .filter_map(|effect_id| state.effects.get(effect_id))
                .map(EffectInstance::stop_command)
                .collect();
            self.commands.send_all(stop)
        };

        info!("Removed {} ({} effect(s) stopped)", id, stopped);
        self.events.publish(GroupEvent::Removed(id));
        true
    }

    /// Apply `update` in place. An invalid update leaves the group unchanged.
    pub fn try_update_group(
        &self,
        id: GroupId,
        update: GroupUpdate,
    ) -> Result<GroupStatus, SyncError> {
        let status = {
            let mut state = self.lock();
            let group = state.groups.get_mut(&id).ok_or(SyncError::UnknownGroup(id.0))?;
            group.apply(update)?;
            group.status()
        };

        debug!("Updated {}: {:?}", id, status);
        self.events.publish(GroupEvent::Updated(status.clone()));
        Ok(status)
    }

    pub fn update_group(&self, id: GroupId, update: GroupUpdate) -> bool {
        match self.try_update_group(id, update) {
            Ok(_) => true,
            Err(e) => {
                warn!("Update of {} rejected: {}", id, e);
                false
            }
        }
    }

    pub fn list_groups(&self) -> Vec<GroupStatus> {
        self.lock().groups.values().map(SynchronizedEffectGroup::status).collect()
    }

    pub fn group(&self, id: GroupId) -> Option<GroupStatus> {
        self.lock().groups.get(&id).map(SynchronizedEffectGroup::status)
    }

    /// Remove every group, turning all member effects off.
    pub fn remove_all_groups(&self) -> usize {
        let ids: Vec<GroupId> = self.lock().groups.keys().copied().collect();
        ids.into_iter().filter(|&id| self.remove_group(id)).count()
    }

    pub fn subscribe_groups(&self) -> Receiver<GroupEvent> {
        self.events.subscribe()
    }

    pub fn tempo(&self) -> f32 {
        self.lock().tempo_bpm
    }

    pub fn set_tempo(&self, bpm: f32) -> Result<(), SyncError> {
        if !(MIN_TEMPO_BPM..=MAX_TEMPO_BPM).contains(&bpm) {
            return Err(SyncError::TempoOutOfRange(bpm));
        }
        self.lock().tempo_bpm = bpm;
        Ok(())
    }

    /// Adopt the averaged tempo of a complete analysis, clamped to the
    /// supported range. No-op when following is disabled.
    pub fn follow(&self, analysis: &AudioAnalysis) -> bool {
        if !self.follow_analysis || !analysis.complete || !analysis.rhythm.tempo_bpm.is_finite() {
            return false;
        }
        let bpm = analysis.rhythm.tempo_bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM);
        let mut state = self.lock();
        if (state.tempo_bpm - bpm).abs() > 0.5 {
            debug!("Tempo {:.1} -> {:.1} BPM", state.tempo_bpm, bpm);
        }
        state.tempo_bpm = bpm;
        true
    }

    pub fn global_phase(&self) -> f64 {
        self.lock().global_phase
    }

    pub fn tick_count(&self) -> u64 {
        self.lock().ticks
    }

    /// Advance the clock by `delta_ms` and compute every member's update.
    /// A group that cannot be updated is logged and skipped.
    pub fn tick(&self, delta_ms: f64) -> Vec<EffectUpdate> {
        Self::tick_locked(&mut self.lock(), delta_ms)
    }

    /// [`tick`](Self::tick) and queue the resulting device calls in one
    /// step, so no group change can slip in between. Returns the number of
    /// calls queued.
    pub fn tick_and_dispatch(&self, delta_ms: f64) -> usize {
        let mut state = self.lock();
        let updates = Self::tick_locked(&mut state, delta_ms);
        self.commands
            .send_all(updates.iter().flat_map(EffectUpdate::to_commands))
    }

    fn tick_locked(state: &mut SchedulerState, delta_ms: f64) -> Vec<EffectUpdate> {
        let delta_ms = if delta_ms.is_finite() { delta_ms.max(0.0) } else { 0.0 };

        let beats = beats_elapsed(delta_ms, state.tempo_bpm as f64);
        state.global_phase = wrap_phase(state.global_phase + beats);
        state.ticks += 1;

        let mut updates = Vec::new();
        for group in state.groups.values_mut() {
            match group_updates(group, &state.effects, state.global_phase, delta_ms) {
                Ok(group_updates) => updates.extend(group_updates),
                Err(e) => warn!("Skipping {} this tick: {}", group.id, e),
            }
        }

        trace!(
            "Tick {}: phase {:.3} at {:.1} BPM, {} update(s)",
            state.ticks,
            state.global_phase,
            state.tempo_bpm,
            updates.len()
        );
        updates
    }

    /// Queue the device calls for `updates` without waiting on them.
    pub fn dispatch(&self, updates: &[EffectUpdate]) -> usize {
        self.commands
            .send_all(updates.iter().flat_map(EffectUpdate::to_commands))
    }
}

fn group_updates(
    group: &mut SynchronizedEffectGroup,
    effects: &HashMap<String, EffectInstance>,
    global_phase: f64,
    delta_ms: f64,
) -> Result<Vec<EffectUpdate>, SyncError> {
    let phase = group.advance(global_phase, delta_ms);
    group
        .spec
        .effect_ids
        .iter()
        .map(|id| {
            effects
                .get(id)
                .map(|effect| EffectUpdate::compute(group, effect, phase))
                .ok_or_else(|| SyncError::UnknownEffect(id.clone()))
        })
        .collect()
}

/// Outcome of [`SchedulerHandle::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    pub ticks: u64,
    pub groups_removed: usize,
    /// False if the tick loop or pending device calls overran the timeout.
    pub clean: bool,
}

/// A running scheduler: the tick loop task plus its command dispatcher.
pub struct SchedulerHandle {
    scheduler: Arc<EffectSyncScheduler>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    dispatcher: Option<CommandDispatcher>,
    stop_timeout: Duration,
}

impl SchedulerHandle {
    /// Start ticking at `tick_rate_hz`. When `latest` is given the scheduler
    /// follows its tempo each tick. Must be called inside a tokio runtime.
    pub fn spawn(config: &SyncConfig, latest: Option<LatestAnalysis>) -> Self {
        let dispatcher = CommandDispatcher::spawn();
        let scheduler = Arc::new(EffectSyncScheduler::new(config, dispatcher.sender()));
        let (stop, stop_rx) = watch::channel(false);
        let period = Duration::from_secs_f64(1.0 / config.tick_rate_hz.max(1) as f64);

        info!("Scheduler running at {} Hz", config.tick_rate_hz);
        let task = tokio::spawn(Self::run(Arc::clone(&scheduler), period, latest, stop_rx));

        Self {
            scheduler,
            stop,
            task: Some(task),
            dispatcher: Some(dispatcher),
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
        }
    }

    pub fn scheduler(&self) -> &Arc<EffectSyncScheduler> {
        &self.scheduler
    }

    async fn run(
        scheduler: Arc<EffectSyncScheduler>,
        period: Duration,
        latest: Option<LatestAnalysis>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop.changed() => break,
            }

            let now = Instant::now();
            let delta_ms = now.duration_since(last).as_secs_f64() * 1000.0;
            last = now;

            if let Some(latest) = &latest {
                scheduler.follow(&latest.load());
            }
            scheduler.tick_and_dispatch(delta_ms);
        }
    }

    /// Stop ticking, remove every group and flush device calls, waiting at
    /// most the configured stop timeout for each phase.
    pub async fn stop(mut self) -> StopReport {
        let _ = self.stop.send(true);
        let mut clean = true;

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(self.stop_timeout, &mut task).await.is_err() {
                warn!("Tick loop did not stop within {:?}, aborting it", self.stop_timeout);
                task.abort();
                clean = false;
            }
        }

        let groups_removed = self.scheduler.remove_all_groups();

        if let Some(dispatcher) = self.dispatcher.take() {
            clean &= dispatcher.shutdown(self.stop_timeout).await;
        }

        let report = StopReport {
            ticks: self.scheduler.tick_count(),
            groups_removed,
            clean,
        };
        info!(
            "Scheduler stopped after {} ticks ({} group(s) removed)",
            report.ticks, report.groups_removed
        );
        report
    }
}

impl Drop for SchedulerHandle {
    /// A handle dropped without [`stop`](Self::stop) still halts the tick
    /// loop and turns every group off; the turn-off calls finish in the
    /// background.
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let removed = self.scheduler.remove_all_groups();
            debug!("Scheduler dropped while running, {} group(s) removed", removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::device::tests::RecordingDevice;
    use crate::effects::device::{DeviceAction, DeviceController, LoggingDevice};
    use crate::effects::group::SyncMode;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn scheduler() -> (EffectSyncScheduler, UnboundedReceiver<DeviceCommand>) {
        let (sender, receiver) = CommandSender::channel();
        (EffectSyncScheduler::new(&SyncConfig::default(), sender), receiver)
    }

    fn register(scheduler: &EffectSyncScheduler, id: &str) {
        let device: Arc<dyn DeviceController> = Arc::new(LoggingDevice::new(id));
        scheduler.register_effect(EffectInstance::new(id, device));
    }

    fn spec(name: &str, effects: &[&str], offset: f32) -> GroupSpec {
        GroupSpec {
            name: name.into(),
            effect_ids: effects.iter().map(|e| e.to_string()).collect(),
            phase_offset: offset,
            ..Default::default()
        }
    }

    fn drain_actions(receiver: &mut UnboundedReceiver<DeviceCommand>) -> Vec<DeviceAction> {
        std::iter::from_fn(|| receiver.try_recv().ok()).map(|c| c.action).collect()
    }

    #[test]
    fn test_global_phase_wraps() {
        let (scheduler, _rx) = scheduler();
        // 120 BPM: 500 ms per beat
        scheduler.tick(250.0);
        assert!((scheduler.global_phase() - 0.5).abs() < 1e-9);
        scheduler.tick(375.0);
        assert!((scheduler.global_phase() - 0.25).abs() < 1e-9);

        for i in 0..2000 {
            scheduler.tick((i % 97) as f64 * 3.3);
            let phase = scheduler.global_phase();
            assert!((0.0..1.0).contains(&phase), "phase {}", phase);
        }
    }

    #[test]
    fn test_half_beat_offset_gives_opposite_hues() {
        let (scheduler, _rx) = scheduler();
        register(&scheduler, "left");
        register(&scheduler, "right");
        scheduler.create_group(spec("a", &["left"], 0.0)).unwrap();
        scheduler.create_group(spec("b", &["right"], 0.5)).unwrap();

        let mut updates = Vec::new();
        for _ in 0..30 {
            updates = scheduler.tick(500.0 / 30.0);
        }
        assert_eq!(updates.len(), 2);

        let hue = |id: &str| updates.iter().find(|u| u.effect_id == id).unwrap().hue;
        let difference = (hue("left") - hue("right")).rem_euclid(360.0);
        assert!((difference - 180.0).abs() < 0.01, "difference {}", difference);
    }

    #[test]
    fn test_failing_group_does_not_block_others() {
        let (scheduler, _rx) = scheduler();
        register(&scheduler, "kept");
        register(&scheduler, "gone");
        scheduler.create_group(spec("ok", &["kept"], 0.0)).unwrap();
        scheduler.create_group(spec("broken", &["gone"], 0.0)).unwrap();
        scheduler.unregister_effect("gone");

        let updates = scheduler.tick(16.0);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].effect_id, "kept");
    }

    #[test]
    fn test_create_validates_and_starts_effects() {
        let (scheduler, mut rx) = scheduler();
        register(&scheduler, "strip");

        assert_eq!(
            scheduler.create_group(spec("x", &["nope"], 0.0)),
            Err(SyncError::UnknownEffect("nope".into()))
        );
        let fast = GroupSpec {
            tempo_bpm: 300.0,
            ..spec("x", &["strip"], 0.0)
        };
        assert_eq!(scheduler.create_group(fast), Err(SyncError::TempoOutOfRange(300.0)));
        assert!(scheduler.list_groups().is_empty());
        assert!(drain_actions(&mut rx).is_empty());

        let id = scheduler.create_group(spec("x", &["strip"], 0.0)).unwrap();
        assert_eq!(
            drain_actions(&mut rx),
            vec![DeviceAction::TurnOn, DeviceAction::SetEffect("solid".into())]
        );
        assert_eq!(scheduler.group(id).unwrap().name, "x");
    }

    #[test]
    fn test_group_lifecycle() {
        let (scheduler, mut rx) = scheduler();
        let events = scheduler.subscribe_groups();
        register(&scheduler, "a");
        register(&scheduler, "b");

        let first = scheduler.create_group(spec("one", &["a", "b"], 0.0)).unwrap();
        let second = scheduler.create_group(spec("two", &["b"], 0.25)).unwrap();
        assert_ne!(first, second);
        assert_eq!(scheduler.list_groups().len(), 2);

        assert!(scheduler.update_group(
            first,
            GroupUpdate {
                intensity: Some(0.4),
                sync: Some(SyncMode::Subdivided { multiplier: 2.0 }),
                ..Default::default()
            }
        ));
        let status = scheduler.group(first).unwrap();
        assert_eq!(status.intensity, 0.4);
        assert_eq!(status.sync, SyncMode::Subdivided { multiplier: 2.0 });
        assert!(!scheduler.update_group(GroupId(99), GroupUpdate::default()));
        assert!(!scheduler.update_group(
            first,
            GroupUpdate { phase_offset: Some(f32::NAN), ..Default::default() }
        ));

        drain_actions(&mut rx);
        assert!(scheduler.remove_group(first));
        assert!(!scheduler.remove_group(first));
        assert_eq!(drain_actions(&mut rx), vec![DeviceAction::TurnOff, DeviceAction::TurnOff]);
        assert_eq!(scheduler.list_groups().len(), 1);

        let kinds: Vec<&str> = events
            .try_iter()
            .map(|e| match e {
                GroupEvent::Created(_) => "created",
                GroupEvent::Updated(_) => "updated",
                GroupEvent::Removed(_) => "removed",
            })
            .collect();
        assert_eq!(kinds, vec!["created", "created", "updated", "removed"]);
    }

    #[test]
    fn test_intensity_scales_brightness() {
        let (scheduler, mut rx) = scheduler();
        register(&scheduler, "a");
        let id = scheduler.create_group(spec("g", &["a"], 0.0)).unwrap();
        scheduler.update_group(id, GroupUpdate { intensity: Some(0.25), ..Default::default() });
        drain_actions(&mut rx);

        let updates = scheduler.tick(0.0);
        assert_eq!(scheduler.dispatch(&updates), 2);
        let actions = drain_actions(&mut rx);
        assert_eq!(actions[0], DeviceAction::SetColor { r: 255, g: 0, b: 0 });
        assert_eq!(actions[1], DeviceAction::SetBrightness(0.25));
    }

    #[test]
    fn test_follows_complete_analysis_tempo() {
        let (scheduler, _rx) = scheduler();

        let mut analysis = AudioAnalysis::minimal(0.0);
        analysis.rhythm.tempo_bpm = 90.0;
        assert!(!scheduler.follow(&analysis));
        assert_eq!(scheduler.tempo(), 120.0);

        analysis.complete = true;
        assert!(scheduler.follow(&analysis));
        assert_eq!(scheduler.tempo(), 90.0);

        analysis.rhythm.tempo_bpm = 400.0;
        scheduler.follow(&analysis);
        assert_eq!(scheduler.tempo(), MAX_TEMPO_BPM);

        assert!(scheduler.set_tempo(10.0).is_err());
        let (sender, _rx) = CommandSender::channel();
        let fixed = EffectSyncScheduler::new(
            &SyncConfig { follow_analysis: false, ..Default::default() },
            sender,
        );
        assert!(!fixed.follow(&analysis));
        assert_eq!(fixed.tempo(), 120.0);
    }

    #[tokio::test]
    async fn test_run_loop_drives_devices() {
        let config = SyncConfig { tick_rate_hz: 100, ..Default::default() };
        let handle = SchedulerHandle::spawn(&config, None);
        let device = Arc::new(RecordingDevice::new("strip"));
        handle
            .scheduler()
            .register_effect(EffectInstance::new("strip", device.clone()));
        handle.scheduler().create_group(spec("g", &["strip"], 0.0)).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let report = handle.stop().await;

        assert!(report.clean);
        assert_eq!(report.groups_removed, 1);
        assert!(report.ticks >= 2);

        let actions = device.actions();
        assert!(actions.contains(&DeviceAction::TurnOn));
        assert!(actions.contains(&DeviceAction::TurnOff));
        assert!(actions.iter().any(|a| matches!(a, DeviceAction::SetColor { .. })));
        assert!(actions.iter().any(|a| matches!(a, DeviceAction::SetBrightness(_))));
    }

    #[tokio::test]
    async fn test_stop_is_bounded_by_timeout() {
        let config = SyncConfig {
            tick_rate_hz: 50,
            stop_timeout_ms: 200,
            ..Default::default()
        };
        let handle = SchedulerHandle::spawn(&config, None);
        let device = Arc::new(RecordingDevice::slow("stuck", Duration::from_secs(30)));
        handle
            .scheduler()
            .register_effect(EffectInstance::new("stuck", device.clone()));
        handle.scheduler().create_group(spec("g", &["stuck"], 0.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let report = handle.stop().await;

        assert!(!report.clean);
        assert_eq!(report.groups_removed, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stop_leaves_slow_devices_off() {
        let handle = SchedulerHandle::spawn(&SyncConfig::default(), None);
        let device = Arc::new(RecordingDevice::slow_updates("strip", Duration::from_millis(100)));
        handle
            .scheduler()
            .register_effect(EffectInstance::new("strip", device.clone()));
        handle.scheduler().create_group(spec("g", &["strip"], 0.0)).unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        let report = handle.stop().await;
        assert!(report.clean);

        let actions = device.actions();
        assert_eq!(actions.last(), Some(&DeviceAction::TurnOff));
        assert_eq!(actions.iter().filter(|a| **a == DeviceAction::TurnOff).count(), 1);
        assert_eq!(device.max_in_flight(), 1);
        // 60 Hz for 400 ms queues ~48 updates; only a handful reach a 100 ms device
        let updates = actions.iter().filter(|a| a.is_update()).count();
        assert!(updates <= 10, "{} updates performed", updates);
    }

    #[tokio::test]
    async fn test_removed_group_stays_off_while_others_run() {
        let handle = SchedulerHandle::spawn(&SyncConfig::default(), None);
        let stopped = Arc::new(RecordingDevice::slow_updates("stopped", Duration::from_millis(50)));
        let running = Arc::new(RecordingDevice::new("running"));
        handle
            .scheduler()
            .register_effect(EffectInstance::new("stopped", stopped.clone()));
        handle
            .scheduler()
            .register_effect(EffectInstance::new("running", running.clone()));
        let id = handle.scheduler().create_group(spec("a", &["stopped"], 0.0)).unwrap();
        handle.scheduler().create_group(spec("b", &["running"], 0.0)).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.scheduler().remove_group(id));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(stopped.actions().last(), Some(&DeviceAction::TurnOff));
        let before = running.actions().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(running.actions().len() > before);
        assert!(handle.stop().await.clean);
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_ticking_and_turns_groups_off() {
        let config = SyncConfig { tick_rate_hz: 100, ..Default::default() };
        let handle = SchedulerHandle::spawn(&config, None);
        let device = Arc::new(RecordingDevice::new("strip"));
        handle
            .scheduler()
            .register_effect(EffectInstance::new("strip", device.clone()));
        handle.scheduler().create_group(spec("g", &["strip"], 0.0)).unwrap();
        let scheduler = Arc::clone(handle.scheduler());

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(handle);
        let ticks = scheduler.tick_count();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(scheduler.tick_count(), ticks);
        assert!(scheduler.list_groups().is_empty());
        assert_eq!(device.actions().last(), Some(&DeviceAction::TurnOff));
    }
}
