//! Public control surface: tracks, tempo clock, listeners and the poll loop tying
//! them together on a single timeline.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;

use arc_swap::ArcSwap;
use cadenza_shared::{
    Action, Alignment, EngineConfig, EngineError, EventOptions, ListenerId, PlayOptions, PlayerConfig,
    ScheduleOptions, Sink,
};
use crossbeam_channel::{Receiver, Sender, unbounded};
use futures::FutureExt;
use futures::channel::oneshot;
use tracing::{debug, info, warn};

use crate::assets::{self, AssetLoader, AudioBuffer, AudioPool, WavLoader};
use crate::clock::Clock;
use crate::commands::EngineStatus;
use crate::events::EventBus;
use crate::listeners::{BeatCallback, Listeners};
use crate::output::{SegmentEnded, SharedOutput};
use crate::sound_loop::{LoopContext, LoopScheduler, LoopState, Teardown};

/// Who a beat notification is delivered to
#[derive(Debug, Clone, PartialEq, Eq)]
enum BeatTarget {
    Dispatcher,
    Track(String),
}

struct TeardownTimer {
    track: String,
    due: f64,
    teardown: Teardown,
}

type LoadDone = Box<dyn FnOnce(Result<(), EngineError>) + Send>;

struct LoadOutcome {
    id: u64,
    players: Vec<PlayerConfig>,
    result: Result<(), EngineError>,
}

/// Resolves with the time of the beat a `wait` was waiting for.
pub struct BeatWait {
    id: ListenerId,
    receiver: oneshot::Receiver<f64>,
}

impl BeatWait {
    /// Id of the underlying one-shot subscription
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Future for BeatWait {
    type Output = Result<f64, EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.receiver
            .poll_unpin(cx)
            .map(|r| r.map_err(|_| EngineError::State("wait was cancelled".to_string())))
    }
}

/// Resolves once a batch of players is loaded and registered (or failed to).
pub struct PlayersLoading {
    receiver: oneshot::Receiver<Result<(), EngineError>>,
}

impl Future for PlayersLoading {
    type Output = Result<(), EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.receiver
            .poll_unpin(cx)
            .map(|r| r.unwrap_or(Err(EngineError::Disconnected)))
    }
}

pub struct Orchestrator {
    config: EngineConfig,
    clock: Clock,
    bus: EventBus<BeatTarget>,
    output: SharedOutput,
    tracks: HashMap<String, LoopScheduler>,
    listeners: Listeners,
    timers: Vec<TeardownTimer>,

    pool: Arc<ArcSwap<AudioPool>>,
    loader: Arc<dyn AssetLoader>,
    loads: HashMap<u64, LoadDone>,
    next_load: u64,
    load_tx: Sender<LoadOutcome>,
    load_rx: Receiver<LoadOutcome>,

    ended_tx: Sender<SegmentEnded>,
    ended_rx: Receiver<SegmentEnded>,
    diagnostics_tx: Sender<EngineError>,
    diagnostics_rx: Receiver<EngineError>,

    started: bool,
    paused: bool,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, output: SharedOutput) -> Result<Self, EngineError> {
        config.validate()?;
        let clock = Clock::new(config.bpm)?;
        {
            let mut output = output.lock();
            let now = output.current_time();
            output.set_master_gain(config.master_gain, now);
        }
        let (load_tx, load_rx) = unbounded();
        let (ended_tx, ended_rx) = unbounded();
        let (diagnostics_tx, diagnostics_rx) = unbounded();
        Ok(Self {
            config,
            clock,
            bus: EventBus::new(),
            output,
            tracks: HashMap::new(),
            listeners: Listeners::new(),
            timers: Vec::new(),
            pool: Arc::new(ArcSwap::from_pointee(AudioPool::new())),
            loader: Arc::new(WavLoader::default()),
            loads: HashMap::new(),
            next_load: 0,
            load_tx,
            load_rx,
            ended_tx,
            ended_rx,
            diagnostics_tx,
            diagnostics_rx,
            started: false,
            paused: false,
        })
    }

    pub fn with_loader(mut self, loader: Arc<dyn AssetLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Same tempo, output and players; fresh loop schedulers and no listeners.
    pub fn duplicate(&self) -> Result<Self, EngineError> {
        let mut copy = Orchestrator::new(self.config.clone(), self.output.clone())?;
        copy.pool = self.pool.clone();
        copy.loader = self.loader.clone();
        let mut output = self.output.lock();
        for (name, track) in &self.tracks {
            let channel = output.create_channel(track.destination());
            copy.tracks.insert(name.clone(), track.duplicate(channel));
        }
        Ok(copy)
    }

    pub fn bpm(&self) -> f64 {
        self.clock.bpm()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn current_time(&self) -> f64 {
        self.output.lock().current_time()
    }

    pub fn track_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tracks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn status(&mut self) -> EngineStatus {
        let next_beat = self.started.then(|| self.next_beat_time());
        let tracks = self
            .track_names()
            .into_iter()
            .filter_map(|name| self.state(&name).ok().map(|state| (name, state)))
            .collect();
        EngineStatus {
            started: self.started,
            paused: self.paused,
            bpm: self.clock.bpm(),
            now: self.current_time(),
            next_beat,
            tracks,
            listeners: self.listeners.len(),
        }
    }

    /// Handle to this instance's listener registry
    pub fn listeners(&self) -> Listeners {
        self.listeners.clone()
    }

    /// Listener failures, in the order they happened
    pub fn diagnostics(&self) -> Receiver<EngineError> {
        self.diagnostics_rx.clone()
    }

    // ---- Players ----

    /// Decode `players` in the background. They are registered on a later `poll`,
    /// all at once, and the returned future resolves then.
    pub fn add_players(&mut self, players: Vec<PlayerConfig>) -> Result<PlayersLoading, EngineError> {
        let (tx, receiver) = oneshot::channel();
        self.add_players_with(
            players,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        Ok(PlayersLoading { receiver })
    }

    pub fn add_player(&mut self, player: PlayerConfig) -> Result<PlayersLoading, EngineError> {
        self.add_players(vec![player])
    }

    pub(crate) fn add_players_with(&mut self, players: Vec<PlayerConfig>, on_done: LoadDone) -> Result<(), EngineError> {
        for player in &players {
            player.validate()?;
        }
        let id = self.next_load;
        self.next_load += 1;
        self.loads.insert(id, on_done);

        let loader = self.loader.clone();
        let pool = self.pool.clone();
        let load_tx = self.load_tx.clone();
        thread::spawn(move || {
            let result = assets::load_all(loader.as_ref(), &players).map(|buffers| {
                pool.rcu(|current| {
                    let mut next = AudioPool::clone(current);
                    for buffer in &buffers {
                        next.insert(buffer.clone());
                    }
                    next
                });
            });
            let _ = load_tx.send(LoadOutcome { id, players, result });
        });
        Ok(())
    }

    /// Register a player whose sound is already decoded.
    pub fn insert_player(&mut self, player: PlayerConfig, buffer: AudioBuffer) -> Result<(), EngineError> {
        player.validate()?;
        let buffer = AudioBuffer {
            name: player.name.clone(),
            ..buffer
        };
        self.pool.rcu(|current| {
            let mut next = AudioPool::clone(current);
            next.insert(buffer.clone());
            next
        });
        self.register(&player)
    }

    fn register(&mut self, player: &PlayerConfig) -> Result<(), EngineError> {
        let buffer = self
            .pool
            .load()
            .get(&player.name)
            .cloned()
            .ok_or_else(|| EngineError::Asset {
                name: player.name.clone(),
                message: "not loaded".to_string(),
            })?;
        if self.tracks.contains_key(&player.name) {
            self.with_track(&player.name, |track, ctx| track.force_stop(ctx))?;
        }
        let sink = player.sink();
        let channel = self.output.lock().create_channel(&sink);
        let track = LoopScheduler::new(&player.name, buffer, player.length, player.position, channel, sink);
        self.tracks.insert(player.name.clone(), track);
        info!(
            "[Orchestrator] Registered {} ({} beats, {:?})",
            player.name, player.length, player.position
        );
        Ok(())
    }

    // ---- Lifecycle ----

    /// Start the clock a little ahead of now, then play `autoplay` from the first beat.
    pub fn start<S: AsRef<str>>(&mut self, autoplay: &[S]) -> Result<(), EngineError> {
        if self.started {
            return Err(EngineError::already_started());
        }
        for name in autoplay {
            self.ensure_track(name.as_ref())?;
        }
        let epoch = {
            let mut output = self.output.lock();
            output.resume()?;
            output.current_time() + self.config.startup_latency
        };
        self.bus.subscribe(BeatTarget::Dispatcher);
        self.clock.start(epoch);
        self.started = true;
        self.paused = false;
        info!("[Orchestrator] Started at {:.3} ({} bpm)", epoch, self.clock.bpm());
        self.deliver_beats();

        for name in autoplay {
            self.play(name.as_ref(), PlayOptions { now: true, ..Default::default() })?;
        }
        Ok(())
    }

    /// Silence every track immediately and stop the clock.
    pub fn full_stop(&mut self) -> Result<(), EngineError> {
        self.ensure_started()?;
        for name in self.track_names() {
            self.with_track(&name, |track, ctx| track.force_stop(ctx))?;
        }
        self.timers.clear();
        self.bus.unsubscribe(&BeatTarget::Dispatcher);
        self.clock.stop();
        self.started = false;
        self.paused = false;
        info!("[Orchestrator] Full stop");
        Ok(())
    }

    pub fn suspend(&mut self) -> Result<(), EngineError> {
        self.output.lock().suspend()?;
        self.paused = true;
        info!("[Orchestrator] Suspended");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), EngineError> {
        self.output.lock().resume()?;
        self.paused = false;
        info!("[Orchestrator] Resumed");
        Ok(())
    }

    pub fn set_volume(&mut self, value: f32) {
        let mut output = self.output.lock();
        let now = output.current_time();
        output.set_master_gain(value, now);
    }

    // ---- Transport ----

    pub fn play(&mut self, name: &str, options: PlayOptions) -> Result<bool, EngineError> {
        self.ensure_started()?;
        self.ensure_track(name)?;
        let at = self.target_time(options.now);
        self.start_track(name, at, options.fade, options.once)
    }

    pub fn stop(&mut self, name: &str, options: PlayOptions) -> Result<bool, EngineError> {
        self.ensure_started()?;
        self.ensure_track(name)?;
        let at = self.target_time(options.now);
        self.stop_track(name, at, options.fade, options.keep)
    }

    /// Play a stopped track or stop a playing one. Returns the new playing state.
    pub fn toggle(&mut self, name: &str, options: PlayOptions) -> Result<bool, EngineError> {
        self.ensure_started()?;
        if self.is_playing(name)? {
            self.stop(name, options)
        } else {
            self.play(name, options)
        }
    }

    /// Apply `action` to `name` on a beat `beats` ahead, or with `absolute` on the next
    /// boundary of a `beats`-sized measure. Returns the output time it takes effect.
    pub fn schedule(
        &mut self,
        name: &str,
        beats: u32,
        action: Action,
        options: ScheduleOptions,
    ) -> Result<f64, EngineError> {
        self.ensure_started()?;
        self.ensure_track(name)?;
        if beats == 0 {
            return Err(EngineError::invalid("beats must be a positive number"));
        }
        let now = self.current_time();
        let countdown = self.countdown(beats, options.event(), Some(now.max(self.clock.session_start())))?;
        let at = self.clock.next_nth_beat_time(now, countdown);
        self.deliver_beats();

        let start = match action {
            Action::Play => true,
            Action::Stop => false,
            Action::Toggle => !self.is_playing(name)?,
        };
        let player = options.player();
        if start {
            self.start_track(name, at, player.fade, player.once)?;
        } else {
            self.stop_track(name, at, player.fade, player.keep)?;
        }
        debug!("[Orchestrator] Scheduled {} {} at {:.3}", action, name, at);
        Ok(at)
    }

    pub fn is_playing(&self, name: &str) -> Result<bool, EngineError> {
        self.track(name).map(LoopScheduler::is_playing)
    }

    pub fn state(&self, name: &str) -> Result<LoopState, EngineError> {
        self.track(name).map(LoopScheduler::state)
    }

    pub fn set_alignment(&mut self, name: &str, alignment: Alignment) -> Result<(), EngineError> {
        self.tracks
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?
            .set_alignment(alignment)
    }

    pub fn connect(&mut self, name: &str, sink: &Sink) -> Result<(), EngineError> {
        let track = self
            .tracks
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        track.connect(&mut *self.output.lock(), sink);
        Ok(())
    }

    /// `None` disconnects the track from every sink.
    pub fn disconnect(&mut self, name: &str, sink: Option<&Sink>) -> Result<(), EngineError> {
        let track = self
            .tracks
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        track.disconnect(&mut *self.output.lock(), sink);
        Ok(())
    }

    // ---- Listeners ----

    /// Call `callback` every `beats` beats with the time of the firing beat.
    pub fn add_listener<F>(&mut self, callback: F, beats: u32, options: EventOptions) -> Result<ListenerId, EngineError>
    where
        F: FnMut(f64) -> anyhow::Result<()> + Send + 'static,
    {
        self.add_listener_boxed(Box::new(callback), beats, options)
    }

    pub(crate) fn add_listener_boxed(
        &mut self,
        callback: BeatCallback,
        beats: u32,
        options: EventOptions,
    ) -> Result<ListenerId, EngineError> {
        if beats == 0 {
            return Err(EngineError::invalid("beats must be a positive number"));
        }
        let countdown = self.tick_countdown(beats, options)?;
        Ok(self.listeners.add(callback, beats, countdown, true))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Resolves with the time of the beat `beats` beats from now.
    pub fn wait(&mut self, beats: u32, options: EventOptions) -> Result<BeatWait, EngineError> {
        let (tx, receiver) = oneshot::channel();
        let id = self.wait_with(beats, options, move |time| {
            let _ = tx.send(time);
        })?;
        Ok(BeatWait { id, receiver })
    }

    pub(crate) fn wait_with<F>(&mut self, beats: u32, options: EventOptions, on_beat: F) -> Result<ListenerId, EngineError>
    where
        F: FnOnce(f64) + Send + 'static,
    {
        if beats == 0 {
            return Err(EngineError::invalid("beats must be a positive number"));
        }
        let countdown = self.tick_countdown(beats, options)?;
        let mut on_beat = Some(on_beat);
        let callback: BeatCallback = Box::new(move |time| {
            if let Some(on_beat) = on_beat.take() {
                on_beat(time);
            }
            Ok(())
        });
        Ok(self.listeners.add(callback, beats, countdown, false))
    }

    // ---- Poll loop ----

    /// One pass of the coarse timer.
    pub fn poll(&mut self) {
        self.output.lock().service();
        self.collect_ended();
        self.collect_loads();
        if self.started && !self.paused {
            let now = self.current_time();
            self.clock.poll(now);
            self.deliver_beats();
        }
        self.run_timers();
    }

    fn collect_ended(&mut self) {
        while let Ok(ended) = self.ended_rx.try_recv() {
            if let Some(track) = self.tracks.values_mut().find(|t| t.channel() == ended.channel) {
                track.segment_ended(ended.segment);
            }
        }
    }

    fn collect_loads(&mut self) {
        while let Ok(outcome) = self.load_rx.try_recv() {
            let result = outcome
                .result
                .and_then(|()| outcome.players.iter().try_for_each(|p| self.register(p)));
            match &result {
                Ok(()) => info!("[Orchestrator] {} player(s) ready", outcome.players.len()),
                Err(e) => warn!("[Orchestrator] Loading players failed: {}", e),
            }
            if let Some(on_done) = self.loads.remove(&outcome.id) {
                on_done(result);
            }
        }
    }

    fn deliver_beats(&mut self) {
        for time in self.clock.take_beats() {
            self.deliver_beat(time);
        }
    }

    fn deliver_beat(&mut self, time: f64) {
        for target in self.bus.snapshot() {
            if !self.bus.is_subscribed(&target) {
                continue;
            }
            match target {
                BeatTarget::Dispatcher => {
                    for failure in self.listeners.dispatch(time) {
                        warn!("[Orchestrator] {}", failure);
                        let _ = self.diagnostics_tx.send(failure);
                    }
                }
                BeatTarget::Track(name) => {
                    let _ = self.with_track(&name, |track, ctx| track.on_beat(ctx, time));
                }
            }
        }
    }

    fn run_timers(&mut self) {
        if self.timers.is_empty() {
            return;
        }
        let now = self.current_time();
        let (mut due, pending): (Vec<TeardownTimer>, Vec<TeardownTimer>) =
            std::mem::take(&mut self.timers)
                .into_iter()
                .partition(|timer| timer.due <= now);
        self.timers = pending;
        due.sort_by(|a, b| a.due.total_cmp(&b.due));
        for timer in due {
            let _ = self.with_track(&timer.track, |track, ctx| track.teardown(ctx, &timer.teardown));
        }
    }

    // ---- Helpers ----

    fn start_track(&mut self, name: &str, at: f64, fade: f64, once: bool) -> Result<bool, EngineError> {
        let next_beat = self.next_beat_time();
        self.with_track(name, |track, ctx| {
            track.start(ctx, at, fade, once, next_beat);
            track.is_playing()
        })
    }

    fn stop_track(&mut self, name: &str, at: f64, fade: f64, keep: bool) -> Result<bool, EngineError> {
        let teardown = self.with_track(name, |track, ctx| track.stop(ctx, at, fade, keep))?;
        if let Some(teardown) = teardown {
            // Fire one poll early so the stop is committed before it is due
            let lookahead = self.config.poll_interval_ms as f64 / 1000.0;
            self.timers.push(TeardownTimer {
                track: name.to_string(),
                due: teardown.halt_at - lookahead,
                teardown,
            });
            self.run_timers();
        }
        self.is_playing(name)
    }

    /// Run `f` against a track with a context borrowing the output and clock, then
    /// bring the track's beat subscription in line with what it wants.
    fn with_track<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut LoopScheduler, &mut LoopContext) -> R,
    ) -> Result<R, EngineError> {
        let track = self
            .tracks
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let result = {
            let mut output = self.output.lock();
            let mut ctx = LoopContext {
                output: &mut *output,
                clock: &self.clock,
                ended_tx: &self.ended_tx,
            };
            f(track, &mut ctx)
        };
        let key = BeatTarget::Track(name.to_string());
        if track.wants_beats() {
            self.bus.subscribe(key);
        } else {
            self.bus.unsubscribe(&key);
        }
        Ok(result)
    }

    fn track(&self, name: &str) -> Result<&LoopScheduler, EngineError> {
        self.tracks
            .get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    fn ensure_track(&self, name: &str) -> Result<(), EngineError> {
        self.track(name).map(|_| ())
    }

    fn ensure_started(&self) -> Result<(), EngineError> {
        if self.started {
            Ok(())
        } else {
            Err(EngineError::not_started())
        }
    }

    /// Next boundary, with the beats it emitted while fixing itself delivered first.
    fn next_beat_time(&mut self) -> f64 {
        let now = self.current_time();
        let time = self.clock.next_beat_time(now);
        self.deliver_beats();
        time
    }

    /// Either now or the next beat. Never earlier than beat 0 of the session.
    fn target_time(&mut self, now: bool) -> f64 {
        if now {
            self.current_time().max(self.clock.session_start())
        } else {
            self.next_beat_time()
        }
    }

    /// Countdown for a beat subscription. Each tick carries the boundary after the
    /// last delivered one, so measure positions are taken from the next beat. Before
    /// `start` the first tick carries beat 1 and the count runs from beat 0.
    fn tick_countdown(&mut self, beats: u32, options: EventOptions) -> Result<i64, EngineError> {
        let anchor = if self.started { Some(self.next_beat_time()) } else { None };
        self.countdown(beats, options, anchor).map(i64::from)
    }

    /// Beats to count from `anchor`, wrapped into whole measures so it is at least one.
    /// A missing anchor means position 0.
    fn countdown(&self, beats: u32, options: EventOptions, anchor: Option<f64>) -> Result<u32, EngineError> {
        let position = anchor.map_or(0, |time| self.clock.beat_position(time, beats));
        let countdown = options.countdown(beats, position);
        let countdown = if countdown < 1 {
            (countdown - 1).rem_euclid(i64::from(beats)) + 1
        } else {
            countdown
        };
        u32::try_from(countdown).map_err(|_| EngineError::invalid(format!("countdown of {countdown} beats is too long")))
    }
}
