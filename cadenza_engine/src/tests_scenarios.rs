use std::sync::Arc;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use cadenza_shared::{
    Action, Alignment, EngineConfig, EngineError, EventOptions, PlayOptions, PlayerConfig, ScheduleOptions, Sink,
};
use futures::FutureExt;
use parking_lot::Mutex;

use crate::assets::{AudioBuffer, WavLoader};
use crate::orchestrator::Orchestrator;
use crate::output::{OutputBackend, SharedOutput};
use crate::sound_loop::LoopState;
use crate::virtual_output::{OutputEvent, VirtualOutput};

// bpm 120 and start at t = 10: the epoch is 10.1 and beat k falls on 10.1 + 0.5k
const T0: f64 = 10.0;
const EPOCH: f64 = 10.1;
const NO_TRACKS: &[&str] = &[];

struct Session {
    output: Arc<Mutex<VirtualOutput>>,
    orchestrator: Orchestrator,
}

impl Session {
    fn new() -> Self {
        let output = Arc::new(Mutex::new(VirtualOutput::manual(T0)));
        let shared: SharedOutput = output.clone();
        let orchestrator = Orchestrator::new(EngineConfig::with_bpm(120.0), shared).unwrap();
        Self { output, orchestrator }
    }

    fn with_player(mut self, name: &str, beats: u32, alignment: Alignment) -> Self {
        let mut player = PlayerConfig::new(name, &format!("{name}.wav"), beats);
        player.position = alignment;
        let buffer = AudioBuffer::silence(name, beats as f64 * 0.5, 100);
        self.orchestrator.insert_player(player, buffer).unwrap();
        self
    }

    fn now(&self) -> f64 {
        self.output.lock().current_time()
    }

    /// Move output time to `until` in 10ms steps, polling after each step.
    fn advance_to(&mut self, until: f64) {
        loop {
            let now = self.now();
            if now >= until - 1e-12 {
                break;
            }
            self.output.lock().advance((until - now).min(0.01));
            self.orchestrator.poll();
        }
    }

    fn starts(&self, buffer: &str) -> Vec<(f64, f64)> {
        self.output
            .lock()
            .events()
            .iter()
            .filter_map(|e| match e {
                OutputEvent::SegmentStarted { buffer: b, at, offset, .. } if b == buffer => Some((*at, *offset)),
                _ => None,
            })
            .collect()
    }

    fn recorder(&mut self, beats: u32, options: EventOptions) -> Arc<Mutex<Vec<f64>>> {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        self.orchestrator
            .add_listener(
                move |time| {
                    sink.lock().push(time);
                    Ok(())
                },
                beats,
                options,
            )
            .unwrap();
        fired
    }
}

fn assert_times(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} != {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert_abs_diff_eq!(*a, *e, epsilon = 1e-9);
    }
}

#[test]
fn test_listener_fires_every_two_beats() {
    let mut session = Session::new();
    let fired = session.recorder(2, EventOptions::default());
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(14.2);
    assert_times(&fired.lock(), &[EPOCH + 1.0, EPOCH + 2.0, EPOCH + 3.0, EPOCH + 4.0]);
}

#[test]
fn test_absolute_track_toggled_on_beat_two() {
    let mut session = Session::new().with_player("bass", 4, Alignment::Absolute);
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 0.7);

    assert!(session.orchestrator.toggle("bass", PlayOptions::default()).unwrap());
    session.advance_to(EPOCH + 5.1);

    let starts = session.starts("bass");
    assert_times(
        &starts.iter().map(|s| s.0).collect::<Vec<_>>(),
        &[EPOCH + 1.0, EPOCH + 2.0, EPOCH + 4.0],
    );
    // In-buffer offset of two beats, then every restart from the top
    assert_abs_diff_eq!(starts[0].1, 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(starts[1].1, 0.0);
    assert_abs_diff_eq!(starts[2].1, 0.0);
}

#[test]
fn test_relative_track_follows_its_own_start() {
    let mut session = Session::new().with_player("pad", 4, Alignment::Relative);
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 0.7);
    session.orchestrator.play("pad", PlayOptions::default()).unwrap();
    session.advance_to(EPOCH + 5.1);
    let starts: Vec<f64> = session.starts("pad").iter().map(|s| s.0).collect();
    assert_times(&starts, &[EPOCH + 1.0, EPOCH + 3.0, EPOCH + 5.0]);
}

#[test]
fn test_autoplay_starts_on_the_epoch() {
    let mut session = Session::new().with_player("drums", 4, Alignment::Absolute);
    session.orchestrator.start(&["drums"]).unwrap();
    assert!(session.orchestrator.is_playing("drums").unwrap());
    session.advance_to(EPOCH + 4.1);
    let starts = session.starts("drums");
    assert_times(
        &starts.iter().map(|s| s.0).collect::<Vec<_>>(),
        &[EPOCH, EPOCH + 2.0, EPOCH + 4.0],
    );
    assert_abs_diff_eq!(starts[0].1, 0.0);
}

#[test]
fn test_toggle_round_trip() {
    let mut session = Session::new().with_player("bass", 4, Alignment::Absolute);
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 0.2);

    assert!(session.orchestrator.toggle("bass", PlayOptions::default()).unwrap());
    assert!(session.orchestrator.is_playing("bass").unwrap());
    assert!(!session.orchestrator.toggle("bass", PlayOptions::default()).unwrap());
    assert!(!session.orchestrator.is_playing("bass").unwrap());
    assert_eq!(session.orchestrator.state("bass").unwrap(), LoopState::Stopping);

    session.advance_to(EPOCH + 1.0);
    assert_eq!(session.orchestrator.state("bass").unwrap(), LoopState::Stopped);
}

#[test]
fn test_remove_listener() {
    let mut session = Session::new();
    session.orchestrator.start(NO_TRACKS).unwrap();
    let id = session
        .orchestrator
        .add_listener(|_| Ok(()), 4, EventOptions::default())
        .unwrap();
    assert!(session.orchestrator.remove_listener(id));
    assert!(!session.orchestrator.remove_listener(id));
}

#[test]
fn test_wait_resolves_with_beat_time() {
    let mut session = Session::new();
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 0.1);

    let mut wait = session.orchestrator.wait(2, EventOptions::default()).unwrap();
    let id = wait.id();
    assert!((&mut wait).now_or_never().is_none());

    // Two ticks later, at the second boundary, with the time of the one after it
    session.advance_to(EPOCH + 0.9);
    assert!((&mut wait).now_or_never().is_none());
    session.advance_to(EPOCH + 1.1);
    let time = futures::executor::block_on(wait).unwrap();
    assert_abs_diff_eq!(time, EPOCH + 1.5, epsilon = 1e-9);
    assert!(!session.orchestrator.remove_listener(id));
}

#[test]
fn test_cancelled_wait_reports_cancellation() {
    let mut session = Session::new();
    session.orchestrator.start(NO_TRACKS).unwrap();
    let wait = session.orchestrator.wait(4, EventOptions::default()).unwrap();
    assert!(session.orchestrator.remove_listener(wait.id()));
    assert!(matches!(futures::executor::block_on(wait), Err(EngineError::State(_))));
}

#[test]
fn test_schedule_absolute_aligns_to_next_measure() {
    let mut session = Session::new().with_player("keys", 4, Alignment::Absolute);
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 0.6);

    let options = ScheduleOptions { absolute: true, ..Default::default() };
    let at = session.orchestrator.schedule("keys", 4, Action::Play, options).unwrap();
    // Beat 1 to beat 4 is three beats
    assert_abs_diff_eq!(at, EPOCH + 2.0, epsilon = 1e-9);

    let relative = session
        .orchestrator
        .schedule("keys", 4, Action::Play, ScheduleOptions::default())
        .unwrap();
    assert_abs_diff_eq!(relative, EPOCH + 2.5, epsilon = 1e-9);

    session.advance_to(EPOCH + 2.1);
    let starts = session.starts("keys");
    assert_abs_diff_eq!(starts[0].0, EPOCH + 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(starts[0].1, 0.0);
}

#[test]
fn test_schedule_with_offset_wraps_to_a_future_beat() {
    let mut session = Session::new().with_player("keys", 4, Alignment::Absolute);
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 1.1);

    // Two beats into the measure, shifted back three: wraps around one measure
    let options = ScheduleOptions { absolute: true, offset: -3, ..Default::default() };
    let at = session.orchestrator.schedule("keys", 4, Action::Toggle, options).unwrap();
    assert_abs_diff_eq!(at, EPOCH + 2.5, epsilon = 1e-9);
}

#[test]
fn test_absolute_schedule_right_after_start() {
    let mut session = Session::new().with_player("keys", 4, Alignment::Absolute);
    session.orchestrator.start(NO_TRACKS).unwrap();
    // Still before the epoch: the first measure boundary ahead is beat 4
    let options = ScheduleOptions { absolute: true, ..Default::default() };
    let at = session.orchestrator.schedule("keys", 4, Action::Play, options).unwrap();
    assert_abs_diff_eq!(at, EPOCH + 2.0, epsilon = 1e-9);
    assert_eq!(session.orchestrator.clock().beat_position(at, 4), 0);
}

#[test]
fn test_absolute_wait_right_after_start() {
    let mut session = Session::new();
    session.orchestrator.start(NO_TRACKS).unwrap();
    let mut wait = session
        .orchestrator
        .wait(4, EventOptions { absolute: true, offset: 0 })
        .unwrap();

    session.advance_to(EPOCH + 1.4);
    assert!((&mut wait).now_or_never().is_none());
    session.advance_to(EPOCH + 1.6);
    let time = futures::executor::block_on(wait).unwrap();
    assert_abs_diff_eq!(time, EPOCH + 2.0, epsilon = 1e-9);
    assert_eq!(session.orchestrator.clock().beat_position(time, 4), 0);
}

#[test]
fn test_absolute_listener_added_before_start() {
    let mut session = Session::new();
    let fired = session.recorder(4, EventOptions { absolute: true, offset: 0 });
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 3.9);
    assert_times(&fired.lock(), &[EPOCH + 2.0, EPOCH + 4.0]);
}

#[test]
fn test_absolute_listener_with_offset_mid_session() {
    let mut session = Session::new();
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 0.6);

    // One beat past each measure boundary
    let fired = session.recorder(4, EventOptions { absolute: true, offset: 1 });
    session.advance_to(EPOCH + 4.1);
    assert_times(&fired.lock(), &[EPOCH + 2.5, EPOCH + 4.5]);
    for time in fired.lock().iter() {
        assert_eq!(session.orchestrator.clock().beat_position(*time, 4), 1);
    }
}

#[test]
fn test_relative_wait_with_offset() {
    let mut session = Session::new();
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 0.1);

    let wait = session.orchestrator.wait(2, EventOptions { absolute: false, offset: 1 }).unwrap();
    session.advance_to(EPOCH + 1.6);
    let time = futures::executor::block_on(wait).unwrap();
    assert_abs_diff_eq!(time, EPOCH + 2.0, epsilon = 1e-9);
}

#[test]
fn test_extreme_offsets() {
    let mut session = Session::new().with_player("keys", 4, Alignment::Absolute);
    session.orchestrator.start(NO_TRACKS).unwrap();

    // Wraps into the next measure without looping over every measure in between
    let fired = session.recorder(4, EventOptions { absolute: false, offset: i32::MIN });
    session.advance_to(EPOCH + 2.1);
    assert_eq!(fired.lock().len(), 1);

    let options = ScheduleOptions { offset: i32::MAX, ..Default::default() };
    let result = session.orchestrator.schedule("keys", u32::MAX, Action::Play, options);
    assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
}

#[test]
fn test_once_plays_a_single_segment() {
    let mut session = Session::new().with_player("hit", 2, Alignment::Relative);
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 0.2);

    let once = PlayOptions { once: true, ..Default::default() };
    assert!(!session.orchestrator.play("hit", once).unwrap());
    assert_eq!(session.orchestrator.state("hit").unwrap(), LoopState::PlayingOnce);

    session.advance_to(EPOCH + 4.0);
    assert_eq!(session.starts("hit").len(), 1);
    assert!(!session.orchestrator.is_playing("hit").unwrap());
    assert_eq!(session.orchestrator.state("hit").unwrap(), LoopState::Stopped);
}

#[test]
fn test_keep_lets_the_bar_finish() {
    let mut session = Session::new().with_player("bass", 4, Alignment::Absolute);
    session.orchestrator.start(&["bass"]).unwrap();
    session.advance_to(EPOCH + 0.7);

    let keep = PlayOptions { keep: true, ..Default::default() };
    assert!(!session.orchestrator.stop("bass", keep).unwrap());
    session.advance_to(EPOCH + 1.9);
    assert_eq!(session.orchestrator.state("bass").unwrap(), LoopState::Stopping);

    session.advance_to(EPOCH + 3.0);
    assert_eq!(session.orchestrator.state("bass").unwrap(), LoopState::Stopped);
    // No restart at the end of the bar
    assert_eq!(session.starts("bass").len(), 1);
}

#[test]
fn test_fade_out_ramps_and_stops() {
    let mut session = Session::new().with_player("bass", 4, Alignment::Absolute);
    session.orchestrator.start(&["bass"]).unwrap();
    session.advance_to(EPOCH + 0.7);

    let fade = PlayOptions { fade: 0.5, now: true, ..Default::default() };
    session.orchestrator.stop("bass", fade).unwrap();
    session.advance_to(EPOCH + 1.5);

    let output = session.output.lock();
    let stops: Vec<f64> = output
        .events()
        .iter()
        .filter_map(|e| match e {
            OutputEvent::SegmentStopped { at, .. } => Some(*at),
            _ => None,
        })
        .collect();
    assert_times(&stops, &[EPOCH + 1.2]);
    assert!(output.events().iter().any(|e| matches!(
        e,
        OutputEvent::GainRamp { target, duration, .. } if *target == 0.0 && *duration == 0.5
    )));
}

#[test]
fn test_rapid_toggle_keeps_track_alive() {
    let mut session = Session::new().with_player("bass", 4, Alignment::Absolute);
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 0.1);

    session.orchestrator.play("bass", PlayOptions::default()).unwrap();
    session.advance_to(EPOCH + 0.9);
    let fade = PlayOptions { fade: 1.0, ..Default::default() };
    session.orchestrator.stop("bass", fade).unwrap();
    session.advance_to(EPOCH + 1.2);
    session.orchestrator.play("bass", PlayOptions::default()).unwrap();

    // Past the point where the first fade's teardown fires
    session.advance_to(EPOCH + 3.0);
    assert!(session.orchestrator.is_playing("bass").unwrap());
    assert_eq!(session.orchestrator.state("bass").unwrap(), LoopState::Playing);
    let starts: Vec<f64> = session.starts("bass").iter().map(|s| s.0).collect();
    assert_times(&starts, &[EPOCH + 0.5, EPOCH + 2.0]);
}

#[test]
fn test_failing_listener_does_not_block_others() {
    let mut session = Session::new().with_player("bass", 2, Alignment::Absolute);
    let diagnostics = session.orchestrator.diagnostics();
    session
        .orchestrator
        .add_listener(|_| Err(anyhow::anyhow!("broken listener")), 1, EventOptions::default())
        .unwrap();
    let fired = session.recorder(1, EventOptions::default());
    session.orchestrator.start(&["bass"]).unwrap();
    session.advance_to(EPOCH + 2.1);

    assert_eq!(fired.lock().len(), 5);
    assert_eq!(session.starts("bass").len(), 3);
    let failures: Vec<EngineError> = diagnostics.try_iter().collect();
    assert_eq!(failures.len(), 5);
    assert!(matches!(&failures[0], EngineError::Listener { message, .. } if message == "broken listener"));
}

#[test]
fn test_listener_cancels_itself_mid_dispatch() {
    let mut session = Session::new();
    let listeners = session.orchestrator.listeners();
    let slot = Arc::new(Mutex::new(None));
    let own_id = slot.clone();
    let count = Arc::new(Mutex::new(0));
    let counter = count.clone();
    let id = session
        .orchestrator
        .add_listener(
            move |_| {
                *counter.lock() += 1;
                if let Some(id) = *own_id.lock() {
                    listeners.remove(id);
                }
                Ok(())
            },
            1,
            EventOptions::default(),
        )
        .unwrap();
    *slot.lock() = Some(id);
    let fired = session.recorder(1, EventOptions::default());

    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 1.1);
    assert_eq!(*count.lock(), 1);
    assert_eq!(fired.lock().len(), 3);
    assert!(!session.orchestrator.remove_listener(id));
}

#[test]
fn test_errors_are_reported_synchronously() {
    let mut session = Session::new().with_player("bass", 4, Alignment::Absolute);
    assert_eq!(
        session.orchestrator.play("bass", PlayOptions::default()),
        Err(EngineError::not_started())
    );
    assert_eq!(
        session.orchestrator.toggle("ghost", PlayOptions::default()),
        Err(EngineError::not_started())
    );
    assert_eq!(
        session.orchestrator.start(&["ghost"]),
        Err(EngineError::NotFound("ghost".into()))
    );
    assert!(!session.orchestrator.is_started());

    session.orchestrator.start(NO_TRACKS).unwrap();
    assert_eq!(session.orchestrator.start(NO_TRACKS), Err(EngineError::already_started()));
    assert_eq!(
        session.orchestrator.stop("ghost", PlayOptions::default()),
        Err(EngineError::NotFound("ghost".into()))
    );
    assert!(matches!(
        session.orchestrator.schedule("bass", 0, Action::Play, ScheduleOptions::default()),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        session.orchestrator.wait(0, EventOptions::default()),
        Err(EngineError::InvalidArgument(_))
    ));
    assert_eq!(session.orchestrator.is_playing("ghost"), Err(EngineError::NotFound("ghost".into())));
}

#[test]
fn test_full_stop_silences_everything() {
    let mut session = Session::new()
        .with_player("bass", 4, Alignment::Absolute)
        .with_player("pad", 8, Alignment::Relative);
    session.orchestrator.start(&["bass", "pad"]).unwrap();
    session.advance_to(EPOCH + 1.3);

    session.orchestrator.full_stop().unwrap();
    assert!(!session.orchestrator.is_started());
    assert_eq!(session.orchestrator.state("bass").unwrap(), LoopState::Stopped);
    assert_eq!(session.orchestrator.state("pad").unwrap(), LoopState::Stopped);

    let now = session.now();
    session.advance_to(EPOCH + 5.0);
    assert!(session.output.lock().sounding_at(now + 0.01).is_empty());
    assert_eq!(session.orchestrator.full_stop(), Err(EngineError::not_started()));
    // Can be brought back up
    session.orchestrator.start(&["bass"]).unwrap();
    assert!(session.orchestrator.is_playing("bass").unwrap());
}

#[test]
fn test_suspend_freezes_the_timeline() {
    let mut session = Session::new();
    let fired = session.recorder(1, EventOptions::default());
    session.orchestrator.start(NO_TRACKS).unwrap();
    session.advance_to(EPOCH + 0.6);
    assert_eq!(fired.lock().len(), 2);

    session.orchestrator.suspend().unwrap();
    assert!(session.orchestrator.is_paused());
    for _ in 0..10 {
        session.output.lock().advance(0.5);
        session.orchestrator.poll();
    }
    assert_abs_diff_eq!(session.now(), EPOCH + 0.6, epsilon = 1e-9);
    assert_eq!(fired.lock().len(), 2);

    session.orchestrator.resume().unwrap();
    session.advance_to(EPOCH + 1.1);
    assert_eq!(fired.lock().len(), 3);
}

#[test]
fn test_duplicate_shares_tempo_not_listeners() {
    let mut session = Session::new().with_player("bass", 4, Alignment::Absolute);
    session.recorder(1, EventOptions::default());
    session.orchestrator.start(&["bass"]).unwrap();

    let mut copy = session.orchestrator.duplicate().unwrap();
    assert_eq!(copy.bpm(), 120.0);
    assert_eq!(copy.track_names(), vec!["bass".to_string()]);
    assert!(!copy.is_started());
    assert!(copy.listeners().is_empty());
    assert!(!copy.is_playing("bass").unwrap());

    copy.start(NO_TRACKS).unwrap();
    copy.play("bass", PlayOptions::default()).unwrap();
    assert!(session.orchestrator.is_playing("bass").unwrap());
    copy.full_stop().unwrap();
    assert!(session.orchestrator.is_playing("bass").unwrap());
    assert_eq!(session.orchestrator.listeners().len(), 1);
}

#[test]
fn test_alignment_changes_only_while_stopped() {
    let mut session = Session::new().with_player("bass", 4, Alignment::Absolute);
    session.orchestrator.start(&["bass"]).unwrap();
    assert!(matches!(
        session.orchestrator.set_alignment("bass", Alignment::Relative),
        Err(EngineError::State(_))
    ));
    session.orchestrator.full_stop().unwrap();
    assert!(session.orchestrator.set_alignment("bass", Alignment::Relative).is_ok());
}

#[test]
fn test_volume_and_routing() {
    let mut session = Session::new().with_player("bass", 4, Alignment::Absolute);
    session.orchestrator.set_volume(0.25);
    assert_eq!(session.output.lock().master_gain(), 0.25);

    let fx = Sink::Named("reverb".into());
    session.orchestrator.connect("bass", &fx).unwrap();
    session.orchestrator.disconnect("bass", Some(&Sink::Master)).unwrap();
    let output = session.output.lock();
    let routed = output.events().iter().any(|e| matches!(e, OutputEvent::Connected { sink, .. } if *sink == fx));
    assert!(routed);
    drop(output);
    assert_eq!(
        session.orchestrator.connect("ghost", &fx),
        Err(EngineError::NotFound("ghost".into()))
    );
}

#[test]
fn test_add_players_loads_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 1000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(dir.path().join("loop.wav"), spec).unwrap();
    for _ in 0..2000 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();

    let output: SharedOutput = Arc::new(Mutex::new(VirtualOutput::manual(0.0)));
    let mut orchestrator = Orchestrator::new(EngineConfig::with_bpm(120.0), output)
        .unwrap()
        .with_loader(Arc::new(WavLoader::new(dir.path())));

    let mut loading = orchestrator
        .add_players(vec![PlayerConfig::new("loop", "loop.wav", 4)])
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let result = loop {
        orchestrator.poll();
        if let Some(result) = (&mut loading).now_or_never() {
            break result;
        }
        assert!(Instant::now() < deadline, "players never finished loading");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(result, Ok(()));
    assert_eq!(orchestrator.track_names(), vec!["loop".to_string()]);

    // All or nothing: one missing file registers neither player
    let mut loading = orchestrator
        .add_players(vec![
            PlayerConfig::new("again", "loop.wav", 4),
            PlayerConfig::new("missing", "missing.wav", 4),
        ])
        .unwrap();
    let result = loop {
        orchestrator.poll();
        if let Some(result) = (&mut loading).now_or_never() {
            break result;
        }
        assert!(Instant::now() < deadline, "players never finished loading");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert!(matches!(result, Err(EngineError::Asset { .. })));
    assert_eq!(orchestrator.track_names(), vec!["loop".to_string()]);

    assert!(matches!(
        orchestrator.add_player(PlayerConfig::new("bad", "bad.wav", 0)),
        Err(EngineError::InvalidArgument(_))
    ));
}
