//! Foreground frame loop: reads landmark frames, drives the pipeline, follows
//! profile edits and stops cleanly on SIGINT/SIGTERM.

use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use crate::actions::{self, InputSink};
use crate::config::{ConfigState, Profile};
use crate::input::{Frame, FrameError, FrameSource};
use crate::pipeline::Pipeline;

const POLL: Duration = Duration::from_millis(50);
const FRAME_BACKLOG: usize = 64;

#[derive(Debug, Default)]
pub struct RunOptions {
    /// Standalone profile file instead of the managed profiles directory.
    pub config: Option<PathBuf>,
    /// Frame file; stdin when absent.
    pub frames: Option<PathBuf>,
    pub noop: bool,
}

enum ProfileSource {
    Managed(ConfigState),
    File(PathBuf),
}

impl ProfileSource {
    fn open(config: Option<PathBuf>) -> Result<(Self, Profile)> {
        match config {
            Some(path) => {
                let profile = Profile::load(&path)?;
                Ok((Self::File(path), profile))
            }
            None => {
                let state = ConfigState::load_or_install_default()?;
                let profile = state.profile.clone();
                Ok((Self::Managed(state), profile))
            }
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Managed(st) => st.active_name.clone(),
            Self::File(p) => p.display().to_string(),
        }
    }

    fn reload(&mut self) -> Result<Profile> {
        match self {
            Self::Managed(st) => {
                st.reload()?;
                Ok(st.profile.clone())
            }
            Self::File(p) => Profile::load(p),
        }
    }

    /// Directory to watch, plus the file name to filter on when only one file
    /// in it matters.
    fn watch_target(&self) -> (PathBuf, Option<OsString>) {
        match self {
            Self::Managed(st) => (st.config_dir.clone(), None),
            // editors replace files on save, so watch the parent
            Self::File(p) => {
                let dir = p
                    .parent()
                    .filter(|d| !d.as_os_str().is_empty())
                    .unwrap_or(Path::new("."));
                (dir.to_path_buf(), p.file_name().map(|n| n.to_os_string()))
            }
        }
    }
}

fn is_relevant(ev: &Event, only: Option<&OsStr>) -> bool {
    let changed = matches!(
        ev.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    changed && only.is_none_or(|name| ev.paths.iter().any(|p| p.file_name() == Some(name)))
}

fn watch_profiles(source: &ProfileSource, tx: Sender<()>) -> notify::Result<RecommendedWatcher> {
    let (root, only) = source.watch_target();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(ev) if is_relevant(&ev, only.as_deref()) => {
            let _ = tx.send(());
        }
        Ok(_) => {}
        Err(e) => warn!("profile watch error: {e}"),
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!("daemon: watching {} for profile changes", root.display());
    Ok(watcher)
}

fn spawn_reader(frames: FrameSource) -> Receiver<Result<Frame, FrameError>> {
    let (tx, rx) = mpsc::sync_channel(FRAME_BACKLOG);
    thread::spawn(move || {
        for item in frames {
            let fatal = matches!(item, Err(FrameError::Io(_)));
            if tx.send(item).is_err() || fatal {
                break;
            }
        }
    });
    rx
}

/// Frame timebase, latched on the first frame so producer `t_ms` and local
/// arrival time are never mixed within one stream.
#[derive(Debug, Clone, Copy)]
enum FrameClock {
    Unset { started: Instant },
    Producer { last: Duration, at: Instant },
    Local { started: Instant },
}

impl FrameClock {
    fn new(started: Instant) -> Self {
        Self::Unset { started }
    }

    fn stamp(&mut self, stamped: Option<Duration>, arrived: Instant) -> Duration {
        match *self {
            Self::Unset { started } => match stamped {
                Some(t) => {
                    *self = Self::Producer { last: t, at: arrived };
                    t
                }
                None => {
                    *self = Self::Local { started };
                    arrived.saturating_duration_since(started)
                }
            },
            Self::Producer { last, at } => {
                let now = stamped.unwrap_or_else(|| {
                    warn!("frame without t_ms on a stamped stream; extrapolating");
                    last + arrived.saturating_duration_since(at)
                });
                *self = Self::Producer { last: now, at: arrived };
                now
            }
            Self::Local { started } => {
                if stamped.is_some() {
                    warn!("ignoring t_ms on a stream that started without it");
                }
                arrived.saturating_duration_since(started)
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Stats {
    frames: u64,
    tracked: u64,
    skipped: u64,
    reloads: u64,
}

struct Daemon<S: InputSink> {
    source: ProfileSource,
    profile: Profile,
    pipeline: Pipeline<S>,
    clock: FrameClock,
    stats: Stats,
}

impl<S: InputSink> Daemon<S> {
    fn new(source: ProfileSource, profile: Profile, sink: S) -> Self {
        Self {
            pipeline: Pipeline::new(&profile, sink),
            source,
            profile,
            clock: FrameClock::new(Instant::now()),
            stats: Stats::default(),
        }
    }

    fn apply_reload(&mut self) {
        match self.source.reload() {
            Ok(p) if p == self.profile => debug!("profile unchanged"),
            Ok(p) => {
                if p.output != self.profile.output || p.screen != self.profile.screen {
                    warn!("output and screen changes take effect on restart");
                }
                self.pipeline.reconfigure(&p);
                self.profile = p;
                self.stats.reloads += 1;
                info!("daemon: reloaded profile '{}'", self.source.label());
            }
            Err(e) => error!("reload failed, keeping previous profile: {e:#}"),
        }
    }

    fn handle(&mut self, item: Result<Frame, FrameError>) {
        match item {
            Ok(frame) => {
                let now = self.clock.stamp(frame.timestamp, Instant::now());
                let out = self.pipeline.tick(&frame.hands, now);
                self.stats.frames += 1;
                if out.hand_present {
                    self.stats.tracked += 1;
                }
            }
            Err(e) => {
                warn!("skipping frame: {e}");
                self.stats.skipped += 1;
            }
        }
    }

    fn run(
        &mut self,
        frames: &Receiver<Result<Frame, FrameError>>,
        reloads: &Receiver<()>,
        shutdown: &AtomicBool,
    ) {
        while !shutdown.load(Ordering::SeqCst) {
            // coalesce bursts of watcher events into one reload
            if reloads.try_iter().count() > 0 {
                self.apply_reload();
            }
            match frames.recv_timeout(POLL) {
                Ok(item) => self.handle(item),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("daemon: frame stream ended");
                    break;
                }
            }
        }
        self.pipeline.shutdown();
    }
}

pub fn run_daemon(opts: RunOptions) -> Result<()> {
    let (source, profile) = ProfileSource::open(opts.config)?;
    info!("daemon: active profile '{}'", source.label());

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let signal_handle = signals.handle();
    {
        let shutdown = shutdown.clone();
        thread::spawn(move || {
            for sig in signals.forever() {
                info!("daemon: signal {sig}, shutting down");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let (tx_reload, rx_reload) = mpsc::channel();
    let _watcher = match watch_profiles(&source, tx_reload) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!("profile hot reload disabled: {e}");
            None
        }
    };

    let frames = FrameSource::open(opts.frames.as_deref()).map_err(|e| match &opts.frames {
        Some(p) => anyhow!("cannot open frames {}: {e}", p.display()),
        None => anyhow!("cannot read stdin: {e}"),
    })?;
    let rx_frames = spawn_reader(frames);

    let sink = actions::build_sink(&profile.output, &profile.screen, opts.noop);
    let mut daemon = Daemon::new(source, profile, sink);
    daemon.run(&rx_frames, &rx_reload, &shutdown);

    signal_handle.close();
    let s = daemon.stats;
    info!(
        "daemon: stopped after {} frames ({} tracked, {} skipped, {} reloads)",
        s.frames, s.tracked, s.skipped, s.reloads
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{DesktopSwitcher, NoopSink};
    use crate::config::DesktopTool;
    use crate::input::parse_frame;
    use std::fs;

    fn temp_profile(tag: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("handctl-daemon-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.toml");
        fs::write(&path, body).unwrap();
        path
    }

    fn daemon(path: &Path) -> Daemon<NoopSink> {
        let (source, profile) = ProfileSource::open(Some(path.to_path_buf())).unwrap();
        let sink = NoopSink::new(DesktopSwitcher::detect(DesktopTool::None));
        Daemon::new(source, profile, sink)
    }

    fn hand_line(t_ms: u64) -> String {
        let pts: Vec<String> = (0..21).map(|i| format!("[{}.0, 100.0, 0.0]", 100 + i)).collect();
        format!(
            r#"{{"t_ms": {t_ms}, "hands": [{{"id": 1, "landmarks": [{}]}}]}}"#,
            pts.join(",")
        )
    }

    #[test]
    fn counts_frames_and_skips_bad_ones() {
        let path = temp_profile("count", "[meta]\nname = \"t\"\n");
        let mut d = daemon(&path);

        let (tx, rx) = mpsc::sync_channel(8);
        tx.send(parse_frame(1, &hand_line(0))).unwrap();
        tx.send(parse_frame(2, "{oops")).unwrap();
        tx.send(parse_frame(3, r#"{"t_ms": 66, "hands": []}"#)).unwrap();
        drop(tx);

        let (_reload_tx, reload_rx) = mpsc::channel();
        d.run(&rx, &reload_rx, &AtomicBool::new(false));
        assert_eq!(
            d.stats,
            Stats {
                frames: 2,
                tracked: 1,
                skipped: 1,
                reloads: 0
            }
        );
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn shutdown_flag_stops_before_reading() {
        let path = temp_profile("stop", "");
        let mut d = daemon(&path);
        let (tx, rx) = mpsc::sync_channel(1);
        tx.send(parse_frame(1, &hand_line(0))).unwrap();
        let (_reload_tx, reload_rx) = mpsc::channel();
        d.run(&rx, &reload_rx, &AtomicBool::new(true));
        assert_eq!(d.stats.frames, 0);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn reload_applies_good_edits_and_keeps_last_good_on_bad() {
        let path = temp_profile("reload", "[tracker]\nstability_frames = 4\n");
        let mut d = daemon(&path);
        assert_eq!(d.profile.tracker.stability_frames, 4);

        fs::write(&path, "[tracker]\nstability_frames = 2\n").unwrap();
        d.apply_reload();
        assert_eq!(d.profile.tracker.stability_frames, 2);
        assert_eq!(d.stats.reloads, 1);

        fs::write(&path, "[smoother]\nalpha_min = 0.9\nalpha_max = 0.2\n").unwrap();
        d.apply_reload();
        assert_eq!(d.profile.tracker.stability_frames, 2);
        assert_eq!(d.stats.reloads, 1);

        // rewriting identical content does not reset the pipeline
        fs::write(&path, "[tracker]\nstability_frames = 2\n").unwrap();
        d.apply_reload();
        assert_eq!(d.stats.reloads, 1);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn clock_latches_producer_time_and_extrapolates_gaps() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(t0);
        let ms = Duration::from_millis;

        assert_eq!(clock.stamp(Some(ms(5000)), t0 + ms(10)), ms(5000));
        // an unstamped frame continues from the producer's clock, never back
        // towards loop time
        assert_eq!(clock.stamp(None, t0 + ms(40)), ms(5030));
        assert_eq!(clock.stamp(Some(ms(5066)), t0 + ms(70)), ms(5066));
    }

    #[test]
    fn clock_latches_local_time_and_ignores_late_stamps() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(t0);
        let ms = Duration::from_millis;

        assert_eq!(clock.stamp(None, t0 + ms(900)), ms(900));
        assert_eq!(clock.stamp(Some(ms(3)), t0 + ms(933)), ms(933));
    }

    #[test]
    fn watcher_filters_on_file_name_and_kind() {
        use notify::event::{AccessKind, CreateKind, ModifyKind};

        let ev = |kind, path: &str| Event::new(kind).add_path(PathBuf::from(path));
        let name = std::ffi::OsStr::new("desk.toml");

        assert!(is_relevant(&ev(EventKind::Modify(ModifyKind::Any), "/p/desk.toml"), Some(name)));
        assert!(!is_relevant(&ev(EventKind::Modify(ModifyKind::Any), "/p/other.toml"), Some(name)));
        assert!(!is_relevant(&ev(EventKind::Access(AccessKind::Any), "/p/desk.toml"), Some(name)));
        assert!(is_relevant(&ev(EventKind::Create(CreateKind::File), "/p/active"), None));
    }

    #[test]
    fn file_source_watches_parent_directory() {
        let src = ProfileSource::File(PathBuf::from("desk.toml"));
        let (dir, only) = src.watch_target();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(only.as_deref(), Some(std::ffi::OsStr::new("desk.toml")));
    }
}
