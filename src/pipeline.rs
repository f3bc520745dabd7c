//! One frame tick: selector → classifier → smoother → velocity gate → sink.
//!
//! Every stage sees the same (hands, now) before the next frame is touched;
//! state lives here and nowhere else.

use log::{info, trace};
use std::time::Duration;

use crate::actions::{DesktopDirection, InputSink, MouseButton};
use crate::config::{Camera, Identity, Profile, Screen};
use crate::gestures::{Gesture, GestureClassifier};
use crate::hand::{HandObservation, Point};
use crate::logging::LogSink;
use crate::selector::{CentroidMatcher, HandSelector};
use crate::smoother::{self, Smoother};
use crate::velocity::{VelocityGate, VelocityTracker};

#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub hand_present: bool,
    pub gesture: Gesture,
    /// Clamped screen position sent to the sink this tick.
    pub cursor: Option<(i32, i32)>,
    pub paused: bool,
    pub alpha: Option<f64>,
}

impl FrameOutcome {
    fn empty() -> Self {
        Self {
            hand_present: false,
            gesture: Gesture::None,
            cursor: None,
            paused: false,
            alpha: None,
        }
    }
}

/// Linear frame → screen mapping, used until a calibration is supplied.
#[derive(Debug, Clone)]
pub struct ScreenMap {
    camera: Camera,
    screen: Screen,
}

impl ScreenMap {
    pub fn new(camera: Camera, screen: Screen) -> Self {
        Self { camera, screen }
    }

    pub fn map(&self, p: Point) -> Point {
        (
            p.0 / self.camera.width as f64 * self.screen.width as f64,
            p.1 / self.camera.height as f64 * self.screen.height as f64,
        )
    }

    pub fn clamp(&self, p: Point) -> (i32, i32) {
        let max_x = self.screen.width.saturating_sub(1) as f64;
        let max_y = self.screen.height.saturating_sub(1) as f64;
        (p.0.clamp(0.0, max_x) as i32, p.1.clamp(0.0, max_y) as i32)
    }
}

struct Stages {
    matcher: Option<CentroidMatcher>,
    selector: HandSelector,
    classifier: GestureClassifier,
    smoother: Box<dyn Smoother>,
    velocity: VelocityTracker,
    gate: VelocityGate,
    screen: ScreenMap,
    zoom_threshold: f64,
    zoom_scroll_step: f64,
}

impl Stages {
    fn build(p: &Profile) -> Self {
        Self {
            matcher: (p.tracker.identity == Identity::Centroid)
                .then(|| CentroidMatcher::new(p.tracker.match_radius)),
            selector: HandSelector::new(
                p.tracker.stability_frames,
                LogSink::new("handctl::selector"),
            ),
            classifier: GestureClassifier::new(
                p.gestures.clone(),
                LogSink::new("handctl::gestures"),
            ),
            smoother: smoother::from_settings(&p.smoother, LogSink::new("handctl::smoother")),
            velocity: VelocityTracker::new(),
            gate: VelocityGate::new(p.velocity.clone(), LogSink::new("handctl::velocity")),
            screen: ScreenMap::new(p.camera.clone(), p.screen.clone()),
            zoom_threshold: p.gestures.zoom_threshold,
            zoom_scroll_step: p.gestures.zoom_scroll_step,
        }
    }
}

pub struct Pipeline<S: InputSink> {
    stages: Stages,
    sink: S,
    dragging: bool,
    last_now: Option<Duration>,
}

impl<S: InputSink> Pipeline<S> {
    pub fn new(profile: &Profile, sink: S) -> Self {
        Self {
            stages: Stages::build(profile),
            sink,
            dragging: false,
            last_now: None,
        }
    }

    /// Swap in a new profile between ticks. Selection, gesture and filter
    /// state start over.
    pub fn reconfigure(&mut self, profile: &Profile) {
        self.end_drag();
        self.stages = Stages::build(profile);
        info!("pipeline reconfigured");
    }

    /// Releases anything held; called when the loop stops.
    pub fn shutdown(&mut self) {
        self.end_drag();
    }

    pub fn tick(&mut self, hands: &[HandObservation], now: Duration) -> FrameOutcome {
        let dt = self
            .last_now
            .map_or(Duration::ZERO, |last| now.saturating_sub(last));
        self.last_now = Some(now);

        let st = &mut self.stages;
        let keyed;
        let hands = match st.matcher.as_mut() {
            Some(m) => {
                keyed = m.assign(hands);
                &keyed[..]
            }
            None => hands,
        };

        let Some(hand) = st.selector.select(hands) else {
            st.smoother.reset();
            st.velocity.reset();
            self.end_drag();
            return FrameOutcome::empty();
        };

        let hand_scale = hand.scale();
        let gesture = st.classifier.classify(&hand, now);
        trace!(
            "selector={:?} gestures={:?}",
            st.selector.state(),
            st.classifier.state()
        );
        let mut outcome = FrameOutcome {
            hand_present: true,
            gesture,
            ..FrameOutcome::empty()
        };

        match gesture {
            Gesture::PalmOpen => {
                outcome.paused = true;
                return outcome;
            }
            Gesture::SwipeUp => {
                self.sink.switch_desktop(DesktopDirection::Previous);
                return outcome;
            }
            Gesture::SwipeDown => {
                self.sink.switch_desktop(DesktopDirection::Next);
                return outcome;
            }
            _ => {}
        }

        let tip = hand.index_tip();
        let smoothed = st.smoother.smooth(tip, hand_scale);
        let mapped = st.screen.map(smoothed);
        let velocity = st.velocity.measure(tip, dt);
        let adjusted = st.gate.apply(mapped, velocity);
        let (x, y) = st.screen.clamp(adjusted);
        self.sink.move_cursor(x, y);
        outcome.cursor = Some((x, y));
        outcome.alpha = st.smoother.current_alpha();

        match gesture {
            Gesture::Pinch { .. } => {
                if !self.dragging {
                    self.sink.click(MouseButton::Left);
                }
            }
            Gesture::RightClick => self.sink.click(MouseButton::Right),
            Gesture::Drag { .. } => {
                if !self.dragging {
                    self.sink.drag_start();
                    self.dragging = true;
                }
            }
            Gesture::Zoom { spread } => {
                let amount = ((spread - st.zoom_threshold) / st.zoom_scroll_step) as i32;
                if amount != 0 {
                    self.sink.scroll(amount);
                }
            }
            _ => self.end_drag(),
        }
        outcome
    }

    fn end_drag(&mut self) {
        if self.dragging {
            self.sink.drag_end();
            self.dragging = false;
        }
    }
}
