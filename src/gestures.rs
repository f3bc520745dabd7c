use std::time::Duration;

use crate::config::GestureThresholds;
use crate::hand::{
    FINGER_MCPS, FINGER_TIPS, HandObservation, INDEX_TIP, MIDDLE_TIP, PINKY_TIP, Point, THUMB_TIP,
};
use crate::logging::LogSink;

/// A fingertip counts as extended this far above its knuckle (px).
const PALM_EXTENSION_MARGIN: f64 = 20.0;
const PALM_MIN_EXTENDED: usize = 3;
/// Fingertip y-variance above which four fingers are not a swipe (px²).
const SWIPE_MAX_VARIANCE: f64 = 400.0;
/// Below this the swipe velocity is not trusted.
const SWIPE_MIN_ELAPSED: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    None,
    /// Index and thumb closed; carries the index tip.
    Pinch { position: Point },
    RightClick,
    /// Pinch held; emitted every frame with the index tip.
    Drag { position: Point },
    /// Thumb to pinky spread (px).
    Zoom { spread: f64 },
    SwipeUp,
    SwipeDown,
    PalmOpen,
}

impl Gesture {
    pub fn name(&self) -> &'static str {
        match self {
            Gesture::None => "none",
            Gesture::Pinch { .. } => "pinch",
            Gesture::RightClick => "right_click",
            Gesture::Drag { .. } => "drag",
            Gesture::Zoom { .. } => "zoom",
            Gesture::SwipeUp => "swipe_up",
            Gesture::SwipeDown => "swipe_down",
            Gesture::PalmOpen => "palm_open",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
enum SwipeState {
    #[default]
    Idle,
    Tracking {
        start_y: f64,
        start_time: Duration,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GestureState {
    pub is_pinching: bool,
    pub is_dragging: bool,
    pub last_gesture_time: Option<Duration>,
    swipe: SwipeState,
}

impl GestureState {
    #[cfg(test)]
    pub fn swipe_tracking(&self) -> bool {
        matches!(self.swipe, SwipeState::Tracking { .. })
    }
}

#[derive(Debug)]
pub struct GestureClassifier {
    th: GestureThresholds,
    state: GestureState,
    log: LogSink,
}

impl GestureClassifier {
    pub fn new(th: GestureThresholds, log: LogSink) -> Self {
        Self {
            th,
            state: GestureState::default(),
            log,
        }
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    /// One gesture per frame; `now` is time since the stream started.
    /// Earlier checks win.
    pub fn classify(&mut self, hand: &HandObservation, now: Duration) -> Gesture {
        self.palm_open(hand)
            .or_else(|| self.four_finger_swipe(hand, now))
            .or_else(|| self.pinch_or_drag(hand, now))
            .or_else(|| self.right_click(hand, now))
            .or_else(|| self.zoom(hand))
            .unwrap_or(Gesture::None)
    }

    fn palm_open(&self, hand: &HandObservation) -> Option<Gesture> {
        let extended = FINGER_TIPS
            .iter()
            .zip(FINGER_MCPS.iter())
            .filter(|&(&tip, &mcp)| {
                hand.landmark(tip).y < hand.landmark(mcp).y - PALM_EXTENSION_MARGIN
            })
            .count();
        (extended >= PALM_MIN_EXTENDED).then_some(Gesture::PalmOpen)
    }

    fn four_finger_swipe(&mut self, hand: &HandObservation, now: Duration) -> Option<Gesture> {
        let ys = FINGER_TIPS.map(|i| hand.landmark(i).y);
        let n = ys.len() as f64;
        let avg_y = ys.iter().sum::<f64>() / n;
        let variance = ys.iter().map(|y| (y - avg_y).powi(2)).sum::<f64>() / n;

        if variance > SWIPE_MAX_VARIANCE {
            self.state.swipe = SwipeState::Idle;
            return None;
        }

        let SwipeState::Tracking {
            start_y,
            start_time,
        } = self.state.swipe
        else {
            // arm
            self.state.swipe = SwipeState::Tracking {
                start_y: avg_y,
                start_time: now,
            };
            return None;
        };

        let elapsed = now.saturating_sub(start_time);
        if elapsed < SWIPE_MIN_ELAPSED {
            return None;
        }
        let displacement = avg_y - start_y;
        let velocity = displacement.abs() / elapsed.as_secs_f64();

        if displacement.abs() > self.th.swipe_min_distance
            && velocity > self.th.swipe_min_velocity
            && self.debounce_elapsed(now, self.th.swipe_debounce())
        {
            self.stamp(now);
            self.state.swipe = SwipeState::Idle;
            let g = if displacement < 0.0 {
                Gesture::SwipeUp
            } else {
                Gesture::SwipeDown
            };
            self.log.info(format_args!(
                "{} ({displacement:.0}px at {velocity:.0}px/s)",
                g.name()
            ));
            return Some(g);
        }
        None
    }

    fn pinch_or_drag(&mut self, hand: &HandObservation, now: Duration) -> Option<Gesture> {
        let thumb = hand.landmark(THUMB_TIP);
        let index = hand.landmark(INDEX_TIP);

        if thumb.distance(index) < self.th.pinch_threshold {
            if self.state.is_pinching {
                self.state.is_dragging = true;
                return Some(Gesture::Drag {
                    position: index.xy(),
                });
            }
            if self.debounce_elapsed(now, self.th.pinch_debounce()) {
                self.state.is_pinching = true;
                self.stamp(now);
                self.log.debug(format_args!("pinch detected"));
                return Some(Gesture::Pinch {
                    position: index.xy(),
                });
            }
        } else if self.state.is_pinching {
            self.state.is_pinching = false;
            self.state.is_dragging = false;
            self.log.debug(format_args!("pinch released"));
        }
        None
    }

    fn right_click(&mut self, hand: &HandObservation, now: Duration) -> Option<Gesture> {
        let d = hand.landmark(THUMB_TIP).distance(hand.landmark(MIDDLE_TIP));
        if d < self.th.pinch_threshold && self.debounce_elapsed(now, self.th.pinch_debounce()) {
            self.stamp(now);
            self.log.debug(format_args!("right click detected"));
            return Some(Gesture::RightClick);
        }
        None
    }

    fn zoom(&self, hand: &HandObservation) -> Option<Gesture> {
        let spread = hand.landmark(THUMB_TIP).distance(hand.landmark(PINKY_TIP));
        (spread > self.th.zoom_threshold).then_some(Gesture::Zoom { spread })
    }

    fn debounce_elapsed(&self, now: Duration, window: Duration) -> bool {
        match self.state.last_gesture_time {
            None => true,
            Some(last) => now.saturating_sub(last) > window,
        }
    }

    fn stamp(&mut self, now: Duration) {
        let last = self.state.last_gesture_time.unwrap_or_default();
        self.state.last_gesture_time = Some(last.max(now));
    }
}
