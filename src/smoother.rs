//! Cursor position filters.
//!
//! Both filters pass the first sample after construction or `reset()` through
//! untouched and blend from there on.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

use crate::config::{SmootherKind, SmootherSettings};
use crate::hand::Point;
use crate::logging::LogSink;

pub trait Smoother {
    fn smooth(&mut self, position: Point, hand_scale: f64) -> Point;
    fn reset(&mut self);
    /// Weight given to the newest sample on the last call, where that means anything.
    fn current_alpha(&self) -> Option<f64> {
        None
    }
}

pub fn from_settings(s: &SmootherSettings, log: LogSink) -> Box<dyn Smoother> {
    match s.kind {
        SmootherKind::Adaptive => Box::new(AdaptiveSmoother::new(s, log)),
        SmootherKind::Kalman => Box::new(KalmanSmoother::new(s.process_noise, s.measurement_noise)),
    }
}

/// Exponential moving average whose alpha follows apparent hand size: a
/// larger (closer) hand raises alpha and makes the cursor more responsive.
#[derive(Debug)]
pub struct AdaptiveSmoother {
    alpha_base: f64,
    alpha_min: f64,
    alpha_max: f64,
    adaptation_factor: f64,
    reference_hand_size: f64,
    filtered: Option<Point>,
    current_alpha: f64,
    log: LogSink,
}

impl AdaptiveSmoother {
    pub fn new(s: &SmootherSettings, log: LogSink) -> Self {
        log.info(format_args!(
            "adaptive smoother: alpha={} range=[{}, {}]",
            s.alpha_base, s.alpha_min, s.alpha_max
        ));
        Self {
            alpha_base: s.alpha_base,
            alpha_min: s.alpha_min,
            alpha_max: s.alpha_max,
            adaptation_factor: s.adaptation_factor,
            reference_hand_size: s.reference_hand_size,
            filtered: None,
            current_alpha: s.alpha_base.clamp(s.alpha_min, s.alpha_max),
            log,
        }
    }

    pub fn alpha_for(&self, hand_scale: f64) -> f64 {
        let scale_ratio = self.reference_hand_size / hand_scale.max(1.0);
        let scale_factor = 1.0 - scale_ratio;
        (self.alpha_base * (1.0 + self.adaptation_factor * scale_factor))
            .clamp(self.alpha_min, self.alpha_max)
    }
}

impl Smoother for AdaptiveSmoother {
    fn smooth(&mut self, position: Point, hand_scale: f64) -> Point {
        let Some(prev) = self.filtered else {
            self.filtered = Some(position);
            return position;
        };

        let a = self.alpha_for(hand_scale);
        self.current_alpha = a;
        let out = (
            a * position.0 + (1.0 - a) * prev.0,
            a * position.1 + (1.0 - a) * prev.1,
        );
        self.filtered = Some(out);
        self.log
            .trace(format_args!("alpha={a:.3} scale={hand_scale:.1}"));
        out
    }

    fn reset(&mut self) {
        self.filtered = None;
        self.current_alpha = self.alpha_base.clamp(self.alpha_min, self.alpha_max);
    }

    fn current_alpha(&self) -> Option<f64> {
        Some(self.current_alpha)
    }
}

/// Constant-velocity Kalman filter over (x, y, vx, vy), one step per frame.
#[derive(Debug)]
pub struct KalmanSmoother {
    f: Matrix4<f64>,
    h: Matrix2x4<f64>,
    q: Matrix4<f64>,
    r: Matrix2<f64>,
    state: Option<(Vector4<f64>, Matrix4<f64>)>,
}

impl KalmanSmoother {
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        #[rustfmt::skip]
        let f = Matrix4::new(
            1.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 1.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        #[rustfmt::skip]
        let h = Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
        );
        Self {
            f,
            h,
            q: Matrix4::identity() * process_noise,
            r: Matrix2::identity() * measurement_noise,
            state: None,
        }
    }

    #[cfg(test)]
    pub fn velocity(&self) -> Option<(f64, f64)> {
        self.state.as_ref().map(|(m, _)| (m[2], m[3]))
    }
}

impl Smoother for KalmanSmoother {
    fn smooth(&mut self, position: Point, _hand_scale: f64) -> Point {
        let z = Vector2::new(position.0, position.1);
        let Some((m, p)) = self.state.take() else {
            self.state = Some((
                Vector4::new(position.0, position.1, 0.0, 0.0),
                Matrix4::identity(),
            ));
            return position;
        };

        // predict
        let m = self.f * m;
        let p = self.f * p * self.f.transpose() + self.q;

        // update
        let s = self.h * p * self.h.transpose() + self.r;
        let Some(s_inv) = s.try_inverse() else {
            self.state = Some((m, p));
            return (m[0], m[1]);
        };
        let k = p * self.h.transpose() * s_inv;
        let m = m + k * (z - self.h * m);
        let p = (Matrix4::identity() - k * self.h) * p;

        self.state = Some((m, p));
        (m[0], m[1])
    }

    fn reset(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adaptive() -> AdaptiveSmoother {
        AdaptiveSmoother::new(&SmootherSettings::default(), LogSink::new("handctl::smoother"))
    }

    #[test]
    fn first_call_passes_through() {
        let mut s = adaptive();
        assert_eq!(s.smooth((100.0, 200.0), 150.0), (100.0, 200.0));
    }

    #[test]
    fn second_call_moves_part_way() {
        let mut s = adaptive();
        s.smooth((100.0, 100.0), 150.0);
        let (x, y) = s.smooth((200.0, 200.0), 150.0);
        assert!(x > 100.0 && x < 200.0);
        assert!(y > 100.0 && y < 200.0);
        // reference-sized hand leaves alpha at its base value
        assert!((x - 130.0).abs() < 1e-9);
    }

    #[test]
    fn closer_hand_is_more_responsive() {
        let settings = SmootherSettings {
            alpha_base: 0.5,
            adaptation_factor: 0.5,
            ..SmootherSettings::default()
        };
        let mut s = AdaptiveSmoother::new(&settings, LogSink::new("handctl::smoother"));
        s.smooth((100.0, 100.0), 150.0);
        s.smooth((200.0, 200.0), 50.0);
        let far = s.current_alpha().unwrap();

        s.reset();
        s.smooth((100.0, 100.0), 150.0);
        s.smooth((200.0, 200.0), 300.0);
        let near = s.current_alpha().unwrap();

        assert!(near > far);
        assert_eq!(far, 0.1);
        assert!((near - 0.625).abs() < 1e-9);
    }

    #[test]
    fn alpha_stays_in_bounds() {
        let settings = SmootherSettings::default();
        let mut s = adaptive();
        s.smooth((0.0, 0.0), 150.0);
        for i in 0..2000 {
            let scale = 0.01 + i as f64 * 0.75;
            s.smooth((i as f64, i as f64), scale);
            let a = s.current_alpha().unwrap();
            assert!(a >= settings.alpha_min && a <= settings.alpha_max, "alpha {a} at {scale}");
        }
    }

    #[test]
    fn zero_hand_scale_is_floored() {
        let s = adaptive();
        assert_eq!(s.alpha_for(0.0), s.alpha_for(1.0));
        assert!(s.alpha_for(0.0).is_finite());
    }

    #[test]
    fn reset_is_equivalent_to_fresh_instance() {
        let mut used = adaptive();
        used.smooth((10.0, 10.0), 150.0);
        used.smooth((500.0, 20.0), 90.0);
        used.reset();

        let mut fresh = adaptive();
        for (p, sc) in [((100.0, 200.0), 150.0), ((150.0, 260.0), 120.0)] {
            assert_eq!(used.smooth(p, sc), fresh.smooth(p, sc));
            assert_eq!(used.current_alpha(), fresh.current_alpha());
        }
    }

    #[test]
    fn kalman_first_call_passes_through() {
        let mut k = KalmanSmoother::new(0.01, 0.1);
        assert_eq!(k.smooth((100.0, 200.0), 150.0), (100.0, 200.0));
        assert_eq!(k.velocity(), Some((0.0, 0.0)));
    }

    #[test]
    fn kalman_converges_on_stationary_target() {
        let mut k = KalmanSmoother::new(0.01, 0.1);
        k.smooth((0.0, 0.0), 150.0);
        let mut last = (0.0, 0.0);
        for _ in 0..50 {
            last = k.smooth((100.0, 50.0), 150.0);
        }
        assert!((last.0 - 100.0).abs() < 1.0, "x={}", last.0);
        assert!((last.1 - 50.0).abs() < 1.0, "y={}", last.1);
    }

    #[test]
    fn kalman_second_call_lands_between_samples() {
        let mut k = KalmanSmoother::new(0.01, 0.1);
        k.smooth((100.0, 100.0), 150.0);
        let (x, y) = k.smooth((200.0, 200.0), 150.0);
        assert!(x > 100.0 && x < 200.0);
        assert!(y > 100.0 && y < 200.0);
    }

    #[test]
    fn kalman_reset_rebaselines() {
        let mut k = KalmanSmoother::new(0.01, 0.1);
        k.smooth((0.0, 0.0), 150.0);
        k.smooth((50.0, 50.0), 150.0);
        k.reset();
        assert_eq!(k.velocity(), None);
        assert_eq!(k.smooth((7.0, 9.0), 150.0), (7.0, 9.0));
    }

    #[test]
    fn settings_pick_the_filter() {
        let mut s = SmootherSettings::default();
        assert!(from_settings(&s, LogSink::new("t")).current_alpha().is_some());
        s.kind = SmootherKind::Kalman;
        assert!(from_settings(&s, LogSink::new("t")).current_alpha().is_none());
    }
}
