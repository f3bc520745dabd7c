//! Primary-hand selection with streak hysteresis.
//!
//! "Same hand" here means "same `HandId`". With the default slot identity the
//! id is whatever the detector (or the hand's slot in the detection list)
//! says, so two hands that trade places are only told apart by streak length,
//! not by where they are. `CentroidMatcher` re-keys observations by palm
//! position when that is not good enough.

use crate::hand::{self, HandId, HandObservation, Point};
use crate::logging::LogSink;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectorState {
    pub primary_id: Option<HandId>,
    pub candidate_id: Option<HandId>,
    pub candidate_streak: u32,
}

#[derive(Debug)]
pub struct HandSelector {
    stability_frames: u32,
    state: SelectorState,
    log: LogSink,
}

impl HandSelector {
    pub fn new(stability_frames: u32, log: LogSink) -> Self {
        Self {
            stability_frames: stability_frames.max(1),
            state: SelectorState::default(),
            log,
        }
    }

    pub fn state(&self) -> &SelectorState {
        &self.state
    }

    pub fn select(&mut self, observations: &[HandObservation]) -> Option<HandObservation> {
        let Some(first) = observations.first() else {
            if self.state.primary_id.is_some() {
                self.log.debug(format_args!("lost primary hand"));
            }
            self.state = SelectorState::default();
            return None;
        };

        let Some(primary) = self.state.primary_id else {
            // cold start: no settling delay
            self.state.primary_id = Some(first.id);
            self.state.candidate_id = None;
            self.state.candidate_streak = 0;
            self.log.debug(format_args!(
                "primary hand established ({:?}, {:?})",
                first.id, first.handedness
            ));
            return Some(first.clone());
        };

        if first.id == primary {
            self.state.candidate_id = None;
            self.state.candidate_streak = 0;
            return Some(first.clone());
        }

        if self.state.candidate_id == Some(first.id) {
            self.state.candidate_streak += 1;
        } else {
            self.state.candidate_id = Some(first.id);
            self.state.candidate_streak = 1;
        }

        if self.state.candidate_streak >= self.stability_frames {
            self.log.debug(format_args!(
                "switched primary hand {:?} -> {:?}",
                primary, first.id
            ));
            self.state.primary_id = Some(first.id);
            self.state.candidate_id = None;
            self.state.candidate_streak = 0;
            return Some(first.clone());
        }

        // challenger still settling: keep following the primary if it is in
        // this frame, otherwise the leading observation is all we have
        let held = observations
            .iter()
            .find(|o| o.id == primary)
            .unwrap_or(first);
        Some(held.clone())
    }
}

/// Gives observations ids that follow palm position across frames.
#[derive(Debug)]
pub struct CentroidMatcher {
    match_radius: f64,
    previous: Vec<(HandId, Point)>,
    next_id: u64,
}

impl CentroidMatcher {
    pub fn new(match_radius: f64) -> Self {
        Self {
            match_radius,
            previous: Vec::new(),
            next_id: 0,
        }
    }

    /// Greedy nearest-neighbour assignment, in detection order.
    pub fn assign(&mut self, observations: &[HandObservation]) -> Vec<HandObservation> {
        let mut claimed = vec![false; self.previous.len()];
        let mut current = Vec::with_capacity(observations.len());
        let mut out = Vec::with_capacity(observations.len());

        for obs in observations {
            let c = obs.palm_centroid();
            let best = self
                .previous
                .iter()
                .enumerate()
                .filter(|(i, _)| !claimed[*i])
                .map(|(i, (id, p))| (i, *id, hand::distance(c, *p)))
                .filter(|(_, _, d)| *d <= self.match_radius)
                .min_by(|a, b| a.2.total_cmp(&b.2));

            let id = match best {
                Some((i, id, _)) => {
                    claimed[i] = true;
                    id
                }
                None => {
                    let id = HandId(self.next_id);
                    self.next_id += 1;
                    id
                }
            };
            current.push((id, c));
            out.push(obs.clone().with_id(id));
        }

        self.previous = current;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hand::{WRIST, hand_with};
    use log::Level;

    fn obs(id: u64) -> HandObservation {
        hand_with(id, &[])
    }

    fn selector(stability: u32) -> HandSelector {
        HandSelector::new(stability, LogSink::new("handctl::selector"))
    }

    #[test]
    fn empty_frame_clears_state() {
        let (log, buf) = LogSink::capture("handctl::selector");
        let mut s = HandSelector::new(5, log);
        s.select(&[obs(1)]);
        s.select(&[obs(2)]);
        assert!(s.select(&[]).is_none());
        assert_eq!(s.state(), &SelectorState::default());
        let logged = buf.lock().unwrap();
        assert!(logged.iter().any(|(l, m)| *l == Level::Debug && m == "lost primary hand"));
    }

    #[test]
    fn cold_start_takes_first_observation_immediately() {
        let mut s = selector(5);
        assert!(s.select(&[]).is_none());
        assert!(s.select(&[]).is_none());
        let got = s.select(&[obs(9), obs(3)]).unwrap();
        assert_eq!(got.id, HandId(9));
        assert_eq!(s.state().primary_id, Some(HandId(9)));
    }

    #[test]
    fn challenger_switches_after_stability_frames() {
        let mut s = selector(5);
        s.select(&[obs(1)]);
        for _ in 0..4 {
            s.select(&[obs(2)]);
            assert_eq!(s.state().primary_id, Some(HandId(1)));
        }
        let got = s.select(&[obs(2)]).unwrap();
        assert_eq!(got.id, HandId(2));
        assert_eq!(s.state().primary_id, Some(HandId(2)));
        assert_eq!(s.state().candidate_streak, 0);
    }

    #[test]
    fn short_challenge_then_reversion_never_switches() {
        let mut s = selector(5);
        s.select(&[obs(1)]);
        for _ in 0..4 {
            s.select(&[obs(2)]);
        }
        let got = s.select(&[obs(1)]).unwrap();
        assert_eq!(got.id, HandId(1));
        assert_eq!(s.state().primary_id, Some(HandId(1)));
        assert_eq!(s.state().candidate_id, None);
        assert_eq!(s.state().candidate_streak, 0);

        // the streak starts over
        for _ in 0..4 {
            s.select(&[obs(2)]);
        }
        assert_eq!(s.state().primary_id, Some(HandId(1)));
    }

    #[test]
    fn alternating_identities_never_switch() {
        let mut s = selector(3);
        s.select(&[obs(1)]);
        for i in 0..100 {
            let id = if i % 2 == 0 { 2 } else { 1 };
            s.select(&[obs(id)]);
            assert_eq!(s.state().primary_id, Some(HandId(1)));
        }
    }

    #[test]
    fn settling_challenger_returns_primary_when_present() {
        let mut s = selector(5);
        s.select(&[obs(1), obs(2)]);
        // detector reorders the two hands for a frame
        let got = s.select(&[obs(2), obs(1)]).unwrap();
        assert_eq!(got.id, HandId(1));
        assert_eq!(s.state().candidate_id, Some(HandId(2)));
        assert_eq!(s.state().candidate_streak, 1);
    }

    #[test]
    fn settling_challenger_falls_back_to_first_when_primary_absent() {
        let mut s = selector(5);
        s.select(&[obs(1)]);
        let got = s.select(&[obs(2)]).unwrap();
        assert_eq!(got.id, HandId(2));
        assert_eq!(s.state().primary_id, Some(HandId(1)));
    }

    #[test]
    fn centroid_matcher_follows_position_across_reorder() {
        let mut m = CentroidMatcher::new(50.0);
        let left = hand_with(0, &[(WRIST, 100.0, 100.0)]);
        let right = hand_with(0, &[(WRIST, 500.0, 100.0)]);

        let first = m.assign(&[left.clone(), right.clone()]);
        let (id_left, id_right) = (first[0].id, first[1].id);
        assert_ne!(id_left, id_right);

        let moved_left = hand_with(0, &[(WRIST, 110.0, 105.0)]);
        let second = m.assign(&[right, moved_left]);
        assert_eq!(second[0].id, id_right);
        assert_eq!(second[1].id, id_left);
    }

    #[test]
    fn centroid_matcher_issues_fresh_id_outside_radius() {
        let mut m = CentroidMatcher::new(10.0);
        let a = m.assign(&[hand_with(0, &[(WRIST, 0.0, 0.0)])]);
        let b = m.assign(&[hand_with(0, &[(WRIST, 400.0, 0.0)])]);
        assert_ne!(a[0].id, b[0].id);
        m.assign(&[]);
        let c = m.assign(&[hand_with(0, &[(WRIST, 400.0, 0.0)])]);
        assert_ne!(b[0].id, c[0].id);
    }

    #[test]
    fn selector_with_centroid_ids_survives_detector_reorder() {
        let mut m = CentroidMatcher::new(50.0);
        let mut s = selector(5);
        let a = hand_with(0, &[(WRIST, 100.0, 100.0)]);
        let b = hand_with(0, &[(WRIST, 500.0, 100.0)]);

        let primary = s.select(&m.assign(&[a.clone(), b.clone()])).unwrap();
        for _ in 0..3 {
            let got = s.select(&m.assign(&[b.clone(), a.clone()])).unwrap();
            assert_eq!(got.id, primary.id);
            assert_eq!(got.palm_centroid(), a.palm_centroid());
        }
    }
}
