//! Landmark frame stream from the upstream pose estimator (JSON lines).

use serde::Deserialize;
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
    time::Duration,
};
use thiserror::Error;

use crate::hand::{HandError, HandId, HandObservation, Handedness, LandmarkPoint};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("reading frames: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("line {line}, hand {hand}: {source}")]
    Hand {
        line: usize,
        hand: usize,
        source: HandError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Time since stream start, if the producer stamped it.
    pub timestamp: Option<Duration>,
    pub hands: Vec<HandObservation>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    t_ms: Option<u64>,
    #[serde(default)]
    hands: Vec<RawHand>,
}

#[derive(Debug, Deserialize)]
struct RawHand {
    id: Option<u64>,
    #[serde(default)]
    handedness: Handedness,
    landmarks: Vec<[f64; 3]>,
}

pub fn parse_frame(line_no: usize, line: &str) -> Result<Frame, FrameError> {
    let raw: RawFrame = serde_json::from_str(line).map_err(|source| FrameError::Parse {
        line: line_no,
        source,
    })?;

    let hands = raw
        .hands
        .into_iter()
        .enumerate()
        .map(|(slot, h)| {
            let points = h
                .landmarks
                .into_iter()
                .map(|[x, y, z]| LandmarkPoint::new(x, y, z))
                .collect();
            // no detector id: the slot in this detection is the identity
            let id = HandId(h.id.unwrap_or(slot as u64));
            HandObservation::new(id, h.handedness, points).map_err(|source| FrameError::Hand {
                line: line_no,
                hand: slot,
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Frame {
        timestamp: raw.t_ms.map(Duration::from_millis),
        hands,
    })
}

/// Yields one item per non-blank line; a bad line is an `Err` item and the
/// stream carries on.
pub struct FrameSource {
    reader: Box<dyn BufRead + Send>,
    line_no: usize,
    buf: String,
}

impl FrameSource {
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        let reader: Box<dyn BufRead + Send> = match path {
            Some(p) => Box::new(BufReader::new(File::open(p)?)),
            None => Box::new(BufReader::new(io::stdin())),
        };
        Ok(Self::from_reader(reader))
    }

    pub fn from_reader(reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
        }
    }
}

impl Iterator for FrameSource {
    type Item = Result<Frame, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_no += 1;
                    let line = self.buf.trim();
                    if line.is_empty() {
                        continue;
                    }
                    return Some(parse_frame(self.line_no, line));
                }
                Err(e) => return Some(Err(FrameError::Io(e))),
            }
        }
    }
}
