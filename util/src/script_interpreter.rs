//! # Telemetry script interpreter module
//!
//! This module provides an interpreter for telemetry scripts, which replay recorded simulator
//! frames into the controller at fixed times. Each entry in a script is a timestamp in seconds
//! followed by a raw frame, terminated by a semicolon:
//!
//! ```text
//! 0.0: 42["telemetry",{"ptsx":[...],...}];
//! 0.1: 42["telemetry",{"ptsx":[...],...}];
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use regex::RegexBuilder;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use thiserror::Error;

// Internal
use crate::session::get_elapsed_seconds;
use comms_if::telem::{SimEvent, TelemParseError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A frame which is scripted to occur at a specific time.
struct ScriptedFrame {
    /// The time the frame is to be delivered at
    exec_time_s: f64,

    /// The raw frame
    frame: String,
}

/// A script interpreter.
///
/// After initialising with the path to the script to run use `.get_pending_frames` to
/// acquire a list of frames that need delivering.
pub struct ScriptInterpreter {
    frames: VecDeque<ScriptedFrame>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0}")]
    ScriptNotFound(String),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error(
        "Script contains an invalid timestamp: {0}. \
        Should be a float (like 1.0)"
    )]
    InvalidTimestamp(String),

    #[error("Script contains an invalid frame at {0} s: {1}")]
    InvalidFrame(f64, TelemParseError),
}

pub enum PendingFrames {
    None,
    Some(Vec<String>),
    EndOfScript,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScriptInterpreter {
    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let path = script_path.as_ref();

        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(path.display().to_string()));
        }

        let script = fs::read_to_string(path).map_err(ScriptError::ScriptLoadError)?;

        Self::from_str(&script)
    }

    /// Create a new interpreter from the contents of a script.
    ///
    /// Every frame is decoded once here so that a bad script is rejected before any frame is
    /// delivered.
    pub fn from_str(script: &str) -> Result<Self, ScriptError> {
        let mut frames: VecDeque<ScriptedFrame> = VecDeque::new();

        let re = RegexBuilder::new(r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);")
            .multi_line(true)
            .build()
            .expect("Script regex is invalid");

        for cap in re.captures_iter(script) {
            let (time_str, frame) = match (cap.get(1), cap.get(3)) {
                (Some(t), Some(f)) => (t.as_str(), f.as_str().trim()),
                _ => continue,
            };

            let exec_time_s: f64 = time_str
                .parse()
                .map_err(|e| ScriptError::InvalidTimestamp(format!("{}", e)))?;

            SimEvent::from_frame(frame).map_err(|e| ScriptError::InvalidFrame(exec_time_s, e))?;

            frames.push_back(ScriptedFrame {
                exec_time_s,
                frame: frame.to_string(),
            });
        }

        if frames.is_empty() {
            return Err(ScriptError::ScriptEmpty);
        }

        Ok(ScriptInterpreter { frames })
    }

    /// Return the frames due at the current session time.
    pub fn get_pending_frames(&mut self) -> PendingFrames {
        self.get_pending_frames_at(get_elapsed_seconds())
    }

    /// Return the frames due at the given script time.
    pub fn get_pending_frames_at(&mut self, current_time_s: f64) -> PendingFrames {
        // If the queue is empty the script is over
        if self.frames.is_empty() {
            return PendingFrames::EndOfScript;
        }

        let mut frame_vec: Vec<String> = vec![];

        while let Some(f) = self.frames.front() {
            if f.exec_time_s > current_time_s {
                break;
            }
            if let Some(f) = self.frames.pop_front() {
                frame_vec.push(f.frame);
            }
        }

        if frame_vec.is_empty() {
            PendingFrames::None
        } else {
            PendingFrames::Some(frame_vec)
        }
    }

    /// Get the number of frames remaining in the script
    pub fn get_num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.frames.back() {
            Some(f) => f.exec_time_s,
            None => 0f64,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SCRIPT: &str = r#"
0.0: 42["telemetry",{"ptsx":[1.0,2.0],"ptsy":[0.0,0.0],"x":0.0,"y":0.0,"psi_unity":1.57,"speed":0.0,"steering_angle":0.0,"throttle":0.0}];
0.5: 42["manual",{}];
1.0: 42["telemetry",{"ptsx":[1.0,2.0],"ptsy":[0.0,0.0],"x":0.1,"y":0.0,"psi_unity":1.57,"speed":1.0,"steering_angle":0.0,"throttle":0.1}];
"#;

    #[test]
    fn test_script_replay() {
        let mut si = ScriptInterpreter::from_str(SCRIPT).unwrap();

        assert_eq!(si.get_num_frames(), 3);
        assert_eq!(si.get_duration(), 1.0);

        match si.get_pending_frames_at(0.6) {
            PendingFrames::Some(v) => {
                assert_eq!(v.len(), 2);
                assert!(v[1].contains("manual"));
            }
            _ => panic!("Expected two pending frames"),
        }

        assert!(matches!(si.get_pending_frames_at(0.7), PendingFrames::None));
        assert!(matches!(si.get_pending_frames_at(1.0), PendingFrames::Some(_)));
        assert!(matches!(
            si.get_pending_frames_at(2.0),
            PendingFrames::EndOfScript
        ));
    }

    #[test]
    fn test_bad_scripts() {
        assert!(matches!(
            ScriptInterpreter::from_str("nothing to see here"),
            Err(ScriptError::ScriptEmpty)
        ));
        assert!(matches!(
            ScriptInterpreter::from_str("0.0: 43[\"telemetry\"];"),
            Err(ScriptError::InvalidFrame(_, _))
        ));
        assert!(matches!(
            ScriptInterpreter::new("/no/such/script.mpcs"),
            Err(ScriptError::ScriptNotFound(_))
        ));
    }
}
