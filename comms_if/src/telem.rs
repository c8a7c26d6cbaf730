//! # Telemetry module
//!
//! The simulator exchanges text frames using its own event framing: a `42` prefix followed by a
//! JSON array holding the event name and the event payload, for example
//! `42["telemetry",{"x":1.0,...}]`. The controller replies with a `steer` event, or with a
//! `manual` event when the frame carried no telemetry.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use serde_json::{self, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Prefix marking a frame as a message event.
const EVENT_PREFIX: &str = "42";

/// Frame sent back when the simulator is in manual mode.
const MANUAL_FRAME: &str = "42[\"manual\",{}]";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Telemetry reported by the simulator once per cycle.
///
/// All positions are in the world frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Telemetry {
    /// World x positions of the waypoints.
    pub ptsx: Vec<f64>,

    /// World y positions of the waypoints.
    pub ptsy: Vec<f64>,

    /// World x position of the vehicle.
    pub x: f64,

    /// World y position of the vehicle.
    pub y: f64,

    /// Heading of the vehicle in the navigation convention, i.e. 0 along the world +y axis and
    /// positive clockwise.
    ///
    /// Units: radians
    pub psi_unity: f64,

    /// Speed of the vehicle in the simulator's units (miles per hour).
    pub speed: f64,

    /// Current steering angle. Positive angles turn the vehicle clockwise.
    ///
    /// Units: radians
    pub steering_angle: f64,

    /// Current throttle value in [-1, 1].
    pub throttle: f64,
}

/// Steering command returned to the simulator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SteerCmd {
    /// Steering demand normalised to [-1, 1].
    pub steering_angle: f64,

    /// Throttle demand.
    pub throttle: f64,

    /// Predicted trajectory x positions (vehicle frame), drawn in green by the simulator.
    pub mpc_x: Vec<f64>,

    /// Predicted trajectory y positions (vehicle frame).
    pub mpc_y: Vec<f64>,

    /// Reference line x positions (vehicle frame), drawn in yellow by the simulator.
    pub next_x: Vec<f64>,

    /// Reference line y positions (vehicle frame).
    pub next_y: Vec<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An event decoded from a simulator frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// New telemetry, the controller must reply with a steering command.
    Telemetry(Telemetry),

    /// The frame contained no data, the simulator is being driven manually.
    Manual,
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum TelemParseError {
    #[error("Frame is not a message event: {0:?}")]
    NotAnEvent(String),

    #[error("Frame contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Frame contains an unknown event ({0})")]
    UnknownEvent(String),

    #[error("Frame is missing the {0} field")]
    MissingField(&'static str),

    #[error("Waypoint x and y lists have different lengths ({0} and {1})")]
    MismatchedWaypoints(usize, usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimEvent {
    /// Decode an event from a raw simulator frame.
    pub fn from_frame(frame: &str) -> Result<Self, TelemParseError> {
        if frame.len() <= EVENT_PREFIX.len() || !frame.starts_with(EVENT_PREFIX) {
            return Err(TelemParseError::NotAnEvent(frame.to_string()));
        }

        // A frame without an object payload (or with a null one) means manual driving
        let payload = match event_payload(frame) {
            Some(p) => p,
            None => return Ok(SimEvent::Manual),
        };

        let val: Value = serde_json::from_str(payload).map_err(TelemParseError::InvalidJson)?;

        let event = match val[0].as_str() {
            Some(e) => e,
            None => return Err(TelemParseError::MissingField("event name")),
        };

        match event {
            "telemetry" => {
                if val[1].is_null() {
                    return Err(TelemParseError::MissingField("telemetry payload"));
                }

                let telem: Telemetry = serde_json::from_value(val[1].clone())
                    .map_err(TelemParseError::InvalidJson)?;
                telem.validate()?;

                Ok(SimEvent::Telemetry(telem))
            }
            "manual" => Ok(SimEvent::Manual),
            e => Err(TelemParseError::UnknownEvent(e.to_string())),
        }
    }
}

impl Telemetry {
    /// Check the telemetry is self consistent.
    pub fn validate(&self) -> Result<(), TelemParseError> {
        if self.ptsx.len() != self.ptsy.len() {
            return Err(TelemParseError::MismatchedWaypoints(
                self.ptsx.len(),
                self.ptsy.len(),
            ));
        }

        Ok(())
    }

    /// Encode this telemetry as a simulator frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{}[\"telemetry\",{}]",
            EVENT_PREFIX,
            serde_json::to_string(self)?
        ))
    }
}

impl SteerCmd {
    /// Encode this command as a simulator frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{}[\"steer\",{}]",
            EVENT_PREFIX,
            serde_json::to_string(self)?
        ))
    }

    /// Decode a command from a `steer` frame.
    pub fn from_frame(frame: &str) -> Result<Self, TelemParseError> {
        let payload = match frame.strip_prefix(EVENT_PREFIX) {
            Some(p) => p,
            None => return Err(TelemParseError::NotAnEvent(frame.to_string())),
        };

        let val: Value = serde_json::from_str(payload).map_err(TelemParseError::InvalidJson)?;

        match val[0].as_str() {
            Some("steer") => {
                serde_json::from_value(val[1].clone()).map_err(TelemParseError::InvalidJson)
            }
            Some(e) => Err(TelemParseError::UnknownEvent(e.to_string())),
            None => Err(TelemParseError::MissingField("event name")),
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// The frame to send when the simulator is in manual mode.
pub fn manual_frame() -> &'static str {
    MANUAL_FRAME
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Extract the JSON array from an event frame, or `None` if the frame holds no data.
fn event_payload(frame: &str) -> Option<&str> {
    if frame.contains("null") {
        return None;
    }

    let start = frame.find('[')?;
    let end = frame.rfind("}]")?;

    if end < start {
        return None;
    }

    Some(&frame[start..end + 2])
}
