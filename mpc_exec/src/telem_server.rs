//! # Telemetry Server Module
//!
//! This module abstracts over the networking side of the MPC executable. The simulator bridge
//! connects with a REQ socket and sends one telemetry frame per request, the server answers each
//! request with the command frame for that cycle. The REP socket enforces strict alternation, so
//! cycles are never overlapped or reordered.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{create_socket, zmq, NetError, SocketOptions},
    telem::{manual_frame, SimEvent},
};
use log::{trace, warn};
use util::module::State;

use crate::{
    mpc_ctrl::{InputData, MpcCtrl, StatusReport},
    params::MpcExecParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the MPC executable.
pub struct TelemServer {
    /// REP socket which accepts telemetry frames
    socket: zmq::Socket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`TelemServer`]
#[derive(thiserror::Error, Debug)]
pub enum TelemServerError {
    #[error("Socket error: {0}")]
    SocketError(#[from] NetError),

    #[error("Could not send the reply to the client: {0}")]
    SendError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TelemServer {
    /// Create a new instance of the telemetry server.
    ///
    /// This function will not wait for a connection from the client before returning.
    pub fn new(params: &MpcExecParams) -> Result<Self, TelemServerError> {
        let ctx = zmq::Context::new();

        let options = SocketOptions {
            bind: true,
            recv_timeout: params.recv_timeout_ms,
            send_timeout: params.send_timeout_ms,
            ..Default::default()
        };

        let socket = create_socket(&ctx, zmq::REP, &options, &params.telem_endpoint)?;

        Ok(Self { socket })
    }

    /// Retrieve a frame from the client.
    ///
    /// `None` is returned if no frame arrived within the receive timeout. Once a frame is
    /// returned [`TelemServer::send_reply`] must be called before the next frame can be received.
    pub fn get_frame(&mut self) -> Option<String> {
        match self.socket.recv_string(0) {
            Ok(Ok(s)) => Some(s),
            Ok(Err(_)) => {
                warn!("Received a frame which is not valid UTF-8");

                // Still owe the client a reply
                if let Err(e) = self.send_reply(manual_frame()) {
                    warn!("{}", e);
                }
                None
            }
            Err(zmq::Error::EAGAIN) => None,
            Err(e) => {
                warn!("Could not read from the telemetry socket: {}", e);
                None
            }
        }
    }

    /// Send the reply to the last received frame.
    pub fn send_reply(&mut self, reply: &str) -> Result<(), TelemServerError> {
        self.socket
            .send(reply, 0)
            .map_err(TelemServerError::SendError)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run one control cycle on a raw simulator frame, returning the reply frame and the controller's
/// status report if the frame carried telemetry.
///
/// Frames which can't be decoded are answered with the manual frame.
pub fn handle_frame(ctrl: &mut MpcCtrl, frame: &str) -> (String, Option<StatusReport>) {
    let telem = match SimEvent::from_frame(frame) {
        Ok(SimEvent::Telemetry(t)) => t,
        Ok(SimEvent::Manual) => {
            trace!("Manual frame");
            return (manual_frame().to_string(), None);
        }
        Err(e) => {
            warn!("Could not decode frame: {}", e);
            return (manual_frame().to_string(), None);
        }
    };

    let input = InputData::from_telemetry(&telem, ctrl.params().speed_scale);

    let (output, report) = match ctrl.proc(&input) {
        Ok(r) => r,
        Err(e) => match e {},
    };

    let reply = match output.to_steer_cmd().to_frame() {
        Ok(f) => f,
        Err(e) => {
            warn!("Could not encode the steering command: {}", e);
            manual_frame().to_string()
        }
    };

    (reply, Some(report))
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::telem::{SteerCmd, Telemetry};
    use crate::mpc_ctrl::{FallbackCause, Params};

    fn test_ctrl() -> MpcCtrl {
        let mut params = Params::default();
        params.solver.max_solve_time_s = 10.0;
        MpcCtrl::new(params).unwrap()
    }

    fn telem(ptsx: Vec<f64>, ptsy: Vec<f64>) -> Telemetry {
        Telemetry {
            ptsx,
            ptsy,
            x: 100.0,
            y: 50.0,
            // Facing along world +y
            psi_unity: 0.0,
            speed: 20.0,
            steering_angle: 0.0,
            throttle: 0.0,
        }
    }

    #[test]
    fn test_telemetry_cycle() {
        let mut ctrl = test_ctrl();

        // Straight ahead of the vehicle
        let frame = telem(vec![100.0, 100.0, 100.0, 100.0], vec![60.0, 70.0, 80.0, 90.0])
            .to_frame()
            .unwrap();

        let (reply, report) = handle_frame(&mut ctrl, &frame);
        let report = report.unwrap();
        let cmd = SteerCmd::from_frame(&reply).unwrap();

        assert_eq!(report.fallback, None);
        assert!(cmd.steering_angle.abs() < 1e-6);
        assert!(cmd.throttle > 0.0);
        assert_eq!(cmd.mpc_x.len(), ctrl.params().num_steps);
        assert_eq!(cmd.mpc_y.len(), ctrl.params().num_steps);
        assert_eq!(cmd.next_x.len(), ctrl.params().ref_sample_count);
    }

    #[test]
    fn test_failed_cycle_still_replies() {
        let mut ctrl = test_ctrl();

        let frame = telem(vec![100.0], vec![60.0]).to_frame().unwrap();

        let (reply, report) = handle_frame(&mut ctrl, &frame);
        let cmd = SteerCmd::from_frame(&reply).unwrap();

        assert_eq!(
            report.unwrap().fallback,
            Some(FallbackCause::InsufficientPoints)
        );
        assert_eq!(cmd.steering_angle, 0.0);
        assert_eq!(cmd.throttle, ctrl.params().fallback_accel_mss);
    }

    #[test]
    fn test_manual_and_bad_frames() {
        let mut ctrl = test_ctrl();

        assert_eq!(
            handle_frame(&mut ctrl, "42[\"telemetry\",null]"),
            (manual_frame().to_string(), None)
        );

        let (reply, report) = handle_frame(&mut ctrl, "not a frame");
        assert_eq!(reply, manual_frame());
        assert!(report.is_none());
    }

    #[test]
    fn test_replay_shipped_script() {
        use util::script_interpreter::{PendingFrames, ScriptInterpreter};

        let mut ctrl = test_ctrl();
        let mut script = ScriptInterpreter::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../scripts/straight_then_left.tlm"
        ))
        .unwrap();

        let frames = match script.get_pending_frames_at(script.get_duration()) {
            PendingFrames::Some(f) => f,
            _ => panic!("Expected frames in the script"),
        };

        let mut steering = Vec::new();
        for frame in frames.iter() {
            let (reply, report) = handle_frame(&mut ctrl, frame);

            if let Some(r) = report {
                assert_eq!(r.fallback, None);
                steering.push(SteerCmd::from_frame(&reply).unwrap().steering_angle);
            }
        }

        assert_eq!(steering.len(), 20);

        // Straight, then turning left
        assert!(steering[..10].iter().all(|s| s.abs() < 1e-6));
        assert!(steering[10..].iter().all(|s| *s < 0.0));
    }
}
