//! # MPC Controller Executable
//!
//! This executable runs the MPC controller against the simulator. With no arguments it serves
//! telemetry frames on the configured endpoint, replying to each with a steering command. Given
//! the path to a telemetry script it replays the script's frames through the controller instead.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use log::{debug, info, warn};
use std::{env, thread, time::Duration};

// Internal
use mpc_lib::{
    mpc_ctrl::{MpcCtrl, StatusReport},
    params::MpcExecParams,
    telem_server::{handle_frame, TelemServer},
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    script_interpreter::{PendingFrames, ScriptInterpreter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Period at which a script is polled for new frames.
const SCRIPT_POLL_PERIOD_S: f64 = 0.01;

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("mpc_exec", "sessions").wrap_err("Failed to create the session")?;

    // ---- LOAD PARAMETERS ----

    let exec_params: MpcExecParams =
        util::params::load("mpc_exec.toml").wrap_err("Could not load exec params")?;

    // Initialise logger
    let log_level: LevelFilter = exec_params
        .log_level
        .parse()
        .map_err(|e| eyre!("Invalid log level {:?}: {}", exec_params.log_level, e))?;
    logger_init(log_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("MPC Controller Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- MODULE INIT ----

    let mut mpc_ctrl = MpcCtrl::default();
    mpc_ctrl
        .init("mpc_ctrl.toml", &session)
        .wrap_err("Failed to initialise MpcCtrl")?;

    // ---- RUN ----

    let args: Vec<String> = env::args().collect();
    debug!("CLI arguments: {:?}", args);

    if args.len() == 2 {
        run_script(&args[1], &mut mpc_ctrl, &exec_params, &session)?;
    } else {
        run_server(&mut mpc_ctrl, &exec_params, &session)?;
    }

    session.exit();

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Serve frames from the simulator bridge until the process is stopped.
fn run_server(ctrl: &mut MpcCtrl, params: &MpcExecParams, session: &Session) -> Result<()> {
    let mut server = TelemServer::new(params).wrap_err("Failed to initialise TelemServer")?;
    info!("TelemServer listening on {}", params.telem_endpoint);

    info!("Initialisation complete, entering main loop");

    let pacing = Duration::from_secs_f64(params.pacing_delay_s);
    let mut waiting = false;

    loop {
        let frame = match server.get_frame() {
            Some(f) => {
                waiting = false;
                f
            }
            None => {
                if !waiting {
                    info!("Waiting for telemetry");
                    waiting = true;
                }
                continue;
            }
        };

        let (reply, report) = handle_frame(ctrl, &frame);
        save_if_failed(&frame, report.as_ref(), params, session);

        // Emulate the actuation latency of the vehicle
        thread::sleep(pacing);

        if let Err(e) = server.send_reply(&reply) {
            warn!("{}", e);
        }
    }
}

/// Replay a telemetry script through the controller.
fn run_script(
    path: &str,
    ctrl: &mut MpcCtrl,
    params: &MpcExecParams,
    session: &Session,
) -> Result<()> {
    info!("Loading script from \"{}\"", path);

    let mut script = ScriptInterpreter::new(path).wrap_err("Failed to load script")?;

    info!(
        "Loaded script lasts {:.02} s and contains {} frames\n",
        script.get_duration(),
        script.get_num_frames()
    );

    let mut num_cycles = 0usize;
    let mut num_fallbacks = 0usize;

    loop {
        match script.get_pending_frames() {
            PendingFrames::None => thread::sleep(Duration::from_secs_f64(SCRIPT_POLL_PERIOD_S)),
            PendingFrames::Some(frames) => {
                for frame in frames.iter() {
                    let (reply, report) = handle_frame(ctrl, frame);
                    save_if_failed(frame, report.as_ref(), params, session);

                    if let Some(r) = report {
                        num_cycles += 1;
                        if r.fallback.is_some() {
                            num_fallbacks += 1;
                        }
                    }

                    info!("Reply: {}", reply);
                }
            }
            PendingFrames::EndOfScript => {
                info!(
                    "End of script reached, {} control cycles with {} fallbacks",
                    num_cycles, num_fallbacks
                );
                break;
            }
        }
    }

    Ok(())
}

/// Keep the raw frame of a cycle which used the fallback, so it can be replayed later.
fn save_if_failed(
    frame: &str,
    report: Option<&StatusReport>,
    params: &MpcExecParams,
    session: &Session,
) {
    if !params.save_failed_frames {
        return;
    }

    if let Some(cause) = report.and_then(|r| r.fallback) {
        debug!("Saving frame of failed cycle ({:?})", cause);
        session.save_with_timestamp("failed_frames/frame.json", frame.to_string());
    }
}
