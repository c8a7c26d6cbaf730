//! # Telemetry Client
//!
//! Sends the frames of a telemetry script to a running `mpc_exec` server at the times given in
//! the script and prints each reply.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Result};
use comms_if::net::{create_socket, zmq, SocketOptions};
use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;
use util::script_interpreter::{PendingFrames, ScriptInterpreter};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "telem_client", about = "Send scripted telemetry to the MPC server")]
struct Opts {
    /// Path to the telemetry script
    #[structopt(parse(from_os_str))]
    script: PathBuf,

    /// Endpoint of the MPC server
    #[structopt(short, long, default_value = "tcp://localhost:4567")]
    endpoint: String,

    /// Time to wait for each reply in milliseconds
    #[structopt(short, long, default_value = "1000")]
    timeout_ms: i32,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opts = Opts::from_args();

    let mut script = ScriptInterpreter::new(&opts.script).wrap_err("Failed to load script")?;
    println!(
        "Loaded {} frames lasting {:.02} s",
        script.get_num_frames(),
        script.get_duration()
    );

    let ctx = zmq::Context::new();
    let options = SocketOptions {
        recv_timeout: opts.timeout_ms,
        send_timeout: opts.timeout_ms,
        req_relaxed: true,
        ..Default::default()
    };
    let socket = create_socket(&ctx, zmq::REQ, &options, &opts.endpoint)
        .wrap_err("Failed to connect to the server")?;

    let start = Instant::now();

    loop {
        match script.get_pending_frames_at(start.elapsed().as_secs_f64()) {
            PendingFrames::None => thread::sleep(Duration::from_millis(5)),
            PendingFrames::Some(frames) => {
                for frame in frames.iter() {
                    socket.send(frame.as_str(), 0).wrap_err("Failed to send frame")?;

                    match socket.recv_string(0) {
                        Ok(Ok(reply)) => println!("{}", reply),
                        Ok(Err(_)) => println!("<reply is not valid UTF-8>"),
                        Err(e) => println!("<no reply: {}>", e),
                    }
                }
            }
            PendingFrames::EndOfScript => break,
        }
    }

    Ok(())
}
