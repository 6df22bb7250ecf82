//! Scripted two-phone call, driven entirely through blocking session calls.
//!
//! Runs on a plain thread (or `spawn_blocking`), never on the async runtime:
//! every step parks the thread until the phone answers.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::AppError;
use crate::network::message::{param_value, ApiRequest};
use crate::network::peer_session::PeerSession;
use crate::network::session_registry::SessionRegistry;

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub min_peers: usize,
    /// Where phone 2 uploads its screenshot. The step is skipped when unset.
    pub screenshot_url: Option<String>,
    pub ring_wait: Duration,
    pub hold: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            min_peers: crate::constants::DEFAULT_MIN_PEERS,
            screenshot_url: None,
            ring_wait: Duration::from_secs(2),
            hold: Duration::from_secs(5),
        }
    }
}

fn expect_response(step: &str, response: Option<Value>) -> Result<Value, AppError> {
    response.ok_or_else(|| AppError::Demo(format!("{}: no response from phone", step)))
}

fn expect_param(step: &str, response: &Value, name: &str) -> Result<String, AppError> {
    param_value(response, name)
        .map(str::to_string)
        .ok_or_else(|| AppError::Demo(format!("{}: response has no {}", step, name)))
}

/// Wait for the phones, then have phone 1 call phone 2 and hang up.
pub fn basic_call(registry: &SessionRegistry, options: &DemoOptions) -> Result<(), AppError> {
    let min_peers = options.min_peers.max(2);
    println!("\nWaiting for phones to connect...");
    registry.wait_for_population(min_peers);

    let mut phones: Vec<Arc<PeerSession>> = registry.sessions();
    phones.sort_by_key(|s| s.identity().ip());
    let (phone1, phone2) = match phones.as_slice() {
        [first, second, ..] => (first.clone(), second.clone()),
        _ => return Err(AppError::Demo("fewer than two phones registered".to_string())),
    };
    println!(
        "\nPhones connected: phone1={} phone2={}",
        phone1.identity(),
        phone2.identity()
    );

    println!("\nGet Phone2 DND.");
    let resp = expect_response(
        "GetParams DND_Setting",
        phone2.call(&ApiRequest::get_params(&["DND_Setting"]))?,
    )?;
    let dnd = expect_param("GetParams DND_Setting", &resp, "DND_Setting")?;
    println!("Phone2 DND is {}", dnd);

    println!("\nSet Phone2 DND.");
    let mut params = Map::new();
    params.insert("DND_Setting".to_string(), Value::from("No"));
    expect_response(
        "SetParams DND_Setting",
        phone2.call(&ApiRequest::set_params(params))?,
    )?;

    println!("\nGet Phone2's number from the phone config.");
    let resp = expect_response(
        "GetParams User_ID_1_",
        phone2.call(&ApiRequest::get_params(&["User_ID_1_"]))?,
    )?;
    let phone2_number = expect_param("GetParams User_ID_1_", &resp, "User_ID_1_")?;

    println!("\nCall Phone1 -> Phone2 ({})", phone2_number);
    expect_response("Dial", phone1.call(&ApiRequest::dial(1, &phone2_number))?)?;

    println!("\nWait for Phone2 to be ringing...");
    thread::sleep(options.ring_wait);

    println!("\nAnswer Phone2");
    expect_response("Answer", phone2.call(&ApiRequest::answer(1, 0))?)?;
    thread::sleep(options.ring_wait);

    if let Some(url) = &options.screenshot_url {
        println!("\nGet Screen Capture");
        expect_response(
            "GetDeviceScreenshot",
            phone2.call(&ApiRequest::device_screenshot("PUT", url))?,
        )?;
    }

    println!("\nGet Status");
    expect_response("GetStatusFile", phone1.call(&ApiRequest::status_file())?)?;

    println!("\nLeave call up for {} seconds", options.hold.as_secs());
    thread::sleep(options.hold);

    println!("\nHangup");
    expect_response("Hangup", phone2.call(&ApiRequest::hangup(1, 0))?)?;

    println!("\nScript finished.");
    Ok(())
}
