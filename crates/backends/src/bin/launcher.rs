// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gridway-launcher`: trusted per-user helper.
//!
//! Reads one JSON request from stdin, performs the staging and process work
//! as the invoking user, and writes one JSON response to stdout. Invoked by
//! the gateway via `sudo -nHu <user> gridway-launcher` with a cleared
//! environment; see the launcher protocol in `gridway_backends::jobqueue`.

use gridway_backends::jobqueue::{launcher::handle_request, LauncherRequest, LauncherResponse};
use tokio::io::AsyncReadExt;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut input = String::new();
    let response = match tokio::io::stdin().read_to_string(&mut input).await {
        Ok(_) => match serde_json::from_str::<LauncherRequest>(&input) {
            Ok(request) => handle_request(request).await,
            Err(err) => LauncherResponse::failure(format!("bad request: {err}")),
        },
        Err(err) => LauncherResponse::failure(format!("failed to read stdin: {err}")),
    };

    match serde_json::to_string(&response) {
        Ok(encoded) => println!("{encoded}"),
        Err(err) => println!("{{\"ok\": false, \"error\": \"encoding failure: {err}\"}}"),
    }
}
