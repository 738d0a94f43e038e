use super::test_helpers::*;
use super::*;
use crate::error::Error;
use crate::resolver::Reason;
use crate::types::{StateEvent, TaskKind};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};


/// Drain every change currently buffered on `rx`
fn drain(rx: &mut broadcast::Receiver<StateChange>) -> Vec<StateChange> {
    let mut changes = Vec::new();
    while let Ok(change) = rx.try_recv() {
        changes.push(change);
    }
    changes
}

/// Run a check against `server` and wait for it to settle on `Available`
async fn reach_available(engine: &UpdateEngine) {
    engine.check_for_updates().await.unwrap();
    wait_for_state(engine, |s| *s == UpdateState::Available).await;
}
