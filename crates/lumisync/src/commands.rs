//! Command handlers. Each one drives a ready-built `SyncEngine`.

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use lumisync_core::{ControlPatch, DeviceState, EngineEvent, SyncEngine};

use crate::cli::{Command, SendArgs, ThemeArgs};
use crate::error::CliError;

pub async fn dispatch(command: Command, engine: &SyncEngine, profile: &str) -> Result<(), CliError> {
    match command {
        Command::Run => run(engine, profile).await,
        Command::Snapshot => snapshot(engine, profile).await,
        Command::Send(args) => send(engine, profile, &args).await,
        Command::Theme(args) => theme(engine, profile, args).await,
    }
}

// ── run ──────────────────────────────────────────────────────────────

async fn run(engine: &SyncEngine, profile: &str) -> Result<(), CliError> {
    let mut events = engine.subscribe();
    let mut state = engine.connection_state();

    engine
        .start()
        .await
        .map_err(|e| CliError::from_core(e, profile))?;
    if !engine.is_configured() {
        warn!(profile, "profile has no credentials, nothing to sync");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("interrupt received, shutting down");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!(state = %current, "connection state changed");
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.stop().await;
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::DeviceUpdated(device) => info!(
            device = %device.id,
            name = device.label(),
            on = ?device.state.on,
            brightness = ?device.state.brightness,
            directive = ?device.state.control_data,
            "device updated"
        ),
        EngineEvent::DeviceRemoved { id } => info!(device = %id, "device removed"),
        EngineEvent::ThemeGroupChanged(group) => info!(
            device = %group.device_id,
            themes = group.themes.len(),
            "theme group changed"
        ),
        EngineEvent::ThemeGroupRemoved { device_id } => {
            info!(device = %device_id, "theme group removed");
        }
    }
}

// ── snapshot ─────────────────────────────────────────────────────────

async fn snapshot(engine: &SyncEngine, profile: &str) -> Result<(), CliError> {
    engine
        .full_refresh()
        .await
        .map_err(|e| CliError::from_core(e, profile))?;
    println!("{}", serde_json::to_string_pretty(&engine.get_snapshot())?);
    Ok(())
}

// ── send / theme ─────────────────────────────────────────────────────

fn control_patch(args: &SendArgs) -> ControlPatch {
    let mut patch = ControlPatch::new();
    if let Some(ref directive) = args.directive {
        patch = patch.with("controlData", directive.as_str());
    }
    if args.on || args.off {
        patch = patch.with("on", args.on);
    }
    if let Some(level) = args.brightness {
        patch = patch.with("brightness", level);
    }
    patch
}

async fn send(engine: &SyncEngine, profile: &str, args: &SendArgs) -> Result<(), CliError> {
    let patch = control_patch(args);
    if patch.0.is_empty() {
        return Err(CliError::Validation {
            field: "send".into(),
            reason: "nothing to send, pass --directive, --on/--off or --brightness".into(),
        });
    }

    let state = engine
        .send_control(&args.device, patch.into_value())
        .await
        .map_err(|e| CliError::from_core(e, profile))?;
    print_state(&state)
}

async fn theme(engine: &SyncEngine, profile: &str, args: ThemeArgs) -> Result<(), CliError> {
    engine
        .full_refresh()
        .await
        .map_err(|e| CliError::from_core(e, profile))?;

    if !engine.store().has_device(&args.device) {
        return Err(CliError::NotFound {
            resource_type: "device".into(),
            identifier: args.device,
        });
    }
    let catalog = engine.catalog();
    let theme = catalog.lookup(&args.name).ok_or_else(|| CliError::NotFound {
        resource_type: "theme".into(),
        identifier: args.name.clone(),
    })?;

    info!(device = %args.device, theme = %theme.display_name, "applying theme");
    let state = engine
        .send_directive(&args.device, &theme.control_directive)
        .await
        .map_err(|e| CliError::from_core(e, profile))?;
    print_state(&state)
}

fn print_state(state: &DeviceState) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn args(on: bool, off: bool) -> SendArgs {
        SendArgs {
            device: "A".into(),
            directive: Some("LEDON".into()),
            on,
            off,
            brightness: Some(30),
        }
    }

    #[test]
    fn send_flags_build_one_patch() {
        assert_eq!(
            control_patch(&args(false, true)).into_value(),
            json!({ "controlData": "LEDON", "on": false, "brightness": 30 })
        );
    }

    #[test]
    fn power_is_omitted_unless_asked_for() {
        let value = control_patch(&args(false, false)).into_value();
        assert!(value.get("on").is_none());
    }
}
