pub mod attempt;
pub mod audio;
pub mod challenge;
pub mod console;
pub mod effects;
pub mod identity;
pub mod session;
pub mod settings;
pub mod state_machine;
pub mod verifier;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use audio::AudioCapture;
use challenge::ChallengeGenerator;
use console::{Command, Flow};
use session::SessionController;
use settings::AppSettings;
use verifier::HttpVerifier;

/// Entry point for the terminal client.
pub fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = settings::load_settings();
    write_default_settings(&settings);
    let settings = settings.with_env_overrides();
    log::info!(
        "VoiceAuth starting (verifier {}, timeout {}s)",
        settings.api_url,
        settings.request_timeout_secs
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(run_console(settings))
}

/// First run: leave an editable settings file behind.
fn write_default_settings(settings: &AppSettings) {
    match settings::settings_path() {
        Ok(path) if !path.exists() => match settings::save_settings(settings) {
            Ok(()) => log::info!("Settings: wrote defaults to {:?}", path),
            Err(e) => log::warn!("Settings: {}", e),
        },
        Ok(_) => {}
        Err(e) => log::debug!("Settings: {}", e),
    }
}

async fn run_console(settings: AppSettings) -> anyhow::Result<()> {
    let verifier = HttpVerifier::new(settings.verifier_config())?;
    let mut controller = SessionController::new(
        AudioCapture::default_input(),
        Arc::new(verifier),
        ChallengeGenerator::new(settings.phrase_words),
    )
    .await?;

    let mut snapshots = controller.subscribe();
    let mut last_state = controller.snapshot().state;
    let mut seen = 0;

    println!("{}", console::HELP);
    print_new_entries(&controller, &mut seen);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let max_recording = settings.max_recording();

    loop {
        let auto_stop = auto_stop_timer(&controller, max_recording);

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => match console::execute(&mut controller, command).await {
                        Ok(Flow::Quit) => break,
                        Ok(Flow::Continue) => {}
                        Err(e) => log::debug!("Command failed: {}", e),
                    },
                    Err(e) => println!("{}", e),
                }
            }
            _ = auto_stop => {
                log::warn!(
                    "Recording auto-stopped after {}s (max duration reached)",
                    max_recording.as_secs()
                );
                if let Err(e) = controller.stop_recording().await {
                    log::debug!("Auto-stop failed: {}", e);
                }
            }
        }

        print_new_entries(&controller, &mut seen);

        if snapshots.has_changed().unwrap_or(false) {
            let snapshot = snapshots.borrow_and_update().clone();
            if snapshot.state != last_state {
                println!("-- {} --", snapshot.state);
                last_state = snapshot.state;
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}

/// Fires when the active recording reaches `max`; never fires otherwise.
fn auto_stop_timer(
    controller: &SessionController,
    max: std::time::Duration,
) -> Pin<Box<dyn Future<Output = ()>>> {
    match controller.recording_started_at() {
        Some(started) => {
            let deadline = tokio::time::Instant::from_std(started + max);
            Box::pin(tokio::time::sleep_until(deadline))
        }
        None => Box::pin(std::future::pending()),
    }
}

fn print_new_entries(controller: &SessionController, seen: &mut usize) {
    let log = controller.log();
    for entry in log.since(*seen) {
        println!("{}{}", console::level_marker(entry.level), entry);
    }
    *seen = log.len();
}
