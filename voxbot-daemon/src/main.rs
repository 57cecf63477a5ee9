//! voxbot daemon: wires the interaction engine to the microphone, the
//! command socket, the display log and the robot's external programs.

mod collaborators;
mod display;
mod server;
mod settings;
mod tools;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{info, warn};
use voxbot_core::audio::device::list_input_devices;
use voxbot_core::audio::AudioCapture;
use voxbot_core::dispatch::llm::{FallbackChain, LlmClient, OllamaClient};
use voxbot_core::dispatch::{AnswerDispatcher, DispatchConfig};
use voxbot_core::endpoint::EndpointConfig;
use voxbot_core::engine::poller::{Poller, PollerContext};
use voxbot_core::engine::watchdog::{Watchdog, WatchdogConfig};
use voxbot_core::engine::SilentCue;
use voxbot_core::ipc::events::STATUS_CHANNEL_CAP;
use voxbot_core::vad::{EnergyVad, VoiceActivityDetector};
use voxbot_core::wake::{EnergySpikeModel, WakeGate, WakeWordModel};
use voxbot_core::{
    Arbiter, Assistant, AssistantConfig, Collaborators, FeedbackCue, StateMachine, TurnJob,
    VoxbotError,
};

use crate::collaborators::{
    CommandCue, CommandTts, LibcameraStill, SubprocessAsr, ASR_TIMEOUT, CAMERA_TIMEOUT,
    TTS_TIMEOUT,
};
use crate::display::DisplayForwarder;
use crate::server::CommandServer;
use crate::settings::{load_settings, save_settings, Settings, DEFAULT_SETTINGS_PATH};
use crate::tools::{MotorClient, SystemTools};

#[derive(Debug, Parser)]
#[command(name = "voxbot", version, about = "Voice and vision robot assistant")]
struct Cli {
    /// Settings file.
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Print the audio input devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Write the effective settings to the config file and exit.
    #[arg(long)]
    write_config: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voxbot=info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        for device in list_input_devices() {
            let mut tags = Vec::new();
            if device.is_default {
                tags.push("default");
            }
            if device.is_recommended {
                tags.push("recommended");
            }
            if device.is_virtual {
                tags.push("virtual");
            }
            println!("{} [{}]", device.name, tags.join(", "));
        }
        return Ok(());
    }

    let settings = load_settings(&cli.config);
    if cli.write_config {
        save_settings(&cli.config, &settings)
            .with_context(|| format!("failed to write {}", cli.config.display()))?;
        info!(path = %cli.config.display(), "settings written");
        return Ok(());
    }

    info!(
        config = %cli.config.display(),
        wake_word = settings.wake_word_enabled,
        vad = settings.vad_enabled,
        camera = settings.camera_enabled,
        socket = %settings.socket_path.display(),
        "voxbot starting"
    );

    if !settings.asr_model_path.exists() {
        return Err(VoxbotError::ModelNotFound {
            path: settings.asr_model_path.clone(),
        }
        .into());
    }

    run(settings)
}

fn run(settings: Settings) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let (status_tx, status_rx) = broadcast::channel(STATUS_CHANNEL_CAP);

    // The cpal stream is not Send: it is opened on the poller thread, which
    // reports the actual rate and then waits for its poller.
    let (rate_tx, rate_rx) = crossbeam_channel::bounded::<std::result::Result<u32, String>>(1);
    let (poller_tx, poller_rx) = crossbeam_channel::bounded::<Poller>(1);
    let poller_thread = {
        let running = Arc::clone(&running);
        let device = settings.input_device.clone();
        let requested_rate = settings.native_sample_rate;
        thread::Builder::new()
            .name("voxbot-poller".into())
            .spawn(move || {
                let opened =
                    AudioCapture::open(device.as_deref(), requested_rate, Arc::clone(&running));
                let (capture, mut source) = match opened {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = rate_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = rate_tx.send(Ok(capture.sample_rate));
                if let Ok(poller) = poller_rx.recv() {
                    poller.run(&mut source, &running);
                }
                capture.stop();
            })
            .context("failed to spawn poller thread")?
    };

    let native_rate = rate_rx
        .recv()
        .context("poller thread exited before opening audio")?
        .map_err(|e| anyhow!("failed to open audio input: {e}"))?;

    let vad: Option<Box<dyn VoiceActivityDetector>> = if settings.vad_enabled {
        Some(Box::new(EnergyVad::with_aggressiveness(settings.vad_aggressiveness)))
    } else {
        None
    };
    let arbiter = Arc::new(Arbiter::new(
        EndpointConfig {
            silence_threshold: settings.silence_threshold(),
            max_recording: settings.max_recording(),
        },
        vad,
        native_rate,
        settings.target_sample_rate,
    ));
    let state = Arc::new(StateMachine::new(
        settings.wake_word_enabled,
        Arc::clone(&arbiter),
        status_tx.clone(),
    ));
    let gate = Arc::new(WakeGate::new());

    let assistant = Arc::new(Assistant::new(
        AssistantConfig {
            min_recording: settings.min_recording(),
            tts_cooldown: settings.tts_cooldown(),
            camera_enabled: settings.camera_enabled,
            target_rate: settings.target_sample_rate,
        },
        Arc::clone(&arbiter),
        Arc::clone(&state),
        Arc::clone(&gate),
        build_dispatcher(&settings)?,
        build_collaborators(&settings)?,
    ));

    let (job_tx, job_rx) = crossbeam_channel::unbounded::<TurnJob>();
    let model: Option<Box<dyn WakeWordModel>> = if settings.wake_word_enabled {
        Some(Box::new(EnergySpikeModel::new(settings.wake_keyword.clone())))
    } else {
        None
    };
    let poller = Poller::new(
        PollerContext {
            arbiter: Arc::clone(&arbiter),
            state: Arc::clone(&state),
            gate,
            cue: assistant.cue(),
            jobs: job_tx,
            diagnostics: Arc::default(),
        },
        native_rate,
        settings.target_sample_rate,
        model,
        settings.wake_word_threshold,
    )
    .context("invalid capture/target rate pair")?;
    poller_tx
        .send(poller)
        .map_err(|_| anyhow!("poller thread exited early"))?;

    // Exits once the poller drops its job sender.
    spawn_named("voxbot-turns", {
        let assistant = Arc::clone(&assistant);
        move || {
            for job in job_rx.iter() {
                assistant.run_job(job);
            }
        }
    })?;

    let watchdog_thread = spawn_named("voxbot-watchdog", {
        let watchdog = Watchdog::new(
            WatchdogConfig {
                interval: settings.watchdog_interval(),
                stuck_threshold: settings.stuck_threshold(),
            },
            arbiter,
            Arc::clone(&state),
        );
        let running = Arc::clone(&running);
        move || watchdog.run(&running)
    })?;

    spawn_named("voxbot-display", {
        let forwarder = DisplayForwarder::new(settings.display_log_path.clone());
        move || forwarder.run(status_rx)
    })?;

    let server = CommandServer::bind(&settings.socket_path)?;
    let server_thread = spawn_named("voxbot-server", {
        let running = Arc::clone(&running);
        move || server.serve(assistant, &running)
    })?;

    // Publish the initial state for the display.
    state.return_to_rest();
    drop(status_tx);
    info!(rest = state.rest_state().as_str(), "voxbot ready");

    wait_for_shutdown()?;
    info!("shutting down");
    running.store(false, Ordering::Relaxed);

    for (name, handle) in [
        ("poller", poller_thread),
        ("watchdog", watchdog_thread),
        ("server", server_thread),
    ] {
        if handle.join().is_err() {
            warn!(thread = name, "thread panicked");
        }
    }
    info!("voxbot stopped");
    Ok(())
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .with_context(|| format!("failed to spawn {name} thread"))
}

fn build_dispatcher(settings: &Settings) -> Result<AnswerDispatcher> {
    let timeout = settings.llm_timeout();
    let local = OllamaClient::new(
        "local",
        &settings.local_llm_url,
        settings.local_model.clone(),
        timeout,
    )
    .context("failed to create local language model client")?;
    let primary: Option<Box<dyn LlmClient>> = match settings.primary_llm_url.as_deref() {
        Some(url) => Some(Box::new(
            OllamaClient::new("primary", url, settings.primary_model.clone(), timeout)
                .context("failed to create primary language model client")?,
        )),
        None => None,
    };

    let tools = SystemTools::new(
        MotorClient::new(settings.motor_socket_path.clone()),
        settings.speak_command.clone(),
    );
    AnswerDispatcher::new(
        DispatchConfig {
            system_prompt: settings.system_prompt.clone(),
            max_history_messages: settings.max_history_messages,
            history_timeout: settings.history_timeout(),
        },
        Box::new(FallbackChain::new(primary, Box::new(local))),
        Arc::new(tools),
    )
    .context("failed to build answer dispatcher")
}

fn build_collaborators(settings: &Settings) -> Result<Collaborators> {
    let vision = OllamaClient::new(
        "vision",
        &settings.local_llm_url,
        settings.vision_model.clone(),
        settings.llm_timeout(),
    )
    .context("failed to create vision model client")?;

    let cue: Arc<dyn FeedbackCue> = match &settings.cue_command {
        Some(command) => Arc::new(CommandCue {
            command: command.clone(),
        }),
        None => Arc::new(SilentCue),
    };

    Ok(Collaborators {
        asr: Arc::new(SubprocessAsr {
            command: settings.asr_command.clone(),
            model_path: settings.asr_model_path.clone(),
            recordings_dir: settings.recordings_dir.clone(),
            timeout: ASR_TIMEOUT,
        }),
        tts: Arc::new(CommandTts {
            command: settings.speak_command.clone(),
            timeout: TTS_TIMEOUT,
        }),
        camera: Arc::new(LibcameraStill {
            dir: settings.camera_dir.clone(),
            timeout: CAMERA_TIMEOUT,
        }),
        vision: Arc::new(vision),
        cue,
    })
}

/// Block until SIGINT or SIGTERM.
fn wait_for_shutdown() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    runtime
        .block_on(async {
            let mut terminate = signal(SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result,
                _ = terminate.recv() => Ok(()),
            }
        })
        .context("failed to wait for shutdown signal")
}
