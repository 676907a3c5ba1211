//! Voice call terminal runner
//!
//! Wires the configured audio endpoints and service clients into one
//! call session, renders the conversation on stdout, and maps terminal
//! input to call commands. Logs go to stderr so the transcript stays
//! readable.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_call_config::{load_settings, Settings};
use voice_call_core::{AudioSink, AudioSource, CallMode, EndReason};
use voice_call_llm::{ChatConfig, SseChatClient};
use voice_call_pipeline::{
    CallComponents, CallEvent, CallHandle, CallManager, HttpSynthesizer, HttpTranscriber,
    SttConfig, TtsConfig, WavFileSource,
};

#[cfg(feature = "device")]
use voice_call_pipeline::device::{DeviceSink, DeviceSource};
#[cfg(not(feature = "device"))]
use voice_call_pipeline::NullSink;

mod metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from files and environment
    // Priority: env vars > config/{env} > config/default > defaults
    let env = std::env::var("VOICE_CALL_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        }
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&settings);

    tracing::info!("Starting voice-call v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?settings.environment,
        backend = %settings.services.base_url,
        mode = ?settings.call.mode,
        "Configuration loaded"
    );

    if settings.observability.metrics_enabled {
        match metrics::init_metrics(settings.observability.metrics_port) {
            Ok(()) => tracing::info!(
                port = settings.observability.metrics_port,
                "Initialized Prometheus metrics at /metrics"
            ),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics exporter failed to start, continuing without")
            }
        }
    }

    let components = build_components(&settings).await?;
    let manager = CallManager::new();
    let handle = manager.start_call(components, settings.clone())?;
    let events = handle.subscribe();
    tracing::info!(call_id = %handle.info().id, "Call started");

    let mode = match settings.call.mode {
        CallMode::Continuous => "continuous",
        CallMode::PushToTalk => "push-to-talk",
    };
    println!("voice-call ({mode} mode) | enter = finish turn, m = mute, i = interrupt, q = quit");

    let reader = spawn_command_reader(handle.clone());
    let reason = run_event_loop(&handle, events).await;
    reader.abort();
    manager.stop_call().await;

    println!("[call ended: {reason}]");
    tracing::info!(reason = %reason, "Shutdown complete");
    Ok(())
}

/// Wire the service clients and audio endpoints from settings
async fn build_components(settings: &Settings) -> anyhow::Result<CallComponents> {
    let services = &settings.services;

    let transcriber = HttpTranscriber::connect(SttConfig {
        base_url: services.base_url.clone(),
        language: services.language.clone(),
        timeout: Duration::from_millis(services.stt_timeout_ms),
        ..SttConfig::default()
    })
    .await?;

    let generator = SseChatClient::new(ChatConfig {
        endpoint: services.base_url.clone(),
        model: services.model.clone(),
        max_response_chars: settings.call.max_response_chars,
        first_token_timeout: Duration::from_millis(services.chat_first_token_timeout_ms),
        ..ChatConfig::default()
    })?;
    if !generator.is_available().await {
        tracing::warn!(backend = %services.base_url, "Chat backend not reachable, first turn may fail");
    }

    let synthesizer = HttpSynthesizer::new(TtsConfig {
        base_url: services.base_url.clone(),
        timeout: Duration::from_millis(services.tts_timeout_ms),
    })?;

    Ok(CallComponents {
        source: build_source(settings)?,
        sink: build_sink(settings)?,
        transcriber: Arc::new(transcriber),
        generator: Arc::new(generator),
        synthesizer: Arc::new(synthesizer),
    })
}

/// Microphone, or the configured WAV stand-in
fn build_source(settings: &Settings) -> anyhow::Result<Arc<dyn AudioSource>> {
    if let Some(path) = &settings.audio.input_wav {
        tracing::info!(path = %path, "Using WAV file as audio input");
        return Ok(Arc::new(WavFileSource::new(
            path,
            settings.audio.capture_rate(),
        )));
    }
    #[cfg(feature = "device")]
    {
        Ok(Arc::new(DeviceSource::new(settings.audio.capture_rate())))
    }
    #[cfg(not(feature = "device"))]
    {
        anyhow::bail!("no audio input: set audio.input_wav or build with the `device` feature")
    }
}

/// Open the playback device
#[cfg(feature = "device")]
fn build_sink(settings: &Settings) -> anyhow::Result<Arc<dyn AudioSink>> {
    let sink = DeviceSink::new(settings.audio.capture_rate())?;
    Ok(Arc::new(sink))
}

/// Silent sink with realistic timing for headless builds
#[cfg(not(feature = "device"))]
fn build_sink(_settings: &Settings) -> anyhow::Result<Arc<dyn AudioSink>> {
    tracing::info!("No playback device compiled in, using silent sink");
    Ok(Arc::new(NullSink::new()))
}

/// Map terminal lines to call commands until EOF or quit
fn spawn_command_reader(handle: CallHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                // EOF or a broken terminal; the signal handler still works
                Ok(None) | Err(_) => break,
            };
            match line.trim() {
                "" => handle.ptt_release().await,
                "m" | "mute" => handle.toggle_mute().await,
                "i" | "interrupt" => handle.interrupt().await,
                "q" | "quit" | "exit" => {
                    handle.stop().await;
                    break;
                }
                other => println!("[unknown command '{other}'; enter, m, i or q]"),
            }
        }
    })
}

/// Pump call events to the terminal until the call ends
async fn run_event_loop(
    handle: &CallHandle,
    mut events: broadcast::Receiver<CallEvent>,
) -> EndReason {
    // A streaming assistant line that still needs its newline
    let mut line_open = false;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut shutdown_seen = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(CallEvent::Ended(reason)) => {
                    close_line(&mut line_open);
                    metrics::record_call_ended(&reason);
                    return reason;
                }
                Ok(event) => render_event(event, &mut line_open),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event stream lagged, output may be incomplete");
                }
                Err(broadcast::error::RecvError::Closed) => return EndReason::Stopped,
            },
            _ = &mut shutdown, if !shutdown_seen => {
                shutdown_seen = true;
                close_line(&mut line_open);
                handle.stop().await;
            }
        }
    }
}

fn render_event(event: CallEvent, line_open: &mut bool) {
    match event {
        CallEvent::PhaseChanged(phase) => tracing::debug!(%phase, "Phase changed"),
        CallEvent::Calibrated { noise_floor } => {
            tracing::debug!(noise_floor, "Calibration complete");
            println!("[ready] ambient noise calibrated, speak when you like");
        }
        CallEvent::SpeechStarted => tracing::debug!("Speech started"),
        CallEvent::SpeechEnded => tracing::debug!("Speech ended"),
        CallEvent::TranscriptReady(transcript) => {
            close_line(line_open);
            println!("you: {}", transcript.text);
        }
        CallEvent::AssistantDelta(delta) => {
            if !*line_open {
                print!("assistant: ");
                *line_open = true;
            }
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        // Sentences are already on screen via the deltas
        CallEvent::AssistantSentence(_) => {}
        CallEvent::TurnCompleted(usage) => {
            close_line(line_open);
            metrics::record_turn(&usage);
            let cut = if usage.interrupted { ", interrupted" } else { "" };
            println!(
                "[turn {}: {:.1}s in, {} sentence(s), {} ms{cut}, ~${:.4}]",
                usage.turn, usage.audio_secs, usage.sentences, usage.total_ms,
                usage.estimated_cost_usd
            );
        }
        CallEvent::MuteChanged(muted) => {
            close_line(line_open);
            println!("[mic {}]", if muted { "muted" } else { "live" });
        }
        CallEvent::Notice(text) => {
            close_line(line_open);
            metrics::record_notice();
            println!("[notice] {text}");
        }
        // The event loop returns on Ended before reaching here
        CallEvent::Ended(_) => {}
    }
}

fn close_line(line_open: &mut bool) {
    if *line_open {
        println!();
        *line_open = false;
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, ending call...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, ending call...");
        }
    }
}

/// Initialize tracing from the configured level and format
fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!(
            "voice_call={level},voice_call_core={level},voice_call_config={level},\
             voice_call_llm={level},voice_call_pipeline={level}"
        )
        .into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    // Logs on stderr, conversation alone on stdout
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    subscriber.with(fmt_layer).init();
}
