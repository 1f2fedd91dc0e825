mod audio;
mod cli;
mod config;
mod error;
mod net;
mod visual;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use glam::Vec3;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use audio::decode::{decode_audio, AudioData};
use audio::smoothing::{BankNormalization, Stretcher, StretcherBank};
use cli::{Cli, Command};
use config::{Config, PolicyKind, VisualConfig};
use net::link::{DatagramSink, UdpLink};
use net::replica::Replica;
use net::replicator::{Maker, Taker};
use net::schema::NUM_LOOPERS;
use visual::looper::{LeafLooper, LooperAnalyzer, RemoteLooper};
use visual::meter::MeterMaid;
use visual::oscillator::{LeafCurve, LeafOscillator};
use visual::pose::Pose;

/// Seconds between status lines.
const STATUS_INTERVAL: f32 = 5.0;

/// Bar length used when no downbeat file is given.
const DEFAULT_BAR_SECONDS: f32 = 2.0;

/// Smallest analysis window with a non-zero hop.
const MIN_WINDOW_SIZE: usize = 4;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let config_path = config::find_config(cli.config.as_deref());
    let config = match &config_path {
        Some(path) => match config::load_config(path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}, using defaults", path.display());
                Config::default()
            }
        },
        None => Config::default(),
    };

    match cli.command {
        Command::Simulate {
            sound,
            curves,
            downbeats,
            destination,
            seconds,
            weighting,
        } => {
            let sound = sound
                .or_else(|| config.files.analysis_sound.clone())
                .context("No analysis sound: pass --sound or set [files] analysis_sound")?;
            let curves = if curves.is_empty() {
                [&config.files.leaf_curve_a, &config.files.leaf_curve_b]
                    .into_iter()
                    .flatten()
                    .cloned()
                    .collect()
            } else {
                curves
            };
            let downbeats = downbeats.or_else(|| config.files.downbeats.clone());
            let destination = destination.unwrap_or_else(|| config.network.destination.clone());
            simulate(
                &config,
                config_path.as_deref(),
                &sound,
                &curves,
                downbeats.as_deref(),
                &destination,
                seconds,
                weighting,
            )
        }
        Command::Render { port, seconds } => {
            render(&config, port.unwrap_or(config.network.port), seconds)
        }
        Command::Stretch {
            input,
            output,
            policy,
            leak,
            seconds,
        } => {
            let policy = policy.unwrap_or(config.stretch.policy);
            let leaks = if leak.is_empty() {
                config.stretch.leak_coefficients.clone()
            } else {
                leak
            };
            stretch(&config, &input, &output, policy, &leaks, seconds)
        }
    }
}

fn load_oscillator(curves: &[PathBuf], weighting: f32) -> Result<LeafOscillator> {
    let mut loaded = Vec::with_capacity(curves.len());
    for path in curves {
        let curve = LeafCurve::load(path).context("Failed to load leaf curve")?;
        loaded.push(Arc::new(curve));
    }
    match loaded.as_slice() {
        [] => anyhow::bail!("No leaf curve: pass --curves or set [files] leaf_curve_a"),
        [single] => Ok(LeafOscillator::Single(single.clone())),
        [a, b, ..] => Ok(LeafOscillator::blend(a.clone(), b.clone(), weighting)?),
    }
}

/// Phase within the current bar at time `t`.
fn measure_phase(meter: Option<&MeterMaid>, t: f32) -> f32 {
    match meter {
        Some(meter) => meter.phase_position(t).0,
        None => (t / DEFAULT_BAR_SECONDS).fract(),
    }
}

/// Feed the analyzers in real time, one block at a time, publishing the
/// number of frames played through `clock`.
fn run_audio(
    audio: &AudioData,
    total_frames: usize,
    block_size: usize,
    mut analyzers: Vec<LooperAnalyzer>,
    clock: &AtomicU64,
) -> u64 {
    let started = Instant::now();
    let sample_rate = audio.sample_rate as f64;
    let block_size = block_size.max(1);
    let mut frame = 0;
    while frame < total_frames {
        let end = (frame + block_size).min(total_frames);
        for f in frame..end {
            for (channel, analyzer) in analyzers.iter_mut().enumerate() {
                analyzer.feed(audio.sample(f, channel));
            }
        }
        frame = end;
        clock.store(frame as u64, Ordering::Release);

        let due = started + Duration::from_secs_f64(frame as f64 / sample_rate);
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }
    analyzers.iter().map(|a| a.hops()).sum()
}

fn spawn_audio<F>(work: F) -> Result<JoinHandle<u64>>
where
    F: FnOnce() -> u64 + Send + 'static,
{
    std::thread::Builder::new()
        .name("audio".into())
        .spawn(work)
        .context("Failed to start audio thread")
}

fn join_audio(handle: JoinHandle<u64>) -> Result<u64> {
    handle.join().map_err(|_| anyhow!("Audio thread panicked"))
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Push the visual settings that may change while running into the loopers
/// and the replicated state.
fn apply_visual<S: DatagramSink>(
    visual: &VisualConfig,
    weighting: f32,
    loopers: &mut [LeafLooper],
    maker: &mut Maker<S>,
) {
    for (i, looper) in loopers.iter_mut().enumerate() {
        looper.set_bin_radii(visual.center_radius, visual.center_frequency);
        looper.set_amplitude_expansion(visual.amplitude_expansion);
        looper.set_trail_length_in_seconds(visual.trail_seconds);
        looper.set_do_trail(visual.do_trail);
        looper.set_color(visual.color(i));
        if let Err(e) = looper.set_weighting(weighting) {
            log::warn!("{e}, keeping {}", looper.oscillator().weighting());
        }
    }
    maker.set_background(visual.background);
}

#[allow(clippy::too_many_arguments)]
fn simulate(
    config: &Config,
    config_path: Option<&Path>,
    sound: &Path,
    curves: &[PathBuf],
    downbeats: Option<&Path>,
    destination: &str,
    seconds: Option<f32>,
    weighting: Option<f32>,
) -> Result<()> {
    let oscillator = load_oscillator(curves, weighting.unwrap_or(config.visual.weighting))?;
    let meter = downbeats
        .map(MeterMaid::load)
        .transpose()
        .context("Failed to load downbeats")?;

    log::info!("Decoding {}...", sound.display());
    let mut audio = decode_audio(sound)?;
    if audio.sample_rate == 0 {
        audio.sample_rate = config.audio.sample_rate;
    }
    let sample_rate = audio.sample_rate as f32;
    let total_frames = seconds.map_or(audio.frames(), |s| {
        ((s * sample_rate) as usize).min(audio.frames())
    });
    log::info!(
        "Analysing {:.1}s at {} Hz, {} channel(s)",
        total_frames as f32 / sample_rate,
        audio.sample_rate,
        audio.channels
    );

    // Viewer sits on +Z looking at the origin, loopers either side of it
    let mut nav = Pose::at(Vec3::new(0.0, 0.0, 5.0));
    nav.face_toward(Vec3::ZERO, Vec3::Y);

    let mut loopers = Vec::with_capacity(NUM_LOOPERS);
    let mut analyzers = Vec::with_capacity(NUM_LOOPERS);
    for i in 0..NUM_LOOPERS {
        let settings = config.visual.looper_settings(sample_rate, config.visual.color(i));
        let (mut looper, analyzer) = LeafLooper::new(oscillator.clone(), settings, i as u64 + 1);
        looper.pose = Pose::at(Vec3::new(if i == 0 { -1.0 } else { 1.0 }, 0.0, 0.0));
        looper.pose.face_toward(nav.position, Vec3::Y);
        loopers.push(looper);
        analyzers.push(analyzer);
    }

    let link = UdpLink::sender(&config.network.bind, destination)
        .with_context(|| format!("Failed to open UDP socket towards {destination}"))?;
    let mut maker = Maker::new(link, config.network.packet_payload);
    apply_visual(
        &config.visual,
        weighting.unwrap_or(config.visual.weighting),
        &mut loopers,
        &mut maker,
    );
    let mut config_stamp = config_path.and_then(modified);

    let clock = Arc::new(AtomicU64::new(0));
    let audio_thread = {
        let clock = clock.clone();
        let block_size = config.audio.block_size;
        spawn_audio(move || run_audio(&audio, total_frames, block_size, analyzers, &clock))?
    };

    let frame_rate = config.visual.frame_rate.max(1.0);
    let tick = Duration::from_secs_f32(1.0 / frame_rate);
    let status_every = (frame_rate * STATUS_INTERVAL).max(1.0) as u32;
    log::info!("Animating at {frame_rate} Hz");

    let mut frame_counter: u32 = 0;
    let mut next = Instant::now();
    while !audio_thread.is_finished() {
        let t = clock.load(Ordering::Acquire) as f32 / sample_rate;
        let phase = measure_phase(meter.as_ref(), t) + 0.25;
        let phase2 = t * 4.0;
        for looper in loopers.iter_mut() {
            looper.push_new_strip(phase, phase2);
        }

        frame_counter = frame_counter.wrapping_add(1);
        maker.publish(frame_counter, &nav, [loopers[0].data(), loopers[1].data()]);
        if frame_counter % status_every == 0 {
            log::info!(
                "t={:.1}s frame {} phase {:.2} strips {} trail {}",
                t,
                frame_counter,
                phase.fract(),
                loopers[0].strips().len(),
                loopers[0].trail().len()
            );

            // pick up visual changes made to the config file while running
            if let Some(path) = config_path {
                let stamp = modified(path);
                if stamp != config_stamp {
                    config_stamp = stamp;
                    if let Some(fresh) = config::load_config(path) {
                        log::info!("Reloaded visual settings from {}", path.display());
                        let w = weighting.unwrap_or(fresh.visual.weighting);
                        apply_visual(&fresh.visual, w, &mut loopers, &mut maker);
                    }
                }
            }
        }

        next += tick;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    let hops = join_audio(audio_thread)?;
    log::info!(
        "Done: {} frames published ({} with send errors), {} analysis hops",
        maker.published(),
        maker.send_failures(),
        hops
    );
    Ok(())
}

fn render(config: &Config, port: u16, seconds: Option<f32>) -> Result<()> {
    let link = UdpLink::receiver(&config.network.bind, port)
        .with_context(|| format!("Failed to listen on {}:{}", config.network.bind, port))?;
    let mut taker = Taker::new(link);
    let mut replica = Replica::new();
    let mut remotes: Vec<RemoteLooper> = (0..NUM_LOOPERS)
        .map(|_| RemoteLooper::new(config.visual.max_strips, config.visual.strip_decay))
        .collect();

    let frame_rate = config.visual.frame_rate.max(1.0);
    let tick = Duration::from_secs_f32(1.0 / frame_rate);
    let status_every = (frame_rate * STATUS_INTERVAL).max(1.0) as u64;
    let started = Instant::now();
    let mut next = started + tick;
    let mut ticks: u64 = 0;
    let mut replayed: u64 = 0;

    loop {
        if seconds.is_some_and(|s| started.elapsed().as_secs_f32() >= s) {
            break;
        }
        // keep the socket drained between ticks so it never overflows
        while Instant::now() < next {
            taker.pump();
            std::thread::sleep(Duration::from_millis(1));
        }
        next += tick;
        ticks += 1;

        let Some(state) = taker.poll() else {
            if ticks % status_every == 0 {
                log::info!("Waiting for state on port {port}...");
            }
            continue;
        };
        let replay = replica.merge(state.frame_counter);
        for (remote, data) in remotes.iter_mut().zip(state.loopers.iter()) {
            remote.apply(data, replay.slots.clone());
        }
        replayed += replay.slots.len() as u64;
        log::debug!(
            "merged up to {:?}: replayed {} lost {}",
            replica.framenum(),
            replay.slots.len(),
            replay.lost
        );

        if ticks % status_every == 0 {
            let frame_counter = state.frame_counter;
            let background = state.background;
            let nav = Pose::from_wire(&state.nav_pose);
            let trail = if remotes[0].do_trail() {
                remotes[0].trail().len().to_string()
            } else {
                "off".into()
            };
            log::info!(
                "frame {} replayed {} lost {} dropped datagrams {} | strips {} trail {} | viewer at {:?} facing {:?} | background {:?}",
                frame_counter,
                replayed,
                replica.total_lost(),
                taker.dropped(),
                remotes[0].strips().len(),
                trail,
                nav.position,
                nav.forward(),
                background
            );
        }
    }
    Ok(())
}

fn stretch(
    config: &Config,
    input: &Path,
    output: &Path,
    policy: PolicyKind,
    leaks: &[f32],
    seconds: Option<f32>,
) -> Result<()> {
    let window = config.stretch.window_size;
    anyhow::ensure!(
        window >= MIN_WINDOW_SIZE,
        "[stretch] window_size must be at least {MIN_WINDOW_SIZE}, got {window}"
    );
    if policy == PolicyKind::Leaky {
        anyhow::ensure!(!leaks.is_empty(), "No leak coefficients for the leaky policy");
    }
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }
    log::info!("Decoding {}...", input.display());
    let audio = decode_audio(input)?;
    let sample_rate = if audio.sample_rate == 0 {
        config.audio.sample_rate
    } else {
        audio.sample_rate
    };
    let frames = seconds.map_or(audio.frames(), |s| {
        ((s * sample_rate as f32) as usize).min(audio.frames())
    });
    let channels = audio.channels.max(1);
    let stretch_cfg = &config.stretch;
    // run a window of silence after the input so the last frames ring out
    let total = frames + window;
    log::info!("Stretching {} channel(s) with {:?} policy", channels, policy);

    let pb = ProgressBar::new((total * channels) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} samples ({eta} remaining)")?
            .progress_chars("=>-"),
    );

    let outputs: Vec<Vec<f32>> = (0..channels)
        .into_par_iter()
        .map(|channel| {
            let seed = stretch_cfg.seed.wrapping_add(channel as u64 * 1000);
            let mut bank = match policy {
                PolicyKind::Leaky => {
                    let gains: Vec<f32> = (0..leaks.len()).map(|i| stretch_cfg.gain(i)).collect();
                    StretcherBank::leaky(window, leaks, &gains, stretch_cfg.normalization, seed)
                }
                PolicyKind::TimeNeutral => StretcherBank::new(
                    vec![Stretcher::time_neutral(window, stretch_cfg.compander(), seed)],
                    BankNormalization::None,
                ),
            };
            log::debug!("Channel {channel}: {} stretcher(s)", bank.len());

            let input = audio.channel(channel).take(frames).chain(std::iter::repeat(0.0));
            let mut out = Vec::with_capacity(total);
            for (i, sample) in input.take(total).enumerate() {
                out.push(bank.process(sample));
                if i % 4096 == 4095 {
                    pb.inc(4096);
                }
            }
            pb.inc((total % 4096) as u64);
            out
        })
        .collect();
    pb.finish_with_message("Stretching complete");

    let spec = hound::WavSpec {
        channels: channels as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    for i in 0..total {
        for out in &outputs {
            writer.write_sample(out[i])?;
        }
    }
    writer.finalize()?;

    log::info!("Done! Output: {}", output.display());
    Ok(())
}
