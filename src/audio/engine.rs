use std::sync::Arc;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use super::dsp::{Equalizer, NoiseGate};
use super::stretcher::{Stretcher, CHUNK_SIZE};
use super::types::{AudioCommand, AudioData, AudioEvent, PlayCommand, SourceId};
use crate::error::EngineError;
use crate::playback::{AudioBackend, PlayRequest};
use crate::session::{EqParams, NoiseGateParams};

/// Length of the fade applied by a soft stop.
const FADE_OUT_SECONDS: f32 = 0.005;

/// One span of a buffer being played on the audio thread
struct Voice {
    id: SourceId,
    audio: Arc<AudioData>,
    start: usize,
    end: usize,
    position: usize,
    looping: bool,
    stretcher: Stretcher,
    flushed: bool,
    /// (frames left, fade length) once a soft stop began
    fade: Option<(usize, usize)>,
}

impl Voice {
    fn new(cmd: PlayCommand, output_sample_rate: u32) -> Self {
        let audio = cmd.audio;
        let end = cmd.end_frame.min(audio.num_frames());
        let start = cmd.start_frame.min(end);
        let mut stretcher = Stretcher::new(audio.sample_rate, audio.channels);
        stretcher.set_tempo(cmd.rate);
        if audio.sample_rate != output_sample_rate && output_sample_rate > 0 {
            stretcher.set_rate(audio.sample_rate as f64 / output_sample_rate as f64);
        }
        Self {
            id: cmd.source,
            audio,
            start,
            end,
            position: start,
            looping: cmd.looping,
            stretcher,
            flushed: false,
            fade: None,
        }
    }

    /// Mix into `output`. Returns true once the voice has nothing more to
    /// play (span exhausted, or fade finished).
    fn render(&mut self, output: &mut [f32], out_channels: usize, recv: &mut Vec<f32>) -> bool {
        if self.end <= self.start {
            return true;
        }
        let audio_channels = self.audio.channels as usize;
        let out_frames = output.len() / out_channels;
        recv.resize(out_frames * audio_channels, 0.0);
        let mut out_pos = 0;

        while out_pos < out_frames {
            let needed = out_frames - out_pos;
            let recv_slice = &mut recv[..needed * audio_channels];
            let got_frames = self.stretcher.receive_samples(recv_slice) / audio_channels;

            if got_frames > 0 {
                for f in 0..got_frames {
                    let gain = match &mut self.fade {
                        Some((0, _)) => return true,
                        Some((left, total)) => {
                            *left -= 1;
                            *left as f32 / *total as f32
                        }
                        None => 1.0,
                    };
                    for c in 0..out_channels {
                        let src_c = c % audio_channels;
                        output[(out_pos + f) * out_channels + c] +=
                            recv_slice[f * audio_channels + src_c] * gain;
                    }
                }
                out_pos += got_frames;
                continue;
            }

            if self.position >= self.end {
                if self.looping {
                    self.position = self.start;
                    continue;
                }
                if self.flushed {
                    return true;
                }
                self.stretcher.flush();
                self.flushed = true;
                continue;
            }

            let feed = CHUNK_SIZE.min(self.end - self.position);
            self.stretcher
                .put_samples(self.audio.frames(self.position, self.position + feed));
            self.position += feed;
        }

        matches!(self.fade, Some((0, _)))
    }
}

struct EngineState {
    voice: Option<Voice>,
    /// Previous voice finishing its fade-out
    fading: Option<Voice>,
    eq: Equalizer,
    gate: NoiseGate,
    output_sample_rate: u32,
    recv_buf: Vec<f32>,
}

impl EngineState {
    fn new(output_sample_rate: u32, channels: u16) -> Self {
        Self {
            voice: None,
            fading: None,
            eq: Equalizer::new(output_sample_rate, channels),
            gate: NoiseGate::new(output_sample_rate, channels),
            output_sample_rate,
            recv_buf: Vec::new(),
        }
    }

    fn handle_command(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::Play(play) => {
                // One source at a time: anything still sounding is cut.
                self.fading = None;
                self.eq.reset();
                self.gate.reset();
                self.voice = Some(Voice::new(play, self.output_sample_rate));
            }
            AudioCommand::Stop { fade } => {
                self.fading = None;
                if let Some(mut voice) = self.voice.take() {
                    if fade {
                        let frames =
                            ((self.output_sample_rate as f32 * FADE_OUT_SECONDS) as usize).max(1);
                        voice.fade = Some((frames, frames));
                        self.fading = Some(voice);
                    }
                }
            }
            AudioCommand::SetEq(params) => self.eq.set_params(params),
            AudioCommand::SetNoiseGate(params) => self.gate.set_params(params),
        }
    }

    fn fill_buffer(&mut self, output: &mut [f32], channels: u16, event_tx: &Sender<AudioEvent>) {
        output.fill(0.0);
        let out_channels = channels.max(1) as usize;

        if let Some(voice) = &mut self.fading {
            if voice.render(output, out_channels, &mut self.recv_buf) {
                self.fading = None;
            }
        }
        if let Some(voice) = &mut self.voice {
            if voice.render(output, out_channels, &mut self.recv_buf) {
                let _ = event_tx.try_send(AudioEvent::SourceFinished(voice.id));
                self.voice = None;
            }
        }

        self.eq.process(output);
        self.gate.process(output);
    }
}

/// Channels to a running output stream
#[derive(Debug, Clone)]
pub struct EngineHandle {
    pub commands: Sender<AudioCommand>,
    pub events: Receiver<AudioEvent>,
    pub output_sample_rate: u32,
}

/// Start the output stream on the default device.
pub fn spawn_engine() -> Result<EngineHandle, EngineError> {
    let (cmd_tx, cmd_rx) = crossbeam_channel::bounded::<AudioCommand>(64);
    let (event_tx, event_rx) = crossbeam_channel::bounded::<AudioEvent>(256);

    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(EngineError::NoDevice)?;

    let config = device
        .default_output_config()
        .map_err(|e| EngineError::Config(e.to_string()))?;

    let sample_rate = config.sample_rate();
    let channels = config.channels();
    let sample_format = config.sample_format();

    let mut state = EngineState::new(sample_rate, channels);
    let event_tx_clone = event_tx.clone();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    while let Ok(cmd) = cmd_rx.try_recv() {
                        state.handle_command(cmd);
                    }
                    state.fill_buffer(data, channels, &event_tx_clone);
                },
                move |err| {
                    let _ = event_tx.try_send(AudioEvent::Error(err.to_string()));
                },
                None,
            )
            .map_err(|e| EngineError::StreamBuild(e.to_string()))?,
        other => return Err(EngineError::UnsupportedFormat(format!("{other:?}"))),
    };

    stream
        .play()
        .map_err(|e| EngineError::StreamPlay(e.to_string()))?;

    // Keep stream alive by moving it into a thread
    std::thread::Builder::new()
        .name("audio-keepalive".into())
        .spawn(move || {
            let _stream = stream;
            loop {
                std::thread::park();
            }
        })
        .map_err(|e| EngineError::StreamBuild(e.to_string()))?;

    log::info!(
        "spawn_engine: output {} Hz, {} channels",
        sample_rate,
        channels
    );

    Ok(EngineHandle {
        commands: cmd_tx,
        events: event_rx,
        output_sample_rate: sample_rate,
    })
}

// ─────────────────────────────────────────────────────────────────────────
// Backend adapter
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct SourceInfo {
    id: SourceId,
    started_at: f64,
    rate: f64,
}

/// `AudioBackend` over the cpal engine.
///
/// Without an engine (no device, or not started yet) every call is a
/// no-op and nothing is ever active, so the controller keeps working.
pub struct CpalBackend {
    engine: Option<EngineHandle>,
    epoch: Instant,
    next_source: u64,
    active: Option<SourceInfo>,
    notifications: bool,
    ended: bool,
    eq: EqParams,
    gate: NoiseGateParams,
    last_error: Option<String>,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::disconnected()
    }
}

impl CpalBackend {
    pub fn disconnected() -> Self {
        Self {
            engine: None,
            epoch: Instant::now(),
            next_source: 0,
            active: None,
            notifications: true,
            ended: false,
            eq: EqParams::default(),
            gate: NoiseGateParams::default(),
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_some()
    }

    /// Attach a started engine and replay the live effect settings into it.
    pub fn attach(&mut self, engine: EngineHandle) {
        self.engine = Some(engine);
        self.send(AudioCommand::SetEq(self.eq));
        self.send(AudioCommand::SetNoiseGate(self.gate));
    }

    /// Last error reported by the audio thread, once.
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    fn send(&mut self, cmd: AudioCommand) {
        let Some(engine) = &self.engine else {
            return;
        };
        if let Err(e) = engine.commands.try_send(cmd) {
            log::warn!("audio command dropped: {e}");
            if matches!(e, crossbeam_channel::TrySendError::Disconnected(_)) {
                log::error!("audio engine is gone, continuing without output");
                self.engine = None;
                self.active = None;
            }
        }
    }

    fn drain_events(&mut self) {
        let Some(engine) = &self.engine else {
            return;
        };
        let events: Vec<AudioEvent> = engine.events.try_iter().collect();
        for event in events {
            match event {
                AudioEvent::SourceFinished(id) => {
                    // Ends of sources we already replaced are stale.
                    if self.active.is_some_and(|s| s.id == id) {
                        self.active = None;
                        if self.notifications {
                            self.ended = true;
                        }
                    }
                }
                AudioEvent::Error(message) => {
                    log::error!("audio stream error: {message}");
                    self.last_error = Some(message);
                }
            }
        }
    }
}

impl AudioBackend for CpalBackend {
    fn play(&mut self, audio: &Arc<AudioData>, request: PlayRequest) {
        if self.engine.is_none() {
            return;
        }
        self.next_source += 1;
        let id = SourceId(self.next_source);
        let rate = if request.rate.is_finite() && request.rate > 0.0 {
            request.rate
        } else {
            1.0
        };
        self.ended = false;
        self.send(AudioCommand::Play(PlayCommand {
            source: id,
            audio: Arc::clone(audio),
            start_frame: audio.frame_at(request.start),
            end_frame: audio.frame_at(request.end),
            looping: request.looping,
            rate: rate as f32,
        }));
        if self.engine.is_some() {
            self.active = Some(SourceInfo {
                id,
                started_at: self.now(),
                rate,
            });
        }
    }

    fn stop(&mut self, fade_out: bool) {
        self.active = None;
        self.ended = false;
        self.send(AudioCommand::Stop { fade: fade_out });
    }

    fn set_end_notifications(&mut self, enabled: bool) {
        self.notifications = enabled;
        if !enabled {
            self.ended = false;
        }
    }

    fn poll_natural_end(&mut self) -> bool {
        self.drain_events();
        std::mem::take(&mut self.ended)
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn source_started_at(&self) -> Option<f64> {
        self.active.map(|s| s.started_at)
    }

    fn source_rate(&self) -> Option<f64> {
        self.active.map(|s| s.rate)
    }

    fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn set_eq(&mut self, eq: &EqParams) {
        self.eq = *eq;
        self.send(AudioCommand::SetEq(*eq));
    }

    fn set_noise_gate(&mut self, enabled: bool, sensitivity: f32, amount: f32) {
        self.gate = NoiseGateParams {
            enabled,
            sensitivity,
            amount,
        };
        self.send(AudioCommand::SetNoiseGate(self.gate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (EngineHandle, Receiver<AudioCommand>, Sender<AudioEvent>) {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        (
            EngineHandle {
                commands: cmd_tx,
                events: event_rx,
                output_sample_rate: 1000,
            },
            cmd_rx,
            event_tx,
        )
    }

    fn audio() -> Arc<AudioData> {
        Arc::new(AudioData::new(vec![0.5; 1000], 1000, 1))
    }

    fn request(looping: bool) -> PlayRequest {
        PlayRequest {
            start: 0.25,
            end: 0.75,
            looping,
            rate: 1.0,
        }
    }

    #[test]
    fn test_disconnected_backend_is_inert() {
        let mut backend = CpalBackend::disconnected();
        backend.play(&audio(), request(false));
        assert!(!backend.is_active());
        assert!(!backend.poll_natural_end());
        backend.stop(true);
    }

    #[test]
    fn test_play_sends_frame_span() {
        let (engine, cmd_rx, _events) = handle();
        let mut backend = CpalBackend::disconnected();
        backend.attach(engine);
        backend.play(&audio(), request(true));

        let cmds: Vec<AudioCommand> = cmd_rx.try_iter().collect();
        match cmds.last() {
            Some(AudioCommand::Play(play)) => {
                assert_eq!(play.start_frame, 250);
                assert_eq!(play.end_frame, 750);
                assert!(play.looping);
            }
            other => panic!("expected play, got {other:?}"),
        }
        assert!(backend.is_active());
    }

    #[test]
    fn test_stale_finish_is_ignored() {
        let (engine, _cmd_rx, events) = handle();
        let mut backend = CpalBackend::disconnected();
        backend.attach(engine);
        backend.play(&audio(), request(false));
        let first = SourceId(backend.next_source);
        backend.play(&audio(), request(false));

        events.send(AudioEvent::SourceFinished(first)).unwrap();
        assert!(!backend.poll_natural_end());
        assert!(backend.is_active());

        events
            .send(AudioEvent::SourceFinished(SourceId(backend.next_source)))
            .unwrap();
        assert!(backend.poll_natural_end());
        assert!(!backend.is_active());
    }

    #[test]
    fn test_muted_notifications_swallow_end() {
        let (engine, _cmd_rx, events) = handle();
        let mut backend = CpalBackend::disconnected();
        backend.attach(engine);
        backend.play(&audio(), request(false));
        backend.set_end_notifications(false);
        events
            .send(AudioEvent::SourceFinished(SourceId(backend.next_source)))
            .unwrap();
        assert!(!backend.poll_natural_end());
    }

    #[test]
    fn test_attach_replays_live_effects() {
        let (engine, cmd_rx, _events) = handle();
        let mut backend = CpalBackend::disconnected();
        backend.set_noise_gate(true, 0.7, 0.4);
        backend.attach(engine);

        let cmds: Vec<AudioCommand> = cmd_rx.try_iter().collect();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], AudioCommand::SetEq(_)));
        match &cmds[1] {
            AudioCommand::SetNoiseGate(gate) => {
                assert!(gate.enabled);
                assert_eq!(gate.sensitivity, 0.7);
            }
            other => panic!("expected gate, got {other:?}"),
        }
    }

    #[test]
    fn test_dead_engine_disconnects() {
        let (engine, cmd_rx, _events) = handle();
        drop(cmd_rx);
        let mut backend = CpalBackend::disconnected();
        backend.attach(engine);
        assert!(!backend.is_connected());
        backend.play(&audio(), request(false));
        assert!(!backend.is_connected());
        assert!(!backend.is_active());
    }

    #[test]
    fn test_engine_state_stop_with_fade_keeps_tail() {
        let mut state = EngineState::new(1000, 1);
        state.handle_command(AudioCommand::Play(PlayCommand {
            source: SourceId(1),
            audio: audio(),
            start_frame: 0,
            end_frame: 1000,
            looping: true,
            rate: 1.0,
        }));
        state.handle_command(AudioCommand::Stop { fade: true });
        assert!(state.voice.is_none());
        assert!(state.fading.is_some());

        state.handle_command(AudioCommand::Stop { fade: false });
        assert!(state.fading.is_none());
    }
}
