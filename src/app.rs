use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use iced::keyboard;
use iced::widget::{canvas, center, column, container, row, text};
use iced::{Element, Length, Subscription, Task, Theme};

use crate::audio::decoder;
use crate::audio::engine::{self, CpalBackend, EngineHandle};
use crate::audio::processor::{self, Job, SampleAnalysis};
use crate::audio::types::AudioData;
use crate::config::{Config, SeparationConfig};
use crate::error::{EngineError, ProcessingError};
use crate::playback::{PlaybackController, PlaybackTime};
use crate::session::{
    EditMode, ProcessingKind, ProcessingTicket, Region, SampleId, Session, SessionChange,
    SessionEvent,
};
use crate::separation::SeparationService;
use crate::ui::controls::{self, ControlMessage, EqBandKind};
use crate::ui::waveform::{ChopMarker, WaveformMessage, WaveformView};
use crate::waveform_cache::WaveformPeaks;

pub struct App {
    config: Config,
    controller: PlaybackController<CpalBackend>,
    separation: SeparationService,
    session_events: Receiver<SessionEvent>,
    /// Session version the waveform overlay was last built from
    seen_version: u64,
    time: PlaybackTime,

    // Waveform
    waveform_view: WaveformView,
    peaks: HashMap<SampleId, WaveformPeaks>,
    analyses: HashMap<SampleId, SampleAnalysis>,

    // Offline jobs in flight
    tickets: Vec<ProcessingTicket>,
    progress: Option<(Receiver<f32>, f32)>,
    /// A sleep until the pending restart is queued
    wake_queued: bool,

    loading: bool,
    status_line: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Message {
    EngineReady(Result<EngineHandle, EngineError>),
    FileDialogResult(Option<PathBuf>),
    FileLoaded(Result<(AudioData, String), String>),
    Control(ControlMessage),
    Waveform(WaveformMessage),
    Tick,
    RestartDue,
    KeyEvent(keyboard::Event),
    ProcessingFinished(SampleId, Result<AudioData, ProcessingError>),
    StemsFinished(SampleId, Result<Vec<(String, AudioData)>, ProcessingError>),
    OnsetsFound(SampleId, Result<Vec<f64>, ProcessingError>),
}

fn boot(config: Config) -> (App, Task<Message>) {
    let mut session = Session::new(&config);
    let session_events = session.subscribe();
    let controller = PlaybackController::new(CpalBackend::disconnected(), session, &config.playback);

    let separation = SeparationService::with_config(config.separation.clone());
    let app = App {
        config,
        controller,
        separation,
        session_events,
        seen_version: 0,
        time: PlaybackTime::default(),
        waveform_view: WaveformView::new(),
        peaks: HashMap::new(),
        analyses: HashMap::new(),
        tickets: Vec::new(),
        progress: None,
        wake_queued: false,
        loading: false,
        status_line: None,
        error: None,
    };

    let task = Task::perform(
        async {
            tokio::task::spawn_blocking(engine::spawn_engine)
                .await
                .unwrap_or_else(|e| Err(EngineError::StreamBuild(e.to_string())))
        },
        Message::EngineReady,
    );

    (app, task)
}

fn title(app: &App) -> String {
    match app.controller.session().active_sample() {
        Some(sample) => format!("Chopdeck - {}", sample.name),
        None => "Chopdeck".to_string(),
    }
}

fn update(app: &mut App, message: Message) -> Task<Message> {
    let task = handle(app, message);
    app.sync_view();
    Task::batch([task, app.restart_wakeup()])
}

fn handle(app: &mut App, message: Message) -> Task<Message> {
    match message {
        Message::EngineReady(result) => {
            match result {
                Ok(handle) => app.controller.backend_mut().attach(handle),
                Err(e) => {
                    log::error!("audio engine failed to start: {e}");
                    app.error = Some(format!("Audio engine error: {e}"));
                }
            }
            Task::none()
        }
        Message::Control(ctrl) => app.handle_control(ctrl),
        Message::FileDialogResult(path) => {
            let Some(path) = path else {
                return Task::none();
            };
            app.loading = true;
            let name = decoder::sample_name(&path);
            Task::perform(
                async move {
                    tokio::task::spawn_blocking(move || {
                        decoder::decode_file(&path)
                            .map(|data| (data, name))
                            .map_err(|e| e.to_string())
                    })
                    .await
                    .unwrap_or_else(|e| Err(e.to_string()))
                },
                Message::FileLoaded,
            )
        }
        Message::FileLoaded(result) => {
            app.loading = false;
            match result {
                Ok((data, name)) => {
                    app.error = None;
                    let id = app.controller.add_sample(name, Some(Arc::new(data)));
                    let selected = app.controller.select_sample(id);
                    app.report(selected.map(|_| ()));
                }
                Err(e) => app.error = Some(e),
            }
            Task::none()
        }
        Message::Waveform(wm) => {
            match wm {
                WaveformMessage::RegionSelected(start, end) => {
                    let result = Region::new(start, end)
                        .and_then(|region| app.controller.apply_region_change(region));
                    app.report(result);
                }
                WaveformMessage::Clicked(position) => {
                    if app.controller.session().edit_mode() == EditMode::Chops {
                        if let Some(chop) = app.waveform_view.chop_at(position) {
                            let result = app.controller.apply_chop_selection(Some(chop));
                            app.report(result);
                        }
                    }
                }
            }
            Task::none()
        }
        Message::Tick => {
            app.time = app.controller.tick();
            if let Some(e) = app.controller.backend_mut().take_error() {
                app.error = Some(format!("Audio stream error: {e}"));
            }
            if let Some((rx, value)) = &mut app.progress {
                if let Some(latest) = rx.try_iter().last() {
                    *value = latest;
                }
            }
            Task::none()
        }
        Message::RestartDue => {
            app.wake_queued = false;
            app.time = app.controller.tick();
            Task::none()
        }
        Message::ProcessingFinished(sample, result) => {
            let Some(ticket) = app.take_ticket(sample) else {
                return Task::none();
            };
            match app.controller.finish_processing(ticket, result) {
                Ok(id) => {
                    let name = app
                        .controller
                        .session()
                        .sample(id)
                        .map(|s| s.name.clone())
                        .unwrap_or_default();
                    app.status_line = Some(format!("Created {name}"));
                }
                Err(message) => app.error = Some(message),
            }
            Task::none()
        }
        Message::StemsFinished(sample, result) => {
            let Some(ticket) = app.take_ticket(sample) else {
                return Task::none();
            };
            match app.controller.finish_processing_outputs(ticket, result) {
                Ok(ids) => app.status_line = Some(format!("Created {} stems", ids.len())),
                Err(message) => app.error = Some(message),
            }
            Task::none()
        }
        Message::OnsetsFound(sample, result) => {
            app.status_line = None;
            if app.controller.session().active_sample_id() != Some(sample) {
                log::debug!("onsets for {sample} arrived after a sample switch, dropped");
                return Task::none();
            }
            match result {
                Ok(onsets) => {
                    let result = app.controller.chop_at_onsets(&onsets);
                    if let Ok(count) = &result {
                        app.status_line = Some(format!("{count} chops"));
                    }
                    app.report(result.map(|_| ()));
                }
                Err(e) => app.error = Some(e.to_string()),
            }
            Task::none()
        }
        Message::KeyEvent(keyboard::Event::KeyPressed { key, .. }) => match key.as_ref() {
            keyboard::Key::Named(keyboard::key::Named::Space) => {
                app.handle_control(ControlMessage::PlayStop)
            }
            keyboard::Key::Character("l") => app.handle_control(ControlMessage::ToggleLoop),
            keyboard::Key::Character("c") => {
                let mode = match app.controller.session().edit_mode() {
                    EditMode::Region => EditMode::Chops,
                    EditMode::Chops => EditMode::Region,
                };
                app.handle_control(ControlMessage::ModeChanged(mode))
            }
            keyboard::Key::Character(digit) => {
                // 1-9 play the chops mapped from the base note upwards
                let pad = digit.parse::<u8>().ok().filter(|d| (1..=9).contains(d));
                if let Some(pad) = pad {
                    let note = app.config.chops.base_note.saturating_add(pad - 1);
                    if !app.controller.trigger_note(note) {
                        log::debug!("key {pad}: no chop on note {note}");
                    }
                }
                Task::none()
            }
            _ => Task::none(),
        },
        Message::KeyEvent(_) => Task::none(),
    }
}

impl App {
    fn handle_control(&mut self, ctrl: ControlMessage) -> Task<Message> {
        let controller = &mut self.controller;
        match ctrl {
            ControlMessage::OpenFile => {
                return Task::perform(
                    async {
                        let handle = rfd::AsyncFileDialog::new()
                            .add_filter("Audio", &["mp3", "wav", "flac", "aac", "m4a"])
                            .pick_file()
                            .await;
                        handle.map(|h| h.path().to_path_buf())
                    },
                    Message::FileDialogResult,
                );
            }
            ControlMessage::PlayStop => {
                if controller.is_playing() {
                    controller.stop();
                } else {
                    controller.play();
                }
            }
            ControlMessage::ToggleLoop => controller.toggle_loop(),
            ControlMessage::StretchChanged(ratio) => {
                let enabled = controller.session().effects().time_stretch().enabled;
                controller.set_time_stretch(ratio, enabled);
            }
            ControlMessage::StretchToggled(enabled) => {
                let ratio = controller.session().effects().time_stretch().ratio;
                controller.set_time_stretch(ratio, enabled);
            }
            ControlMessage::EqToggled(enabled) => {
                let mut eq = *controller.session().effects().eq();
                eq.enabled = enabled;
                controller.set_eq(eq);
            }
            ControlMessage::EqGainChanged(band, gain) => {
                let mut eq = *controller.session().effects().eq();
                match band {
                    EqBandKind::Low => eq.low.gain_db = gain,
                    EqBandKind::Mid => eq.mid.gain_db = gain,
                    EqBandKind::High => eq.high.gain_db = gain,
                }
                controller.set_eq(eq);
            }
            ControlMessage::GateToggled(enabled) => {
                let gate = *controller.session().effects().noise_gate();
                controller.set_noise_gate(enabled, gate.sensitivity, gate.amount);
            }
            ControlMessage::GateSensitivityChanged(sensitivity) => {
                let gate = *controller.session().effects().noise_gate();
                controller.set_noise_gate(gate.enabled, sensitivity, gate.amount);
            }
            ControlMessage::GateAmountChanged(amount) => {
                let gate = *controller.session().effects().noise_gate();
                controller.set_noise_gate(gate.enabled, gate.sensitivity, amount);
            }
            ControlMessage::ModeChanged(mode) => controller.set_edit_mode(mode),
            ControlMessage::ChopEvenly => {
                let result = controller.chop_evenly(self.config.chops.default_count);
                self.report(result.map(|_| ()));
            }
            ControlMessage::ChopAtTransients(snap) => return self.find_onsets(snap),
            ControlMessage::ChopsLinked(linked) => {
                let result = controller.set_chops_linked(linked);
                self.report(result);
            }
            ControlMessage::SelectChop(chop) => {
                let result = controller.apply_chop_selection(Some(chop));
                self.report(result);
            }
            ControlMessage::SelectSample(id) => {
                let result = controller.select_sample(id);
                self.report(result.map(|_| ()));
            }
            ControlMessage::Bake => {
                let stretch = *controller.session().effects().time_stretch();
                if !stretch.enabled {
                    self.status_line = Some("Enable time-stretch to bake it".to_string());
                    return Task::none();
                }
                return self.start_job(Job::TimeStretch(stretch.ratio));
            }
            ControlMessage::Normalize => return self.start_job(Job::Normalize),
            ControlMessage::Resample(rate) => return self.start_job(Job::Resample(rate)),
            ControlMessage::SeparateStems => return self.separate_stems(),
            ControlMessage::SeparationBackendChanged(backend) => {
                let config = SeparationConfig {
                    backend,
                    ..self.separation.config().clone()
                };
                self.separation.set_config(config);
                self.status_line = Some(format!("Stems use {}", backend.display_name()));
            }
            ControlMessage::Crop => {
                let session = controller.session();
                let Some(id) = session.active_sample_id() else {
                    return Task::none();
                };
                let region = session.registry().region(id);
                return self.start_job(Job::Crop(region));
            }
        }
        Task::none()
    }

    /// Run an offline job on the active sample.
    fn start_job(&mut self, job: Job) -> Task<Message> {
        let Some((id, audio, tx)) = self.begin(job.kind()) else {
            return Task::none();
        };
        log::info!("processing: {:?} on {}", job, id);

        Task::perform(processor::run(audio, job, Some(tx)), move |result| {
            Message::ProcessingFinished(id, result)
        })
    }

    fn separate_stems(&mut self) -> Task<Message> {
        let Some((id, audio, tx)) = self.begin(ProcessingKind::Separate) else {
            return Task::none();
        };
        log::info!("processing: stems on {} with {}", id, self.separation.backend_name());

        Task::perform(
            processor::separate(audio, self.separation.clone(), Some(tx)),
            move |result| Message::StemsFinished(id, result),
        )
    }

    /// Flag the active sample as processing and open a progress channel.
    fn begin(&mut self, kind: ProcessingKind) -> Option<(SampleId, Arc<AudioData>, Sender<f32>)> {
        let session = self.controller.session();
        let (Some(id), Some(audio)) = (session.active_sample_id(), session.active_audio().cloned())
        else {
            return None;
        };
        match self.controller.begin_processing(id, kind) {
            Ok(ticket) => self.tickets.push(ticket),
            Err(e) => {
                self.error = Some(e.to_string());
                return None;
            }
        }

        let (tx, rx) = crossbeam_channel::bounded(64);
        self.progress = Some((rx, 0.0));
        self.error = None;
        Some((id, audio, tx))
    }

    fn take_ticket(&mut self, sample: SampleId) -> Option<ProcessingTicket> {
        self.progress = None;
        let Some(index) = self.tickets.iter().position(|t| t.sample() == sample) else {
            log::warn!("processing finished for {sample} without a ticket");
            return None;
        };
        let ticket = self.tickets.swap_remove(index);
        log::debug!("{} job on {sample} finished", ticket.kind().label());
        Some(ticket)
    }

    fn find_onsets(&mut self, snap_to_tempo: bool) -> Task<Message> {
        let session = self.controller.session();
        let (Some(id), Some(audio)) = (session.active_sample_id(), session.active_audio().cloned())
        else {
            return Task::none();
        };
        let region = session.registry().region(id);
        let sensitivity = self.config.chops.transient_sensitivity;
        self.status_line = Some("Detecting transients...".to_string());

        Task::perform(
            processor::find_onsets(audio, region, sensitivity, snap_to_tempo),
            move |result| Message::OnsetsFound(id, result),
        )
    }

    /// Show a rejected edit; the state it tried to change is untouched.
    fn report<E: std::fmt::Display>(&mut self, result: Result<(), E>) {
        if let Err(e) = result {
            log::warn!("edit rejected: {e}");
            self.error = Some(e.to_string());
        }
    }

    /// Queue one wake-up for the pending restart so it fires on time even
    /// between frames.
    fn restart_wakeup(&mut self) -> Task<Message> {
        match self.controller.restart_due_in() {
            Some(delay) if !self.wake_queued => {
                self.wake_queued = true;
                Task::perform(tokio::time::sleep(delay), |_| Message::RestartDue)
            }
            Some(_) => Task::none(),
            None => {
                self.wake_queued = false;
                Task::none()
            }
        }
    }

    /// Mirror session state into the waveform view.
    fn sync_view(&mut self) {
        let mut peaks_dirty = false;
        for event in self.session_events.try_iter() {
            if let SessionChange::SampleSelected(_) = event.change {
                peaks_dirty = true;
            }
        }

        let session = self.controller.session();
        let active = session.active_sample_id();
        if peaks_dirty {
            let peaks = active.and_then(|id| {
                if !self.peaks.contains_key(&id) {
                    let audio = session.active_audio()?;
                    self.peaks.insert(id, WaveformPeaks::compute(audio));
                    self.analyses.insert(id, processor::analyze(audio));
                }
                self.peaks.get(&id).cloned()
            });
            self.waveform_view.set_peaks(peaks);
        }

        self.time = self.controller.playback_time();
        let view = &mut self.waveform_view;
        view.playhead = self.controller.playhead();
        if session.version() == self.seen_version {
            return;
        }
        self.seen_version = session.version();
        view.mode = session.edit_mode();
        match active {
            Some(id) => {
                let registry = session.registry();
                view.region = registry.region(id);
                view.active_chop = registry.active_chop_id(id);
                view.chops = registry
                    .chops(id)
                    .iter()
                    .map(|c| ChopMarker {
                        id: c.id,
                        start: c.start,
                        end: c.end,
                    })
                    .collect();
            }
            None => {
                view.region = Region::FULL;
                view.active_chop = None;
                view.chops.clear();
            }
        }
    }
}

fn view(app: &App) -> Element<'_, Message> {
    let session = app.controller.session();
    let has_audio = session.active_audio().is_some();
    let busy = session.active_sample().is_some_and(|s| s.processing);

    let transport = controls::view_transport(
        app.controller.status(),
        app.time,
        session.loop_enabled(),
        has_audio,
    )
    .map(Message::Control);
    let effects = controls::view_effects(session.effects().params()).map(Message::Control);
    let chops = controls::view_chops(session, busy).map(Message::Control);
    let stems = controls::view_stems(app.separation.config().backend, has_audio && !busy)
        .map(Message::Control);
    let samples = controls::view_samples(session).map(Message::Control);

    let waveform: Element<Message> = if app.waveform_view.has_peaks() {
        let canvas_el: Element<WaveformMessage> = canvas::Canvas::new(&app.waveform_view)
            .width(Length::Fill)
            .height(Length::Fixed(200.0))
            .into();
        canvas_el.map(Message::Waveform)
    } else {
        let hint = if app.loading {
            "Loading..."
        } else {
            "Open an audio file to begin"
        };
        center(text(hint).size(18))
            .width(Length::Fill)
            .height(Length::Fixed(200.0))
            .into()
    };

    let mut content = column![transport, effects, chops, stems, waveform].spacing(8);

    let analysis = session
        .active_sample_id()
        .and_then(|id| app.analyses.get(&id));
    if let Some(analysis) = analysis {
        content = content.push(text(controls::format_analysis(analysis)).size(13));
    }

    if !app.controller.backend().is_connected() && app.error.is_none() {
        content = content.push(text("No audio output, playback is silent").size(13));
    }
    if let Some((_, value)) = &app.progress {
        content = content.push(text(format!("Processing... {:.0}%", value * 100.0)).size(14));
    }
    if let Some(status) = &app.status_line {
        content = content.push(text(status.clone()).size(14));
    }
    if let Some(err) = &app.error {
        content = content.push(
            container(text(format!("Error: {err}")).color(iced::Color::from_rgb(1.0, 0.3, 0.3)))
                .padding(10),
        );
    }

    container(row![samples, content.width(Length::Fill)].spacing(10))
        .padding(10)
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
}

fn subscription(app: &App) -> Subscription<Message> {
    let keys = keyboard::listen().map(Message::KeyEvent);

    // Pending restarts wake themselves through `restart_wakeup`.
    if app.controller.is_playing() || app.progress.is_some() {
        let tick = iced::time::every(app.config.playback.frame_interval()).map(|_| Message::Tick);
        Subscription::batch([tick, keys])
    } else {
        keys
    }
}

fn theme(_app: &App) -> Theme {
    Theme::Dark
}

pub fn run(config: Config) -> iced::Result {
    iced::application(move || boot(config.clone()), update, view)
        .title(title)
        .subscription(subscription)
        .theme(theme)
        .window_size((1200.0, 560.0))
        .run()
}
