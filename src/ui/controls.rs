use iced::widget::{button, checkbox, container, row, slider, text, Column, Row};
use iced::{Alignment, Element, Length};

use crate::audio::processor::SampleAnalysis;
use crate::audio::types::PlaybackStatus;
use crate::config::BackendType;
use crate::playback::PlaybackTime;
use crate::session::{
    ChopId, EditMode, EffectParameters, SampleId, Session, STRETCH_RATIO_MAX, STRETCH_RATIO_MIN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqBandKind {
    Low,
    Mid,
    High,
}

#[derive(Debug, Clone)]
pub enum ControlMessage {
    OpenFile,
    PlayStop,
    ToggleLoop,
    StretchChanged(f32),
    StretchToggled(bool),
    EqToggled(bool),
    EqGainChanged(EqBandKind, f32),
    GateToggled(bool),
    GateSensitivityChanged(f32),
    GateAmountChanged(f32),
    ModeChanged(EditMode),
    ChopEvenly,
    /// Split at detected transients, optionally snapped to the tempo grid
    ChopAtTransients(bool),
    ChopsLinked(bool),
    SelectChop(ChopId),
    SelectSample(SampleId),
    Bake,
    Normalize,
    Crop,
    Resample(u32),
    SeparateStems,
    SeparationBackendChanged(BackendType),
}

/// Format seconds as M:SS.cc
pub fn format_time(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let total_secs = seconds as u64;
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    let centis = ((seconds - total_secs as f64) * 100.0) as u64;
    format!("{mins}:{secs:02}.{centis:02}")
}

/// Linear gain to dBFS, floored at -120.
pub fn to_dbfs(gain: f32) -> f32 {
    if gain <= 1e-6 {
        -120.0
    } else {
        20.0 * gain.log10()
    }
}

/// One-line summary of a sample's format and levels.
pub fn format_analysis(analysis: &SampleAnalysis) -> String {
    format!(
        "{} / {} Hz / {} ch / peak {:.1} dBFS / rms {:.1} dBFS",
        format_time(analysis.duration),
        analysis.sample_rate,
        analysis.channels,
        to_dbfs(analysis.peak),
        to_dbfs(analysis.rms),
    )
}

/// Transport, loop and time readout.
pub fn view_transport<'a>(
    status: PlaybackStatus,
    time: PlaybackTime,
    loop_enabled: bool,
    has_audio: bool,
) -> Element<'a, ControlMessage> {
    let play_label = match status {
        PlaybackStatus::Stopped => "Play",
        _ => "Stop",
    };

    let open_btn = button(text("Open File")).on_press(ControlMessage::OpenFile);
    let play_btn = button(text(play_label)).on_press_maybe(has_audio.then_some(ControlMessage::PlayStop));
    let loop_label = if loop_enabled { "Loop: on" } else { "Loop: off" };
    let loop_btn = button(text(loop_label)).on_press(ControlMessage::ToggleLoop);

    let time_display = text(format!(
        "{} / {}",
        format_time(time.current),
        format_time(time.total)
    ))
    .size(16);

    Row::new()
        .spacing(10)
        .align_y(Alignment::Center)
        .push(open_btn)
        .push(play_btn)
        .push(loop_btn)
        .push(time_display)
        .into()
}

/// Time-stretch, EQ and noise gate.
pub fn view_effects<'a>(effects: &EffectParameters) -> Element<'a, ControlMessage> {
    let stretch = effects.time_stretch;
    let stretch_row = row![
        checkbox(stretch.enabled)
            .label("Stretch")
            .on_toggle(ControlMessage::StretchToggled),
        slider(
            STRETCH_RATIO_MIN..=STRETCH_RATIO_MAX,
            stretch.ratio,
            ControlMessage::StretchChanged
        )
        .step(0.05)
        .width(Length::Fixed(160.0)),
        text(format!("x{:.2}", stretch.ratio)).size(14),
    ]
    .spacing(10)
    .align_y(Alignment::Center);

    let eq = effects.eq;
    let band = |label: &'static str, kind: EqBandKind, gain: f32| {
        row![
            text(label).size(14),
            slider(-24.0..=24.0, gain, move |g| ControlMessage::EqGainChanged(kind, g))
                .step(0.5)
                .width(Length::Fixed(100.0)),
        ]
        .spacing(5)
        .align_y(Alignment::Center)
    };
    let eq_row = row![
        checkbox(eq.enabled).label("EQ").on_toggle(ControlMessage::EqToggled),
        band("Lo", EqBandKind::Low, eq.low.gain_db),
        band("Mid", EqBandKind::Mid, eq.mid.gain_db),
        band("Hi", EqBandKind::High, eq.high.gain_db),
    ]
    .spacing(10)
    .align_y(Alignment::Center);

    let gate = effects.noise_gate;
    let gate_row = row![
        checkbox(gate.enabled)
            .label("Gate")
            .on_toggle(ControlMessage::GateToggled),
        text("Sens").size(14),
        slider(0.0..=1.0, gate.sensitivity, ControlMessage::GateSensitivityChanged)
            .step(0.01)
            .width(Length::Fixed(100.0)),
        text("Amount").size(14),
        slider(0.0..=1.0, gate.amount, ControlMessage::GateAmountChanged)
            .step(0.01)
            .width(Length::Fixed(100.0)),
    ]
    .spacing(10)
    .align_y(Alignment::Center);

    Column::new()
        .spacing(5)
        .push(stretch_row)
        .push(eq_row)
        .push(gate_row)
        .into()
}

/// Stem separation: backend choice and the job button.
pub fn view_stems<'a>(backend: BackendType, enabled: bool) -> Element<'a, ControlMessage> {
    let backend_btn = |target: BackendType| {
        button(text(target.display_name()))
            .on_press_maybe((backend != target).then_some(ControlMessage::SeparationBackendChanged(target)))
    };

    row![
        button(text("Separate stems")).on_press_maybe(enabled.then_some(ControlMessage::SeparateStems)),
        text("Backend:"),
        backend_btn(BackendType::Center),
        backend_btn(BackendType::MidSide),
    ]
    .spacing(10)
    .align_y(Alignment::Center)
    .into()
}

/// Edit mode, chop tools and chop selection for the active sample.
pub fn view_chops<'a>(session: &Session, busy: bool) -> Element<'a, ControlMessage> {
    let mode = session.edit_mode();
    let mode_btn = |label: &'static str, target: EditMode| {
        button(text(label)).on_press_maybe((mode != target).then_some(ControlMessage::ModeChanged(target)))
    };

    let mut tools = Row::new()
        .spacing(10)
        .align_y(Alignment::Center)
        .push(mode_btn("Region", EditMode::Region))
        .push(mode_btn("Chops", EditMode::Chops));

    let Some(id) = session.active_sample_id() else {
        return tools.into();
    };
    let has_audio = session.active_audio().is_some();
    let action = |msg: ControlMessage| (has_audio && !busy).then_some(msg);

    tools = tools
        .push(button(text("Chop evenly")).on_press_maybe(action(ControlMessage::ChopEvenly)))
        .push(button(text("Transients")).on_press_maybe(action(ControlMessage::ChopAtTransients(false))))
        .push(button(text("Transients on grid")).on_press_maybe(action(ControlMessage::ChopAtTransients(true))))
        .push(
            checkbox(session.registry().chops_linked(id))
                .label("Linked")
                .on_toggle(ControlMessage::ChopsLinked),
        )
        .push(button(text("Bake stretch")).on_press_maybe(action(ControlMessage::Bake)))
        .push(button(text("Normalize")).on_press_maybe(action(ControlMessage::Normalize)))
        .push(button(text("Crop to region")).on_press_maybe(action(ControlMessage::Crop)))
        .push(button(text("To 44.1 kHz")).on_press_maybe(action(ControlMessage::Resample(44_100))));

    let active = session.registry().active_chop_id(id);
    let chops = session
        .registry()
        .chops(id)
        .iter()
        .enumerate()
        .fold(Row::new().spacing(4), |r, (i, chop)| {
            let label = text(format!("{}", i + 1)).size(12);
            let btn = if active == Some(chop.id) {
                button(label).style(button::success)
            } else {
                button(label).style(button::secondary)
            };
            r.push(btn.on_press(ControlMessage::SelectChop(chop.id)))
        });

    Column::new().spacing(5).push(tools).push(chops).into()
}

/// Sample library; the active sample is highlighted.
pub fn view_samples<'a>(session: &Session) -> Element<'a, ControlMessage> {
    let active = session.active_sample_id();
    let list = session.samples().iter().fold(Column::new().spacing(2), |col, sample| {
        let mut label = sample.name.clone();
        if sample.processing {
            label.push_str(" ...");
        }
        let btn = button(text(label).size(13)).width(Length::Fill);
        let btn = if active == Some(sample.id) {
            btn.style(button::primary)
        } else {
            btn.style(button::text)
        };
        col.push(btn.on_press(ControlMessage::SelectSample(sample.id)))
    });

    container(list)
        .width(Length::Fixed(220.0))
        .padding(5)
        .into()
}
