use iced::mouse;
use iced::widget::canvas::{self, Action, Cache, Event, Frame, Geometry, Path, Stroke};
use iced::{Color, Point, Rectangle, Renderer, Size, Theme};

use crate::session::{ChopId, EditMode, Region};
use crate::waveform_cache::WaveformPeaks;

/// Shorter drags than this (in width fractions) count as a click.
const CLICK_TOLERANCE: f64 = 0.005;

/// Chop overlay entry: id and normalized span
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChopMarker {
    pub id: ChopId,
    pub start: f64,
    pub end: f64,
}

/// State for the waveform canvas widget.
pub struct WaveformView {
    waveform_cache: Cache,
    peaks: Option<WaveformPeaks>,
    pub playhead: Option<f64>,
    pub region: Region,
    pub chops: Vec<ChopMarker>,
    pub active_chop: Option<ChopId>,
    pub mode: EditMode,
}

/// Interactions on the waveform, in normalized positions.
#[derive(Debug, Clone)]
pub enum WaveformMessage {
    RegionSelected(f64, f64),
    /// Click at a position; in chops mode this picks the chop under it.
    Clicked(f64),
}

impl Default for WaveformView {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveformView {
    pub fn new() -> Self {
        Self {
            waveform_cache: Cache::new(),
            peaks: None,
            playhead: None,
            region: Region::FULL,
            chops: Vec::new(),
            active_chop: None,
            mode: EditMode::Region,
        }
    }

    pub fn has_peaks(&self) -> bool {
        self.peaks.is_some()
    }

    pub fn set_peaks(&mut self, peaks: Option<WaveformPeaks>) {
        self.peaks = peaks;
        self.waveform_cache.clear();
    }

    /// The chop covering `position`, if any.
    pub fn chop_at(&self, position: f64) -> Option<ChopId> {
        self.chops
            .iter()
            .find(|c| position >= c.start && position < c.end)
            .map(|c| c.id)
    }
}

fn vertical(frame: &mut Frame, x: f32, height: f32, color: Color, width: f32) {
    let line = Path::line(Point::new(x, 0.0), Point::new(x, height));
    frame.stroke(&line, Stroke::default().with_color(color).with_width(width));
}

impl canvas::Program<WaveformMessage> for WaveformView {
    /// Drag start and current position while the button is held
    type State = Option<(f64, f64)>;

    fn draw(
        &self,
        state: &Self::State,
        renderer: &Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: mouse::Cursor,
    ) -> Vec<Geometry> {
        let width = bounds.width;
        let height = bounds.height;

        let waveform = self.waveform_cache.draw(renderer, bounds.size(), |frame| {
            frame.fill_rectangle(Point::ORIGIN, bounds.size(), Color::from_rgb(0.12, 0.12, 0.15));

            let center_y = height / 2.0;
            let center_line = Path::line(Point::new(0.0, center_y), Point::new(width, center_y));
            frame.stroke(
                &center_line,
                Stroke::default()
                    .with_color(Color::from_rgba(1.0, 1.0, 1.0, 0.15))
                    .with_width(1.0),
            );

            if let Some(peaks) = &self.peaks {
                let color = Color::from_rgb(0.3, 0.7, 1.0);
                for (i, peak) in peaks.columns(width as usize).iter().enumerate() {
                    let x = i as f32;
                    let line = Path::line(
                        Point::new(x, center_y - peak.max * center_y),
                        Point::new(x, center_y - peak.min * center_y),
                    );
                    frame.stroke(&line, Stroke::default().with_color(color).with_width(1.0));
                }
            }
        });

        let overlay = {
            let mut frame = Frame::new(renderer, bounds.size());
            let to_x = |pos: f64| (pos * width as f64) as f32;

            // Region, dimmed while chops govern playback
            let region_alpha = if self.mode == EditMode::Region { 0.15 } else { 0.06 };
            let (rx0, rx1) = (to_x(self.region.start), to_x(self.region.end));
            frame.fill_rectangle(
                Point::new(rx0, 0.0),
                Size::new(rx1 - rx0, height),
                Color::from_rgba(1.0, 0.8, 0.0, region_alpha),
            );
            for x in [rx0, rx1] {
                vertical(&mut frame, x, height, Color::from_rgba(1.0, 0.8, 0.0, 0.7), 1.0);
            }

            for chop in &self.chops {
                let (x0, x1) = (to_x(chop.start), to_x(chop.end));
                if self.active_chop == Some(chop.id) {
                    let alpha = if self.mode == EditMode::Chops { 0.25 } else { 0.1 };
                    frame.fill_rectangle(
                        Point::new(x0, 0.0),
                        Size::new(x1 - x0, height),
                        Color::from_rgba(0.4, 1.0, 0.5, alpha),
                    );
                }
                vertical(&mut frame, x0, height, Color::from_rgba(0.4, 1.0, 0.5, 0.6), 1.0);
            }

            if let Some((start, current)) = state {
                let (lo, hi) = (start.min(*current), start.max(*current));
                if hi - lo >= CLICK_TOLERANCE {
                    frame.fill_rectangle(
                        Point::new(to_x(lo), 0.0),
                        Size::new(to_x(hi) - to_x(lo), height),
                        Color::from_rgba(1.0, 1.0, 1.0, 0.1),
                    );
                }
            }

            if let Some(pos) = self.playhead {
                vertical(&mut frame, to_x(pos), height, Color::WHITE, 2.0);
            }

            frame.into_geometry()
        };

        vec![waveform, overlay]
    }

    fn update(
        &self,
        state: &mut Self::State,
        event: &Event,
        bounds: Rectangle,
        cursor: mouse::Cursor,
    ) -> Option<Action<WaveformMessage>> {
        let cursor_pos = cursor.position_in(bounds)?;
        let frac = ((cursor_pos.x / bounds.width) as f64).clamp(0.0, 1.0);

        match event {
            Event::Mouse(mouse::Event::ButtonPressed(mouse::Button::Left)) => {
                *state = Some((frac, frac));
                Some(Action::request_redraw().and_capture())
            }
            Event::Mouse(mouse::Event::CursorMoved { .. }) => {
                let (start, _) = (*state)?;
                *state = Some((start, frac));
                Some(Action::request_redraw().and_capture())
            }
            Event::Mouse(mouse::Event::ButtonReleased(mouse::Button::Left)) => {
                let (start, _) = state.take()?;
                let message = if (frac - start).abs() < CLICK_TOLERANCE {
                    WaveformMessage::Clicked(start)
                } else {
                    WaveformMessage::RegionSelected(start.min(frac), start.max(frac))
                };
                Some(Action::publish(message).and_capture())
            }
            _ => None,
        }
    }
}
