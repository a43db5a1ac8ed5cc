use crossbeam_channel::Sender;
use soundtouch::SoundTouch;

use super::types::AudioData;

/// Frames fed into SoundTouch per call.
pub const CHUNK_SIZE: usize = 1024;

/// Wrapper around SoundTouch for tempo changes without pitch shift.
///
/// Used live by the output engine (playback rate) and offline by the
/// time-stretch job.
pub struct Stretcher {
    st: SoundTouch,
    channels: u16,
}

impl Stretcher {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let mut st = SoundTouch::new();
        st.set_sample_rate(sample_rate);
        st.set_channels(channels as u32);
        st.set_tempo(1.0);
        Stretcher { st, channels }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Speed without pitch change. 2.0 plays twice as fast.
    pub fn set_tempo(&mut self, tempo: f32) {
        self.st.set_tempo(tempo as f64);
    }

    /// Speed with pitch change, used to match the source to the device rate.
    pub fn set_rate(&mut self, rate: f64) {
        self.st.set_rate(rate);
    }

    /// Feed interleaved input samples.
    pub fn put_samples(&mut self, samples: &[f32]) {
        self.st
            .put_samples(samples, samples.len() / self.channels as usize);
    }

    /// Receive processed samples. Returns the number of samples written
    /// (total, not per channel).
    pub fn receive_samples(&mut self, output: &mut [f32]) -> usize {
        let max_frames = output.len() / self.channels as usize;
        let received_frames = self.st.receive_samples(output, max_frames);
        received_frames * self.channels as usize
    }

    /// Push the tail of the input through the processor.
    pub fn flush(&mut self) {
        self.st.flush();
    }

    /// Drop all buffered data.
    pub fn clear(&mut self) {
        self.st.clear();
    }
}

/// Render `audio` at `ratio` times its length, pitch unchanged.
///
/// Progress in 0..=1 is reported on `progress` after every chunk; a closed
/// receiver is ignored.
pub fn stretch_offline(audio: &AudioData, ratio: f32, progress: Option<&Sender<f32>>) -> AudioData {
    let ch = audio.channels.max(1) as usize;
    let mut stretcher = Stretcher::new(audio.sample_rate, audio.channels);
    stretcher.set_tempo(1.0 / ratio);

    let total = audio.num_frames();
    let expected = (total as f64 * ratio as f64).ceil() as usize;
    let mut out: Vec<f32> = Vec::with_capacity((expected + CHUNK_SIZE) * ch);
    let mut recv = vec![0.0f32; CHUNK_SIZE * 4 * ch];

    let mut drain = |stretcher: &mut Stretcher, out: &mut Vec<f32>| loop {
        let got = stretcher.receive_samples(&mut recv);
        if got == 0 {
            break;
        }
        out.extend_from_slice(&recv[..got]);
    };

    let mut position = 0;
    while position < total {
        let end = (position + CHUNK_SIZE).min(total);
        stretcher.put_samples(audio.frames(position, end));
        position = end;
        drain(&mut stretcher, &mut out);
        if let Some(tx) = progress {
            let _ = tx.try_send(position as f32 / total as f32);
        }
    }
    stretcher.flush();
    drain(&mut stretcher, &mut out);

    // SoundTouch pads the flushed tail with silence.
    out.truncate(expected * ch);
    AudioData::new(out, audio.sample_rate, audio.channels)
}
