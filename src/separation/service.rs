//! Entry point for stem separation: owns the config and the backend it
//! selects.

use std::sync::Arc;

use crossbeam_channel::Sender;

use super::backend::{CenterBackend, MidSideBackend, SeparationBackend, StemData};
use crate::audio::types::AudioData;
use crate::config::{BackendType, SeparationConfig};
use crate::error::SeparationError;

#[derive(Clone)]
pub struct SeparationService {
    config: SeparationConfig,
    backend: Arc<dyn SeparationBackend>,
}

impl SeparationService {
    pub fn with_config(mut config: SeparationConfig) -> Self {
        config.validate();
        let backend = Self::create_backend(config.backend);
        Self { config, backend }
    }

    fn create_backend(backend_type: BackendType) -> Arc<dyn SeparationBackend> {
        match backend_type {
            BackendType::Center => Arc::new(CenterBackend),
            BackendType::MidSide => Arc::new(MidSideBackend),
        }
    }

    /// Swap the config, recreating the backend if its type changed.
    pub fn set_config(&mut self, mut config: SeparationConfig) {
        config.validate();
        if config.backend != self.config.backend {
            self.backend = Self::create_backend(config.backend);
        }
        self.config = config;
    }

    pub fn config(&self) -> &SeparationConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Split `audio` into stems. Blocking; run it off the UI thread.
    pub fn separate(
        &self,
        audio: &AudioData,
        progress: Option<&Sender<f32>>,
    ) -> Result<StemData, SeparationError> {
        log::info!(
            "separate: {:.2}s, {} ch with {}",
            audio.duration,
            audio.channels,
            self.backend.name()
        );
        let stems = self.backend.separate(audio, &self.config, progress)?;

        let expected = audio.samples.len();
        if stems.vocals.len() != expected || stems.accompaniment.len() != expected {
            return Err(SeparationError::Failed {
                backend: self.backend.name(),
                reason: format!(
                    "stem lengths {}/{} do not match input {}",
                    stems.vocals.len(),
                    stems.accompaniment.len(),
                    expected
                ),
            });
        }
        if let Some(tx) = progress {
            let _ = tx.try_send(1.0);
        }
        Ok(stems)
    }
}

impl std::fmt::Debug for SeparationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeparationService")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish()
    }
}
