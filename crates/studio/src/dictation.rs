/// Platform speech-to-text. Transcripts are fed to the controller with
/// [`Studio::apply_transcript`](crate::Studio::apply_transcript).
pub trait Dictation: Send + Sync {
    fn is_available(&self) -> bool;
    fn start(&self) -> Result<(), DictationError>;
    fn stop(&self);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DictationError {
    #[error("Speech recognition is not supported on this platform.")]
    Unavailable,
    #[error("Speech recognition failed: {0}")]
    Failed(String),
}

/// Used where no speech backend exists.
pub struct NoDictation;

impl Dictation for NoDictation {
    fn is_available(&self) -> bool {
        false
    }

    fn start(&self) -> Result<(), DictationError> {
        Err(DictationError::Unavailable)
    }

    fn stop(&self) {}
}
