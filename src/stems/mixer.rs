//! Stem Mixer
//!
//! Holds the stem set and resolves each stem's effective gain. Solo is
//! exclusive: at most one stem is soloed, and while one is, every other stem
//! is silent regardless of its own volume or mute.

use tracing::{debug, warn};

use super::stem::{clamp_volume, Stem, StemInfo};
use crate::error::{EngineError, Result};

/// Ordered, uniquely-named stem set with mute/solo rules
#[derive(Debug, Clone, Default)]
pub struct Mixer {
    stems: Vec<Stem>,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole stem set
    ///
    /// # Errors
    /// * `DuplicateStemName` - two stems share a name; the set is left unchanged
    pub fn set_stems(&mut self, stems: Vec<Stem>) -> Result<()> {
        ensure_unique(&stems)?;
        self.stems = stems;
        debug!("[MIXER] {} stems", self.stems.len());
        Ok(())
    }

    /// Set a stem's volume, clamped to [0, 1]
    pub fn set_volume(&mut self, name: &str, volume: f32) -> Result<()> {
        let stem = self.find_mut(name)?;
        stem.volume = clamp_volume(volume);
        debug!("[MIXER] {} volume = {:.2}", name, stem.volume);
        Ok(())
    }

    pub fn toggle_mute(&mut self, name: &str) -> Result<()> {
        let stem = self.find_mut(name)?;
        stem.muted = !stem.muted;
        debug!("[MIXER] {} muted = {}", name, stem.muted);
        Ok(())
    }

    /// Toggle solo on `name`, clearing it on every other stem
    pub fn toggle_solo(&mut self, name: &str) -> Result<()> {
        let target = !self.find(name)?.solo;
        for stem in &mut self.stems {
            stem.solo = stem.name == name && target;
        }
        debug!("[MIXER] {} solo = {}", name, target);
        Ok(())
    }

    /// Drop generated stems, keeping separated ones in order
    pub fn clear_generated(&mut self) {
        let before = self.stems.len();
        self.stems.retain(|stem| !stem.is_generated());
        debug!("[MIXER] Cleared {} generated stems", before - self.stems.len());
    }

    pub fn reset(&mut self) {
        self.stems.clear();
    }

    /// Effective gain of the stem at `index`
    ///
    /// Zero for non-solo stems while any stem is soloed, zero when muted
    /// (a muted stem stays silent even when soloed), otherwise the volume.
    pub fn effective_gain(&self, index: usize) -> f32 {
        let Some(stem) = self.stems.get(index) else {
            return 0.0;
        };
        if stem.muted || (self.any_solo() && !stem.solo) {
            0.0
        } else {
            stem.volume
        }
    }

    /// Effective gains for every stem, in stem order
    pub fn effective_gains(&self) -> Vec<f32> {
        (0..self.stems.len()).map(|i| self.effective_gain(i)).collect()
    }

    pub fn any_solo(&self) -> bool {
        self.stems.iter().any(|stem| stem.solo)
    }

    pub fn stems(&self) -> &[Stem] {
        &self.stems
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn get(&self, name: &str) -> Option<&Stem> {
        self.stems.iter().find(|stem| stem.name == name)
    }

    pub fn infos(&self) -> Vec<StemInfo> {
        self.stems.iter().map(StemInfo::from).collect()
    }

    fn find(&self, name: &str) -> Result<&Stem> {
        self.get(name).ok_or_else(|| {
            warn!("[MIXER] Unknown stem '{}'", name);
            EngineError::StemNotFound {
                name: name.to_string(),
            }
        })
    }

    fn find_mut(&mut self, name: &str) -> Result<&mut Stem> {
        self.stems
            .iter_mut()
            .find(|stem| stem.name == name)
            .ok_or_else(|| {
                warn!("[MIXER] Unknown stem '{}'", name);
                EngineError::StemNotFound {
                    name: name.to_string(),
                }
            })
    }
}

fn ensure_unique(stems: &[Stem]) -> Result<()> {
    for (index, stem) in stems.iter().enumerate() {
        if stems[..index].iter().any(|other| other.name == stem.name) {
            return Err(EngineError::DuplicateStemName {
                name: stem.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::SampleBuffer;
    use crate::stems::stem::StemKind;
    use pretty_assertions::assert_eq;

    fn stem(name: &str, volume: f32, kind: StemKind) -> Stem {
        Stem::new(name, SampleBuffer::silent(1, 4, 44100).unwrap(), volume, kind)
    }

    fn four_stems() -> Mixer {
        let mut mixer = Mixer::new();
        mixer
            .set_stems(vec![
                stem("drums", 1.0, StemKind::Separated),
                stem("bass", 0.8, StemKind::Separated),
                stem("guitar", 0.6, StemKind::Separated),
                stem("vocals", 0.4, StemKind::Separated),
            ])
            .unwrap();
        mixer
    }

    fn soloed(mixer: &Mixer) -> Vec<&str> {
        mixer
            .stems()
            .iter()
            .filter(|s| s.solo)
            .map(|s| s.name.as_str())
            .collect()
    }

    #[test]
    fn test_gains_follow_volume_and_mute() {
        let mut mixer = four_stems();
        mixer.toggle_mute("bass").unwrap();
        assert_eq!(mixer.effective_gains(), vec![1.0, 0.0, 0.6, 0.4]);
    }

    #[test]
    fn test_solo_is_exclusive() {
        let mut mixer = four_stems();
        mixer.toggle_solo("bass").unwrap();
        assert_eq!(soloed(&mixer), vec!["bass"]);

        mixer.toggle_solo("vocals").unwrap();
        assert_eq!(soloed(&mixer), vec!["vocals"]);

        mixer.toggle_solo("vocals").unwrap();
        assert!(soloed(&mixer).is_empty());
    }

    #[test]
    fn test_solo_overrides_mute_of_others() {
        let mut mixer = four_stems();
        mixer.toggle_solo("guitar").unwrap();
        assert_eq!(mixer.effective_gains(), vec![0.0, 0.0, 0.6, 0.0]);
    }

    #[test]
    fn test_muted_solo_stem_is_silent() {
        let mut mixer = four_stems();
        mixer.toggle_mute("drums").unwrap();
        mixer.toggle_solo("drums").unwrap();
        assert_eq!(mixer.effective_gains(), vec![0.0; 4]);
    }

    #[test]
    fn test_set_volume_clamps() {
        let mut mixer = four_stems();
        mixer.set_volume("drums", 1.5).unwrap();
        mixer.set_volume("bass", -1.0).unwrap();
        assert_eq!(mixer.get("drums").unwrap().volume, 1.0);
        assert_eq!(mixer.get("bass").unwrap().volume, 0.0);
    }

    #[test]
    fn test_unknown_stem() {
        let mut mixer = four_stems();
        assert!(matches!(
            mixer.toggle_mute("keys"),
            Err(EngineError::StemNotFound { .. })
        ));
        assert!(mixer.toggle_solo("keys").is_err());
        assert!(soloed(&mixer).is_empty());
    }

    #[test]
    fn test_clear_generated_keeps_separated() {
        let mut mixer = Mixer::new();
        mixer
            .set_stems(vec![
                stem("Original", 0.8, StemKind::Separated),
                stem("Drums (Generated)", 0.7, StemKind::Generated),
                stem("Bass (Generated)", 0.6, StemKind::Generated),
            ])
            .unwrap();
        mixer.clear_generated();
        assert_eq!(mixer.len(), 1);
        assert_eq!(mixer.stems()[0].name, "Original");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut mixer = four_stems();
        let result = mixer.set_stems(vec![
            stem("drums", 1.0, StemKind::Separated),
            stem("drums", 1.0, StemKind::Generated),
        ]);
        assert!(matches!(result, Err(EngineError::DuplicateStemName { .. })));
        assert_eq!(mixer.len(), 4);
    }
}
