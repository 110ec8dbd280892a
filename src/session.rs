use std::path::Path;

use anyhow::{anyhow, Result};
use tracing::{debug, info};

use crate::llm::image::ImageData;
use crate::orchestrator::{GenerationError, HeadshotBackend, Orchestrator, Phase};
use crate::styles::{find_style, StylePreset, DEFAULT_STYLE_ID, STYLE_PRESETS};

/// One user's working state: the uploaded photo, the latest generated
/// headshot, the chosen style and any pending edit text. Sessions are
/// independent; nothing here is shared.
#[derive(Debug, Default)]
pub struct Session {
    uploaded: Option<ImageData>,
    generated: Option<ImageData>,
    style_id: String,
    pending_edit: String,
}

impl Session {
    pub fn new() -> Self {
        Session {
            style_id: DEFAULT_STYLE_ID.to_string(),
            ..Session::default()
        }
    }

    /// Loads a photo from disk. A new upload invalidates any previously
    /// generated headshot.
    pub fn load_photo(&mut self, path: &Path) -> Result<()> {
        let image = ImageData::from_file(path)?;
        info!(
            "Loaded photo {} ({} bytes, {})",
            path.display(),
            image.bytes.len(),
            image.mime_type
        );
        self.set_uploaded(image);
        Ok(())
    }

    pub fn set_uploaded(&mut self, image: ImageData) {
        self.uploaded = Some(image);
        self.generated = None;
    }

    pub fn select_style(&mut self, id: &str) -> Result<()> {
        if find_style(id).is_none() {
            let known: Vec<&str> = STYLE_PRESETS.iter().map(|style| style.id).collect();
            return Err(anyhow!(
                "Unknown style '{}'; available: {}",
                id,
                known.join(", ")
            ));
        }
        self.style_id = id.to_string();
        Ok(())
    }

    pub fn selected_style(&self) -> &'static StylePreset {
        // style_id is only ever set through select_style.
        find_style(&self.style_id).unwrap_or(&STYLE_PRESETS[0])
    }

    pub fn set_pending_edit(&mut self, text: &str) {
        self.pending_edit = text.to_string();
    }

    #[allow(dead_code)]
    pub fn uploaded(&self) -> Option<&ImageData> {
        self.uploaded.as_ref()
    }

    pub fn generated(&self) -> Option<&ImageData> {
        self.generated.as_ref()
    }

    /// Runs the initial generation. Returns `Ok(false)` without touching the
    /// backend when no photo has been uploaded.
    pub async fn generate<B: HeadshotBackend>(
        &mut self,
        orchestrator: &Orchestrator<B>,
        on_phase: impl FnMut(Phase),
    ) -> Result<bool, GenerationError> {
        let Some(uploaded) = self.uploaded.clone() else {
            return Ok(false);
        };
        let style = self.selected_style();
        let headshot = orchestrator
            .generate(&uploaded, style.prompt, on_phase)
            .await?;
        debug!("Headshot description: {}", headshot.description);
        self.generated = Some(headshot.image);
        Ok(true)
    }

    /// Applies the pending edit to the current headshot. Returns `Ok(false)`
    /// when there is nothing to edit or the edit text is blank. The pending
    /// text is consumed when the call starts and is not restored on failure.
    pub async fn apply_edit<B: HeadshotBackend>(
        &mut self,
        orchestrator: &Orchestrator<B>,
        on_phase: impl FnMut(Phase),
    ) -> Result<bool, GenerationError> {
        if self.pending_edit.trim().is_empty() {
            return Ok(false);
        }
        let Some(current) = self.generated.clone() else {
            return Ok(false);
        };
        let instruction = std::mem::take(&mut self.pending_edit);
        let headshot = orchestrator
            .edit(&current, instruction.trim(), on_phase)
            .await?;
        debug!("Edited headshot description: {}", headshot.description);
        self.generated = Some(headshot.image);
        Ok(true)
    }

    pub fn reset(&mut self) {
        self.uploaded = None;
        self.generated = None;
        self.pending_edit.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use anyhow::Result as AnyResult;

    /// Scripted backend: echoes a fixed description and returns one image
    /// whose bytes encode how many renders happened so far.
    struct ScriptedBackend {
        fail_describe: bool,
        describe_calls: Mutex<Vec<(String, Vec<u8>)>>,
        renders: Mutex<u8>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            ScriptedBackend {
                fail_describe: false,
                describe_calls: Mutex::new(Vec::new()),
                renders: Mutex::new(0),
            }
        }
    }

    impl HeadshotBackend for ScriptedBackend {
        async fn describe(&self, instruction: &str, image: &ImageData) -> AnyResult<String> {
            self.describe_calls
                .lock()
                .unwrap()
                .push((instruction.to_string(), image.bytes.clone()));
            if self.fail_describe {
                Err(anyhow!("provider down"))
            } else {
                Ok("a person with glasses".to_string())
            }
        }

        async fn render(&self, _prompt: &str) -> AnyResult<Vec<ImageData>> {
            let mut renders = self.renders.lock().unwrap();
            *renders += 1;
            Ok(vec![ImageData::new(
                vec![*renders],
                "image/png".to_string(),
            )])
        }
    }

    fn photo() -> ImageData {
        ImageData::new(vec![0xAB, 0xCD], "image/jpeg".to_string())
    }

    #[tokio::test]
    async fn generate_is_a_noop_without_upload() {
        let orchestrator = Orchestrator::new(ScriptedBackend::new());
        let mut session = Session::new();

        let ran = session.generate(&orchestrator, |_| {}).await.unwrap();

        assert!(!ran);
        assert!(session.generated().is_none());
        assert!(orchestrator.backend().describe_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generate_uses_selected_style_and_stores_result() {
        let orchestrator = Orchestrator::new(ScriptedBackend::new());
        let mut session = Session::new();
        session.set_uploaded(photo());
        session.select_style("corp-grey").unwrap();

        let ran = session.generate(&orchestrator, |_| {}).await.unwrap();

        assert!(ran);
        assert_eq!(session.generated().unwrap().bytes, vec![1]);
        let describe_calls = orchestrator.backend().describe_calls.lock().unwrap();
        assert_eq!(describe_calls.len(), 1);
        assert_eq!(describe_calls[0].1, vec![0xAB, 0xCD]);
    }

    #[tokio::test]
    async fn new_upload_clears_generated_image() {
        let orchestrator = Orchestrator::new(ScriptedBackend::new());
        let mut session = Session::new();
        session.set_uploaded(photo());
        session.generate(&orchestrator, |_| {}).await.unwrap();
        assert!(session.generated().is_some());

        session.set_uploaded(photo());
        assert!(session.generated().is_none());
    }

    #[tokio::test]
    async fn apply_edit_is_a_noop_without_generated_image_or_text() {
        let orchestrator = Orchestrator::new(ScriptedBackend::new());
        let mut session = Session::new();

        session.set_pending_edit("make the background blue");
        assert!(!session.apply_edit(&orchestrator, |_| {}).await.unwrap());

        session.set_uploaded(photo());
        session.generate(&orchestrator, |_| {}).await.unwrap();
        session.set_pending_edit("   ");
        assert!(!session.apply_edit(&orchestrator, |_| {}).await.unwrap());
        assert_eq!(orchestrator.backend().describe_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn apply_edit_consumes_text_and_replaces_image() {
        let orchestrator = Orchestrator::new(ScriptedBackend::new());
        let mut session = Session::new();
        session.set_uploaded(photo());
        session.generate(&orchestrator, |_| {}).await.unwrap();
        let first = session.generated().unwrap().bytes.clone();

        session.set_pending_edit("make the background blue");
        let ran = session.apply_edit(&orchestrator, |_| {}).await.unwrap();

        assert!(ran);
        assert!(session.pending_edit.is_empty());
        assert_ne!(session.generated().unwrap().bytes, first);

        // The edit's describe call sees the previously generated image.
        let describe_calls = orchestrator.backend().describe_calls.lock().unwrap();
        assert_eq!(describe_calls[1].1, first);
        assert!(describe_calls[1].0.contains("make the background blue"));
    }

    #[tokio::test]
    async fn failed_edit_keeps_image_and_discards_text() {
        let orchestrator = Orchestrator::new(ScriptedBackend::new());
        let mut session = Session::new();
        session.set_uploaded(photo());
        session.generate(&orchestrator, |_| {}).await.unwrap();
        let before = session.generated().unwrap().clone();

        orchestrator.backend().describe_calls.lock().unwrap().clear();
        let failing = Orchestrator::new(ScriptedBackend {
            fail_describe: true,
            ..ScriptedBackend::new()
        });
        session.set_pending_edit("add a tie");
        let err = session.apply_edit(&failing, |_| {}).await.unwrap_err();

        assert!(matches!(err, GenerationError::DescribeFailed(_)));
        assert_eq!(session.generated(), Some(&before));
        assert!(session.pending_edit.is_empty());
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let orchestrator = Orchestrator::new(ScriptedBackend::new());
        let mut session = Session::new();
        session.set_uploaded(photo());
        session.generate(&orchestrator, |_| {}).await.unwrap();
        session.set_pending_edit("brighter");

        session.reset();

        assert!(session.uploaded().is_none());
        assert!(session.generated().is_none());
        assert!(session.pending_edit.is_empty());
    }

    #[test]
    fn selecting_an_unknown_style_fails() {
        let mut session = Session::new();
        assert!(session.select_style("vaporwave").is_err());
        assert_eq!(session.selected_style().id, "corp-grey");
        session.select_style("luxury-loft").unwrap();
        assert_eq!(session.selected_style().name, "Luxury Executive");
    }
}
