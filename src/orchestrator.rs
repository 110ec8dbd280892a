use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing::{error, info};

use crate::config::{
    DESCRIBE_EDIT_PROMPT, DESCRIBE_FEATURES_PROMPT, EDIT_PROMPT_TEMPLATE,
    HEADSHOT_PROMPT_TEMPLATE,
};
use crate::llm::image::ImageData;

/// The two external calls the pipeline sequences. `GeminiClient` is the
/// production implementation; tests substitute their own.
pub trait HeadshotBackend {
    async fn describe(&self, instruction: &str, image: &ImageData) -> Result<String>;
    async fn render(&self, prompt: &str) -> Result<Vec<ImageData>>;
}

/// Progress points reported to the caller before each external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Analyzing,
    Rendering,
}

impl Phase {
    pub fn message(self) -> &'static str {
        match self {
            Phase::Analyzing => "Analyzing your features...",
            Phase::Rendering => "Rendering your professional look...",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("another generation is already in flight")]
    Busy,
    #[error("describe call failed: {0}")]
    DescribeFailed(anyhow::Error),
    #[error("render call failed: {0}")]
    RenderFailed(anyhow::Error),
    #[error("model returned an empty response: {0}")]
    EmptyResponse(&'static str),
}

/// A finished generation: the rendered image plus the description the
/// render prompt was built from.
#[derive(Debug, Clone)]
pub struct Headshot {
    pub image: ImageData,
    pub description: String,
}

fn edit_describe_instruction(request: &str) -> String {
    DESCRIBE_EDIT_PROMPT.replace("{request}", request)
}

fn compose_headshot_prompt(description: &str, style_prompt: &str) -> String {
    HEADSHOT_PROMPT_TEMPLATE
        .replace("{description}", description)
        .replace("{style}", style_prompt)
}

fn compose_edit_prompt(description: &str) -> String {
    EDIT_PROMPT_TEMPLATE.replace("{description}", description)
}

/// Sequences the describe and render calls. At most one generation may be
/// in flight per instance; a second call fails with `Busy` instead of
/// relying on the caller to check a flag first.
pub struct Orchestrator<B> {
    backend: B,
    in_flight: AtomicBool,
}

struct InFlightToken<'a>(&'a AtomicBool);

impl Drop for InFlightToken<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<B: HeadshotBackend> Orchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            in_flight: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    fn try_begin(&self) -> Result<InFlightToken<'_>, GenerationError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(InFlightToken(&self.in_flight))
        } else {
            Err(GenerationError::Busy)
        }
    }

    /// Initial generation from an uploaded photo and a style's prompt text.
    pub async fn generate(
        &self,
        image: &ImageData,
        style_prompt: &str,
        on_phase: impl FnMut(Phase),
    ) -> Result<Headshot, GenerationError> {
        let style_prompt = style_prompt.to_string();
        self.run(
            image,
            DESCRIBE_FEATURES_PROMPT.to_string(),
            move |description| compose_headshot_prompt(description, &style_prompt),
            on_phase,
        )
        .await
    }

    /// Iterative edit of an already-generated headshot from a free-text
    /// instruction.
    pub async fn edit(
        &self,
        image: &ImageData,
        instruction: &str,
        on_phase: impl FnMut(Phase),
    ) -> Result<Headshot, GenerationError> {
        self.run(
            image,
            edit_describe_instruction(instruction),
            compose_edit_prompt,
            on_phase,
        )
        .await
    }

    async fn run(
        &self,
        image: &ImageData,
        describe_instruction: String,
        compose: impl FnOnce(&str) -> String,
        mut on_phase: impl FnMut(Phase),
    ) -> Result<Headshot, GenerationError> {
        // Released on every exit path, including early returns.
        let _token = self.try_begin()?;

        on_phase(Phase::Analyzing);
        let description = match self.backend.describe(&describe_instruction, image).await {
            Ok(text) => text,
            Err(err) => {
                error!("Describe call failed: {err:#}");
                return Err(GenerationError::DescribeFailed(err));
            }
        };
        let description = description.trim();
        if description.is_empty() {
            error!("Describe call returned no text");
            return Err(GenerationError::EmptyResponse("no description text"));
        }

        on_phase(Phase::Rendering);
        let prompt = compose(description);
        let images = match self.backend.render(&prompt).await {
            Ok(images) => images,
            Err(err) => {
                error!("Render call failed: {err:#}");
                return Err(GenerationError::RenderFailed(err));
            }
        };
        let Some(image) = images.into_iter().next() else {
            error!("Render call returned no images");
            return Err(GenerationError::EmptyResponse("no generated images"));
        };

        info!(
            "Generated headshot ({} bytes, {})",
            image.bytes.len(),
            image.mime_type
        );
        Ok(Headshot {
            image,
            description: description.to_string(),
        })
    }
}
