use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::Enhancer;
use crate::ai::{ChatClient, ChatMessage, prompts};
use crate::model::{Chunk, ChunkContent};

/// Adds an LLM-generated `description` to tables, formulas and images.
pub struct DescriptionEnhancer {
    client: Arc<ChatClient>,
    model: String,
    vision_model: Option<String>,
}

impl DescriptionEnhancer {
    pub fn new(client: Arc<ChatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            vision_model: None,
        }
    }

    /// Images are only described when a vision model is set.
    pub fn with_vision_model(mut self, model: Option<String>) -> Self {
        self.vision_model = model;
        self
    }

    async fn describe(&self, model: &str, user: ChatMessage) -> Result<String> {
        let messages = [ChatMessage::system(prompts::SYSTEM_PROMPT), user];
        self.client
            .complete(model, &messages)
            .await
            .with_context(|| format!("description request to {model} failed"))
    }
}

#[async_trait]
impl Enhancer for DescriptionEnhancer {
    fn name(&self) -> &'static str {
        "description"
    }

    async fn enhance(&self, chunk: Chunk) -> Result<Chunk> {
        let description = match &chunk.content {
            ChunkContent::Text(_) => return Ok(chunk),
            ChunkContent::Table(table) => {
                if table.rows == 0 {
                    return Ok(chunk);
                }
                self.describe(&self.model, ChatMessage::user(prompts::table_prompt(table)))
                    .await?
            }
            ChunkContent::Formula(formula) => {
                self.describe(&self.model, ChatMessage::user(prompts::formula_prompt(formula)))
                    .await?
            }
            ChunkContent::Image(image) => {
                let Some(vision_model) = self.vision_model.as_deref() else {
                    return Ok(chunk);
                };
                let message = ChatMessage::user_with_image(prompts::image_prompt(image), &image.uri);
                self.describe(vision_model, message).await?
            }
        };

        Ok(chunk.with_description(description))
    }
}
