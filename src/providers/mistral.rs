// 🤖 Mistral Provider - Hosted OCR + chat completions
// One client implements all three collaborator traits: the OCR endpoint for
// images, chat completions for extraction and for correction proposals.

use crate::parser::parse_receipt_json;
use crate::providers::{CorrectionProvider, ExtractionProvider, OcrProvider};
use crate::receipt::Receipt;
use crate::validator::Violation;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.mistral.ai";
const DEFAULT_MODEL: &str = "mistral-large-latest";

const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are an expert receipt analyzer. Extract structured data from receipt text.
Extract the following information:
- Vendor name
- Date (in YYYY-MM-DD format)
- List of items with name, price, quantity, and expense category if available
- Subtotal (if present)
- Tax amount (if present)
- Total amount

Classify each item into one of these categories:
Food & Dining, Groceries, Transportation, Utilities, Office Supplies,
Electronics, Services, Entertainment, Travel, Other.

Return the data as a JSON object with these keys: vendor, date, items, subtotal, tax, total.
For items, use an array of objects with keys: name, price, quantity, category.
If information is missing or unclear, use null for that field.";

const CORRECTION_SYSTEM_PROMPT: &str = "\
You are an expert receipt auditor. You receive a receipt as JSON together with
a list of consistency violations found in it. Produce a corrected version of
the receipt that resolves the violations while staying faithful to the
original values wherever they are plausible.

Return ONLY the corrected receipt as a JSON object with the keys: vendor,
date, items, subtotal, tax, total. For items, use an array of objects with
keys: name, price, quantity, amount, category. Keep each item's category
unchanged.";

pub struct MistralProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl MistralProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        MistralProvider {
            client: Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            temperature: 0.1,
        };

        debug!(model = %self.model, "Sending chat request to Mistral");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Mistral HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Mistral returned {}: {}", status, error_body);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse Mistral response")?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("Mistral reply contained no choices")
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct OcrResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl OcrProvider for MistralProvider {
    fn name(&self) -> &str {
        "mistral-ocr"
    }

    async fn process_image(&self, image: &[u8]) -> Result<String> {
        let payload = json!({
            "image": STANDARD.encode(image),
            "options": {
                "text_extraction": true,
                "structure_analysis": true,
            }
        });

        debug!(bytes = image.len(), "Sending image to Mistral OCR");

        let response = self
            .client
            .post(format!("{}/v1/ocr", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .context("Mistral OCR request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Mistral OCR returned {}: {}", status, error_body);
        }

        let ocr: OcrResponse = response
            .json()
            .await
            .context("Failed to parse Mistral OCR response")?;

        Ok(ocr.text)
    }
}

#[async_trait]
impl ExtractionProvider for MistralProvider {
    fn name(&self) -> &str {
        "mistral"
    }

    async fn extract(&self, ocr_text: &str) -> Result<Receipt> {
        let user_prompt = format!("Extract data from this receipt text:\n\n{}", ocr_text);
        let reply = self.chat(EXTRACTION_SYSTEM_PROMPT, &user_prompt).await?;

        let mut receipt = parse_receipt_json(&reply)?;
        receipt.ocr_text = Some(ocr_text.to_string());
        Ok(receipt)
    }
}

#[async_trait]
impl CorrectionProvider for MistralProvider {
    fn name(&self) -> &str {
        "mistral"
    }

    async fn propose_correction(
        &self,
        receipt: &Receipt,
        violations: &[Violation],
    ) -> Result<Receipt> {
        let user_prompt = render_correction_prompt(receipt, violations)?;
        let reply = self.chat(CORRECTION_SYSTEM_PROMPT, &user_prompt).await?;

        let mut corrected = parse_receipt_json(&reply)?;
        // Corrections are new values of the same receipt identity
        corrected.id = receipt.id.clone();
        corrected.ocr_text = receipt.ocr_text.clone();
        corrected.confidence = receipt.confidence.clone();
        Ok(corrected)
    }
}

/// Build the user prompt for a correction request
fn render_correction_prompt(receipt: &Receipt, violations: &[Violation]) -> Result<String> {
    let receipt_json =
        serde_json::to_string_pretty(receipt).context("Failed to serialize receipt")?;

    let mut lines = vec!["Receipt:".to_string(), receipt_json, String::new()];
    lines.push("Violations found:".to_string());
    for violation in violations {
        lines.push(format!("- {}", violation));
    }

    Ok(lines.join("\n"))
}
