use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{ModelService, ServiceError};
use crate::availability::{Availability, UnavailableReason};
use crate::config::Config;

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

/// One completed question/answer exchange
#[derive(Debug, Clone)]
struct Turn {
    question: String,
    answer: String,
}

/// [`ModelService`] backed by a local Ollama server.
///
/// Conversation context lives here, not in the chat session: each successful
/// exchange is remembered and replayed into the next prompt.
pub struct OllamaService {
    client: Client,
    base_url: String,
    model: String,
    instructions: String,
    enabled: bool,
    history_turns: usize,
    signal: watch::Sender<Availability>,
    transcript: Mutex<VecDeque<Turn>>,
}

impl OllamaService {
    pub fn new(config: &Config) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let initial = if config.enabled {
            Availability::Unready
        } else {
            Availability::Unavailable(UnavailableReason::FeatureNotEnabled)
        };
        let (signal, _) = watch::channel(initial);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            instructions: config.instructions.clone(),
            enabled: config.enabled,
            history_turns: config.history_turns,
            signal,
            transcript: Mutex::new(VecDeque::new()),
        })
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status { status, body });
        }

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }

    async fn probe(&self) -> Availability {
        if !self.enabled {
            return Availability::Unavailable(UnavailableReason::FeatureNotEnabled);
        }

        match self.list_models().await {
            Ok(models) if has_model(&models, &self.model) => Availability::Available,
            Ok(_) => Availability::Unready,
            Err(ServiceError::Http(e)) => Availability::Unavailable(UnavailableReason::Other(
                format!("could not reach Ollama at {} ({}). Make sure Ollama is running with: ollama serve", self.base_url, e),
            )),
            Err(e) => Availability::Unavailable(UnavailableReason::Other(e.to_string())),
        }
    }

    fn build_prompt(&self, question: &str) -> String {
        let transcript = self.transcript.lock().unwrap_or_else(PoisonError::into_inner);
        build_prompt(transcript.iter(), question)
    }

    fn remember(&self, question: &str, answer: &str) {
        let mut transcript = self.transcript.lock().unwrap_or_else(PoisonError::into_inner);
        transcript.push_back(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
        });
        while transcript.len() > self.history_turns {
            transcript.pop_front();
        }
    }
}

#[async_trait]
impl ModelService for OllamaService {
    fn availability(&self) -> Availability {
        self.signal.borrow().clone()
    }

    async fn respond(&self, question: &str) -> Result<String, ServiceError> {
        if !self.enabled {
            return Err(ServiceError::Unavailable("assistant not enabled"));
        }

        let url = format!("{}/api/generate", self.base_url);
        let prompt = self.build_prompt(question);

        let request = OllamaRequest {
            model: &self.model,
            prompt: &prompt,
            system: &self.instructions,
            stream: false,
        };

        tracing::debug!(model = %self.model, prompt_chars = prompt.chars().count(), "Sending generate request");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status { status, body });
        }

        let ollama_response: OllamaResponse = response.json().await?;
        let answer = ollama_response.response.trim().to_string();
        if answer.is_empty() {
            return Err(ServiceError::EmptyReply);
        }

        self.remember(question, &answer);
        Ok(answer)
    }

    async fn refresh(&self) {
        let next = self.probe().await;
        let previous = self.signal.send_replace(next.clone());
        if previous != next {
            tracing::info!(model = %self.model, from = previous.as_str(), to = next.as_str(), "Model availability changed");
        }
    }
}

/// Model names from `/api/tags` always carry a tag; a bare configured name means `:latest`.
fn has_model(models: &[String], wanted: &str) -> bool {
    let with_latest = if wanted.contains(':') {
        None
    } else {
        Some(format!("{}:latest", wanted))
    };

    models
        .iter()
        .any(|m| m == wanted || with_latest.as_deref() == Some(m.as_str()))
}

fn build_prompt<'a>(transcript: impl Iterator<Item = &'a Turn>, question: &str) -> String {
    let mut prompt = String::new();
    let mut transcript = transcript.peekable();

    // Include chat history for context
    if transcript.peek().is_some() {
        prompt.push_str("Conversation so far:\n");
        for turn in transcript {
            prompt.push_str(&format!("User: {}\n", turn.question));
            prompt.push_str(&format!("Assistant: {}\n", turn.answer));
        }
        prompt.push('\n');
        prompt.push_str("Current question: ");
    }

    prompt.push_str(question);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(config: &Config) -> OllamaService {
        OllamaService::new(config).unwrap()
    }

    #[test]
    fn test_has_model_exact() {
        let models = vec!["llama3.2:latest".to_string(), "gemma3:4b".to_string()];
        assert!(has_model(&models, "llama3.2:latest"));
        assert!(has_model(&models, "gemma3:4b"));
        assert!(!has_model(&models, "gemma3:12b"));
    }

    #[test]
    fn test_has_model_bare_name_means_latest() {
        let models = vec!["llama3.2:latest".to_string()];
        assert!(has_model(&models, "llama3.2"));
        assert!(!has_model(&models, "llama3"));
    }

    #[test]
    fn test_first_prompt_is_just_the_question() {
        let prompt = build_prompt(std::iter::empty::<&Turn>(), "What is AppleCare?");
        assert_eq!(prompt, "What is AppleCare?");
    }

    #[test]
    fn test_prompt_replays_transcript() {
        let turns = [Turn {
            question: "hi".to_string(),
            answer: "hello".to_string(),
        }];
        let prompt = build_prompt(turns.iter(), "and then?");
        assert!(prompt.starts_with("Conversation so far:\nUser: hi\nAssistant: hello\n"));
        assert!(prompt.ends_with("Current question: and then?"));
    }

    #[test]
    fn test_transcript_is_capped() {
        let mut config = Config::new();
        config.history_turns = 2;
        let svc = service(&config);
        svc.remember("q1", "a1");
        svc.remember("q2", "a2");
        svc.remember("q3", "a3");

        let prompt = svc.build_prompt("q4");
        assert!(!prompt.contains("q1"));
        assert!(prompt.contains("User: q2"));
        assert!(prompt.contains("User: q3"));
    }

    #[test]
    fn test_initial_signal() {
        let svc = service(&Config::new());
        assert_eq!(svc.availability(), Availability::Unready);

        let mut disabled = Config::new();
        disabled.enabled = false;
        let svc = service(&disabled);
        assert_eq!(
            svc.availability(),
            Availability::Unavailable(UnavailableReason::FeatureNotEnabled)
        );
    }

    #[tokio::test]
    async fn test_disabled_service_skips_network() {
        let mut config = Config::new();
        config.enabled = false;
        // Unroutable address: any request would fail with Http, not Unavailable
        config.base_url = "http://127.0.0.1:9".to_string();
        let svc = service(&config);

        svc.refresh().await;
        assert_eq!(
            svc.availability(),
            Availability::Unavailable(UnavailableReason::FeatureNotEnabled)
        );
        assert!(matches!(svc.respond("hi").await, Err(ServiceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let mut config = Config::new();
        config.base_url = "http://127.0.0.1:9".to_string();
        config.request_timeout_secs = 2;
        let svc = service(&config);

        svc.refresh().await;
        match svc.availability() {
            Availability::Unavailable(UnavailableReason::Other(description)) => {
                assert!(description.contains("127.0.0.1:9"));
            }
            other => panic!("unexpected signal: {:?}", other),
        }
    }
}
