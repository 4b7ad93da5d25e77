//! Host capabilities consumed by the core.
//!
//! The editor host supplies a secure key-value store and a handful of
//! interaction primitives (prompts, external browser, clipboard). The core
//! only ever talks to these traits; tests plug in the in-memory
//! implementations below.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

/// Secure key-value store provided by the host.
///
/// Writes are durable before the future resolves. `keys` exists so the
/// orphan-reference sweep can enumerate what is held.
#[async_trait]
pub trait SecretStorage: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    async fn keys(&self) -> anyhow::Result<Vec<String>>;
}

/// In-memory secret storage used by tests and as a fallback host
#[derive(Default)]
pub struct InMemorySecretStorage {
    values: Mutex<HashMap<String, String>>,
}

impl InMemorySecretStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SecretStorage for InMemorySecretStorage {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }
}

/// Device-code details shown to the user during RFC 8628 flows
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePrompt {
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
}

/// Interaction primitives provided by the host UI
#[async_trait]
pub trait HostInterface: Send + Sync {
    /// Prompts the user for a secret value (API key entry). Returns `None`
    /// on dismiss.
    async fn prompt_secret(&self, prompt: &str) -> anyhow::Result<Option<String>>;

    /// Opens a URL in the external browser
    async fn open_external(&self, url: &str) -> anyhow::Result<()>;

    /// Shows a device-code prompt, copying the user code to the clipboard
    /// and offering an "Open URL" action
    async fn show_device_prompt(&self, prompt: &DevicePrompt) -> anyhow::Result<()>;
}

/// Scripted host used by tests: canned prompt answers, recorded opens
#[derive(Default)]
pub struct ScriptedHost {
    prompt_answers: Mutex<Vec<Option<String>>>,
    pub opened_urls: Mutex<Vec<String>>,
    pub device_prompts: Mutex<Vec<DevicePrompt>>,
}

impl ScriptedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues an answer for the next `prompt_secret` call
    pub fn push_prompt_answer(&self, answer: Option<&str>) {
        self.prompt_answers
            .lock()
            .unwrap()
            .push(answer.map(str::to_string));
    }

    pub fn last_opened_url(&self) -> Option<String> {
        self.opened_urls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl HostInterface for ScriptedHost {
    async fn prompt_secret(&self, _prompt: &str) -> anyhow::Result<Option<String>> {
        let mut answers = self.prompt_answers.lock().unwrap();
        if answers.is_empty() {
            Ok(None)
        } else {
            Ok(answers.remove(0))
        }
    }

    async fn open_external(&self, url: &str) -> anyhow::Result<()> {
        self.opened_urls.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn show_device_prompt(&self, prompt: &DevicePrompt) -> anyhow::Result<()> {
        self.device_prompts.lock().unwrap().push(prompt.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_in_memory_storage_round_trip() {
        let storage = InMemorySecretStorage::new();

        storage.set("k", "v").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some("v".to_string()));

        storage.delete("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scripted_host_prompts_in_order() {
        let host = ScriptedHost::new();
        host.push_prompt_answer(Some("first"));
        host.push_prompt_answer(None);

        assert_eq!(
            host.prompt_secret("key?").await.unwrap(),
            Some("first".to_string())
        );
        assert_eq!(host.prompt_secret("key?").await.unwrap(), None);
    }
}
