use sha2::{Digest, Sha256};

/// Process-lifetime identity shared by every Code-Assist request.
///
/// Explicitly constructed once at extension activation and handed into
/// adapters; never a module-level global.
#[derive(Debug, Clone)]
pub struct ProcessSession {
    /// Random per-process conversation namespace
    pub session_uuid: String,
    /// Synthetic browser fingerprint used as the Antigravity User-Agent
    pub device_fingerprint: String,
}

impl ProcessSession {
    pub fn generate() -> Self {
        let session_uuid = uuid::Uuid::new_v4().to_string();
        // A stable-looking Chrome UA with a per-process build fingerprint;
        // the server only checks shape, not authenticity
        let build = u32::from_le_bytes(
            uuid::Uuid::new_v4().as_bytes()[..4]
                .try_into()
                .expect("uuid has at least four bytes"),
        ) % 9000
            + 1000;
        let device_fingerprint = format!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) antigravity/1.0.{build} Chrome/128.0.0.0 Safari/537.36"
        );
        Self { session_uuid, device_fingerprint }
    }
}

/// Derives the deterministic session id correlating one conversation.
///
/// `-{processUuid}:{model}:{project|default}:{seed|default}` where the seed
/// is the first 16 hex chars of sha256(system ++ first user text). Replays
/// of the same conversation inside one process map to the same id.
pub fn session_id(
    process: &ProcessSession,
    normalized_model: &str,
    project_id: Option<&str>,
    system_text: &str,
    first_user_text: Option<&str>,
) -> String {
    let seed = match first_user_text {
        Some(first_user) => {
            let mut hasher = Sha256::new();
            hasher.update(system_text.as_bytes());
            hasher.update(first_user.as_bytes());
            let digest = hasher.finalize();
            let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
            format!("seed-{}", &hex[..16])
        }
        None => "default".to_string(),
    };

    format!(
        "-{}:{}:{}:{}",
        process.session_uuid,
        normalized_model,
        project_id.unwrap_or("default"),
        seed
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_session_id_is_deterministic() {
        let process = ProcessSession::generate();

        let a = session_id(&process, "gemini-3-pro", Some("p1"), "sys", Some("hello"));
        let b = session_id(&process, "gemini-3-pro", Some("p1"), "sys", Some("hello"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_session_id_varies_with_inputs() {
        let process = ProcessSession::generate();

        let base = session_id(&process, "gemini-3-pro", Some("p1"), "sys", Some("hello"));
        assert_ne!(
            base,
            session_id(&process, "gemini-3-pro", Some("p1"), "sys", Some("other"))
        );
        assert_ne!(
            base,
            session_id(&process, "claude-opus", Some("p1"), "sys", Some("hello"))
        );
        assert_ne!(
            base,
            session_id(&process, "gemini-3-pro", None, "sys", Some("hello"))
        );
    }

    #[test]
    fn test_session_id_shape() {
        let process = ProcessSession::generate();
        let id = session_id(&process, "m", None, "", None);

        assert!(id.starts_with(&format!("-{}", process.session_uuid)));
        assert!(id.ends_with(":default:default"));
    }

    #[test]
    fn test_process_sessions_are_distinct() {
        assert_ne!(
            ProcessSession::generate().session_uuid,
            ProcessSession::generate().session_uuid
        );
    }
}
