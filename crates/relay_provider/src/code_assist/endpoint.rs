use std::sync::Mutex;

/// Canonical Code-Assist base URLs, in fixed fallback order
pub const CODE_ASSIST_ENDPOINTS: &[&str] = &[
    "https://cloudcode-pa.googleapis.com",
    "https://cloudcode.googleapis.com",
];

/// Endpoint fallback state shared across requests.
///
/// Candidates are ordered: last-successful endpoint first, remaining
/// canonical endpoints in fixed order, then the user-configured base URL.
/// A success pins its endpoint as active for subsequent requests.
pub struct EndpointRotation {
    canonical: Vec<String>,
    active: Mutex<Option<String>>,
}

impl Default for EndpointRotation {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRotation {
    pub fn new() -> Self {
        Self::with_canonical(
            CODE_ASSIST_ENDPOINTS
                .iter()
                .map(|url| url.to_string())
                .collect(),
        )
    }

    /// Rotation over a custom canonical list; tests point this at local
    /// servers
    pub fn with_canonical(canonical: Vec<String>) -> Self {
        Self { canonical, active: Mutex::new(None) }
    }

    /// Candidate base URLs for one request, in try order
    pub fn candidates(&self, user_base_url: Option<&str>) -> Vec<String> {
        let active = self.active.lock().unwrap().clone();
        let mut ordered = Vec::with_capacity(self.canonical.len() + 1);

        if let Some(active) = active {
            ordered.push(active);
        }
        for canonical in &self.canonical {
            if !ordered.iter().any(|url| url == canonical) {
                ordered.push(canonical.clone());
            }
        }
        if let Some(user) = user_base_url {
            let user = user.trim_end_matches('/').to_string();
            if !user.is_empty() && !ordered.contains(&user) {
                ordered.push(user);
            }
        }
        ordered
    }

    /// Pins the endpoint that just served a successful response
    pub fn mark_success(&self, base_url: &str) {
        *self.active.lock().unwrap() = Some(base_url.to_string());
    }

    pub fn active(&self) -> Option<String> {
        self.active.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_initial_order_is_canonical_then_user() {
        let rotation = EndpointRotation::new();
        let candidates = rotation.candidates(Some("https://user.example/"));

        assert_eq!(candidates[0], CODE_ASSIST_ENDPOINTS[0]);
        assert_eq!(candidates[1], CODE_ASSIST_ENDPOINTS[1]);
        assert_eq!(candidates[2], "https://user.example");
    }

    #[test]
    fn test_success_pins_active_first() {
        let rotation = EndpointRotation::new();
        rotation.mark_success(CODE_ASSIST_ENDPOINTS[1]);

        let candidates = rotation.candidates(None);
        assert_eq!(candidates[0], CODE_ASSIST_ENDPOINTS[1]);
        assert_eq!(candidates[1], CODE_ASSIST_ENDPOINTS[0]);
        assert_eq!(candidates.len(), CODE_ASSIST_ENDPOINTS.len());
    }

    #[test]
    fn test_user_url_never_duplicated() {
        let rotation = EndpointRotation::new();
        rotation.mark_success("https://user.example");

        let candidates = rotation.candidates(Some("https://user.example"));
        assert_eq!(
            candidates.iter().filter(|url| *url == "https://user.example").count(),
            1
        );
        // Active user endpoint still leads
        assert_eq!(candidates[0], "https://user.example");
    }

    #[test]
    fn test_no_user_url() {
        let rotation = EndpointRotation::new();
        assert_eq!(rotation.candidates(None).len(), CODE_ASSIST_ENDPOINTS.len());
        assert_eq!(rotation.active(), None);
    }
}
