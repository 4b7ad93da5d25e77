use serde::{Deserialize, Serialize};

/// Prefix shared by every secret reference stored in configuration
const SECRET_REF_PREFIX: &str = "secret://";

/// Namespace a secret reference resolves in.
///
/// Namespaces are disjoint: the same reference string can never resolve in
/// more than one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretNamespace {
    ApiKey,
    OAuth2Token,
    OAuth2ClientSecret,
}

impl SecretNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api-key",
            Self::OAuth2Token => "oauth2-token",
            Self::OAuth2ClientSecret => "oauth2-client-secret",
        }
    }
}

/// Opaque reference to a value held in the host secret store.
///
/// The configuration layer stores references in the same fields that
/// otherwise hold plaintext; `SecretRef::parse` is the recognizer that
/// tells the two forms apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(String);

impl SecretRef {
    /// Allocates a new globally-unique reference in the given namespace
    pub fn generate(namespace: SecretNamespace) -> Self {
        Self(format!(
            "{}{}/{}",
            SECRET_REF_PREFIX,
            namespace.as_str(),
            uuid::Uuid::new_v4()
        ))
    }

    /// Recognizes a secret reference, returning `None` for plaintext
    pub fn parse(value: &str) -> Option<Self> {
        value
            .starts_with(SECRET_REF_PREFIX)
            .then(|| Self(value.to_string()))
    }

    /// True when the string is a secret reference rather than plaintext
    pub fn is_reference(value: &str) -> bool {
        value.starts_with(SECRET_REF_PREFIX)
    }

    /// The namespace this reference belongs to, when well-formed
    pub fn namespace(&self) -> Option<SecretNamespace> {
        let rest = self.0.strip_prefix(SECRET_REF_PREFIX)?;
        let (ns, _) = rest.split_once('/')?;
        match ns {
            "api-key" => Some(SecretNamespace::ApiKey),
            "oauth2-token" => Some(SecretNamespace::OAuth2Token),
            "oauth2-client-secret" => Some(SecretNamespace::OAuth2ClientSecret),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// View over a config field that holds plaintext, a reference, or nothing
#[derive(Debug, Clone, PartialEq)]
pub enum SecretForm<'a> {
    Absent,
    Plain(&'a str),
    Reference(SecretRef),
}

impl<'a> SecretForm<'a> {
    /// Classifies an optional config field into its storage form
    pub fn of(field: Option<&'a str>) -> Self {
        match field {
            None => Self::Absent,
            Some(value) => match SecretRef::parse(value) {
                Some(reference) => Self::Reference(reference),
                None => Self::Plain(value),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_generated_refs_are_recognized() {
        let reference = SecretRef::generate(SecretNamespace::ApiKey);

        assert!(SecretRef::is_reference(reference.as_str()));
        assert_eq!(reference.namespace(), Some(SecretNamespace::ApiKey));
    }

    #[test]
    fn test_plaintext_is_not_a_reference() {
        assert!(!SecretRef::is_reference("sk-test-1234"));
        assert_eq!(SecretRef::parse("sk-test-1234"), None);
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        let a = SecretRef::generate(SecretNamespace::OAuth2Token);
        let b = SecretRef::generate(SecretNamespace::OAuth2ClientSecret);

        assert_ne!(a.namespace(), b.namespace());
    }

    #[test]
    fn test_secret_form_classification() {
        let reference = SecretRef::generate(SecretNamespace::ApiKey);

        assert_eq!(SecretForm::of(None), SecretForm::Absent);
        assert_eq!(SecretForm::of(Some("plain")), SecretForm::Plain("plain"));
        assert_eq!(
            SecretForm::of(Some(reference.as_str())),
            SecretForm::Reference(reference.clone())
        );
    }
}
