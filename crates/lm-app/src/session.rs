/// Read side of the credential store.
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
    fn provider_token(&self) -> Option<String>;
}

/// Credentials held for the lifetime of the dashboard. Either token may be
/// absent; empty strings are treated as absent so no blank header is sent.
#[derive(Debug, Clone, Default)]
pub struct Session {
    bearer_token: Option<String>,
    provider_token: Option<String>,
}

impl Session {
    pub fn new(bearer_token: Option<String>, provider_token: Option<String>) -> Self {
        Self {
            bearer_token: non_empty(bearer_token),
            provider_token: non_empty(provider_token),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl CredentialSource for Session {
    fn bearer_token(&self) -> Option<String> {
        self.bearer_token.clone()
    }

    fn provider_token(&self) -> Option<String> {
        self.provider_token.clone()
    }
}

fn non_empty(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
