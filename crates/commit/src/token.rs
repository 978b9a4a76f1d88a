//! Pluggable security-token resolution.
//!
//! The commit endpoint rejects bodies without a form key, so the client
//! resolves one from an ordered chain of sources before the first attempt:
//! the primary settings accessor, then a legacy environment fallback, then
//! any page-embedded value handed over at construction.

use std::env;

pub trait TokenSource: Send + Sync {
    fn form_key(&self) -> Option<String>;
}

/// Token known at construction time (settings value or page-embedded key).
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenSource for StaticToken {
    fn form_key(&self) -> Option<String> {
        let token = self.0.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

/// Legacy fallback: token read from an environment variable at lookup time.
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenSource for EnvToken {
    fn form_key(&self) -> Option<String> {
        env::var(&self.var).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Ordered chain; the first source that yields a token wins.
#[derive(Default)]
pub struct TokenChain {
    sources: Vec<Box<dyn TokenSource>>,
}

impl TokenChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, source: impl TokenSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl TokenSource for TokenChain {
    fn form_key(&self) -> Option<String> {
        self.sources.iter().find_map(|source| source.form_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_prefers_earlier_sources() {
        let chain = TokenChain::new()
            .with(StaticToken::new("primary"))
            .with(StaticToken::new("fallback"));
        assert_eq!(chain.form_key().as_deref(), Some("primary"));
    }

    #[test]
    fn chain_falls_through_blank_tokens() {
        let chain = TokenChain::new()
            .with(StaticToken::new("   "))
            .with(StaticToken::new("fallback"));
        assert_eq!(chain.form_key().as_deref(), Some("fallback"));
    }

    #[test]
    fn empty_chain_yields_nothing() {
        assert_eq!(TokenChain::new().form_key(), None);
    }

    #[test]
    fn env_source_reads_variable() {
        let var = "COMMIT_TOKEN_TEST_VAR";
        std::env::set_var(var, "from-env");
        assert_eq!(EnvToken::new(var).form_key().as_deref(), Some("from-env"));
        std::env::remove_var(var);
        assert_eq!(EnvToken::new(var).form_key(), None);
    }
}
