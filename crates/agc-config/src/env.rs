use std::collections::HashMap;

/// A source of secret/environment values, tried in chain order. The
/// runtime ships concrete implementations for process environment and
/// `.env` files; keychain/pass/1Password-style providers are external
/// collaborators that plug into this same trait (out of scope for the
/// core per the credential-provider-lookup-chain non-goal) but the chain
/// itself is a first-class part of the runtime.
pub trait EnvProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

pub struct ProcessEnvProvider;

impl EnvProvider for ProcessEnvProvider {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A static map of values parsed from one or more `.env` files supplied by
/// the caller.
pub struct DotEnvProvider {
    values: HashMap<String, String>,
}

impl DotEnvProvider {
    pub fn from_str(contents: &str) -> Self {
        let mut values = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                let v = v.trim().trim_matches('"').trim_matches('\'');
                values.insert(k.trim().to_string(), v.to_string());
            }
        }
        Self { values }
    }
}

impl EnvProvider for DotEnvProvider {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// The chained environment resolver. The only process-wide state the
/// runtime needs: built once at startup and passed down explicitly — never
/// a module-level singleton.
pub struct EnvResolver {
    providers: Vec<Box<dyn EnvProvider>>,
}

impl EnvResolver {
    pub fn new() -> Self {
        Self { providers: Vec::new() }
    }

    pub fn with_provider(mut self, provider: Box<dyn EnvProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// First non-empty value across the chain wins.
    pub fn get(&self, name: &str) -> Option<String> {
        for p in &self.providers {
            if let Some(v) = p.get(name) {
                if !v.is_empty() {
                    return Some(v);
                }
            }
        }
        None
    }

    /// Names from `names` that resolve to nothing (or an empty string).
    pub fn required_env(&self, names: &[&str]) -> Vec<String> {
        names.iter().filter(|n| self.get(n).is_none()).map(|n| n.to_string()).collect()
    }

    /// Expand `${VAR}` references in `input`. Unresolved variables are an
    /// error — this must run at config-load time, never lazily at use, so
    /// a missing secret fails fast before the runtime starts.
    pub fn expand(&self, input: &str) -> Result<String, ExpansionError> {
        let mut out = String::with_capacity(input.len());
        let bytes = input.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
                if let Some(end) = input[i + 2..].find('}') {
                    let name = &input[i + 2..i + 2 + end];
                    let value = self.get(name).ok_or_else(|| ExpansionError::Unresolved(name.to_string()))?;
                    out.push_str(&value);
                    i += 2 + end + 1;
                    continue;
                }
            }
            out.push(input[i..].chars().next().unwrap());
            i += input[i..].chars().next().unwrap().len_utf8();
        }
        Ok(out)
    }
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new().with_provider(Box::new(ProcessEnvProvider))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExpansionError {
    #[error("unresolved environment variable: {0}")]
    Unresolved(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider(HashMap<String, String>);
    impl EnvProvider for FixedProvider {
        fn get(&self, name: &str) -> Option<String> {
            self.0.get(name).cloned()
        }
    }

    fn fixed(pairs: &[(&str, &str)]) -> FixedProvider {
        FixedProvider(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn first_non_empty_value_wins() {
        let resolver = EnvResolver::new()
            .with_provider(Box::new(fixed(&[("A", "")])))
            .with_provider(Box::new(fixed(&[("A", "second")])));
        assert_eq!(resolver.get("A").as_deref(), Some("second"));
    }

    #[test]
    fn required_env_lists_missing_names() {
        let resolver = EnvResolver::new().with_provider(Box::new(fixed(&[("A", "x")])));
        let missing = resolver.required_env(&["A", "B"]);
        assert_eq!(missing, vec!["B"]);
    }

    #[test]
    fn expand_replaces_var_reference() {
        let resolver = EnvResolver::new().with_provider(Box::new(fixed(&[("KEY", "secret")])));
        let expanded = resolver.expand("token=${KEY}").unwrap();
        assert_eq!(expanded, "token=secret");
    }

    #[test]
    fn expand_errors_on_unresolved_variable() {
        let resolver = EnvResolver::new();
        let err = resolver.expand("token=${MISSING}").unwrap_err();
        assert!(matches!(err, ExpansionError::Unresolved(n) if n == "MISSING"));
    }

    #[test]
    fn expand_is_idempotent_on_already_expanded_value() {
        let resolver = EnvResolver::new().with_provider(Box::new(fixed(&[("KEY", "secret")])));
        let once = resolver.expand("token=${KEY}").unwrap();
        let twice = resolver.expand(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn dotenv_provider_parses_simple_lines() {
        let p = DotEnvProvider::from_str("A=1\n# comment\nB=\"two\"\n");
        assert_eq!(p.get("A").as_deref(), Some("1"));
        assert_eq!(p.get("B").as_deref(), Some("two"));
    }
}
