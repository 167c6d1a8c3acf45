//! SSH credential resolution with a once-per-process interactive prompt.
//!
//! Credentials are resolved lazily on first use and cached for the life of
//! the resolver; every pod provisioned within one process shares the same
//! resolved values by reference. The passphrase is collected interactively,
//! never echoed, and never logged.

use std::fmt;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Remote-access credentials shared across all pods in a resolver scope.
///
/// Immutable once resolved; re-resolution only ever serves the cached value.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    /// Remote username.
    pub user: String,
    /// Expanded path to the local private key file.
    pub key_path: Utf8PathBuf,
    /// Key passphrase collected from the operator.
    pub passphrase: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("key_path", &self.key_path)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Errors raised while resolving local key material.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// Raised when the configured private key file does not exist.
    #[error("private key not found: {path}")]
    MissingKey {
        /// Expanded key path that was checked.
        path: Utf8PathBuf,
    },
    /// Raised when the interactive prompt fails (for example, no terminal).
    #[error("failed to read passphrase: {message}")]
    Prompt {
        /// Operating system error string.
        message: String,
    },
}

/// Source of the interactive passphrase. Trait seam so tests can observe
/// prompt counts without a terminal.
pub trait PassphrasePrompt {
    /// Reads the passphrase without echoing it.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Prompt`] when no passphrase can be
    /// collected.
    fn read_passphrase(&self, prompt: &str) -> Result<String, CredentialError>;
}

/// Prompt backed by the controlling terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalPrompt;

impl PassphrasePrompt for TerminalPrompt {
    fn read_passphrase(&self, prompt: &str) -> Result<String, CredentialError> {
        rpassword::prompt_password(prompt).map_err(|err| CredentialError::Prompt {
            message: err.to_string(),
        })
    }
}

/// Configured defaults feeding credential resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshDefaults {
    /// Remote username, typically `root` on rental pods.
    pub user: String,
    /// Private key path before tilde expansion.
    pub key_path: String,
}

/// Resolves and caches SSH credentials for one process scope.
///
/// The cache is guarded so a multi-threaded caller still triggers the
/// interactive prompt at most once.
#[derive(Debug)]
pub struct CredentialResolver<P: PassphrasePrompt> {
    defaults: SshDefaults,
    prompt: P,
    cache: Mutex<Option<Credentials>>,
}

impl<P: PassphrasePrompt> CredentialResolver<P> {
    /// Creates a resolver from configured defaults and a prompt source.
    #[must_use]
    pub const fn new(defaults: SshDefaults, prompt: P) -> Self {
        Self {
            defaults,
            prompt,
            cache: Mutex::new(None),
        }
    }

    /// Returns the process credentials, resolving them on first call.
    ///
    /// Resolution expands the key path, verifies the key file exists, and
    /// prompts for the passphrase. Subsequent calls return the cached value
    /// without prompting.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::MissingKey`] when the key file is absent
    /// and [`CredentialError::Prompt`] when the prompt fails.
    pub fn resolve(&self) -> Result<Credentials, CredentialError> {
        let mut guard = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(credentials) = guard.as_ref() {
            return Ok(credentials.clone());
        }

        let key_path = Utf8PathBuf::from(expand_tilde(&self.defaults.key_path));
        if !key_path.as_std_path().exists() {
            return Err(CredentialError::MissingKey { path: key_path });
        }

        let passphrase = self
            .prompt
            .read_passphrase(&format!("Enter passphrase for key {key_path}: "))?;

        let credentials = Credentials {
            user: self.defaults.user.clone(),
            key_path,
            passphrase,
        };
        *guard = Some(credentials.clone());
        Ok(credentials)
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If the `HOME` environment variable is not set, the input is returned
/// unchanged.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EnvGuard, StaticPrompt};

    fn defaults_for(path: &str) -> SshDefaults {
        SshDefaults {
            user: String::from("root"),
            key_path: path.to_owned(),
        }
    }

    #[test]
    fn resolve_prompts_once_across_repeated_calls() {
        let key = tempfile::NamedTempFile::new().expect("temp key file");
        let key_path = key.path().to_string_lossy().into_owned();
        let prompt = StaticPrompt::new("hunter2");
        let resolver = CredentialResolver::new(defaults_for(&key_path), prompt.clone());

        for _ in 0..3 {
            let credentials = resolver.resolve().expect("resolution should succeed");
            assert_eq!(credentials.user, "root");
            assert_eq!(credentials.passphrase, "hunter2");
        }

        assert_eq!(prompt.calls(), 1, "prompt must fire at most once per scope");
    }

    #[test]
    fn resolve_fails_fast_when_key_is_missing() {
        let resolver = CredentialResolver::new(
            defaults_for("/nonexistent/id_ed25519"),
            StaticPrompt::new("unused"),
        );
        let err = resolver.resolve().expect_err("missing key should error");
        assert!(matches!(err, CredentialError::MissingKey { .. }));
    }

    #[test]
    fn missing_key_never_reaches_the_prompt() {
        let prompt = StaticPrompt::new("unused");
        let resolver =
            CredentialResolver::new(defaults_for("/nonexistent/id_ed25519"), prompt.clone());
        resolver.resolve().expect_err("missing key should error");
        assert_eq!(prompt.calls(), 0);
    }

    #[tokio::test]
    async fn expand_tilde_uses_home() {
        let _guard = EnvGuard::set_vars(&[("HOME", "/home/operator")]).await;
        assert_eq!(
            expand_tilde("~/.ssh/id_ed25519"),
            "/home/operator/.ssh/id_ed25519"
        );
        assert_eq!(expand_tilde("/abs/key"), "/abs/key");
    }

    #[test]
    fn debug_output_redacts_passphrase() {
        let credentials = Credentials {
            user: String::from("root"),
            key_path: Utf8PathBuf::from("/tmp/key"),
            passphrase: String::from("hunter2"),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"), "rendered: {rendered}");
    }
}
