//! MCP policy engine — which commands `run` may execute and how key
//! patterns are rewritten per environment alias.
//!
//! The policy lives at `<vault_dir>/mcp-policy.yaml` and is reloaded
//! when its mtime changes.  A hard-coded always-denied set is evaluated
//! before anything the file says: commands that dump the environment
//! can never be re-enabled, because the runner's whole point is that
//! injected secrets stay inside the subprocess.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;

use crate::errors::{Result, SecretCtlError};

/// Commands that are denied no matter what the policy file says.
const ALWAYS_DENIED: &[&str] = &["env", "printenv", "set", "export"];

/// Supported policy document version.
const POLICY_VERSION: u32 = 1;

/// What the policy says about a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Deny,
}

impl Default for PolicyAction {
    fn default() -> Self {
        Self::Deny
    }
}

/// One alias entry: a key pattern and the pattern it rewrites to.
#[derive(Debug, Clone, Deserialize)]
pub struct AliasRule {
    pub pattern: String,
    pub target: String,
}

/// The parsed `mcp-policy.yaml` document.
#[derive(Debug, Clone, Deserialize)]
pub struct Policy {
    pub version: u32,

    #[serde(default)]
    pub default_action: PolicyAction,

    #[serde(default)]
    pub denied_commands: Vec<String>,

    #[serde(default)]
    pub allowed_commands: Vec<String>,

    #[serde(default)]
    pub env_aliases: HashMap<String, Vec<AliasRule>>,
}

impl Policy {
    /// Parse and validate a policy document.
    pub fn parse(yaml: &str) -> Result<Self> {
        let policy: Policy = serde_yaml::from_str(yaml)
            .map_err(|e| SecretCtlError::PolicyInvalid(e.to_string()))?;
        if policy.version != POLICY_VERSION {
            return Err(SecretCtlError::PolicyInvalid(format!(
                "version must be {POLICY_VERSION}, got {}",
                policy.version
            )));
        }
        Ok(policy)
    }

    /// Decide whether `command` may run.
    ///
    /// Evaluation order: always-denied set, then `denied_commands`, then
    /// `allowed_commands`, then `default_action`.  Matching is exact on
    /// the program name; arguments are screened only against the
    /// environment-dump escape hatch (`/proc/*/environ`).
    pub fn evaluate(&self, command: &str, args: &[String]) -> Result<()> {
        if is_always_denied(command, args) {
            return Err(SecretCtlError::CommandNotAllowed(command.to_string()));
        }
        if self.denied_commands.iter().any(|c| c == command) {
            return Err(SecretCtlError::CommandNotAllowed(command.to_string()));
        }
        if self.allowed_commands.iter().any(|c| c == command) {
            return Ok(());
        }
        match self.default_action {
            PolicyAction::Allow => Ok(()),
            PolicyAction::Deny => Err(SecretCtlError::CommandNotAllowed(command.to_string())),
        }
    }

    /// Rewrite one requested key pattern through the alias table for
    /// environment `env`.  The first matching rule wins; with no `env`
    /// or no match the pattern passes through unchanged.
    pub fn apply_alias(&self, env: Option<&str>, pattern: &str) -> String {
        let Some(env) = env else {
            return pattern.to_string();
        };
        let Some(rules) = self.env_aliases.get(env) else {
            return pattern.to_string();
        };
        for rule in rules {
            if pattern_matches(&rule.pattern, pattern) {
                return rule.target.clone();
            }
        }
        pattern.to_string()
    }
}

/// The hard-coded deny list, including any reference to `/proc/*/environ`.
fn is_always_denied(command: &str, args: &[String]) -> bool {
    if ALWAYS_DENIED.contains(&command) {
        return true;
    }
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .any(references_proc_environ)
}

fn references_proc_environ(s: &str) -> bool {
    if let Some(rest) = s.find("/proc/").map(|i| &s[i + "/proc/".len()..]) {
        return rest.contains("/environ");
    }
    false
}

/// Single trailing-`*` wildcard matching one `/`-separated segment;
/// anything else is a literal match.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => {
            let Some(rest) = key.strip_prefix(prefix) else {
                return false;
            };
            !rest.is_empty() && !rest.contains('/')
        }
        None => pattern == key,
    }
}

/// Policy handle that re-reads the file when its mtime changes.
pub struct PolicyLoader {
    path: PathBuf,
    cached: Option<(SystemTime, Policy)>,
}

impl PolicyLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when a policy file is present at all.
    pub fn exists(&self) -> bool {
        self.path.symlink_metadata().is_ok()
    }

    /// Load the policy, enforcing the file requirements: a regular file
    /// (not a symlink), owned by the current user, mode no broader than
    /// 0600.  Anything else fails closed.
    pub fn load(&mut self) -> Result<&Policy> {
        let meta = self
            .path
            .symlink_metadata()
            .map_err(|_| SecretCtlError::PolicyMissing(self.path.clone()))?;

        if meta.file_type().is_symlink() || !meta.is_file() {
            return Err(SecretCtlError::PolicyInvalid(
                "policy must be a regular file, not a symlink".into(),
            ));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if meta.uid() != unsafe { libc::geteuid() } {
                return Err(SecretCtlError::PolicyInvalid(
                    "policy file is not owned by the current user".into(),
                ));
            }
            if meta.mode() & 0o077 != 0 {
                return Err(SecretCtlError::PolicyInvalid(
                    "policy file permissions are broader than 0600".into(),
                ));
            }
        }

        let mtime = meta
            .modified()
            .map_err(|e| SecretCtlError::io("reading policy mtime", e))?;

        let stale = match &self.cached {
            Some((cached_mtime, _)) => *cached_mtime != mtime,
            None => true,
        };
        if stale {
            let contents = std::fs::read_to_string(&self.path)
                .map_err(|e| SecretCtlError::io("reading mcp-policy.yaml", e))?;
            let policy = Policy::parse(&contents)?;
            self.cached = Some((mtime, policy));
        }

        Ok(&self.cached.as_ref().expect("just cached").1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BASIC: &str = "version: 1\ndefault_action: deny\nallowed_commands: [echo]\n";

    fn no_args() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn parses_full_document() {
        let yaml = r#"
version: 1
default_action: deny
denied_commands: [curl]
allowed_commands: [echo, node]
env_aliases:
  production:
    - pattern: "db/*"
      target: "db/prod/*"
    - pattern: "API_KEY"
      target: "prod/API_KEY"
"#;
        let policy = Policy::parse(yaml).unwrap();
        assert_eq!(policy.default_action, PolicyAction::Deny);
        assert_eq!(policy.allowed_commands, vec!["echo", "node"]);
        assert_eq!(policy.env_aliases["production"].len(), 2);
    }

    #[test]
    fn rejects_wrong_version() {
        assert!(Policy::parse("version: 2\n").is_err());
    }

    #[test]
    fn default_action_defaults_to_deny() {
        let policy = Policy::parse("version: 1\n").unwrap();
        assert!(policy.evaluate("anything", &no_args()).is_err());
    }

    #[test]
    fn evaluation_order() {
        let yaml = r#"
version: 1
default_action: deny
denied_commands: [node]
allowed_commands: [node, echo]
"#;
        let policy = Policy::parse(yaml).unwrap();
        // deny list wins over allow list
        assert!(policy.evaluate("node", &no_args()).is_err());
        assert!(policy.evaluate("echo", &no_args()).is_ok());
        assert!(policy.evaluate("curl", &no_args()).is_err());
    }

    #[test]
    fn always_denied_cannot_be_reenabled() {
        let yaml = r#"
version: 1
default_action: allow
allowed_commands: [env, printenv, set, export]
"#;
        let policy = Policy::parse(yaml).unwrap();
        for cmd in ["env", "printenv", "set", "export"] {
            assert!(
                matches!(
                    policy.evaluate(cmd, &no_args()),
                    Err(SecretCtlError::CommandNotAllowed(_))
                ),
                "{cmd} must stay denied"
            );
        }
    }

    #[test]
    fn proc_environ_references_are_denied() {
        let policy = Policy::parse("version: 1\ndefault_action: allow\n").unwrap();
        assert!(policy
            .evaluate("cat", &["/proc/self/environ".to_string()])
            .is_err());
        assert!(policy
            .evaluate("cat", &["/proc/1234/environ".to_string()])
            .is_err());
        assert!(policy.evaluate("cat", &["/proc/cpuinfo".to_string()]).is_ok());
    }

    #[test]
    fn wildcard_matches_one_segment() {
        assert!(pattern_matches("db/*", "db/password"));
        assert!(!pattern_matches("db/*", "db/a/b"));
        assert!(!pattern_matches("db/*", "db/"));
        assert!(!pattern_matches("db/*", "other/password"));
        assert!(pattern_matches("API_KEY", "API_KEY"));
        assert!(!pattern_matches("API_KEY", "API_KEY2"));
    }

    #[test]
    fn alias_first_match_wins() {
        let yaml = r#"
version: 1
env_aliases:
  staging:
    - pattern: "db/*"
      target: "staging/db/*"
    - pattern: "db/password"
      target: "never/reached"
"#;
        let policy = Policy::parse(yaml).unwrap();
        assert_eq!(
            policy.apply_alias(Some("staging"), "db/password"),
            "staging/db/*"
        );
        assert_eq!(policy.apply_alias(Some("staging"), "other"), "other");
        assert_eq!(policy.apply_alias(None, "db/password"), "db/password");
        assert_eq!(
            policy.apply_alias(Some("unknown"), "db/password"),
            "db/password"
        );
    }

    #[cfg(unix)]
    fn write_policy(dir: &TempDir, contents: &str, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("mcp-policy.yaml");
        fs::write(&path, contents).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn loader_accepts_strict_file() {
        let dir = TempDir::new().unwrap();
        let path = write_policy(&dir, BASIC, 0o600);
        let mut loader = PolicyLoader::new(path);
        assert!(loader.load().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn loader_rejects_broad_permissions() {
        let dir = TempDir::new().unwrap();
        let path = write_policy(&dir, BASIC, 0o644);
        let mut loader = PolicyLoader::new(path);
        assert!(matches!(
            loader.load(),
            Err(SecretCtlError::PolicyInvalid(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn loader_rejects_symlink() {
        use std::os::unix::fs::symlink;
        let dir = TempDir::new().unwrap();
        let real = write_policy(&dir, BASIC, 0o600);
        let link = dir.path().join("link.yaml");
        symlink(&real, &link).unwrap();

        let mut loader = PolicyLoader::new(link);
        assert!(matches!(
            loader.load(),
            Err(SecretCtlError::PolicyInvalid(_))
        ));
    }

    #[test]
    fn loader_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut loader = PolicyLoader::new(dir.path().join("mcp-policy.yaml"));
        assert!(matches!(
            loader.load(),
            Err(SecretCtlError::PolicyMissing(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn loader_reloads_on_mtime_change() {
        let dir = TempDir::new().unwrap();
        let path = write_policy(&dir, BASIC, 0o600);
        let mut loader = PolicyLoader::new(path.clone());
        assert!(loader.load().unwrap().evaluate("echo", &no_args()).is_ok());

        // Rewrite with a different allow list and a bumped mtime.
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&path, "version: 1\ndefault_action: deny\nallowed_commands: [node]\n").unwrap();

        let policy = loader.load().unwrap();
        assert!(policy.evaluate("echo", &no_args()).is_err());
        assert!(policy.evaluate("node", &no_args()).is_ok());
    }
}
