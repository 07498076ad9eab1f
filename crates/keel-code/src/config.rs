//! Coding-agent configuration with sensible defaults.
//!
//! [`CodeConfig`] captures everything the `keel` binary needs and turns it
//! into keel-rs types: a [`SessionConfig`], the workspace, the permission
//! state and the registered tool set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use keel_rs::agent::trust::TRUSTED_FOLDERS_FILE;
use keel_rs::prelude::*;
use keel_rs::tools::workspace::STATE_DIR_NAME;

use crate::prompt::coding_system_prompt;

pub const PROFILES_FILE: &str = "profiles.json";

/// `$HOME/.keel`, or `./.keel` when no home directory is set.
pub fn default_state_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIR_NAME)
}

/// Configuration for one coding session.
#[derive(Debug, Clone)]
pub struct CodeConfig {
    /// Model identifier. Default: `"anthropic/claude-sonnet-4"`.
    pub model: String,
    /// Maximum agent turns. Default: `40`.
    pub max_turns: u32,
    /// Maximum tokens per model response. Default: `8192`.
    pub max_tokens: u32,
    /// Sampling temperature. Default: `0.2`.
    pub temperature: f32,
    /// Project root the tools operate on.
    pub workdir: PathBuf,
    /// Where `trusted_folders.json` and `profiles.json` live.
    pub state_dir: PathBuf,
    /// Permission profile name.
    pub profile: String,
    pub compaction: Toggle<CompactionConfig>,
    pub delegation: DelegationConfig,
    /// Override for the chat completions base URL.
    pub api_base: Option<String>,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            model: keel_rs::DEFAULT_MODEL.to_string(),
            max_turns: 40,
            max_tokens: 8_192,
            temperature: 0.2,
            workdir: PathBuf::from("."),
            state_dir: default_state_dir(),
            profile: AgentProfile::DEFAULT.to_string(),
            compaction: Toggle::default(),
            delegation: DelegationConfig::default(),
            api_base: None,
        }
    }
}

impl CodeConfig {
    pub fn trust_file(&self) -> PathBuf {
        self.state_dir.join(TRUSTED_FOLDERS_FILE)
    }

    pub fn profiles_file(&self) -> PathBuf {
        self.state_dir.join(PROFILES_FILE)
    }

    pub fn build_session_config(&self) -> SessionConfig {
        SessionConfig {
            compaction: self.compaction.clone(),
            ..SessionConfig::new(self.model.clone(), coding_system_prompt())
                .with_max_turns(self.max_turns)
                .with_max_tokens(self.max_tokens)
                .with_temperature(self.temperature)
        }
    }

    pub fn open_workspace(&self) -> keel_rs::Result<Arc<Workspace>> {
        Ok(Arc::new(Workspace::open(&self.workdir)?))
    }

    pub fn load_profiles(&self) -> keel_rs::Result<ProfileRegistry> {
        ProfileRegistry::load(&self.profiles_file())
    }

    /// Permission state for `root` with the configured profile and the
    /// persisted trust records.
    pub fn build_permissions(
        &self,
        profiles: &ProfileRegistry,
        root: &Path,
    ) -> keel_rs::Result<PermissionState> {
        let profile = profiles.get(&self.profile)?;
        let trust = TrustStore::load(self.trust_file())?;
        Ok(PermissionState::new(profile, trust, root))
    }

    /// Workspace tools plus `delegate`, wired to `dispatcher`.
    pub fn build_tool_set(&self, workspace: &Arc<Workspace>, dispatcher: Dispatcher) -> ToolSet {
        ToolSet::new()
            .with_workspace_tools(workspace)
            .with_if(
                self.delegation.max_depth > 0,
                DelegateTool::new(Arc::new(dispatcher)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_rs::agent::permission::TrustStatus;

    #[test]
    fn defaults_are_coding_tuned() {
        let config = CodeConfig::default();
        assert_eq!(config.max_turns, 40);
        assert_eq!(config.profile, "default");
        assert!(config.compaction.enabled);
        assert!(config.state_dir.ends_with(".keel"));
    }

    #[test]
    fn session_config_carries_overrides() {
        let config = CodeConfig {
            max_turns: 7,
            compaction: Toggle::disabled(),
            ..Default::default()
        };
        let session = config.build_session_config();
        assert_eq!(session.max_turns, 7);
        assert!(session.compaction.active().is_none());
        assert!(session.system_prompt.contains("read_lines"));
    }

    #[test]
    fn permissions_use_state_dir_files() {
        let state = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let config = CodeConfig {
            state_dir: state.path().to_path_buf(),
            profile: "plan".into(),
            ..Default::default()
        };
        let profiles = config.load_profiles().unwrap();
        let permissions = config.build_permissions(&profiles, work.path()).unwrap();
        assert_eq!(permissions.profile().name, "plan");
        assert_eq!(permissions.trust_status(), TrustStatus::Untrusted);

        let unknown = CodeConfig {
            profile: "nope".into(),
            ..config
        };
        assert!(unknown.build_permissions(&profiles, work.path()).is_err());
    }

    #[test]
    fn tool_set_has_delegate_unless_depth_is_zero() {
        let work = tempfile::tempdir().unwrap();
        let config = CodeConfig {
            workdir: work.path().to_path_buf(),
            ..Default::default()
        };
        let ws = config.open_workspace().unwrap();
        let permissions = PermissionState::permissive(ws.root());
        let transport: Arc<dyn ModelTransport> = Arc::new(ScriptedTransport::new([]));
        let dispatcher = Dispatcher::new(
            Arc::clone(&transport),
            Arc::clone(&ws),
            &permissions,
            config.build_session_config(),
        );
        assert!(config.build_tool_set(&ws, dispatcher.clone()).contains("delegate"));

        let flat = CodeConfig {
            delegation: DelegationConfig::default().with_max_depth(0),
            ..config
        };
        assert!(!flat.build_tool_set(&ws, dispatcher).contains("delegate"));
    }
}
