//! Plugins backed by shell commands.
//!
//! Each entry of a manifest's `[commands]` table becomes a command that runs
//! `sh -c <line>` in the plugin directory, with the command arguments as JSON
//! on stdin:
//!
//! - Exit 0 → trimmed stdout is the command output
//! - Non-zero exit → error carrying stderr
//! - Timeout → error, the child is killed

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    serde_json::Value,
    tokio::{io::AsyncWriteExt, process::Command},
    tracing::debug,
};

use crate::{
    manifest::PluginManifest,
    plugin::{CommandHandler, Plugin, PluginContext},
};

/// A single shell-backed command.
pub struct ShellCommand {
    plugin: String,
    name: String,
    line: String,
    timeout: Duration,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(
        plugin: impl Into<String>,
        name: impl Into<String>,
        line: impl Into<String>,
        timeout: Duration,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            name: name.into(),
            line: line.into(),
            timeout,
            env,
            cwd: None,
        }
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }
}

#[async_trait]
impl CommandHandler for ShellCommand {
    async fn call(&self, args: Value) -> Result<String> {
        let input = serde_json::to_string(&args).context("failed to serialize command args")?;

        debug!(
            plugin = %self.plugin,
            command = %self.name,
            line = %self.line,
            args_len = input.len(),
            "spawning shell command"
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.line)
            .envs(&self.env)
            .env("TESSERA_PLUGIN", &self.plugin)
            .env("TESSERA_COMMAND", &self.name)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn command: {}", self.line))?;

        // Feeding stdin counts against the timeout.
        let stdin = child.stdin.take();
        let run = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(input.as_bytes()).await {
                    Ok(()) => {},
                    // The child doesn't read stdin.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {},
                    Err(e) => return Err(e),
                }
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .with_context(|| {
                format!(
                    "command '{}' timed out after {:?}",
                    self.name, self.timeout
                )
            })?
            .with_context(|| format!("command '{}' failed to complete", self.name))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        debug!(
            plugin = %self.plugin,
            command = %self.name,
            exit_code,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "shell command completed"
        );

        if exit_code != 0 {
            let detail = match stderr.trim() {
                "" => stdout.trim(),
                s => s,
            };
            bail!(
                "command '{}' exited with code {exit_code}: {detail}",
                self.name
            );
        }
        Ok(stdout.trim().to_string())
    }
}

/// Plugin whose commands all come from its manifest's `[commands]` table.
pub struct ShellPlugin {
    commands: Vec<(String, Arc<ShellCommand>)>,
}

impl ShellPlugin {
    pub fn from_manifest(manifest: &PluginManifest) -> Self {
        let timeout = Duration::from_secs(manifest.timeout.max(1));
        let commands = manifest
            .commands
            .iter()
            .map(|(name, line)| {
                let command = ShellCommand::new(
                    manifest.name.clone(),
                    name.clone(),
                    line.clone(),
                    timeout,
                    manifest.env.clone(),
                )
                .with_cwd(manifest.root.clone());
                (name.clone(), Arc::new(command))
            })
            .collect();
        Self { commands }
    }
}

#[async_trait]
impl Plugin for ShellPlugin {
    async fn init(&self, ctx: &mut PluginContext) -> Result<()> {
        for (name, command) in &self.commands {
            ctx.register_command(name.clone(), Arc::clone(command) as Arc<dyn CommandHandler>)?;
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json, tessera_events::EventBus};

    fn command(line: &str) -> ShellCommand {
        ShellCommand::new(
            "test",
            "run",
            line,
            Duration::from_secs(5),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn stdout_is_output() {
        let out = command("echo hello").call(Value::Null).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn receives_args_on_stdin() {
        let out = command("cat").call(json!({"op": "commit"})).await.unwrap();
        let echoed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(echoed["op"], "commit");
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_stderr() {
        let err = command("echo 'bad ref' >&2; exit 3")
            .call(Value::Null)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("code 3"), "{msg}");
        assert!(msg.contains("bad ref"), "{msg}");
    }

    #[tokio::test]
    async fn timeout_is_error() {
        let cmd = ShellCommand::new(
            "test",
            "slow",
            "sleep 60",
            Duration::from_millis(100),
            HashMap::new(),
        );
        let err = cmd.call(Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn unread_stdin_still_times_out() {
        let cmd = ShellCommand::new(
            "test",
            "deaf",
            "sleep 60",
            Duration::from_millis(200),
            HashMap::new(),
        );
        // Larger than any pipe buffer, so the write cannot complete.
        let args = json!({"blob": "x".repeat(1 << 20)});
        let started = std::time::Instant::now();
        let err = cmd.call(args).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn env_and_identity_vars() {
        let mut env = HashMap::new();
        env.insert("GREETING".into(), "hi".into());
        let cmd = ShellCommand::new(
            "git",
            "greet",
            "echo \"$GREETING $TESSERA_PLUGIN $TESSERA_COMMAND\"",
            Duration::from_secs(5),
            env,
        );
        assert_eq!(cmd.call(Value::Null).await.unwrap(), "hi git greet");
    }

    #[tokio::test]
    async fn runs_in_plugin_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "here").unwrap();
        let cmd = command("cat marker.txt").with_cwd(Some(tmp.path().to_path_buf()));
        assert_eq!(cmd.call(Value::Null).await.unwrap(), "here");
    }

    #[tokio::test]
    async fn plugin_registers_manifest_commands() {
        let mut manifest = PluginManifest::new("git");
        manifest.commands.insert("a".into(), "echo a".into());
        manifest.commands.insert("b".into(), "echo b".into());
        let plugin = ShellPlugin::from_manifest(&manifest);

        let mut ctx = PluginContext::new("git", Arc::new(EventBus::new()));
        plugin.init(&mut ctx).await.unwrap();
        assert_eq!(ctx.command_names().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
