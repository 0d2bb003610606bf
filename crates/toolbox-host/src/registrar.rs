//! Remote command registration
//!
//! Publishes the registry's command payloads to the platform and withdraws
//! them again. Every operation fails closed: without a publisher, or when the
//! platform call fails, the failure is logged and reported to the caller.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::registry::Registry;

/// Remote command registration API
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Replace every global command; returns how many the platform accepted
    async fn put_global(&self, payloads: Vec<Value>) -> anyhow::Result<usize>;

    /// Replace every command of one scope (guild)
    async fn put_scoped(&self, payloads: Vec<Value>, scope: &str) -> anyhow::Result<usize>;

    /// Delete one command, globally or from `scope`
    async fn delete(&self, command_id: &str, scope: Option<&str>) -> anyhow::Result<()>;
}

/// Which beta commands to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    One(String),
    Many(Vec<String>),
}

impl Selection {
    fn includes(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::One(wanted) => wanted == name,
            Self::Many(wanted) => wanted.iter().any(|w| w == name),
        }
    }
}

#[derive(Clone, Default)]
pub struct Registrar {
    publisher: Option<Arc<dyn CommandPublisher>>,
}

impl Registrar {
    pub fn new(publisher: Arc<dyn CommandPublisher>) -> Self {
        Self {
            publisher: Some(publisher),
        }
    }

    /// A registrar with no remote client; every call fails
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.publisher.is_some()
    }

    fn publisher(&self) -> Option<&Arc<dyn CommandPublisher>> {
        if self.publisher.is_none() {
            error!(target: "registrar", "Remote client not ready");
        }
        self.publisher.as_ref()
    }

    /// Publish every slash command and context menu globally
    ///
    /// Returns the number of commands the platform registered.
    pub async fn register_primary(&self, registry: &Registry) -> Option<usize> {
        let publisher = self.publisher()?;
        let mut payloads: Vec<Value> = registry.export_commands().into_values().collect();
        payloads.extend(registry.export_context_menus().into_values());

        match publisher.put_global(payloads).await {
            Ok(count) => {
                info!(target: "registrar", "Registered {} slash command(s)", count);
                Some(count)
            }
            Err(e) => {
                error!(target: "registrar", "Failed to register slash commands: {:#}", e);
                None
            }
        }
    }

    /// Publish the selected beta commands to one scope
    pub async fn register_beta(
        &self,
        registry: &Registry,
        selection: &Selection,
        scope: &str,
    ) -> Option<usize> {
        let publisher = self.publisher()?;
        if scope.is_empty() {
            warn!(target: "registrar", "Invalid scope id");
            return None;
        }

        let payloads: Vec<Value> = registry
            .export_beta_commands()
            .into_iter()
            .filter(|(name, _)| selection.includes(name))
            .map(|(_, payload)| payload)
            .collect();

        match publisher.put_scoped(payloads, scope).await {
            Ok(count) => {
                info!(
                    target: "registrar",
                    "Registered {} beta slash command(s) in {}",
                    count,
                    scope
                );
                Some(count)
            }
            Err(e) => {
                error!(
                    target: "registrar",
                    "Failed to register beta slash commands in {}: {:#}",
                    scope,
                    e
                );
                None
            }
        }
    }

    /// Delete one command, globally when `scope` is `None`
    pub async fn unregister(&self, command_id: &str, scope: Option<&str>) -> bool {
        let Some(publisher) = self.publisher() else {
            return false;
        };
        if command_id.is_empty() {
            warn!(target: "registrar", "Invalid command id");
            return false;
        }
        if scope.is_some_and(str::is_empty) {
            warn!(target: "registrar", "Invalid scope id");
            return false;
        }

        match publisher.delete(command_id, scope).await {
            Ok(()) => {
                info!(target: "registrar", "Deleted slash command {}", command_id);
                true
            }
            Err(e) => {
                error!(
                    target: "registrar",
                    "Failed to delete slash command {}: {:#}",
                    command_id,
                    e
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(feature = "discord")]
pub use discord::DiscordPublisher;

#[cfg(feature = "discord")]
mod discord {
    use anyhow::{Context, bail};
    use async_trait::async_trait;
    use serde_json::Value;
    use serenity::http::Http;
    use serenity::model::id::{ApplicationId, CommandId, GuildId};

    use super::CommandPublisher;

    /// Publishes commands through Discord's HTTP API
    pub struct DiscordPublisher {
        http: Http,
    }

    impl DiscordPublisher {
        pub fn new(token: &str, application_id: u64) -> anyhow::Result<Self> {
            if application_id == 0 {
                bail!("application id must be non-zero");
            }
            let http = Http::new(token);
            http.set_application_id(ApplicationId::new(application_id));
            Ok(Self { http })
        }
    }

    fn snowflake(what: &str, value: &str) -> anyhow::Result<u64> {
        match value.parse::<u64>() {
            Ok(0) | Err(_) => bail!("invalid {} `{}`", what, value),
            Ok(id) => Ok(id),
        }
    }

    #[async_trait]
    impl CommandPublisher for DiscordPublisher {
        async fn put_global(&self, payloads: Vec<Value>) -> anyhow::Result<usize> {
            let commands = self
                .http
                .create_global_commands(&payloads)
                .await
                .context("bulk overwrite of global commands")?;
            Ok(commands.len())
        }

        async fn put_scoped(&self, payloads: Vec<Value>, scope: &str) -> anyhow::Result<usize> {
            let guild = GuildId::new(snowflake("guild id", scope)?);
            let commands = self
                .http
                .create_guild_commands(guild, &payloads)
                .await
                .context("bulk overwrite of guild commands")?;
            Ok(commands.len())
        }

        async fn delete(&self, command_id: &str, scope: Option<&str>) -> anyhow::Result<()> {
            let command = CommandId::new(snowflake("command id", command_id)?);
            match scope {
                Some(scope) => {
                    let guild = GuildId::new(snowflake("guild id", scope)?);
                    self.http.delete_guild_command(guild, command).await?;
                }
                None => self.http.delete_global_command(command).await?,
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::fs;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<Value>)>>,
    }

    #[async_trait]
    impl CommandPublisher for Recorder {
        async fn put_global(&self, payloads: Vec<Value>) -> anyhow::Result<usize> {
            let count = payloads.len();
            self.calls.lock().push(("global".into(), payloads));
            Ok(count)
        }

        async fn put_scoped(&self, payloads: Vec<Value>, scope: &str) -> anyhow::Result<usize> {
            let count = payloads.len();
            self.calls.lock().push((scope.to_string(), payloads));
            Ok(count)
        }

        async fn delete(&self, command_id: &str, _scope: Option<&str>) -> anyhow::Result<()> {
            if command_id == "missing" {
                anyhow::bail!("unknown command");
            }
            Ok(())
        }
    }

    fn registry(dir: &std::path::Path) -> Registry {
        fs::write(
            dir.join("ping.toml"),
            r#"
            kind = "command"
            [primary]
            handler = "noop"
            data = { name = "ping", description = "Ping" }
            [beta]
            handler = "noop"
            data = { name = "beta-ping" }
            [context_menu]
            handler = "noop"
            data = { name = "Inspect", type = 2 }
            "#,
        )
        .unwrap();
        fs::write(
            dir.join("other.toml"),
            "kind = \"command\"\n[beta]\nhandler = \"noop\"\ndata = { name = \"beta-other\" }\n",
        )
        .unwrap();

        let mut catalog = crate::HandlerCatalog::new();
        catalog.callback("noop", |_, _| Ok(()));
        let registry = Registry::builder().commands(dir).catalog(catalog).build();
        assert!(registry.load());
        registry
    }

    #[tokio::test]
    async fn test_disabled_registrar_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let registrar = Registrar::disabled();

        assert!(!registrar.is_ready());
        assert_eq!(registrar.register_primary(&registry).await, None);
        assert_eq!(registrar.register_beta(&registry, &Selection::All, "1").await, None);
        assert!(!registrar.unregister("1", None).await);
    }

    #[tokio::test]
    async fn test_register_primary_and_beta_selection() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let recorder = Arc::new(Recorder::default());
        let registrar = Registrar::new(recorder.clone());

        assert_eq!(registrar.register_primary(&registry).await, Some(2));
        assert_eq!(
            registrar
                .register_beta(&registry, &Selection::One("beta-other".into()), "42")
                .await,
            Some(1)
        );
        assert_eq!(registrar.register_beta(&registry, &Selection::All, "").await, None);

        let calls = recorder.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].1.contains(&json!({ "name": "Inspect", "type": 2 })));
        assert_eq!(calls[1].0, "42");
        assert_eq!(calls[1].1, vec![json!({ "name": "beta-other" })]);
    }

    #[tokio::test]
    async fn test_unregister_validates_and_reports_failures() {
        let registrar = Registrar::new(Arc::new(Recorder::default()));

        assert!(registrar.unregister("123", Some("42")).await);
        assert!(!registrar.unregister("", None).await);
        assert!(!registrar.unregister("123", Some("")).await);
        assert!(!registrar.unregister("missing", None).await);
    }
}
