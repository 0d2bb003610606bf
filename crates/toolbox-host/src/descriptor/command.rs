use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{DescriptorKind, invalid};
use crate::bindings::Bindings;
use crate::catalog::{BoundCallback, HandlerCatalog, guarded};
use crate::error::LoadError;

/// `kind = "command"` manifest; any subset of the four parts may be present
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandManifest {
    #[serde(default)]
    pub primary: Option<PartManifest>,
    #[serde(default)]
    pub beta: Option<PartManifest>,
    #[serde(default)]
    pub context_menu: Option<PartManifest>,
    #[serde(default)]
    pub text: Option<PartManifest>,
}

/// One command part: a payload (static `data` or a named `builder`) and a handler
#[derive(Debug, Clone, Deserialize)]
pub struct PartManifest {
    pub handler: String,
    #[serde(default)]
    pub autocomplete: Option<String>,
    #[serde(default)]
    pub data: Option<toml::Value>,
    #[serde(default)]
    pub builder: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPart {
    Primary,
    Beta,
    ContextMenu,
    Text,
}

impl CommandPart {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Primary => "slash command",
            Self::Beta => "beta slash command",
            Self::ContextMenu => "context menu command",
            Self::Text => "text command",
        }
    }

    fn supports_autocomplete(&self) -> bool {
        matches!(self, Self::Primary | Self::Beta)
    }
}

/// A command part with its payload built and its handlers bound
#[derive(Debug, Clone)]
pub struct HydratedCommand {
    name: String,
    aliases: Vec<String>,
    data: Value,
    callback: BoundCallback,
    autocomplete: Option<BoundCallback>,
}

impl HydratedCommand {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Alternative names, only ever set for text commands
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Payload published to the remote registration API
    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn handler(&self) -> &str {
        self.callback.label()
    }

    pub fn callback(&self) -> &BoundCallback {
        &self.callback
    }

    pub fn autocomplete(&self) -> Option<&BoundCallback> {
        self.autocomplete.as_ref()
    }

    /// Invoke the command handler
    pub fn run(&self, args: &[Value]) -> anyhow::Result<()> {
        self.callback.call(args)
    }
}

/// A hydrated command descriptor
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub primary: Option<HydratedCommand>,
    pub beta: Option<HydratedCommand>,
    pub context_menu: Option<HydratedCommand>,
    pub text: Option<HydratedCommand>,
}

impl CommandManifest {
    pub(crate) fn hydrate(
        self,
        file: &str,
        catalog: &HandlerCatalog,
        bindings: &Arc<Bindings>,
    ) -> Result<Command, LoadError> {
        let part = |manifest: Option<PartManifest>, part| {
            manifest
                .map(|m| m.hydrate(part, file, catalog, bindings))
                .transpose()
        };

        Ok(Command {
            primary: part(self.primary, CommandPart::Primary)?,
            beta: part(self.beta, CommandPart::Beta)?,
            context_menu: part(self.context_menu, CommandPart::ContextMenu)?,
            text: part(self.text, CommandPart::Text)?,
        })
    }
}

impl PartManifest {
    fn hydrate(
        self,
        part: CommandPart,
        file: &str,
        catalog: &HandlerCatalog,
        bindings: &Arc<Bindings>,
    ) -> Result<HydratedCommand, LoadError> {
        let kind = DescriptorKind::Command;

        let data = match (self.data, self.builder) {
            (Some(data), None) => {
                serde_json::to_value(data).map_err(|e| invalid(file, kind, e.to_string()))?
            }
            (None, Some(name)) => {
                let builder = catalog.resolve_builder(file, &name)?;
                guarded(&name, || builder(bindings.as_ref())).map_err(|e| LoadError::Builder {
                    file: file.to_string(),
                    name: name.clone(),
                    reason: format!("{:#}", e),
                })?
            }
            (Some(_), Some(_)) => {
                return Err(invalid(
                    file,
                    kind,
                    format!("{} sets both data and builder", part.label()),
                ));
            }
            (None, None) => {
                return Err(invalid(file, kind, format!("{} has no data", part.label())));
            }
        };

        let name = data
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(file, kind, format!("{} data has no name", part.label())))?
            .to_string();

        let aliases = match (part, data.get("aliases")) {
            (CommandPart::Text, Some(Value::Array(items))) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(file, kind, "text command aliases must be strings"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            (CommandPart::Text, Some(_)) => {
                return Err(invalid(file, kind, "text command aliases must be a list"));
            }
            _ => Vec::new(),
        };

        let callback = BoundCallback::bind(
            &self.handler,
            catalog.resolve_callback(file, &self.handler)?,
            bindings.clone(),
        );

        let autocomplete = match self.autocomplete {
            Some(name) if part.supports_autocomplete() => Some(BoundCallback::bind(
                &name,
                catalog.resolve_callback(file, &name)?,
                bindings.clone(),
            )),
            Some(_) => {
                return Err(invalid(
                    file,
                    kind,
                    format!("{} does not support autocomplete", part.label()),
                ));
            }
            None => None,
        };

        Ok(HydratedCommand {
            name,
            aliases,
            data,
            callback,
            autocomplete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> HandlerCatalog {
        let mut catalog = HandlerCatalog::new();
        catalog
            .callback("ping", |_, _| Ok(()))
            .callback("complete", |_, _| Ok(()))
            .builder("beta_data", |bindings| {
                let guild = bindings.option::<String>(0).cloned().unwrap_or_default();
                Ok(json!({ "name": "beta", "description": guild }))
            })
            .builder("broken", |_| anyhow::bail!("no payload"));
        catalog
    }

    fn parse(source: &str) -> CommandManifest {
        toml::from_str(source).unwrap()
    }

    #[test]
    fn test_static_data_and_aliases() {
        let manifest = parse(
            r#"
            [primary]
            handler = "ping"
            autocomplete = "complete"
            data = { name = "ping", description = "Ping! Pong!" }

            [text]
            handler = "ping"
            data = { name = "ping", aliases = ["p", "pi"], category = "util" }
            "#,
        );

        let command = manifest
            .hydrate("ping", &catalog(), &Arc::new(Bindings::new()))
            .unwrap();

        let primary = command.primary.unwrap();
        assert_eq!(primary.name(), "ping");
        assert_eq!(primary.data()["description"], json!("Ping! Pong!"));
        assert_eq!(primary.autocomplete().map(|a| a.label()), Some("complete"));

        let text = command.text.unwrap();
        assert_eq!(text.aliases(), ["p", "pi"]);
        assert_eq!(text.data()["category"], json!("util"));
        assert!(command.beta.is_none());
        assert!(command.context_menu.is_none());
    }

    #[test]
    fn test_builder_uses_bindings() {
        let manifest = parse(
            r#"
            [beta]
            handler = "ping"
            builder = "beta_data"
            "#,
        );
        let bindings = Arc::new(Bindings::new().with_option(String::from("guild-only")));

        let command = manifest.hydrate("beta", &catalog(), &bindings).unwrap();
        let beta = command.beta.unwrap();
        assert_eq!(beta.name(), "beta");
        assert_eq!(beta.data()["description"], json!("guild-only"));
    }

    #[test]
    fn test_invalid_parts() {
        let bindings = Arc::new(Bindings::new());
        let cases = [
            "[primary]\nhandler = \"ping\"",
            "[primary]\nhandler = \"ping\"\ndata = { description = \"nameless\" }",
            "[primary]\nhandler = \"ping\"\nbuilder = \"beta_data\"\ndata = { name = \"x\" }",
            "[text]\nhandler = \"ping\"\nautocomplete = \"complete\"\ndata = { name = \"x\" }",
            "[text]\nhandler = \"ping\"\ndata = { name = \"x\", aliases = \"y\" }",
            "[primary]\nhandler = \"missing\"\ndata = { name = \"x\" }",
            "[primary]\nhandler = \"ping\"\nbuilder = \"broken\"",
        ];

        for case in cases {
            assert!(
                parse(case).hydrate("bad", &catalog(), &bindings).is_err(),
                "expected failure for {case}"
            );
        }
    }
}
