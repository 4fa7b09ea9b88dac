//! Authoritative in-memory index of aggregated tools/prompts/resources/
//! resource-templates (spec §4.3). Single reader-preferring lock over all
//! maps plus their materialized list caches, per the spec's concurrency
//! model (§5: "Registry: single lock protecting all maps + caches").

mod template;

use std::collections::{HashMap, HashSet};

use goblin_core::prelude::Strng;
use indexmap::IndexMap;
use parking_lot::RwLock;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};
use crate::hub::{Category, GatewayEvent, Hub};
use crate::protocol::{
    PromptDefinition, ResourceDefinition, ResourceTemplateDefinition, ToolDefinition,
};

pub use template::{CompiledTemplate, best_match};

const FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`');

#[derive(Debug, Clone)]
pub struct ToolEntry {
    pub id: Strng,
    pub upstream: Strng,
    pub definition: ToolDefinition,
}

#[derive(Debug, Clone)]
pub struct PromptEntry {
    pub id: Strng,
    pub upstream: Strng,
    pub definition: PromptDefinition,
}

#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub namespaced_uri: Strng,
    pub raw_uri: Strng,
    pub upstream: Strng,
    pub definition: ResourceDefinition,
}

#[derive(Debug, Clone)]
pub struct ResourceTemplateEntry {
    pub upstream: Strng,
    pub compiled: CompiledTemplate,
    pub definition: ResourceTemplateDefinition,
}

pub type LocalToolExecutor = std::sync::Arc<
    dyn Fn(serde_json::Value) -> futures::future::BoxFuture<'static, GatewayResult<serde_json::Value>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct LocalTool {
    pub definition: ToolDefinition,
    pub executor: LocalToolExecutor,
}

/// A single upstream's freshly-fetched capability lists. Each category is
/// `None` when that `*/list` call failed — spec §4.3: "Failures on a single
/// category emit a warning and leave that category untouched."
#[derive(Debug, Default)]
pub struct UpstreamSync {
    pub tools: Option<Vec<ToolDefinition>>,
    pub prompts: Option<Vec<PromptDefinition>>,
    pub resources: Option<Vec<ResourceDefinition>>,
    pub templates: Option<Vec<ResourceTemplateDefinition>>,
}

#[derive(Default)]
struct Caches {
    tools: Option<Vec<ToolDefinition>>,
    prompts: Option<Vec<PromptDefinition>>,
    resources: Option<Vec<ResourceDefinition>>,
    templates: Option<Vec<ResourceTemplateDefinition>>,
}

struct Inner {
    tools: HashMap<Strng, ToolEntry>,
    prompts: HashMap<Strng, PromptEntry>,
    resources: HashMap<Strng, ResourceEntry>,
    templates: IndexMap<Strng, ResourceTemplateEntry>,
    by_upstream_tools: HashMap<Strng, HashSet<Strng>>,
    by_upstream_prompts: HashMap<Strng, HashSet<Strng>>,
    by_upstream_resources: HashMap<Strng, HashSet<Strng>>,
    by_upstream_templates: HashMap<Strng, HashSet<Strng>>,
    local_tools: HashMap<String, LocalTool>,
    caches: Caches,
}

pub struct Registry {
    hub: Hub,
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            inner: RwLock::new(Inner {
                tools: HashMap::new(),
                prompts: HashMap::new(),
                resources: HashMap::new(),
                templates: IndexMap::new(),
                by_upstream_tools: HashMap::new(),
                by_upstream_prompts: HashMap::new(),
                by_upstream_resources: HashMap::new(),
                by_upstream_templates: HashMap::new(),
                local_tools: HashMap::new(),
                caches: Caches::default(),
            }),
        }
    }

    pub fn namespace_id(upstream: &str, name: &str) -> Strng {
        Strng::from(format!("{upstream}_{name}"))
    }

    pub fn namespace_uri(upstream: &str, raw_uri: &str) -> Strng {
        let encoded = utf8_percent_encode(raw_uri, FRAGMENT).to_string();
        Strng::from(format!("mcp://{upstream}/{encoded}"))
    }

    /// Reserved names may not be taken by upstream tools; checked before
    /// registering a local tool and again whenever an upstream sync would
    /// collide with one (SPEC_FULL §4.10).
    pub fn register_local_tool(&self, name: &str, definition: ToolDefinition, executor: LocalToolExecutor) {
        let mut inner = self.inner.write();
        inner
            .local_tools
            .insert(name.to_string(), LocalTool { definition, executor });
        inner.caches.tools = None;
    }

    pub fn local_tool(&self, name: &str) -> Option<LocalTool> {
        self.inner.read().local_tools.get(name).cloned()
    }

    /// Applies one upstream's freshly fetched lists, diffing each category
    /// against its reverse index (spec §4.3 `syncServer`). Emits one event
    /// per category that actually changed; no aggregate event, since a
    /// session only wants the notification for the category it subscribed
    /// a `list_changed` capability to.
    pub fn sync_upstream(&self, upstream: &str, sync: UpstreamSync) {
        let upstream_s = Strng::from(upstream);
        let mut changed: Vec<Category> = Vec::new();

        {
            let mut inner = self.inner.write();

            if let Some(tools) = sync.tools {
                let mut new_ids = HashSet::new();
                for def in tools {
                    let id = Self::namespace_id(upstream, &def.name);
                    if inner.local_tools.contains_key(id.as_str()) {
                        warn!(upstream, tool = %def.name, "skipping tool: collides with reserved local tool name");
                        continue;
                    }
                    new_ids.insert(id.clone());
                    inner.tools.insert(
                        id.clone(),
                        ToolEntry {
                            id,
                            upstream: upstream_s.clone(),
                            definition: def,
                        },
                    );
                }
                let old_ids = inner
                    .by_upstream_tools
                    .insert(upstream_s.clone(), new_ids.clone())
                    .unwrap_or_default();
                for stale in old_ids.difference(&new_ids) {
                    inner.tools.remove(stale);
                }
                inner.caches.tools = None;
                changed.push(Category::Tools);
            }

            if let Some(prompts) = sync.prompts {
                let mut new_ids = HashSet::new();
                for def in prompts {
                    let id = Self::namespace_id(upstream, &def.name);
                    new_ids.insert(id.clone());
                    inner.prompts.insert(
                        id.clone(),
                        PromptEntry {
                            id,
                            upstream: upstream_s.clone(),
                            definition: def,
                        },
                    );
                }
                let old_ids = inner
                    .by_upstream_prompts
                    .insert(upstream_s.clone(), new_ids.clone())
                    .unwrap_or_default();
                for stale in old_ids.difference(&new_ids) {
                    inner.prompts.remove(stale);
                }
                inner.caches.prompts = None;
                changed.push(Category::Prompts);
            }

            if let Some(resources) = sync.resources {
                let mut new_ids = HashSet::new();
                for def in resources {
                    let namespaced = Self::namespace_uri(upstream, &def.uri);
                    new_ids.insert(namespaced.clone());
                    inner.resources.insert(
                        namespaced.clone(),
                        ResourceEntry {
                            namespaced_uri: namespaced,
                            raw_uri: Strng::from(def.uri.as_str()),
                            upstream: upstream_s.clone(),
                            definition: def,
                        },
                    );
                }
                let old_ids = inner
                    .by_upstream_resources
                    .insert(upstream_s.clone(), new_ids.clone())
                    .unwrap_or_default();
                for stale in old_ids.difference(&new_ids) {
                    inner.resources.remove(stale);
                }
                inner.caches.resources = None;
                changed.push(Category::Resources);
            }

            if let Some(templates) = sync.templates {
                let mut new_ids = HashSet::new();
                for def in templates {
                    let key = Strng::from(format!("{upstream}\u{0}{}", def.uri_template));
                    new_ids.insert(key.clone());
                    inner.templates.insert(
                        key,
                        ResourceTemplateEntry {
                            upstream: upstream_s.clone(),
                            compiled: CompiledTemplate::compile(&def.uri_template),
                            definition: def,
                        },
                    );
                }
                let old_ids = inner
                    .by_upstream_templates
                    .insert(upstream_s.clone(), new_ids.clone())
                    .unwrap_or_default();
                for stale in old_ids.difference(&new_ids) {
                    inner.templates.shift_remove(stale);
                }
                inner.caches.templates = None;
                changed.push(Category::Templates);
            }

        }

        for category in &changed {
            self.hub.publish(GatewayEvent::ListChanged {
                category: *category,
                upstream: Some(upstream_s.clone()),
            });
        }
    }

    /// Removes every entry attributed to `upstream` via the reverse index
    /// (spec §4.3 "Remove upstream"). Emits one event per category that
    /// actually held entries for this upstream, same rule as `sync_upstream`.
    pub fn remove_upstream(&self, upstream: &str) {
        let mut changed: Vec<Category> = Vec::new();
        {
            let mut inner = self.inner.write();
            if let Some(ids) = inner.by_upstream_tools.remove(upstream) {
                for id in &ids {
                    inner.tools.remove(id);
                }
                if !ids.is_empty() {
                    changed.push(Category::Tools);
                }
            }
            if let Some(ids) = inner.by_upstream_prompts.remove(upstream) {
                for id in &ids {
                    inner.prompts.remove(id);
                }
                if !ids.is_empty() {
                    changed.push(Category::Prompts);
                }
            }
            if let Some(ids) = inner.by_upstream_resources.remove(upstream) {
                for id in &ids {
                    inner.resources.remove(id);
                }
                if !ids.is_empty() {
                    changed.push(Category::Resources);
                }
            }
            if let Some(ids) = inner.by_upstream_templates.remove(upstream) {
                for id in &ids {
                    inner.templates.shift_remove(id);
                }
                if !ids.is_empty() {
                    changed.push(Category::Templates);
                }
            }
            inner.caches = Caches::default();
        }
        let upstream_s = Strng::from(upstream);
        for category in changed {
            self.hub.publish(GatewayEvent::ListChanged {
                category,
                upstream: Some(upstream_s.clone()),
            });
        }
    }

    pub fn get_tool(&self, id: &str) -> Option<ToolEntry> {
        self.inner.read().tools.get(id).cloned()
    }

    pub fn get_prompt(&self, id: &str) -> Option<PromptEntry> {
        self.inner.read().prompts.get(id).cloned()
    }

    pub fn get_resource(&self, namespaced_uri: &str) -> Option<ResourceEntry> {
        self.inner.read().resources.get(namespaced_uri).cloned()
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut inner = self.inner.write();
        if let Some(cached) = &inner.caches.tools {
            return cached.clone();
        }
        let mut defs: Vec<ToolDefinition> = inner
            .local_tools
            .values()
            .map(|t| t.definition.clone())
            .chain(inner.tools.values().map(|t| {
                let mut d = t.definition.clone();
                d.name = t.id.to_string();
                d
            }))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        inner.caches.tools = Some(defs.clone());
        defs
    }

    pub fn list_prompts(&self) -> Vec<PromptDefinition> {
        let mut inner = self.inner.write();
        if let Some(cached) = &inner.caches.prompts {
            return cached.clone();
        }
        let mut defs: Vec<PromptDefinition> = inner
            .prompts
            .values()
            .map(|p| {
                let mut d = p.definition.clone();
                d.name = p.id.to_string();
                d
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        inner.caches.prompts = Some(defs.clone());
        defs
    }

    pub fn list_resources(&self) -> Vec<ResourceDefinition> {
        let mut inner = self.inner.write();
        if let Some(cached) = &inner.caches.resources {
            return cached.clone();
        }
        let mut defs: Vec<ResourceDefinition> = inner
            .resources
            .values()
            .map(|r| {
                let mut d = r.definition.clone();
                d.uri = r.namespaced_uri.to_string();
                d
            })
            .collect();
        defs.sort_by(|a, b| a.uri.cmp(&b.uri));
        inner.caches.resources = Some(defs.clone());
        defs
    }

    /// Tool definitions paired with the upstream that owns them, `None` for
    /// gateway-local tools (spec §6 `/tools` `serverId` field).
    pub fn list_tools_detailed(&self) -> Vec<(ToolDefinition, Option<Strng>)> {
        let inner = self.inner.read();
        let mut out: Vec<(ToolDefinition, Option<Strng>)> = inner
            .local_tools
            .values()
            .map(|t| (t.definition.clone(), None))
            .chain(inner.tools.values().map(|t| {
                let mut d = t.definition.clone();
                d.name = t.id.to_string();
                (d, Some(t.upstream.clone()))
            }))
            .collect();
        out.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        out
    }

    /// Number of tools currently attributed to `upstream` (spec §6 `/servers`
    /// `tools` field).
    pub fn tool_count_for_upstream(&self, upstream: &str) -> usize {
        self
            .inner
            .read()
            .by_upstream_tools
            .get(upstream)
            .map_or(0, |ids| ids.len())
    }

    pub fn list_templates(&self) -> Vec<ResourceTemplateDefinition> {
        let mut inner = self.inner.write();
        if let Some(cached) = &inner.caches.templates {
            return cached.clone();
        }
        let defs: Vec<ResourceTemplateDefinition> = inner
            .templates
            .values()
            .map(|t| t.definition.clone())
            .collect();
        inner.caches.templates = Some(defs.clone());
        defs
    }

    /// Resolves a uri to `(upstream, raw_uri)` (spec §4.3 `find_upstream_for_uri`,
    /// invariant 7): exact match first, then namespaced-uri parse, then
    /// template match among the resolved upstream's templates.
    pub fn find_upstream_for_uri(&self, uri: &str) -> GatewayResult<(Strng, String)> {
        let inner = self.inner.read();

        if let Some(entry) = inner.resources.get(uri) {
            return Ok((entry.upstream.clone(), entry.raw_uri.to_string()));
        }

        if let Some((upstream, raw)) = parse_namespaced_uri(uri) {
            let candidates = inner
                .templates
                .values()
                .filter(|t| t.upstream.as_str() == upstream);
            if best_match(candidates.map(|t| &t.compiled), &raw).is_some() {
                return Ok((Strng::from(upstream), raw));
            }
            return Err(GatewayError::NotFound(format!("resource uri {uri}")));
        }

        // Legacy raw-uri convenience path: ambiguous across upstreams: first
        // matching upstream in iteration order (documented open question,
        // spec §9).
        for entry in inner.resources.values() {
            if entry.raw_uri.as_str() == uri {
                return Ok((entry.upstream.clone(), entry.raw_uri.to_string()));
            }
        }
        for t in inner.templates.values() {
            if t.compiled.matches(uri).is_some() {
                return Ok((t.upstream.clone(), uri.to_string()));
            }
        }

        Err(GatewayError::NotFound(format!("resource uri {uri}")))
    }
}

/// Parses `mcp://{upstream}/{percent-encoded-raw-uri}` back into its parts
/// (spec invariant 3 and §8 "URI round-trip").
fn parse_namespaced_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix("mcp://")?;
    let (upstream, encoded) = rest.split_once('/')?;
    if upstream.is_empty() {
        return None;
    }
    let decoded = percent_encoding::percent_decode_str(encoded)
        .decode_utf8()
        .ok()?
        .into_owned();
    Some((upstream.to_string(), decoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn namespace_round_trip_for_tools() {
        let reg = Registry::new(Hub::new());
        reg.sync_upstream(
            "fs",
            UpstreamSync {
                tools: Some(vec![tool("list"), tool("read")]),
                ..Default::default()
            },
        );
        let entry = reg.get_tool("fs_list").unwrap();
        assert_eq!(entry.upstream.as_str(), "fs");
        assert_eq!(entry.definition.name, "list");
    }

    #[test]
    fn uri_round_trip() {
        let namespaced = Registry::namespace_uri("a", "file:///x");
        let (upstream, raw) = parse_namespaced_uri(&namespaced).unwrap();
        assert_eq!(upstream, "a");
        assert_eq!(raw, "file:///x");
    }

    #[test]
    fn resources_are_collision_free_across_upstreams() {
        let reg = Registry::new(Hub::new());
        let res = |uri: &str| ResourceDefinition {
            uri: uri.to_string(),
            name: "x".to_string(),
            description: None,
            mime_type: None,
        };
        reg.sync_upstream(
            "a",
            UpstreamSync {
                resources: Some(vec![res("file:///x")]),
                ..Default::default()
            },
        );
        reg.sync_upstream(
            "b",
            UpstreamSync {
                resources: Some(vec![res("file:///x")]),
                ..Default::default()
            },
        );
        let list = reg.list_resources();
        assert_eq!(list.len(), 2);
        let (upstream, raw) = reg
            .find_upstream_for_uri("mcp://b/file%3A%2F%2F%2Fx")
            .unwrap();
        assert_eq!(upstream.as_str(), "b");
        assert_eq!(raw, "file:///x");
    }

    #[test]
    fn eventual_catch_up_removes_stale_tools() {
        let reg = Registry::new(Hub::new());
        reg.sync_upstream(
            "fs",
            UpstreamSync {
                tools: Some(vec![tool("list"), tool("read")]),
                ..Default::default()
            },
        );
        reg.sync_upstream(
            "fs",
            UpstreamSync {
                tools: Some(vec![tool("list")]),
                ..Default::default()
            },
        );
        assert!(reg.get_tool("fs_read").is_none());
        assert!(reg.get_tool("fs_list").is_some());
    }

    #[test]
    fn remove_upstream_drops_all_categories() {
        let reg = Registry::new(Hub::new());
        reg.sync_upstream(
            "git",
            UpstreamSync {
                tools: Some(vec![tool("status")]),
                ..Default::default()
            },
        );
        reg.remove_upstream("git");
        assert!(reg.get_tool("git_status").is_none());
        assert!(reg.list_tools().is_empty());
    }
}
