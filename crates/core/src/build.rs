//! Build/version metadata surfaced in `GET /status` and the MCP `initialize` response.

#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub name: &'static str,
}

impl BuildInfo {
    pub const fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            name: "goblin",
        }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::new()
    }
}
