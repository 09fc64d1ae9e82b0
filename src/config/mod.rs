//! Configuration (layered: code > env > defaults).

use std::path::PathBuf;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::util::http::normalize_base_url;

pub const DEFAULT_ASSISTANT_ID: &str = "agent";
pub const DEFAULT_TRAINING_ASSISTANT_ID: &str = "training_module_graph";
pub const DEFAULT_LIVE_DEMO_ASSISTANT_ID: &str = "live_demo_module_graph";

/// Stream modes requested for conversational graphs.
pub const DEFAULT_STREAM_MODES: &[&str] = &["messages-tuple", "values", "modules", "metadata", "custom"];
/// The training graph reports its transcript through values snapshots only.
pub const TRAINING_STREAM_MODES: &[&str] = &["values", "modules", "metadata", "custom"];

/// Workspace section a session belongs to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum Section {
    #[default]
    #[strum(to_string = "Chat", serialize = "chat")]
    Chat,
    #[strum(to_string = "Training", serialize = "training")]
    Training,
    #[strum(to_string = "Live Demo", serialize = "livedemo", serialize = "live_demo")]
    LiveDemo,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Chat, Section::Training, Section::LiveDemo];

    /// Base view path; unknown threads redirect here.
    pub fn base_path(self) -> &'static str {
        match self {
            Section::Chat => "/chat",
            Section::Training => "/training",
            Section::LiveDemo => "/livedemo",
        }
    }

    /// Path of a thread inside this section.
    pub fn thread_path(self, thread_id: &str) -> String {
        format!("{}/{thread_id}", self.base_path())
    }

    /// Section owning a path such as `/training/abc`. Unknown paths map to chat.
    pub fn from_path(path: &str) -> Self {
        let segment = path.trim_start_matches('/').split('/').next().unwrap_or_default();
        segment.parse().unwrap_or_default()
    }

    pub fn stream_modes(self) -> &'static [&'static str] {
        match self {
            Section::Training => TRAINING_STREAM_MODES,
            _ => DEFAULT_STREAM_MODES,
        }
    }

    fn description(self) -> &'static str {
        match self {
            Section::Chat => "General workspace assistant",
            Section::Training => "Training module assistant",
            Section::LiveDemo => "Live demo assistant",
        }
    }
}

/// One entry of the assistant picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantOption {
    pub section: Section,
    pub label: String,
    pub description: String,
    pub assistant_id: String,
}

/// Client configuration for one workspace.
///
/// Resolution order: explicit builder values, then `RUNWEAVE_*` environment
/// variables (a `.env` file is loaded when present), then defaults.
#[derive(Debug, Clone, Builder)]
pub struct ClientConfig {
    /// Execution service base URL; `None` disables the HTTP collaborators.
    #[builder(into)]
    pub api_base_url: Option<String>,
    #[builder(into, default = DEFAULT_ASSISTANT_ID.to_string())]
    pub assistant_id: String,
    #[builder(into, default = DEFAULT_TRAINING_ASSISTANT_ID.to_string())]
    pub training_assistant_id: String,
    #[builder(into, default = DEFAULT_LIVE_DEMO_ASSISTANT_ID.to_string())]
    pub live_demo_assistant_id: String,
    /// Directory for file-backed run slots. In-memory slots when unset.
    pub run_slot_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        match var("RUNWEAVE_API_BASE_URL") {
            Some(url) => config.api_base_url = Some(normalize_base_url(&url)),
            None => tracing::warn!("RUNWEAVE_API_BASE_URL is not defined"),
        }
        if let Some(id) = var("RUNWEAVE_ASSISTANT_ID") {
            config.assistant_id = id.trim().to_string();
        }
        if let Some(id) = var("RUNWEAVE_TRAINING_ASSISTANT_ID") {
            config.training_assistant_id = id.trim().to_string();
        }
        if let Some(id) = var("RUNWEAVE_LIVE_DEMO_ASSISTANT_ID") {
            config.live_demo_assistant_id = id.trim().to_string();
        }
        config.run_slot_dir = var("RUNWEAVE_RUN_SLOT_DIR").map(PathBuf::from);
        config
    }

    /// Normalized base URL, if one is configured.
    pub fn base_url(&self) -> Option<String> {
        self.api_base_url
            .as_deref()
            .map(normalize_base_url)
            .filter(|url| !url.is_empty())
    }

    /// Assistant (graph) id for a section, unless a non-blank override is given.
    pub fn resolve_assistant_id(&self, section: Section, override_id: Option<&str>) -> String {
        if let Some(id) = override_id.map(str::trim).filter(|id| !id.is_empty()) {
            return id.to_string();
        }
        match section {
            Section::Chat => self.assistant_id.clone(),
            Section::Training => self.training_assistant_id.clone(),
            Section::LiveDemo => self.live_demo_assistant_id.clone(),
        }
    }

    /// Graph id for the section owning `path`.
    pub fn graph_id_for_path(&self, path: &str) -> String {
        self.resolve_assistant_id(Section::from_path(path), None)
    }

    /// Assistant picker entries, one per section.
    pub fn quick_options(&self) -> Vec<AssistantOption> {
        Section::ALL
            .iter()
            .map(|&section| AssistantOption {
                section,
                label: section.to_string(),
                description: section.description().to_string(),
                assistant_id: self.resolve_assistant_id(section, None),
            })
            .collect()
    }
}
