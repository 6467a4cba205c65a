//! Surface composition: which module views reach the story shell, and when.
//!
//! A view is handed to the shell only once its anchor (the nearest
//! non-embedded running ancestor) is already there. Views that arrive early
//! wait in `pending_views` and are flushed as soon as their anchor connects,
//! so the shell always sees parents before children regardless of the order
//! modules finished launching in.

use std::sync::Arc;

use sessionmgr_types::{
    ModuleData, ModuleManifest, ModuleSource, SurfaceInfo, SurfaceRelation, ViewConnection,
    ViewHolderToken, encode_module_path, parent_module_path,
};
use tracing::debug;

use super::{ControllerState, RunningModInfo};
use crate::interfaces::StoryShell;

/// A module view waiting for its anchor to reach the shell.
pub(crate) struct PendingView {
    pub(crate) module_path: Vec<String>,
    pub(crate) surface_relation: Option<SurfaceRelation>,
    pub(crate) module_source: ModuleSource,
    pub(crate) manifest: Option<ModuleManifest>,
    pub(crate) view: ViewHolderToken,
}

impl PendingView {
    pub(crate) fn new(
        module_data: &ModuleData,
        manifest: Option<ModuleManifest>,
        view: ViewHolderToken,
    ) -> Self {
        Self {
            module_path: module_data.module_path.clone(),
            surface_relation: module_data.surface_relation.clone(),
            module_source: module_data.module_source,
            manifest,
            view,
        }
    }
}

/// A shell call decided under the state lock and issued after it is released.
#[derive(Debug)]
pub(crate) enum ShellCall {
    AddSurface(ViewConnection, SurfaceInfo),
    Focus(String),
}

impl ShellCall {
    pub(crate) fn apply(self, shell: &Arc<dyn StoryShell>) {
        match self {
            ShellCall::AddSurface(view, surface_info) => shell.add_surface(view, surface_info),
            ShellCall::Focus(surface_id) => shell.focus_surface(&surface_id),
        }
    }
}

impl ControllerState {
    /// Nearest running ancestor of `module_path` that is not embedded.
    fn find_anchor(&self, module_path: &[String]) -> Option<&RunningModInfo> {
        let mut anchor = parent_module_path(module_path).and_then(|parent| self.find_running(parent));
        while let Some(info) = anchor {
            if !info.module_data.is_embedded {
                break;
            }
            anchor = parent_module_path(&info.module_data.module_path)
                .and_then(|parent| self.find_running(parent));
        }
        anchor
    }

    /// Connect `view` if its anchor is in the shell, otherwise park it.
    /// Returns the shell calls to make, parents before children.
    pub(crate) fn route_view(&mut self, view: PendingView) -> Vec<ShellCall> {
        let surface_id = encode_module_path(&view.module_path);
        let anchor_id = self
            .find_anchor(&view.module_path)
            .map(|anchor| anchor.module_data.surface_id());

        let ready = view.module_path.len() == 1
            || anchor_id
                .as_ref()
                .is_some_and(|anchor_id| self.connected_views.contains(anchor_id));
        if !ready {
            debug!(surface_id = %surface_id, anchor = ?anchor_id, "View waiting for its anchor");
            self.pending_views.insert(surface_id, view);
            return Vec::new();
        }

        let mut calls = Vec::new();
        self.connect_view(view, anchor_id.unwrap_or_default(), &mut calls);
        self.flush_pending_views(&mut calls);
        calls
    }

    fn connect_view(&mut self, view: PendingView, parent_id: String, calls: &mut Vec<ShellCall>) {
        let surface_id = encode_module_path(&view.module_path);
        self.connected_views.insert(surface_id.clone());
        calls.push(ShellCall::AddSurface(
            ViewConnection {
                surface_id: surface_id.clone(),
                view_holder_token: view.view,
            },
            SurfaceInfo {
                parent_id,
                surface_relation: view.surface_relation,
                module_manifest: view.manifest,
                module_source: view.module_source,
            },
        ));
        if view.module_source == ModuleSource::External {
            calls.push(ShellCall::Focus(surface_id));
        }
    }

    /// Connect pending views whose anchors are connected, until none is left
    /// that can be.
    fn flush_pending_views(&mut self, calls: &mut Vec<ShellCall>) {
        loop {
            let ready = self.pending_views.iter().find_map(|(surface_id, view)| {
                let anchor_id = self.find_anchor(&view.module_path)?.module_data.surface_id();
                self.connected_views
                    .contains(&anchor_id)
                    .then(|| (surface_id.clone(), anchor_id))
            });
            let Some((surface_id, anchor_id)) = ready else {
                break;
            };
            if let Some(view) = self.pending_views.remove(&surface_id) {
                self.connect_view(view, anchor_id, calls);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;
    use std::time::Duration;

    use super::*;
    use crate::module_context::ModuleContext;
    use crate::module_controller::ModuleController;
    use crate::testing::MockModuleInstance;

    fn module_data(segments: &[&str]) -> ModuleData {
        ModuleData::new(
            "test:module",
            segments.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn running_mod(data: &ModuleData) -> RunningModInfo {
        RunningModInfo {
            module_data: data.clone(),
            context: Arc::new(ModuleContext::new("story".into(), data.clone(), Weak::new())),
            controller: ModuleController::new(
                data,
                Weak::new(),
                Box::new(MockModuleInstance::new()),
                Duration::from_secs(1),
            ),
        }
    }

    fn pending(data: &ModuleData) -> PendingView {
        PendingView::new(data, None, ViewHolderToken::generate())
    }

    fn added(calls: &[ShellCall]) -> Vec<(String, String)> {
        calls
            .iter()
            .filter_map(|call| match call {
                ShellCall::AddSurface(view, info) => {
                    Some((view.surface_id.clone(), info.parent_id.clone()))
                }
                ShellCall::Focus(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_root_view_connects_immediately() {
        let mut state = ControllerState::default();
        let root = module_data(&["root"]);
        state.running_mods.push(running_mod(&root));

        let calls = state.route_view(pending(&root));
        assert_eq!(added(&calls), vec![("root".to_string(), String::new())]);
        assert!(matches!(calls.last(), Some(ShellCall::Focus(id)) if id == "root"));
        assert!(state.pending_views.is_empty());
    }

    #[tokio::test]
    async fn test_child_waits_for_parent_then_flushes() {
        let mut state = ControllerState::default();
        let parent = module_data(&["a"]);
        let child = module_data(&["a", "b"]);
        state.running_mods.push(running_mod(&parent));
        state.running_mods.push(running_mod(&child));

        let calls = state.route_view(pending(&child));
        assert!(calls.is_empty());
        assert!(state.pending_views.contains_key("a:b"));

        let calls = state.route_view(pending(&parent));
        assert_eq!(
            added(&calls),
            vec![
                ("a".to_string(), String::new()),
                ("a:b".to_string(), "a".to_string())
            ]
        );
        assert!(state.pending_views.is_empty());
    }

    #[tokio::test]
    async fn test_embedded_parent_is_skipped_for_anchor() {
        let mut state = ControllerState::default();
        let root = module_data(&["root"]);
        let mut embedded = module_data(&["root", "embed"]);
        embedded.is_embedded = true;
        let leaf = module_data(&["root", "embed", "leaf"]);
        for data in [&root, &embedded, &leaf] {
            state.running_mods.push(running_mod(data));
        }

        state.route_view(pending(&root));
        let calls = state.route_view(pending(&leaf));
        assert_eq!(
            added(&calls),
            vec![("root:embed:leaf".to_string(), "root".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_parent_keeps_view_pending() {
        let mut state = ControllerState::default();
        let orphan = module_data(&["gone", "child"]);
        state.running_mods.push(running_mod(&orphan));

        let calls = state.route_view(pending(&orphan));
        assert!(calls.is_empty());
        assert!(state.pending_views.contains_key("gone:child"));
        assert!(!state.connected_views.contains("gone:child"));
    }

    #[tokio::test]
    async fn test_internal_view_is_not_focused() {
        let mut state = ControllerState::default();
        let mut root = module_data(&["root"]);
        root.module_source = ModuleSource::Internal;
        state.running_mods.push(running_mod(&root));

        let calls = state.route_view(pending(&root));
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], ShellCall::AddSurface(..)));
    }
}
