//! Binding intent parameters to links of a new module.

use sessionmgr_storage::StoryStorage;
use sessionmgr_types::{Intent, IntentParameterData, LinkPath, ModuleParameterMapEntry};
use tracing::warn;

/// Build the parameter map of a module about to be added at `module_path`.
///
/// Literal and entity-reference parameters are written to links owned by
/// the new module. Named links are resolved by `resolve_link_name`, which
/// maps them into the scope of whoever is adding the module.
pub(crate) async fn initialize_module_parameters<F>(
    storage: &StoryStorage,
    module_path: &[String],
    intent: &Intent,
    resolve_link_name: F,
) -> Vec<ModuleParameterMapEntry>
where
    F: Fn(&str) -> LinkPath,
{
    let mut parameter_map = Vec::with_capacity(intent.parameters.len());
    for parameter in &intent.parameters {
        let link_path = match &parameter.data {
            IntentParameterData::LinkName(link_name) => resolve_link_name(link_name),
            IntentParameterData::Json(value) => {
                let link_path = LinkPath::new(module_path.to_vec(), parameter.name.clone());
                write_link(storage, &link_path, value.clone()).await;
                link_path
            }
            IntentParameterData::EntityReference(reference) => {
                let link_path = LinkPath::new(module_path.to_vec(), parameter.name.clone());
                let value = serde_json::json!({ "@entityRef": reference });
                write_link(storage, &link_path, value).await;
                link_path
            }
        };
        parameter_map.push(ModuleParameterMapEntry {
            name: parameter.name.clone(),
            link_path,
        });
    }
    parameter_map
}

async fn write_link(storage: &StoryStorage, link_path: &LinkPath, value: serde_json::Value) {
    if let Err(e) = storage.set_link_value(link_path, Some(value)).await {
        warn!(link = %link_path, error = %e, "Failed to initialize parameter link");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionmgr_storage::{MemoryLedger, PageStore};
    use sessionmgr_types::PageId;

    #[tokio::test]
    async fn test_parameters_map_to_links() {
        let ledger = MemoryLedger::new();
        let storage = StoryStorage::new("story", ledger.page(&PageId::new("p")));
        let module_path = vec!["root".to_string(), "child".to_string()];
        let intent = Intent::with_handler("test:child")
            .parameter("count", IntentParameterData::Json(serde_json::json!(3)))
            .parameter("shared", IntentParameterData::LinkName("selection".into()))
            .parameter("doc", IntentParameterData::EntityReference("story:s/e1".into()));

        let map = initialize_module_parameters(&storage, &module_path, &intent, |name| {
            LinkPath::new(vec!["root".to_string()], name)
        })
        .await;

        assert_eq!(map.len(), 3);
        assert_eq!(map[1].link_path, LinkPath::new(vec!["root".to_string()], "selection"));
        assert_eq!(
            storage.get_link_value(&map[0].link_path).await.unwrap(),
            Some(serde_json::json!(3))
        );
        assert_eq!(
            storage.get_link_value(&map[2].link_path).await.unwrap(),
            Some(serde_json::json!({ "@entityRef": "story:s/e1" }))
        );
        // Named links are only referenced, never written.
        assert_eq!(storage.get_link_value(&map[1].link_path).await.unwrap(), None);
    }
}
