//! An in-memory [`Client`].
//!
//! The store emulates the API-server behaviors the replication engine depends
//! on: server-assigned identity and versions, optimistic concurrency,
//! status-subresource separation, namespace existence on create,
//! finalizer-blocked deletion, and cascading deletion through owner
//! references and namespaces.

use crate::{labels::Selector, object, Client, Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ApiResource, DynamicObject, ResourceExt, TypeMeta};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    resource_version: u64,
    uids: u64,
    writes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    group: String,
    kind: String,
    namespace: Option<String>,
    name: String,
}

// === impl MemoryClient ===

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object verbatim, keeping any server-assigned fields it
    /// already carries. Seeding does not count as a write.
    pub fn seed(&self, resource: &ApiResource, mut object: DynamicObject) {
        let mut state = self.state.lock();
        object.types = Some(type_meta(resource));
        if object.metadata.uid.is_none() {
            object.metadata.uid = Some(state.next_uid());
        }
        if object.metadata.creation_timestamp.is_none() {
            object.metadata.creation_timestamp = Some(now());
        }
        object.metadata.resource_version = Some(state.next_resource_version());
        let key = Key::of(resource, object.namespace(), object.name_any());
        state.objects.insert(key, object);
    }

    /// Returns the number of successful mutating calls made against the store.
    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    /// Returns every stored object of the given resource type.
    pub fn objects(&self, resource: &ApiResource) -> Vec<DynamicObject> {
        let state = self.state.lock();
        state
            .objects
            .iter()
            .filter(|(k, _)| k.is(resource))
            .map(|(_, o)| o.clone())
            .collect()
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let rsp = f(&mut state)?;
        state.writes += 1;
        Ok(rsp)
    }
}

#[async_trait::async_trait]
impl Client for MemoryClient {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let key = Key::of(resource, namespace.map(Into::into), name.to_string());
        Ok(self.state.lock().objects.get(&key).cloned())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<DynamicObject>> {
        let state = self.state.lock();
        Ok(state
            .select(resource, namespace, selector)
            .into_iter()
            .filter_map(|k| state.objects.get(&k).cloned())
            .collect())
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        self.write(|state| {
            let name = required_name(resource, object)?;
            let key = Key::of(resource, object.namespace(), name.clone());
            if state.objects.contains_key(&key) {
                return Err(Error::AlreadyExists {
                    kind: resource.kind.clone(),
                    name,
                });
            }
            if let Some(ns) = key.namespace.as_deref() {
                let ns_key = Key::namespace(ns);
                if !state.objects.contains_key(&ns_key) {
                    return Err(Error::NotFound {
                        kind: "Namespace".to_string(),
                        name: ns.to_string(),
                    });
                }
            }

            let mut created = object.clone();
            created.types = Some(type_meta(resource));
            created.metadata.uid = Some(state.next_uid());
            created.metadata.resource_version = Some(state.next_resource_version());
            created.metadata.creation_timestamp = Some(now());
            created.metadata.deletion_timestamp = None;
            created.metadata.generation = Some(1);
            if let Some(body) = created.data.as_object_mut() {
                body.remove("status");
            }
            state.objects.insert(key, created.clone());
            Ok(created)
        })
    }

    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> Result<DynamicObject> {
        self.write(|state| {
            let key = state.check_current(resource, object)?;
            let current = &state.objects[&key];

            let mut updated = object.clone();
            updated.types = Some(type_meta(resource));
            updated.metadata.uid = current.metadata.uid.clone();
            updated.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
            updated.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
            updated.metadata.resource_version = current.metadata.resource_version.clone();
            updated.metadata.generation = current.metadata.generation;
            match object::status(current).cloned() {
                Some(status) => object::set_status(&mut updated, status),
                None => {
                    if let Some(body) = updated.data.as_object_mut() {
                        body.remove("status");
                    }
                }
            }
            if object::content(&updated) != object::content(current) {
                updated.metadata.generation = Some(current.metadata.generation.unwrap_or(0) + 1);
            }

            if object::same(&updated, current) {
                return Ok(updated);
            }
            state.replace(key, updated)
        })
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.write(|state| {
            let key = state.check_current(resource, object)?;
            let mut updated = state.objects[&key].clone();
            match object::status(object).cloned() {
                Some(status) => object::set_status(&mut updated, status),
                None => {
                    if let Some(body) = updated.data.as_object_mut() {
                        body.remove("status");
                    }
                }
            }
            if object::same(&updated, &state.objects[&key]) {
                return Ok(updated);
            }
            state.replace(key, updated)
        })
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject> {
        self.write(|state| {
            let key = Key::of(resource, namespace.map(Into::into), name.to_string());
            let current = state
                .objects
                .get(&key)
                .ok_or_else(|| Error::not_found(resource, name))?;

            let mut doc = serde_json::to_value(current)?;
            json_patch::merge(&mut doc, patch);
            let mut patched: DynamicObject = serde_json::from_value(doc)?;
            patched.types = Some(type_meta(resource));
            patched.metadata.name = current.metadata.name.clone();
            patched.metadata.namespace = current.metadata.namespace.clone();
            patched.metadata.uid = current.metadata.uid.clone();
            patched.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
            patched.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
            patched.metadata.generation = current.metadata.generation;
            if object::content(&patched) != object::content(current) {
                patched.metadata.generation = Some(current.metadata.generation.unwrap_or(0) + 1);
            }
            state.replace(key, patched)
        })
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        self.write(|state| {
            let key = Key::of(resource, namespace.map(Into::into), name.to_string());
            if !state.objects.contains_key(&key) {
                return Err(Error::not_found(resource, name));
            }
            state.delete(key);
            Ok(())
        })
    }

    async fn delete_all_of(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<()> {
        self.write(|state| {
            for key in state.select(resource, namespace, selector) {
                state.delete(key);
            }
            Ok(())
        })
    }
}

// === impl State ===

impl State {
    fn next_uid(&mut self) -> String {
        self.uids += 1;
        format!("00000000-0000-0000-0000-{:012x}", self.uids)
    }

    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn select(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Vec<Key> {
        self.objects
            .iter()
            .filter(|(k, _)| k.is(resource))
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter(|(_, o)| selector.matches_map(o.labels()))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Ensures the object exists and, if it carries a resource version, that
    /// the version is current.
    fn check_current(&self, resource: &ApiResource, object: &DynamicObject) -> Result<Key> {
        let name = required_name(resource, object)?;
        let key = Key::of(resource, object.namespace(), name.clone());
        let current = self
            .objects
            .get(&key)
            .ok_or_else(|| Error::not_found(resource, &name))?;
        if let Some(version) = object.metadata.resource_version.as_ref() {
            if current.metadata.resource_version.as_ref() != Some(version) {
                return Err(Error::Conflict {
                    kind: resource.kind.clone(),
                    name,
                    message: "the object has been modified".to_string(),
                });
            }
        }
        Ok(key)
    }

    /// Stores a new version of an object. A terminating object whose last
    /// finalizer has been cleared is removed instead.
    fn replace(&mut self, key: Key, mut object: DynamicObject) -> Result<DynamicObject> {
        object.metadata.resource_version = Some(self.next_resource_version());
        if object::is_terminating(&object) && object.finalizers().is_empty() {
            self.remove(&key);
            return Ok(object);
        }
        self.objects.insert(key, object.clone());
        Ok(object)
    }

    /// Deletes an object. Objects with finalizers are only marked for
    /// deletion.
    fn delete(&mut self, key: Key) {
        let rv = self.next_resource_version();
        let Some(object) = self.objects.get_mut(&key) else {
            return;
        };
        if !object.finalizers().is_empty() {
            if object.metadata.deletion_timestamp.is_none() {
                object.metadata.deletion_timestamp = Some(now());
                object.metadata.resource_version = Some(rv);
            }
            return;
        }
        self.remove(&key);
    }

    /// Removes an object and garbage-collects its dependents: the contents of
    /// a removed namespace and objects whose owners no longer exist.
    fn remove(&mut self, key: &Key) {
        let Some(removed) = self.objects.remove(key) else {
            return;
        };

        let uids = self
            .objects
            .values()
            .filter_map(|o| o.metadata.uid.clone())
            .collect::<BTreeSet<_>>();
        let dependents = self
            .objects
            .iter()
            .filter(|(_, o)| !object::is_terminating(o))
            .filter(|(k, o)| {
                if key.is_namespace() && k.namespace.as_deref() == Some(key.name.as_str()) {
                    return true;
                }
                let owners = o.owner_references();
                owners.iter().any(|r| removed.metadata.uid.as_ref() == Some(&r.uid))
                    && owners.iter().all(|r| !uids.contains(&r.uid))
            })
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();

        for dependent in dependents {
            self.delete(dependent);
        }
    }
}

// === impl Key ===

impl Key {
    fn of(resource: &ApiResource, namespace: Option<String>, name: String) -> Self {
        Self {
            group: resource.group.clone(),
            kind: resource.kind.clone(),
            namespace,
            name,
        }
    }

    fn namespace(name: &str) -> Self {
        Self {
            group: String::new(),
            kind: "Namespace".to_string(),
            namespace: None,
            name: name.to_string(),
        }
    }

    fn is(&self, resource: &ApiResource) -> bool {
        self.group == resource.group && self.kind == resource.kind
    }

    fn is_namespace(&self) -> bool {
        self.group.is_empty() && self.kind == "Namespace"
    }
}

fn type_meta(resource: &ApiResource) -> TypeMeta {
    TypeMeta {
        api_version: resource.api_version.clone(),
        kind: resource.kind.clone(),
    }
}

fn required_name(resource: &ApiResource, object: &DynamicObject) -> Result<String> {
    object.metadata.name.clone().ok_or_else(|| Error::Invalid {
        kind: resource.kind.clone(),
        message: "object has no name".to_string(),
    })
}

fn now() -> Time {
    Time(chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config_map_resource, namespace_resource};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::core::GroupVersionKind;
    use serde_json::json;

    fn route_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(
            "gateway.networking.k8s.io",
            "v1",
            "HTTPRoute",
        ))
    }

    fn with_namespace(ns: &str) -> MemoryClient {
        let client = MemoryClient::new();
        client.seed(
            &namespace_resource(),
            DynamicObject::new(ns, &namespace_resource()),
        );
        client
    }

    #[tokio::test]
    async fn create_requires_namespace() {
        let client = MemoryClient::new();
        let route = DynamicObject::new("web", &route_resource()).within("missing");
        let error = client.create(&route_resource(), &route).await.unwrap_err();
        assert!(error.is_not_found(), "{error}");
        assert_eq!(client.writes(), 0);
    }

    #[tokio::test]
    async fn create_assigns_identity_and_drops_status() {
        let client = with_namespace("default");
        let route = DynamicObject::new("web", &route_resource())
            .within("default")
            .data(json!({"spec": {}, "status": {"parents": []}}));
        let created = client.create(&route_resource(), &route).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert_eq!(created.metadata.generation, Some(1));
        assert_eq!(object::status(&created), None);

        let error = client.create(&route_resource(), &route).await.unwrap_err();
        assert!(error.is_already_exists(), "{error}");
    }

    #[tokio::test]
    async fn update_rejects_stale_versions_and_keeps_status() {
        let client = with_namespace("default");
        let route = DynamicObject::new("web", &route_resource())
            .within("default")
            .data(json!({"spec": {"a": 1}}));
        let created = client.create(&route_resource(), &route).await.unwrap();

        let mut with_status = created.clone();
        object::set_status(&mut with_status, json!({"ok": true}));
        let updated = client
            .update_status(&route_resource(), &with_status)
            .await
            .unwrap();

        let mut changed = updated.clone();
        changed.data["spec"] = json!({"a": 2});
        object::set_status(&mut changed, json!({"ignored": true}));
        let updated = client.update(&route_resource(), &changed).await.unwrap();
        assert_eq!(object::status(&updated), Some(&json!({"ok": true})));
        assert_eq!(updated.metadata.generation, Some(2));

        let error = client.update(&route_resource(), &created).await.unwrap_err();
        assert!(error.is_conflict(), "{error}");
    }

    #[tokio::test]
    async fn finalizers_block_deletion() {
        let client = with_namespace("default");
        let mut route = DynamicObject::new("web", &route_resource()).within("default");
        route.finalizers_mut().push("example.com/f".to_string());
        client.create(&route_resource(), &route).await.unwrap();

        client
            .delete(&route_resource(), Some("default"), "web")
            .await
            .unwrap();
        let mut terminating = client
            .get(&route_resource(), Some("default"), "web")
            .await
            .unwrap()
            .expect("object must still exist");
        assert!(object::is_terminating(&terminating));

        object::remove_finalizer(&mut terminating, "example.com/f");
        client
            .update(&route_resource(), &terminating)
            .await
            .unwrap();
        assert!(client
            .get(&route_resource(), Some("default"), "web")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deleting_an_owner_cascades() {
        let client = with_namespace("default");
        let anchor = client
            .create(
                &config_map_resource(),
                &DynamicObject::new("anchor", &config_map_resource()).within("default"),
            )
            .await
            .unwrap();

        let mut route = DynamicObject::new("web", &route_resource()).within("default");
        route.owner_references_mut().push(OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "anchor".to_string(),
            uid: anchor.metadata.uid.clone().unwrap(),
            ..Default::default()
        });
        client.create(&route_resource(), &route).await.unwrap();

        client
            .delete(&config_map_resource(), Some("default"), "anchor")
            .await
            .unwrap();
        assert!(client.objects(&route_resource()).is_empty());
    }

    #[tokio::test]
    async fn deleting_a_namespace_removes_its_contents() {
        let client = with_namespace("default");
        client
            .create(
                &route_resource(),
                &DynamicObject::new("web", &route_resource()).within("default"),
            )
            .await
            .unwrap();
        client
            .delete(&namespace_resource(), None, "default")
            .await
            .unwrap();
        assert!(client.objects(&route_resource()).is_empty());
    }

    #[tokio::test]
    async fn merge_patches_and_selects() {
        let client = with_namespace("default");
        let mut route = DynamicObject::new("web", &route_resource()).within("default");
        route.labels_mut().insert("app".to_string(), "web".to_string());
        client.create(&route_resource(), &route).await.unwrap();

        let patched = client
            .patch(
                &route_resource(),
                Some("default"),
                "web",
                &json!({"metadata": {"labels": {"tier": "front"}}, "spec": {"x": 1}}),
            )
            .await
            .unwrap();
        assert_eq!(patched.labels().get("tier").map(String::as_str), Some("front"));
        assert_eq!(patched.data["spec"], json!({"x": 1}));

        let selector = "tier=front".parse::<Selector>().unwrap();
        let listed = client
            .list(&route_resource(), Some("default"), &selector)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        client
            .delete_all_of(&route_resource(), Some("default"), &selector)
            .await
            .unwrap();
        assert!(client.objects(&route_resource()).is_empty());
    }
}
